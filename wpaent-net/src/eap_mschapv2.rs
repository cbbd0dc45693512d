//! EAP-MSCHAPv2 packets (draft-kamath-pppext-eap-mschapv2), client side.
//! Everything here works on the bytes after the EAP type byte.

use crate::cursor::ByteCursor;
use crate::error::CodecError;
use crate::mschapv2::{CHALLENGE_LENGTH, NT_RESPONSE_LENGTH};

/// Peer challenge + reserved + NT response + flags.
pub const RESPONSE_VALUE_SIZE: u8 = 0x31;
/// Op-code, id, MS-Length, value-size and the 49-byte value.
const RESPONSE_FIXED_LEN: usize = 5 + RESPONSE_VALUE_SIZE as usize;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
pub enum OpCode {
    Challenge = 1,
    Response = 2,
    Success = 3,
    Failure = 4,
}

impl TryFrom<u8> for OpCode {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(OpCode::Challenge),
            2 => Ok(OpCode::Response),
            3 => Ok(OpCode::Success),
            4 => Ok(OpCode::Failure),
            other => Err(CodecError::UnknownCode(other)),
        }
    }
}

/// A request from the authenticator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MsChapV2Request {
    Challenge {
        ms_id: u8,
        challenge: [u8; CHALLENGE_LENGTH],
        name: Vec<u8>,
    },
    /// Carries `S=<auth response> M=<message>`.
    Success { ms_id: u8, message: Vec<u8> },
    /// Carries `E=eeee R=r C=cccc V=vvvv M=<message>`.
    Failure { ms_id: u8, message: Vec<u8> },
}

impl MsChapV2Request {
    pub fn parse(type_data: &[u8]) -> Result<Self, CodecError> {
        let mut cursor = ByteCursor::new(type_data);
        let op_code = OpCode::try_from(cursor.read_u8()?)?;
        let ms_id = cursor.read_u8()?;
        let ms_length = cursor.read_u16()? as usize;
        if ms_length > type_data.len() {
            return Err(CodecError::InvalidLength(ms_length));
        }

        match op_code {
            OpCode::Challenge => {
                let value_size = cursor.read_u8()?;
                if value_size as usize != CHALLENGE_LENGTH {
                    return Err(CodecError::InvalidLength(value_size as usize));
                }
                let challenge = cursor.read_array::<CHALLENGE_LENGTH>()?;
                let name_len = ms_length.saturating_sub(cursor.offset());
                let name = cursor.read_bytes(name_len)?.to_vec();
                Ok(MsChapV2Request::Challenge {
                    ms_id,
                    challenge,
                    name,
                })
            }
            OpCode::Success | OpCode::Failure => {
                let message_len = ms_length.saturating_sub(cursor.offset());
                let message = cursor.read_bytes(message_len)?.to_vec();
                if op_code == OpCode::Success {
                    Ok(MsChapV2Request::Success { ms_id, message })
                } else {
                    Ok(MsChapV2Request::Failure { ms_id, message })
                }
            }
            OpCode::Response => Err(CodecError::UnexpectedType(op_code as u8)),
        }
    }
}

/// Builds the Response to a Challenge.
pub fn build_response(
    ms_id: u8,
    peer_challenge: &[u8; CHALLENGE_LENGTH],
    nt_response: &[u8; NT_RESPONSE_LENGTH],
    name: &str,
) -> Vec<u8> {
    let length = (RESPONSE_FIXED_LEN + name.len()) as u16;
    let mut data = Vec::with_capacity(length as usize);
    data.push(OpCode::Response as u8);
    data.push(ms_id);
    data.extend_from_slice(&length.to_be_bytes());
    data.push(RESPONSE_VALUE_SIZE);
    data.extend_from_slice(peer_challenge);
    data.extend_from_slice(&[0u8; 8]); // Reserved
    data.extend_from_slice(nt_response);
    data.push(0); // Flags
    data.extend_from_slice(name.as_bytes());
    data
}

/// One-byte acknowledgement of a Success request.
pub fn build_success_ack() -> Vec<u8> {
    vec![OpCode::Success as u8]
}

/// One-byte acknowledgement of a Failure request.
pub fn build_failure_ack() -> Vec<u8> {
    vec![OpCode::Failure as u8]
}

/// Extracts the `E=` code from a failure message, if present.
pub fn failure_code(message: &[u8]) -> Option<u32> {
    let text = std::str::from_utf8(message).ok()?;
    text.split_whitespace()
        .find_map(|field| field.strip_prefix("E="))
        .and_then(|code| code.parse().ok())
}
