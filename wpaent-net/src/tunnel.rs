//! Inner EAP envelopes for the plaintext of PEAP and TTLS application data.

use crate::avp::{self, AVP_EAP_MESSAGE};
use crate::cursor::ByteCursor;
use crate::eap::{EapCode, EapPacket, EapType, EAP_HEADER_LEN};
use crate::error::CodecError;

pub const TLV_MANDATORY: u16 = 0x8000;
pub const TLV_TYPE_MASK: u16 = 0x3fff;
pub const TLV_RESULT: u16 = 3;

/// Result TLV value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum TlvResult {
    Success = 1,
    Failure = 2,
}

/// How an inner EAP packet is carried inside the TLS tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Envelope {
    /// PEAPv0: header stripped except for Extensions and Success/Failure.
    Peap,
    /// One EAP-Message AVP holding the full packet.
    Ttls,
}

impl Envelope {
    /// Decodes one decrypted record. PEAP needs the outer identifier to
    /// rebuild a stripped header.
    pub fn unwrap(self, plaintext: &[u8], outer_id: u8) -> Result<EapPacket, CodecError> {
        match self {
            Envelope::Peap => {
                if is_full_peap_header(plaintext) {
                    return EapPacket::from_bytes(plaintext);
                }
                let mut cursor = ByteCursor::new(plaintext);
                let eap_type = cursor.read_u8()?;
                Ok(EapPacket::request(outer_id, eap_type, cursor.rest()))
            }
            Envelope::Ttls => {
                let eap = avp::find(plaintext, AVP_EAP_MESSAGE)?
                    .ok_or(CodecError::MissingAttribute(AVP_EAP_MESSAGE))?;
                EapPacket::from_bytes(eap)
            }
        }
    }

    /// Encodes an inner packet for `write_app_data`.
    pub fn wrap(self, packet: &EapPacket) -> Vec<u8> {
        match self {
            Envelope::Peap => {
                let compressed = packet.code == EapCode::Response
                    && packet.eap_type() != Some(EapType::Extensions);
                if compressed {
                    packet.data.clone()
                } else {
                    packet.to_bytes()
                }
            }
            Envelope::Ttls => avp::encode_eap_message(&packet.to_bytes()),
        }
    }
}

fn is_full_peap_header(data: &[u8]) -> bool {
    if data.len() < EAP_HEADER_LEN {
        return false;
    }
    let declared = u16::from_be_bytes([data[2], data[3]]) as usize;
    if declared != data.len() {
        return false;
    }
    match data[0] {
        1 | 2 => data.get(4) == Some(&(EapType::Extensions as u8)),
        3 | 4 => data.len() == EAP_HEADER_LEN,
        _ => false,
    }
}

/// Finds the Result TLV in the type data of an Extensions packet.
pub fn parse_result_tlv(type_data: &[u8]) -> Result<Option<TlvResult>, CodecError> {
    let mut cursor = ByteCursor::new(type_data);
    while !cursor.is_empty() {
        let tlv_type = cursor.read_u16()? & TLV_TYPE_MASK;
        let length = cursor.read_u16()? as usize;
        let value = cursor.read_bytes(length)?;
        if tlv_type == TLV_RESULT {
            if length != 2 {
                return Err(CodecError::InvalidLength(length));
            }
            return match u16::from_be_bytes([value[0], value[1]]) {
                1 => Ok(Some(TlvResult::Success)),
                2 => Ok(Some(TlvResult::Failure)),
                other => Err(CodecError::InvalidLength(other as usize)),
            };
        }
    }
    Ok(None)
}

/// Result TLV echoing `result`.
pub fn build_result_tlv(result: TlvResult) -> Vec<u8> {
    let mut data = Vec::with_capacity(6);
    data.extend_from_slice(&(TLV_MANDATORY | TLV_RESULT).to_be_bytes());
    data.extend_from_slice(&2u16.to_be_bytes());
    data.extend_from_slice(&(result as u16).to_be_bytes());
    data
}
