use crate::cursor::ByteCursor;
use crate::error::CodecError;

pub const EAP_HEADER_LEN: usize = 4;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
pub enum EapCode {
    Request = 1,
    Response = 2,
    Success = 3,
    Failure = 4,
}

impl TryFrom<u8> for EapCode {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(EapCode::Request),
            2 => Ok(EapCode::Response),
            3 => Ok(EapCode::Success),
            4 => Ok(EapCode::Failure),
            other => Err(CodecError::UnknownCode(other)),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
pub enum EapType {
    Identity = 1,
    Notification = 2,
    Nak = 3, // Response only
    Md5Challenge = 4,
    Tls = 13,
    Leap = 17,
    Ttls = 21,
    Peap = 25,
    MsChapV2 = 26,
    Extensions = 33,
}

impl TryFrom<u8> for EapType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(EapType::Identity),
            2 => Ok(EapType::Notification),
            3 => Ok(EapType::Nak),
            4 => Ok(EapType::Md5Challenge),
            13 => Ok(EapType::Tls),
            17 => Ok(EapType::Leap),
            21 => Ok(EapType::Ttls),
            25 => Ok(EapType::Peap),
            26 => Ok(EapType::MsChapV2),
            33 => Ok(EapType::Extensions),
            other => Err(CodecError::UnexpectedType(other)),
        }
    }
}

/// An EAP packet. `data` starts with the type byte for Request/Response and
/// is empty for Success/Failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EapPacket {
    pub code: EapCode,
    pub identifier: u8,
    pub data: Vec<u8>,
}

impl EapPacket {
    /// Parses one packet. Bytes past the EAP length field are ignored.
    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        let mut cursor = ByteCursor::new(data);
        let code = EapCode::try_from(cursor.read_u8()?)?;
        let identifier = cursor.read_u8()?;
        let length = cursor.read_u16()? as usize;
        if length < EAP_HEADER_LEN {
            return Err(CodecError::InvalidLength(length));
        }
        let body = cursor.read_bytes(length - EAP_HEADER_LEN)?;
        if matches!(code, EapCode::Request | EapCode::Response) && body.is_empty() {
            return Err(CodecError::PacketTooShort {
                expected: EAP_HEADER_LEN + 1,
                actual: length,
            });
        }
        Ok(EapPacket {
            code,
            identifier,
            data: body.to_vec(),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let length = (EAP_HEADER_LEN + self.data.len()) as u16;
        let mut bytes = Vec::with_capacity(length as usize);
        bytes.push(self.code as u8);
        bytes.push(self.identifier);
        bytes.extend_from_slice(&length.to_be_bytes());
        bytes.extend_from_slice(&self.data);
        bytes
    }

    /// Raw type byte, if the code carries one.
    pub fn type_byte(&self) -> Option<u8> {
        match self.code {
            EapCode::Request | EapCode::Response => self.data.first().copied(),
            EapCode::Success | EapCode::Failure => None,
        }
    }

    pub fn eap_type(&self) -> Option<EapType> {
        self.type_byte().and_then(|t| EapType::try_from(t).ok())
    }

    /// Bytes after the type byte.
    pub fn type_data(&self) -> &[u8] {
        match self.type_byte() {
            Some(_) => &self.data[1..],
            None => &[],
        }
    }

    pub fn response(identifier: u8, eap_type: u8, type_data: &[u8]) -> Self {
        let mut data = Vec::with_capacity(1 + type_data.len());
        data.push(eap_type);
        data.extend_from_slice(type_data);
        EapPacket {
            code: EapCode::Response,
            identifier,
            data,
        }
    }

    pub fn request(identifier: u8, eap_type: u8, type_data: &[u8]) -> Self {
        EapPacket {
            code: EapCode::Request,
            ..Self::response(identifier, eap_type, type_data)
        }
    }

    pub fn identity_response(identifier: u8, identity: &str) -> Self {
        Self::response(identifier, EapType::Identity as u8, identity.as_bytes())
    }

    /// Legacy NAK proposing `desired` as the only acceptable type.
    pub fn nak(identifier: u8, desired: u8) -> Self {
        Self::response(identifier, EapType::Nak as u8, &[desired])
    }

    pub fn notification_response(identifier: u8) -> Self {
        Self::response(identifier, EapType::Notification as u8, &[])
    }

    pub fn success(identifier: u8) -> Self {
        EapPacket {
            code: EapCode::Success,
            identifier,
            data: Vec::new(),
        }
    }

    pub fn failure(identifier: u8) -> Self {
        EapPacket {
            code: EapCode::Failure,
            identifier,
            data: Vec::new(),
        }
    }
}
