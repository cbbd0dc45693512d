use thiserror::Error;

/// Decoding and encoding failures of the wire codecs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("packet too short: expected at least {expected} bytes, got {actual}")]
    PacketTooShort { expected: usize, actual: usize },

    #[error("invalid length field: {0}")]
    InvalidLength(usize),

    #[error("unknown code {0}")]
    UnknownCode(u8),

    #[error("unexpected type {0}")]
    UnexpectedType(u8),

    #[error("not an EAPOL frame (ethertype {0:#06x})")]
    NotEapol(u16),

    #[error("buffer capacity {capacity} exceeded by {needed} bytes")]
    CapacityExceeded { capacity: usize, needed: usize },

    #[error("required attribute {0} missing")]
    MissingAttribute(u32),

    #[error("random source failed")]
    Random,
}

impl From<CodecError> for wpaent_core::Error {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::CapacityExceeded { .. } => wpaent_core::Error::OutOfMemory(err.to_string()),
            other => wpaent_core::Error::Protocol(other.to_string()),
        }
    }
}
