//! EAP-TLS payload framing (RFC 5216), shared by PEAP and TTLS.
//!
//! ```text
//!  0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |L M S R R  Ver |            TLS Message Length (only if L)                     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  TLS Data...
//! ```

use crate::cursor::ByteCursor;
use crate::error::CodecError;

/// Flags byte plus the optional 4-byte total length.
pub const TLS_HEADER_MAX: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TlsFlags(u8);

impl TlsFlags {
    pub const LENGTH_INCLUDED: u8 = 0x80;
    pub const MORE_FRAGMENTS: u8 = 0x40;
    pub const START: u8 = 0x20;
    pub const VERSION_MASK: u8 = 0x07;

    pub fn new(length_included: bool, more_fragments: bool, start: bool) -> Self {
        let mut flags = 0u8;
        if length_included {
            flags |= Self::LENGTH_INCLUDED;
        }
        if more_fragments {
            flags |= Self::MORE_FRAGMENTS;
        }
        if start {
            flags |= Self::START;
        }
        TlsFlags(flags)
    }

    /// Reserved bits are dropped; the version bits are kept.
    pub fn from_u8(value: u8) -> Self {
        TlsFlags(value & (0xE0 | Self::VERSION_MASK))
    }

    pub fn as_u8(self) -> u8 {
        self.0
    }

    pub fn length_included(self) -> bool {
        (self.0 & Self::LENGTH_INCLUDED) != 0
    }

    pub fn more_fragments(self) -> bool {
        (self.0 & Self::MORE_FRAGMENTS) != 0
    }

    pub fn start(self) -> bool {
        (self.0 & Self::START) != 0
    }

    /// PEAP/TTLS version advertised by the peer.
    pub fn version(self) -> u8 {
        self.0 & Self::VERSION_MASK
    }
}

/// An inbound EAP-TLS payload, borrowed from the received frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EapTlsFragment<'a> {
    pub flags: TlsFlags,
    pub message_length: Option<u32>,
    pub data: &'a [u8],
}

impl<'a> EapTlsFragment<'a> {
    /// Parses the bytes that follow the EAP type byte. The length field is
    /// honoured whenever L is set, not only on the first fragment of a flight.
    pub fn parse(type_data: &'a [u8]) -> Result<Self, CodecError> {
        let mut cursor = ByteCursor::new(type_data);
        let flags = TlsFlags::from_u8(cursor.read_u8()?);
        let message_length = if flags.length_included() {
            Some(cursor.read_u32()?)
        } else {
            None
        };
        Ok(EapTlsFragment {
            flags,
            message_length,
            data: cursor.rest(),
        })
    }
}

/// An outbound EAP-TLS payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EapTlsPacket {
    pub flags: TlsFlags,
    pub tls_message_length: Option<u32>,
    pub tls_data: Vec<u8>,
}

impl EapTlsPacket {
    pub fn new(flags: TlsFlags, tls_message_length: Option<u32>, tls_data: Vec<u8>) -> Self {
        EapTlsPacket {
            flags,
            tls_message_length,
            tls_data,
        }
    }

    /// Zero-length response. Acknowledges a fragment, or ends a handshake.
    pub fn ack() -> Self {
        EapTlsPacket::new(TlsFlags::default(), None, Vec::new())
    }

    pub fn to_eap_data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(TLS_HEADER_MAX + self.tls_data.len());
        data.push(self.flags.as_u8());
        if let Some(length) = self.tls_message_length {
            data.extend_from_slice(&length.to_be_bytes());
        }
        data.extend_from_slice(&self.tls_data);
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let flags = TlsFlags::new(true, true, false);
        assert_eq!(flags.as_u8(), 0xC0);
        assert!(flags.length_included());
        assert!(flags.more_fragments());
        assert!(!flags.start());

        // PEAP start with version 0, reserved bit set.
        let flags = TlsFlags::from_u8(0x38);
        assert!(flags.start());
        assert_eq!(flags.as_u8(), 0x20);
        assert_eq!(TlsFlags::from_u8(0x21).version(), 1);
    }

    #[test]
    fn test_parse_first_fragment() {
        let data = [0xC0, 0x00, 0x00, 0x01, 0x00, 0x16, 0x03];
        let fragment = EapTlsFragment::parse(&data).unwrap();
        assert_eq!(fragment.message_length, Some(256));
        assert_eq!(fragment.data, &[0x16, 0x03]);
    }

    #[test]
    fn test_parse_continuation_and_start() {
        let fragment = EapTlsFragment::parse(&[0x40, 0xaa]).unwrap();
        assert_eq!(fragment.message_length, None);
        assert!(fragment.flags.more_fragments());
        assert_eq!(fragment.data, &[0xaa]);

        let start = EapTlsFragment::parse(&[0x20]).unwrap();
        assert!(start.flags.start());
        assert!(start.data.is_empty());
    }

    #[test]
    fn test_truncated_length_field() {
        assert!(matches!(
            EapTlsFragment::parse(&[0x80, 0x00, 0x01]),
            Err(CodecError::PacketTooShort { .. })
        ));
        assert!(EapTlsFragment::parse(&[]).is_err());
    }

    #[test]
    fn test_ack_is_single_zero_byte() {
        let ack = EapTlsPacket::ack();
        assert_eq!(ack.to_eap_data(), vec![0x00]);

        let first = EapTlsPacket::new(TlsFlags::new(true, false, false), Some(2), vec![1, 2]);
        assert_eq!(first.to_eap_data(), vec![0x80, 0, 0, 0, 2, 1, 2]);
    }
}
