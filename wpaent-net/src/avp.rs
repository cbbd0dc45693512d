//! Diameter-style AVPs as carried by EAP-TTLS (RFC 5281 section 10).
//!
//! ```text
//! +---------------------------------------------------------------+
//! |                           AVP Code                            |
//! +---------------+-----------------------------------------------+
//! |V M r r r r r r|                  AVP Length                   |
//! +---------------+-----------------------------------------------+
//! |                    Vendor-ID (only if V)                      |
//! +---------------------------------------------------------------+
//! |    Data ...
//! ```
//!
//! The length covers header and data but not the padding to the next
//! 4-byte boundary.

use crate::cursor::ByteCursor;
use crate::error::CodecError;

pub const AVP_EAP_MESSAGE: u32 = 79;
pub const AVP_FLAG_VENDOR: u8 = 0x80;
pub const AVP_FLAG_MANDATORY: u8 = 0x40;
pub const AVP_HEADER_LEN: usize = 8;
pub const AVP_VENDOR_HEADER_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Avp<'a> {
    pub code: u32,
    pub flags: u8,
    pub vendor_id: Option<u32>,
    pub data: &'a [u8],
}

impl Avp<'_> {
    pub fn is_vendor(&self) -> bool {
        self.flags & AVP_FLAG_VENDOR != 0
    }

    pub fn is_mandatory(&self) -> bool {
        self.flags & AVP_FLAG_MANDATORY != 0
    }
}

fn padding(len: usize) -> usize {
    (4 - len % 4) % 4
}

/// Encodes one AVP, padded to a 4-byte boundary.
pub fn encode(code: u32, flags: u8, vendor_id: Option<u32>, data: &[u8]) -> Vec<u8> {
    let (flags, header_len) = match vendor_id {
        Some(_) => (flags | AVP_FLAG_VENDOR, AVP_VENDOR_HEADER_LEN),
        None => (flags & !AVP_FLAG_VENDOR, AVP_HEADER_LEN),
    };
    let length = header_len + data.len();
    let mut out = Vec::with_capacity(length + padding(length));
    out.extend_from_slice(&code.to_be_bytes());
    out.push(flags);
    out.extend_from_slice(&(length as u32).to_be_bytes()[1..]);
    if let Some(vendor) = vendor_id {
        out.extend_from_slice(&vendor.to_be_bytes());
    }
    out.extend_from_slice(data);
    out.resize(length + padding(length), 0);
    out
}

/// EAP-Message AVP wrapping a full EAP packet.
pub fn encode_eap_message(eap: &[u8]) -> Vec<u8> {
    encode(AVP_EAP_MESSAGE, AVP_FLAG_MANDATORY, None, eap)
}

/// Linear scan over a buffer of AVPs.
#[derive(Debug, Clone)]
pub struct AvpIter<'a> {
    cursor: ByteCursor<'a>,
    failed: bool,
}

impl<'a> AvpIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        AvpIter {
            cursor: ByteCursor::new(data),
            failed: false,
        }
    }

    fn next_avp(&mut self) -> Result<Avp<'a>, CodecError> {
        let code = self.cursor.read_u32()?;
        let flags = self.cursor.read_u8()?;
        let length = self.cursor.read_u24()? as usize;
        let (vendor_id, header_len) = if flags & AVP_FLAG_VENDOR != 0 {
            (Some(self.cursor.read_u32()?), AVP_VENDOR_HEADER_LEN)
        } else {
            (None, AVP_HEADER_LEN)
        };
        if length < header_len {
            return Err(CodecError::InvalidLength(length));
        }
        let data = self.cursor.read_bytes(length - header_len)?;
        // The final record may omit its padding.
        self.cursor.skip_clamped(padding(length));
        Ok(Avp {
            code,
            flags,
            vendor_id,
            data,
        })
    }
}

impl<'a> Iterator for AvpIter<'a> {
    type Item = Result<Avp<'a>, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.cursor.is_empty() {
            return None;
        }
        let item = self.next_avp();
        self.failed = item.is_err();
        Some(item)
    }
}

/// Data of the first non-vendor AVP with `code`. Vendor-specific AVPs are
/// not supported and never match.
pub fn find(data: &[u8], code: u32) -> Result<Option<&[u8]>, CodecError> {
    for avp in AvpIter::new(data) {
        let avp = avp?;
        if avp.code == code && !avp.is_vendor() {
            return Ok(Some(avp.data));
        }
    }
    Ok(None)
}
