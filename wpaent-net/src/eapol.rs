// EAPOL Packet Definitions
// Based on IEEE 802.1X

use pnet::datalink::MacAddr;
use pnet::packet::ethernet::{EtherType, EthernetPacket, MutableEthernetPacket};

use crate::cursor::ByteCursor;
use crate::error::CodecError;

pub const ETH_P_EAPOL: u16 = 0x888E;
pub const ETH_HEADER_LEN: usize = 14;
pub const EAPOL_HEADER_LEN: usize = 4;
/// Destination of EAPOL-Start when no authenticator address is known yet.
pub const PAE_GROUP_ADDR: [u8; 6] = [0x01, 0x80, 0xC2, 0x00, 0x00, 0x03];

// EAPOL Packet Type
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
pub enum EapolType {
    Eap = 0,
    Start = 1,
    Logoff = 2,
    Key = 3,
    EncapsulatedAsfAlert = 4,
}

impl TryFrom<u8> for EapolType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(EapolType::Eap),
            1 => Ok(EapolType::Start),
            2 => Ok(EapolType::Logoff),
            3 => Ok(EapolType::Key),
            4 => Ok(EapolType::EncapsulatedAsfAlert),
            other => Err(CodecError::UnknownCode(other)),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct EapolPacket<'a> {
    pub version: u8,
    pub packet_type: EapolType,
    pub length: u16,
    pub payload: &'a [u8],
}

impl<'a> EapolPacket<'a> {
    pub fn from_bytes(data: &'a [u8]) -> Result<Self, CodecError> {
        let mut cursor = ByteCursor::new(data);
        let version = cursor.read_u8()?;
        let packet_type = EapolType::try_from(cursor.read_u8()?)?;
        let length = cursor.read_u16()?;
        // Anything past `length` is Ethernet padding.
        let payload = cursor.read_bytes(length as usize)?;

        Ok(EapolPacket {
            version,
            packet_type,
            length,
            payload,
        })
    }
}

/// A received Ethernet frame carrying EAPOL.
#[derive(Debug, Clone, Copy)]
pub struct EapolFrame<'a> {
    pub destination: [u8; 6],
    pub source: [u8; 6],
    pub eapol: EapolPacket<'a>,
}

impl<'a> EapolFrame<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, CodecError> {
        let ethernet = EthernetPacket::new(data).ok_or(CodecError::PacketTooShort {
            expected: ETH_HEADER_LEN,
            actual: data.len(),
        })?;
        let ethertype = ethernet.get_ethertype();
        if ethertype != EtherType(ETH_P_EAPOL) {
            return Err(CodecError::NotEapol(ethertype.0));
        }
        let destination = octets(ethernet.get_destination());
        let source = octets(ethernet.get_source());
        let eapol = EapolPacket::from_bytes(&data[ETH_HEADER_LEN..])?;
        Ok(EapolFrame {
            destination,
            source,
            eapol,
        })
    }

    /// Offset of the EAPOL payload (the EAP packet) inside the frame.
    pub fn payload_offset() -> usize {
        ETH_HEADER_LEN + EAPOL_HEADER_LEN
    }
}

fn octets(mac: MacAddr) -> [u8; 6] {
    let MacAddr(a, b, c, d, e, f) = mac;
    [a, b, c, d, e, f]
}

/// Bytes needed for a frame carrying `payload_len` bytes of EAPOL body.
pub fn frame_len(payload_len: usize) -> usize {
    ETH_HEADER_LEN + EAPOL_HEADER_LEN + payload_len
}

/// Writes Ethernet + EAPOL headers and `payload` into `buf`. Returns the
/// number of bytes written.
pub fn write_frame(
    buf: &mut [u8],
    destination: [u8; 6],
    source: [u8; 6],
    version: u8,
    packet_type: EapolType,
    payload: &[u8],
) -> Result<usize, CodecError> {
    let total = frame_len(payload.len());
    let available = buf.len();
    if available < total {
        return Err(CodecError::CapacityExceeded {
            capacity: available,
            needed: total - available,
        });
    }
    let length =
        u16::try_from(payload.len()).map_err(|_| CodecError::InvalidLength(payload.len()))?;

    {
        let mut ethernet = MutableEthernetPacket::new(&mut buf[..ETH_HEADER_LEN]).ok_or(
            CodecError::PacketTooShort {
                expected: ETH_HEADER_LEN,
                actual: available,
            },
        )?;
        ethernet.set_destination(MacAddr::from(destination));
        ethernet.set_source(MacAddr::from(source));
        ethernet.set_ethertype(EtherType(ETH_P_EAPOL));
    }

    let eapol = &mut buf[ETH_HEADER_LEN..total];
    eapol[0] = version;
    eapol[1] = packet_type as u8;
    eapol[2..4].copy_from_slice(&length.to_be_bytes());
    eapol[4..].copy_from_slice(payload);
    Ok(total)
}
