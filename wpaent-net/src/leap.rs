//! Cisco LEAP codec. Same NT-hash and DES primitives as MS-CHAPv2, run once
//! in each direction.
//!
//! ```text
//! +---------+----------+-------+-----------------+---------+
//! | Version | Reserved | Count | Value (Count B) | Name... |
//! +---------+----------+-------+-----------------+---------+
//! ```

use getrandom::getrandom;

use crate::cursor::ByteCursor;
use crate::error::CodecError;
use crate::mschapv2::{challenge_response, hash_nt_password_hash, nt_password_hash};

pub const LEAP_VERSION: u8 = 1;
pub const LEAP_CHALLENGE_LENGTH: usize = 8;
pub const LEAP_RESPONSE_LENGTH: usize = 24;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeapPacket {
    pub version: u8,
    pub value: Vec<u8>,
    pub name: Vec<u8>,
}

impl LeapPacket {
    pub fn parse(type_data: &[u8]) -> Result<Self, CodecError> {
        let mut cursor = ByteCursor::new(type_data);
        let version = cursor.read_u8()?;
        if version != LEAP_VERSION {
            return Err(CodecError::UnexpectedType(version));
        }
        cursor.read_u8()?; // Reserved
        let count = cursor.read_u8()? as usize;
        let value = cursor.read_bytes(count)?.to_vec();
        Ok(LeapPacket {
            version,
            value,
            name: cursor.rest().to_vec(),
        })
    }

    pub fn new(value: &[u8], name: &str) -> Self {
        LeapPacket {
            version: LEAP_VERSION,
            value: value.to_vec(),
            name: name.as_bytes().to_vec(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(3 + self.value.len() + self.name.len());
        data.push(self.version);
        data.push(0);
        data.push(self.value.len() as u8);
        data.extend_from_slice(&self.value);
        data.extend_from_slice(&self.name);
        data
    }

    /// The authenticator's 8-byte challenge.
    pub fn challenge(&self) -> Result<[u8; LEAP_CHALLENGE_LENGTH], CodecError> {
        self.value
            .as_slice()
            .try_into()
            .map_err(|_| CodecError::InvalidLength(self.value.len()))
    }

    /// The authenticator's 24-byte response.
    pub fn response(&self) -> Result<[u8; LEAP_RESPONSE_LENGTH], CodecError> {
        self.value
            .as_slice()
            .try_into()
            .map_err(|_| CodecError::InvalidLength(self.value.len()))
    }
}

/// Our answer to the authenticator's challenge.
pub fn peer_response(
    challenge: &[u8; LEAP_CHALLENGE_LENGTH],
    password: &str,
) -> [u8; LEAP_RESPONSE_LENGTH] {
    challenge_response(challenge, &nt_password_hash(password))
}

/// What the authenticator must answer to our challenge, keyed by the
/// double NT hash.
pub fn expected_ap_response(
    peer_challenge: &[u8; LEAP_CHALLENGE_LENGTH],
    password: &str,
) -> [u8; LEAP_RESPONSE_LENGTH] {
    let hash_hash = hash_nt_password_hash(&nt_password_hash(password));
    challenge_response(peer_challenge, &hash_hash)
}

pub fn generate_peer_challenge() -> Result<[u8; LEAP_CHALLENGE_LENGTH], CodecError> {
    let mut challenge = [0u8; LEAP_CHALLENGE_LENGTH];
    getrandom(&mut challenge).map_err(|_| CodecError::Random)?;
    Ok(challenge)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_challenge_request() {
        let mut data = vec![1, 0, 8];
        data.extend_from_slice(&[0x5a; 8]);
        data.extend_from_slice(b"ap");
        let packet = LeapPacket::parse(&data).unwrap();
        assert_eq!(packet.challenge().unwrap(), [0x5a; 8]);
        assert_eq!(packet.name, b"ap");
        assert!(packet.response().is_err());
    }

    #[test]
    fn test_round_trip_bytes() {
        let packet = LeapPacket::new(&[1; 24], "alice");
        let bytes = packet.to_bytes();
        assert_eq!(&bytes[..3], &[1, 0, 24]);
        assert_eq!(LeapPacket::parse(&bytes).unwrap(), packet);
    }

    #[test]
    fn test_bad_version_and_truncation() {
        assert_eq!(
            LeapPacket::parse(&[2, 0, 0]).unwrap_err(),
            CodecError::UnexpectedType(2)
        );
        assert!(LeapPacket::parse(&[1, 0, 8, 1, 2]).is_err());
    }

    #[test]
    fn test_responses_use_different_keys() {
        let challenge = [0x11; 8];
        let peer = peer_response(&challenge, "clientPass");
        let ap = expected_ap_response(&challenge, "clientPass");
        assert_ne!(peer, ap);
        assert_eq!(
            peer,
            challenge_response(&challenge, &nt_password_hash("clientPass"))
        );
        assert_ne!(ap, expected_ap_response(&challenge, "otherPass"));
    }
}
