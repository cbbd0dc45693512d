//! MS-CHAPv2 primitives (RFC 2759), peer side.

use des::cipher::generic_array::GenericArray;
use des::cipher::{BlockEncrypt, KeyInit};
use des::Des;
use getrandom::getrandom;
use md4::{Digest, Md4};
use sha1::Sha1;

use crate::error::CodecError;

pub const CHALLENGE_LENGTH: usize = 16;
pub const NT_RESPONSE_LENGTH: usize = 24;
pub const AUTH_RESPONSE_LENGTH: usize = 42; // "S=" + 40 hex chars

const MAGIC1: &[u8; 39] = b"Magic server to client signing constant";
const MAGIC2: &[u8; 41] = b"Pad to make it do more than one iteration";

/// MD4 over the UTF-16LE encoding of the password.
pub fn nt_password_hash(password: &str) -> [u8; 16] {
    let mut hasher = Md4::new();
    hasher.update(
        password
            .encode_utf16()
            .flat_map(|c| c.to_le_bytes())
            .collect::<Vec<u8>>(),
    );
    hasher.finalize().into()
}

pub fn hash_nt_password_hash(password_hash: &[u8; 16]) -> [u8; 16] {
    Md4::digest(password_hash).into()
}

/// Drops a leading `DOMAIN\` from a user name.
pub fn strip_domain(user_name: &str) -> &str {
    match user_name.rfind('\\') {
        Some(pos) => &user_name[pos + 1..],
        None => user_name,
    }
}

pub fn challenge_hash(
    peer_challenge: &[u8; CHALLENGE_LENGTH],
    authenticator_challenge: &[u8; CHALLENGE_LENGTH],
    user_name: &str,
) -> [u8; 8] {
    let mut hasher = Sha1::new();
    hasher.update(peer_challenge);
    hasher.update(authenticator_challenge);
    hasher.update(strip_domain(user_name).as_bytes());
    let hash = hasher.finalize();
    let mut out = [0u8; 8];
    out.copy_from_slice(&hash[..8]);
    out
}

/// Expands a 7-byte key to an 8-byte DES key with odd parity.
fn des_key(key: &[u8]) -> [u8; 8] {
    let mut expanded = [0u8; 8];
    expanded[0] = key[0];
    expanded[1] = ((key[0] << 7) & 0x80) | (key[1] >> 1);
    expanded[2] = ((key[1] << 6) & 0xC0) | (key[2] >> 2);
    expanded[3] = ((key[2] << 5) & 0xE0) | (key[3] >> 3);
    expanded[4] = ((key[3] << 4) & 0xF0) | (key[4] >> 4);
    expanded[5] = ((key[4] << 3) & 0xF8) | (key[5] >> 5);
    expanded[6] = ((key[5] << 2) & 0xFC) | (key[6] >> 6);
    expanded[7] = (key[6] << 1) & 0xFE;

    for byte in expanded.iter_mut() {
        if byte.count_ones() % 2 == 0 {
            *byte |= 1;
        }
    }
    expanded
}

fn des_encrypt(key: &[u8], data: &[u8; 8]) -> [u8; 8] {
    let des = Des::new(GenericArray::from_slice(&des_key(key)));
    let mut block = *GenericArray::from_slice(data);
    des.encrypt_block(&mut block);
    block.into()
}

/// Zero-pads the hash to 21 bytes and DES-encrypts `challenge` under each
/// 7-byte third.
pub fn challenge_response(
    challenge: &[u8; 8],
    password_hash: &[u8; 16],
) -> [u8; NT_RESPONSE_LENGTH] {
    let mut padded = [0u8; 21];
    padded[..16].copy_from_slice(password_hash);

    let mut response = [0u8; NT_RESPONSE_LENGTH];
    for (i, key) in padded.chunks(7).enumerate() {
        response[i * 8..(i + 1) * 8].copy_from_slice(&des_encrypt(key, challenge));
    }
    response
}

pub fn generate_nt_response(
    authenticator_challenge: &[u8; CHALLENGE_LENGTH],
    peer_challenge: &[u8; CHALLENGE_LENGTH],
    user_name: &str,
    password: &str,
) -> [u8; NT_RESPONSE_LENGTH] {
    let challenge = challenge_hash(peer_challenge, authenticator_challenge, user_name);
    challenge_response(&challenge, &nt_password_hash(password))
}

/// The `S=<hex>` string the authenticator must send on success.
pub fn generate_authenticator_response(
    password: &str,
    nt_response: &[u8; NT_RESPONSE_LENGTH],
    peer_challenge: &[u8; CHALLENGE_LENGTH],
    authenticator_challenge: &[u8; CHALLENGE_LENGTH],
    user_name: &str,
) -> [u8; AUTH_RESPONSE_LENGTH] {
    let hash_hash = hash_nt_password_hash(&nt_password_hash(password));

    let mut sha = Sha1::new();
    sha.update(hash_hash);
    sha.update(nt_response);
    sha.update(MAGIC1);
    let digest = sha.finalize();

    let challenge = challenge_hash(peer_challenge, authenticator_challenge, user_name);
    let mut sha = Sha1::new();
    sha.update(digest);
    sha.update(challenge);
    sha.update(MAGIC2);
    let digest = sha.finalize();

    let mut response = [0u8; AUTH_RESPONSE_LENGTH];
    response[0..2].copy_from_slice(b"S=");
    let upper = hex::encode_upper(digest);
    response[2..].copy_from_slice(upper.as_bytes());
    response
}

/// Compares the authenticator's message against the expected `S=` string.
/// Case-insensitive on the hex digits; trailing ` M=...` text is allowed.
pub fn check_authenticator_response(
    received: &[u8],
    expected: &[u8; AUTH_RESPONSE_LENGTH],
) -> bool {
    received.len() >= AUTH_RESPONSE_LENGTH
        && received[..AUTH_RESPONSE_LENGTH].eq_ignore_ascii_case(expected)
}

pub fn generate_challenge() -> Result<[u8; CHALLENGE_LENGTH], CodecError> {
    let mut challenge = [0u8; CHALLENGE_LENGTH];
    getrandom(&mut challenge).map_err(|_| CodecError::Random)?;
    Ok(challenge)
}
