//! RNG and byte-handling helpers for the crypto layer.

use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroize;

use super::aes::{AES_GCM_IV_SIZE, AES_KEY_SIZE};
use super::aes_ctr::AES_CTR_IV_SIZE;

#[derive(Debug, Error)]
pub enum UtilError {
    #[error("Invalid hex string")]
    InvalidHex,
}

/// Generate cryptographically secure random bytes.
pub fn generate_random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    buf
}

/// Generate a random 32-byte symmetric key (folder keys, file keys).
pub fn generate_symmetric_key() -> [u8; AES_KEY_SIZE] {
    let mut key = [0u8; AES_KEY_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

/// Generate a random 12-byte GCM IV.
pub fn generate_iv() -> [u8; AES_GCM_IV_SIZE] {
    let mut iv = [0u8; AES_GCM_IV_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut iv);
    iv
}

/// Generate a 16-byte CTR counter block: 8 random nonce bytes followed by
/// a big-endian counter initialized to zero.
pub fn generate_ctr_iv() -> [u8; AES_CTR_IV_SIZE] {
    let mut iv = [0u8; AES_CTR_IV_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut iv[..8]);
    iv
}

/// Generate an opaque lowercase-hex object id (32 hex chars).
pub fn generate_object_id() -> String {
    hex::encode(generate_random_bytes(16))
}

/// Decode a hex string.
pub fn hex_to_bytes(hex: &str) -> Result<Vec<u8>, UtilError> {
    hex::decode(hex).map_err(|_| UtilError::InvalidHex)
}

/// Encode bytes as lowercase hex.
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Overwrite sensitive bytes in place.
pub fn clear_bytes(buf: &mut [u8]) {
    buf.zeroize();
}

/// Current time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
