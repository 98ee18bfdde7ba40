//! AES-256-GCM authenticated encryption.
//!
//! Used for metadata envelopes and default file bodies. Ciphertext carries
//! the 16-byte auth tag appended (same layout as the Web Crypto API, which
//! the web client uses).

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use thiserror::Error;

/// AES-256 key size in bytes.
pub const AES_KEY_SIZE: usize = 32;

/// AES-GCM IV size in bytes (96 bits).
pub const AES_GCM_IV_SIZE: usize = 12;

/// AES-GCM authentication tag size in bytes.
pub const AES_TAG_SIZE: usize = 16;

#[derive(Debug, Error)]
pub enum AesError {
    #[error("Encryption failed")]
    EncryptionFailed,
    #[error("Decryption failed")]
    DecryptionFailed,
    #[error("Invalid key size")]
    InvalidKeySize,
    #[error("Invalid IV size")]
    InvalidIvSize,
}

/// Encrypt with AES-256-GCM. Returns ciphertext with the tag appended.
///
/// The IV must come from a cryptographic RNG and never repeat under the
/// same key.
pub fn encrypt_aes_gcm(
    plaintext: &[u8],
    key: &[u8; AES_KEY_SIZE],
    iv: &[u8; AES_GCM_IV_SIZE],
) -> Result<Vec<u8>, AesError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| AesError::EncryptionFailed)?;
    cipher
        .encrypt(Nonce::from_slice(iv), plaintext)
        .map_err(|_| AesError::EncryptionFailed)
}

/// Decrypt AES-256-GCM ciphertext (tag appended). Tag mismatch and every
/// other failure collapse to `DecryptionFailed`.
pub fn decrypt_aes_gcm(
    ciphertext: &[u8],
    key: &[u8; AES_KEY_SIZE],
    iv: &[u8; AES_GCM_IV_SIZE],
) -> Result<Vec<u8>, AesError> {
    if ciphertext.len() < AES_TAG_SIZE {
        return Err(AesError::DecryptionFailed);
    }
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| AesError::DecryptionFailed)?;
    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| AesError::DecryptionFailed)
}
