//! AES-256-CTR streaming cipher for media file bodies.
//!
//! CTR mode allows any byte range to be decrypted without processing the
//! preceding bytes, which streaming playback needs. The counter block is
//! 8 bytes of random nonce followed by an 8-byte big-endian counter
//! starting at zero (`Ctr64BE`, matching Web Crypto `AES-CTR` with
//! `length: 64`).
//!
//! CTR provides no authentication. Integrity of a CTR body comes from the
//! content hash of the pinned block, which is itself covered by the signed
//! mutable pointer that references it.

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use thiserror::Error;

use super::aes::AES_KEY_SIZE;

/// CTR counter block size in bytes: nonce (8) || big-endian counter (8).
pub const AES_CTR_IV_SIZE: usize = 16;

/// AES block size in bytes.
const AES_BLOCK_SIZE: usize = 16;

type Aes256Ctr64BE = ctr::Ctr64BE<Aes256>;

#[derive(Debug, Error)]
pub enum AesCtrError {
    #[error("Invalid key size")]
    InvalidKeySize,
    #[error("Invalid IV size")]
    InvalidIvSize,
    #[error("Encryption failed")]
    EncryptionFailed,
    #[error("Decryption failed")]
    DecryptionFailed,
    #[error("Invalid range")]
    InvalidRange,
}

/// Encrypt with AES-256-CTR. Output length equals input length.
///
/// Each body version uses a fresh key, so nonce+key pairs never repeat.
pub fn encrypt_aes_ctr(
    plaintext: &[u8],
    key: &[u8; AES_KEY_SIZE],
    iv: &[u8; AES_CTR_IV_SIZE],
) -> Result<Vec<u8>, AesCtrError> {
    let mut cipher = Aes256Ctr64BE::new(key.into(), iv.into());
    let mut output = plaintext.to_vec();
    cipher.apply_keystream(&mut output);
    Ok(output)
}

/// Decrypt AES-256-CTR data. CTR is its own inverse; a separate function
/// keeps call sites readable.
pub fn decrypt_aes_ctr(
    ciphertext: &[u8],
    key: &[u8; AES_KEY_SIZE],
    iv: &[u8; AES_CTR_IV_SIZE],
) -> Result<Vec<u8>, AesCtrError> {
    encrypt_aes_ctr(ciphertext, key, iv)
}

/// Decrypt the inclusive byte range `[start_byte, end_byte]` from CTR
/// ciphertext.
///
/// The requested range is block-aligned, the keystream is seeked to the
/// starting block (counter = base counter + start_block), the aligned span
/// is decrypted, and the exact bytes are sliced out. Ranges beyond the
/// available data are clamped; a fully out-of-range request yields an
/// empty vector.
pub fn decrypt_aes_ctr_range(
    ciphertext: &[u8],
    key: &[u8; AES_KEY_SIZE],
    iv: &[u8; AES_CTR_IV_SIZE],
    start_byte: usize,
    end_byte: usize,
) -> Result<Vec<u8>, AesCtrError> {
    if start_byte > end_byte {
        return Err(AesCtrError::InvalidRange);
    }
    if ciphertext.is_empty() || start_byte >= ciphertext.len() {
        return Ok(Vec::new());
    }

    let clamped_end = end_byte.min(ciphertext.len() - 1);

    let start_block = start_byte / AES_BLOCK_SIZE;
    let end_block = clamped_end / AES_BLOCK_SIZE;
    let aligned_start = start_block * AES_BLOCK_SIZE;
    let aligned_end = ((end_block + 1) * AES_BLOCK_SIZE).min(ciphertext.len());

    // Counter block for the starting position: nonce unchanged, counter
    // advanced by the number of whole blocks skipped.
    let mut counter = [0u8; AES_CTR_IV_SIZE];
    counter[..8].copy_from_slice(&iv[..8]);
    let base = u64::from_be_bytes(iv[8..16].try_into().map_err(|_| AesCtrError::InvalidIvSize)?);
    counter[8..16].copy_from_slice(&base.wrapping_add(start_block as u64).to_be_bytes());

    let mut cipher = Aes256Ctr64BE::new(key.into(), &counter.into());
    let mut decrypted = ciphertext[aligned_start..aligned_end].to_vec();
    cipher.apply_keystream(&mut decrypted);

    let offset = start_byte - aligned_start;
    let len = clamped_end - start_byte + 1;
    Ok(decrypted[offset..offset + len].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::utils::{generate_ctr_iv, generate_symmetric_key};

    #[test]
    fn test_ctr_round_trip() {
        let key = generate_symmetric_key();
        let iv = generate_ctr_iv();
        let plaintext: Vec<u8> = (0..1000).map(|i| (i % 251) as u8).collect();

        let ct = encrypt_aes_ctr(&plaintext, &key, &iv).unwrap();
        assert_eq!(ct.len(), plaintext.len());
        assert_ne!(ct, plaintext);

        let pt = decrypt_aes_ctr(&ct, &key, &iv).unwrap();
        assert_eq!(pt, plaintext);
    }

    #[test]
    fn test_ctr_range_matches_full_decrypt() {
        let key = generate_symmetric_key();
        let iv = generate_ctr_iv();
        let plaintext: Vec<u8> = (0..4096).map(|i| (i * 7 % 256) as u8).collect();
        let ct = encrypt_aes_ctr(&plaintext, &key, &iv).unwrap();

        // Unaligned range spanning several blocks.
        let range = decrypt_aes_ctr_range(&ct, &key, &iv, 100, 999).unwrap();
        assert_eq!(range, &plaintext[100..1000]);

        // Block-aligned range.
        let range = decrypt_aes_ctr_range(&ct, &key, &iv, 256, 511).unwrap();
        assert_eq!(range, &plaintext[256..512]);

        // Single byte.
        let range = decrypt_aes_ctr_range(&ct, &key, &iv, 17, 17).unwrap();
        assert_eq!(range, &plaintext[17..18]);
    }

    #[test]
    fn test_ctr_range_clamps_past_end() {
        let key = generate_symmetric_key();
        let iv = generate_ctr_iv();
        let plaintext = vec![0xABu8; 100];
        let ct = encrypt_aes_ctr(&plaintext, &key, &iv).unwrap();

        let range = decrypt_aes_ctr_range(&ct, &key, &iv, 90, 10_000).unwrap();
        assert_eq!(range, &plaintext[90..100]);

        let empty = decrypt_aes_ctr_range(&ct, &key, &iv, 100, 200).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_ctr_range_inverted_rejected() {
        let key = generate_symmetric_key();
        let iv = generate_ctr_iv();
        let ct = encrypt_aes_ctr(&[1, 2, 3], &key, &iv).unwrap();
        assert!(matches!(
            decrypt_aes_ctr_range(&ct, &key, &iv, 2, 1),
            Err(AesCtrError::InvalidRange)
        ));
    }

}
