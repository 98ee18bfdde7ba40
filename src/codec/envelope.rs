//! The encrypted metadata envelope.
//!
//! Every metadata blob on the network is the same JSON shape:
//! `{ "iv": hex(12 bytes), "data": base64(ciphertext || tag) }`, where the
//! ciphertext is the AES-256-GCM encryption of the object's canonical JSON
//! under the appropriate key from the hierarchy.

use base64::Engine;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use super::CodecError;
use crate::crypto::aes::{decrypt_aes_gcm, encrypt_aes_gcm, AES_GCM_IV_SIZE};
use crate::crypto::utils::generate_iv;

/// Wire form of an encrypted metadata blob.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncryptedEnvelope {
    /// Hex-encoded 12-byte GCM IV.
    pub iv: String,
    /// Base64-encoded ciphertext with appended auth tag.
    pub data: String,
}

/// Encrypt canonical plaintext JSON into an envelope with a fresh IV.
pub fn seal(plaintext: &[u8], key: &[u8; 32]) -> Result<EncryptedEnvelope, CodecError> {
    let iv = generate_iv();
    let ciphertext = encrypt_aes_gcm(plaintext, key, &iv).map_err(|_| CodecError::EncryptionFailed)?;

    Ok(EncryptedEnvelope {
        iv: hex::encode(iv),
        data: base64::engine::general_purpose::STANDARD.encode(ciphertext),
    })
}

/// Decrypt an envelope back to plaintext bytes.
///
/// Malformed hex, malformed base64, wrong IV length, and tag mismatch all
/// collapse to `DecryptionFailed`.
pub fn open(envelope: &EncryptedEnvelope, key: &[u8; 32]) -> Result<Vec<u8>, CodecError> {
    let iv_bytes = hex::decode(&envelope.iv).map_err(|_| CodecError::DecryptionFailed)?;
    let iv: [u8; AES_GCM_IV_SIZE] = iv_bytes
        .try_into()
        .map_err(|_| CodecError::DecryptionFailed)?;

    let ciphertext = base64::engine::general_purpose::STANDARD
        .decode(&envelope.data)
        .map_err(|_| CodecError::DecryptionFailed)?;

    decrypt_aes_gcm(&ciphertext, key, &iv).map_err(|_| CodecError::DecryptionFailed)
}

/// Serialize an envelope to its network JSON bytes.
pub fn to_network_bytes(envelope: &EncryptedEnvelope) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(envelope).map_err(|_| CodecError::EncryptionFailed)
}

/// Parse an envelope from network JSON bytes.
pub fn from_network_bytes(bytes: &[u8]) -> Result<EncryptedEnvelope, CodecError> {
    serde_json::from_slice(bytes).map_err(|_| CodecError::DecryptionFailed)
}

/// Seal a serializable object: canonical JSON, then envelope. The interim
/// plaintext buffer is zeroized.
pub fn seal_json<T: Serialize>(obj: &T, key: &[u8; 32]) -> Result<EncryptedEnvelope, CodecError> {
    let mut json = serde_json::to_vec(obj).map_err(|_| CodecError::EncryptionFailed)?;
    let result = seal(&json, key);
    json.zeroize();
    result
}
