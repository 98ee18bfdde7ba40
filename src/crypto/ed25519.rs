//! Ed25519 keys and detached signatures for mutable-pointer records.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;
use zeroize::Zeroize;

/// Ed25519 public key size in bytes.
pub const ED25519_PUBLIC_KEY_SIZE: usize = 32;

/// Ed25519 private key (seed) size in bytes.
pub const ED25519_PRIVATE_KEY_SIZE: usize = 32;

/// Ed25519 signature size in bytes.
pub const ED25519_SIGNATURE_SIZE: usize = 64;

#[derive(Debug, Error)]
pub enum Ed25519Error {
    #[error("Signing failed")]
    SigningFailed,
    #[error("Invalid private key size")]
    InvalidPrivateKeySize,
    #[error("Invalid public key")]
    InvalidPublicKey,
}

/// Generate a fresh Ed25519 keypair. Returns (public, private), both 32 bytes.
pub fn generate_ed25519_keypair() -> (Vec<u8>, Vec<u8>) {
    let signing_key = SigningKey::generate(&mut OsRng);
    let verifying_key = signing_key.verifying_key();
    (
        verifying_key.to_bytes().to_vec(),
        signing_key.to_bytes().to_vec(),
    )
}

/// Sign a message, returning the 64-byte detached signature.
pub fn sign_ed25519(message: &[u8], private_key: &[u8]) -> Result<Vec<u8>, Ed25519Error> {
    let mut seed: [u8; ED25519_PRIVATE_KEY_SIZE] = private_key
        .try_into()
        .map_err(|_| Ed25519Error::InvalidPrivateKeySize)?;
    let signing_key = SigningKey::from_bytes(&seed);
    seed.zeroize();
    Ok(signing_key.sign(message).to_bytes().to_vec())
}

/// Verify a detached signature. Never panics; any malformed input is
/// simply an invalid signature. Comparison inside dalek is constant-time.
pub fn verify_ed25519(message: &[u8], signature: &[u8], public_key: &[u8]) -> bool {
    let Ok(sig_bytes) = <[u8; ED25519_SIGNATURE_SIZE]>::try_from(signature) else {
        return false;
    };
    let Ok(key_bytes) = <[u8; ED25519_PUBLIC_KEY_SIZE]>::try_from(public_key) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };

    let sig = ed25519_dalek::Signature::from_bytes(&sig_bytes);
    verifying_key.verify(message, &sig).is_ok()
}

/// Derive the public key from a 32-byte Ed25519 seed.
pub fn get_public_key(private_key: &[u8]) -> Result<Vec<u8>, Ed25519Error> {
    let mut seed: [u8; ED25519_PRIVATE_KEY_SIZE] = private_key
        .try_into()
        .map_err(|_| Ed25519Error::InvalidPrivateKeySize)?;
    let signing_key = SigningKey::from_bytes(&seed);
    seed.zeroize();
    Ok(signing_key.verifying_key().to_bytes().to_vec())
}
