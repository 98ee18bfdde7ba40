//! HKDF-SHA256 deterministic derivations from the vault key.
//!
//! All vault-scoped derivations share the salt `"CipherBox-v1"` and are
//! separated by info strings. Given the same secp256k1 private key, every
//! session derives the same pointer names and registry key, so special
//! records are rediscoverable without backend help.
//!
//! Derivation path for pointer keys:
//!   secp256k1 privateKey (32 bytes)
//!     -> HKDF-SHA256(salt="CipherBox-v1", info=<domain>)
//!     -> 32-byte Ed25519 seed
//!     -> Ed25519 keypair
//!     -> pointer name (k51...)

use ed25519_dalek::SigningKey;
use hkdf::Hkdf;
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroize;

use super::ipns;

/// Common HKDF salt for all CipherBox derivations.
const HKDF_SALT: &[u8] = b"CipherBox-v1";

/// Info for the vault root pointer keypair.
const VAULT_HKDF_INFO: &[u8] = b"cipherbox-vault-ipns-v1";

/// Info for the device registry pointer keypair.
const REGISTRY_HKDF_INFO: &[u8] = b"cipherbox-device-registry-ipns-v1";

/// Info for the device registry symmetric envelope key.
const REGISTRY_KEY_HKDF_INFO: &[u8] = b"cipherbox-device-registry-key-v1";

/// Info prefix for the legacy per-file pointer fallback.
const FILE_HKDF_INFO_PREFIX: &str = "cipherbox-file-ipns-v1:";

/// Minimum accepted file id length for the per-file fallback.
const MIN_FILE_ID_LENGTH: usize = 10;

#[derive(Debug, Error)]
pub enum HkdfError {
    #[error("Invalid key size")]
    InvalidKeySize,
    #[error("HKDF derivation failed")]
    DerivationFailed,
    #[error("Pointer name derivation failed")]
    NameDerivationFailed,
    #[error("Invalid file ID: must be at least {MIN_FILE_ID_LENGTH} characters")]
    InvalidFileId,
}

/// A deterministically derived pointer keypair and its self-certifying name.
#[derive(Debug)]
pub struct DerivedPointerKey {
    /// 32-byte Ed25519 seed.
    pub private_key: Vec<u8>,
    /// 32-byte Ed25519 public key.
    pub public_key: Vec<u8>,
    /// Base36 pointer name (k51...).
    pub name: String,
}

impl Drop for DerivedPointerKey {
    fn drop(&mut self) {
        self.private_key.zeroize();
    }
}

fn derive_pointer_keypair(
    user_private_key: &[u8; 32],
    info: &[u8],
) -> Result<DerivedPointerKey, HkdfError> {
    let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), user_private_key);
    let mut okm = [0u8; 32];
    hk.expand(info, &mut okm)
        .map_err(|_| HkdfError::DerivationFailed)?;

    let signing_key = SigningKey::from_bytes(&okm);
    okm.zeroize();
    let verifying_key = signing_key.verifying_key();

    let name = ipns::derive_ipns_name(&verifying_key.to_bytes())
        .map_err(|_| HkdfError::NameDerivationFailed)?;

    Ok(DerivedPointerKey {
        private_key: signing_key.to_bytes().to_vec(),
        public_key: verifying_key.to_bytes().to_vec(),
        name,
    })
}

/// Derive the vault root pointer keypair.
pub fn derive_vault_ipns_keypair(
    user_private_key: &[u8; 32],
) -> Result<DerivedPointerKey, HkdfError> {
    derive_pointer_keypair(user_private_key, VAULT_HKDF_INFO)
}

/// Derive the device registry pointer keypair.
pub fn derive_registry_ipns_keypair(
    user_private_key: &[u8; 32],
) -> Result<DerivedPointerKey, HkdfError> {
    derive_pointer_keypair(user_private_key, REGISTRY_HKDF_INFO)
}

/// Derive the legacy per-file pointer keypair for FilePointers written
/// before the wrapped signing key was added to the parent folder entry.
pub fn derive_file_ipns_keypair(
    user_private_key: &[u8; 32],
    file_id: &str,
) -> Result<DerivedPointerKey, HkdfError> {
    if file_id.len() < MIN_FILE_ID_LENGTH {
        return Err(HkdfError::InvalidFileId);
    }
    let info = format!("{}{}", FILE_HKDF_INFO_PREFIX, file_id);
    derive_pointer_keypair(user_private_key, info.as_bytes())
}

/// Derive the 32-byte AES key for the device registry envelope.
pub fn derive_registry_key(user_private_key: &[u8; 32]) -> Result<[u8; 32], HkdfError> {
    let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), user_private_key);
    let mut okm = [0u8; 32];
    hk.expand(REGISTRY_KEY_HKDF_INFO, &mut okm)
        .map_err(|_| HkdfError::DerivationFailed)?;
    Ok(okm)
}

/// Info for the per-file metadata envelope key.
const FILE_METADATA_KEY_HKDF_INFO: &[u8] = b"cipherbox-file-metadata-key-v1";

/// Derive the 32-byte AES key for a file's metadata envelope from the
/// file's pointer signing seed.
///
/// The seed travels with the FilePointer entry (ECIES-wrapped in the
/// parent folder), so moving a file between folders re-parents the entry
/// without re-encrypting the file's metadata blob.
pub fn derive_file_metadata_key(pointer_seed: &[u8; 32]) -> Result<[u8; 32], HkdfError> {
    let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), pointer_seed);
    let mut okm = [0u8; 32];
    hk.expand(FILE_METADATA_KEY_HKDF_INFO, &mut okm)
        .map_err(|_| HkdfError::DerivationFailed)?;
    Ok(okm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derivations_deterministic() {
        let user_key = [7u8; 32];
        let a = derive_vault_ipns_keypair(&user_key).unwrap();
        let b = derive_vault_ipns_keypair(&user_key).unwrap();
        assert_eq!(a.private_key, b.private_key);
        assert_eq!(a.name, b.name);
        assert!(a.name.starts_with("k51"));
    }

    #[test]
    fn test_domains_separated() {
        let user_key = [7u8; 32];
        let vault = derive_vault_ipns_keypair(&user_key).unwrap();
        let registry = derive_registry_ipns_keypair(&user_key).unwrap();
        let file = derive_file_ipns_keypair(&user_key, "file-0123456789").unwrap();

        assert_ne!(vault.name, registry.name);
        assert_ne!(vault.name, file.name);
        assert_ne!(registry.name, file.name);
    }

    #[test]
    fn test_file_derivation_varies_by_id() {
        let user_key = [9u8; 32];
        let a = derive_file_ipns_keypair(&user_key, "aaaaaaaaaa").unwrap();
        let b = derive_file_ipns_keypair(&user_key, "bbbbbbbbbb").unwrap();
        assert_ne!(a.name, b.name);
    }

    #[test]
    fn test_file_derivation_rejects_short_id() {
        let user_key = [9u8; 32];
        assert!(matches!(
            derive_file_ipns_keypair(&user_key, "short"),
            Err(HkdfError::InvalidFileId)
        ));
    }

    #[test]
    fn test_registry_key_distinct_from_seed() {
        let user_key = [3u8; 32];
        let envelope_key = derive_registry_key(&user_key).unwrap();
        let pointer = derive_registry_ipns_keypair(&user_key).unwrap();
        assert_ne!(envelope_key.to_vec(), pointer.private_key);
    }

    #[test]
    fn test_file_metadata_key_deterministic_and_separated() {
        let seed = [5u8; 32];
        let a = derive_file_metadata_key(&seed).unwrap();
        let b = derive_file_metadata_key(&seed).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, seed, "derived key must differ from the seed");
        assert_ne!(
            derive_file_metadata_key(&[6u8; 32]).unwrap(),
            a,
            "different seeds derive different keys"
        );
    }
}
