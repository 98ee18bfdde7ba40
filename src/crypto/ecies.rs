//! ECIES key wrapping over secp256k1.
//!
//! Every symmetric and signing key stored on the network is wrapped to the
//! user's vault public key with this scheme. The `ecies` Rust crate is
//! cross-compatible with the `eciesjs` npm package used by the web client.
//! Envelope: ephemeral pubkey (65) || nonce (16) || tag (16) || ciphertext,
//! a constant ~97-byte overhead for any plaintext length.

use thiserror::Error;

/// Uncompressed secp256k1 public key size (0x04 prefix + x + y).
pub const SECP256K1_PUBLIC_KEY_SIZE: usize = 65;

/// secp256k1 private key size.
pub const SECP256K1_PRIVATE_KEY_SIZE: usize = 32;

/// Minimum valid envelope: ephemeral pubkey + auth tag.
pub const ECIES_MIN_ENVELOPE_SIZE: usize = SECP256K1_PUBLIC_KEY_SIZE + 16;

/// Constant envelope overhead: ephemeral pubkey (65) + nonce (16) + tag (16).
pub const ECIES_OVERHEAD: usize = 97;

#[derive(Debug, Error)]
pub enum EciesError {
    #[error("Key wrapping failed")]
    WrappingFailed,
    #[error("Key unwrapping failed")]
    UnwrappingFailed,
    #[error("Invalid public key size")]
    InvalidPublicKeySize,
    #[error("Invalid public key format")]
    InvalidPublicKeyFormat,
    #[error("Invalid private key size")]
    InvalidPrivateKeySize,
}

/// Wrap (encrypt) a secret to the recipient's uncompressed secp256k1
/// public key.
pub fn wrap_key(data: &[u8], recipient_public_key: &[u8]) -> Result<Vec<u8>, EciesError> {
    if recipient_public_key.len() != SECP256K1_PUBLIC_KEY_SIZE {
        return Err(EciesError::InvalidPublicKeySize);
    }
    if recipient_public_key[0] != 0x04 {
        return Err(EciesError::InvalidPublicKeyFormat);
    }

    ecies::encrypt(recipient_public_key, data).map_err(|_| EciesError::WrappingFailed)
}

/// Unwrap (decrypt) an ECIES envelope with the recipient's private key.
///
/// Every failure collapses to `UnwrappingFailed`; the message never says
/// which check the envelope failed.
pub fn unwrap_key(wrapped: &[u8], private_key: &[u8]) -> Result<Vec<u8>, EciesError> {
    if private_key.len() != SECP256K1_PRIVATE_KEY_SIZE {
        return Err(EciesError::InvalidPrivateKeySize);
    }
    if wrapped.len() < ECIES_MIN_ENVELOPE_SIZE {
        return Err(EciesError::UnwrappingFailed);
    }

    ecies::decrypt(private_key, wrapped).map_err(|_| EciesError::UnwrappingFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_keypair() -> (Vec<u8>, Vec<u8>) {
        let (sk, pk) = ecies::utils::generate_keypair();
        (sk.serialize().to_vec(), pk.serialize().to_vec())
    }

    #[test]
    fn test_wrap_unwrap_round_trip() {
        let (sk, pk) = test_keypair();
        let secret = [0x42u8; 32];

        let wrapped = wrap_key(&secret, &pk).unwrap();
        assert_eq!(wrapped.len(), secret.len() + ECIES_OVERHEAD);

        let unwrapped = unwrap_key(&wrapped, &sk).unwrap();
        assert_eq!(unwrapped, secret);
    }

    #[test]
    fn test_wrap_arbitrary_length() {
        let (sk, pk) = test_keypair();
        for len in [0usize, 1, 64, 1000] {
            let data = vec![0x5Au8; len];
            let wrapped = wrap_key(&data, &pk).unwrap();
            assert_eq!(unwrap_key(&wrapped, &sk).unwrap(), data);
        }
    }

    #[test]
    fn test_wrap_rejects_bad_public_key() {
        assert!(matches!(
            wrap_key(b"secret", &[0u8; 33]),
            Err(EciesError::InvalidPublicKeySize)
        ));

        let mut pk = [0u8; SECP256K1_PUBLIC_KEY_SIZE];
        pk[0] = 0x02; // compressed prefix
        assert!(matches!(
            wrap_key(b"secret", &pk),
            Err(EciesError::InvalidPublicKeyFormat)
        ));
    }

    #[test]
    fn test_unwrap_rejects_bad_inputs() {
        let (sk, pk) = test_keypair();
        let wrapped = wrap_key(b"secret", &pk).unwrap();

        assert!(matches!(
            unwrap_key(&wrapped, &[0u8; 16]),
            Err(EciesError::InvalidPrivateKeySize)
        ));
        assert!(matches!(
            unwrap_key(&wrapped[..40], &sk),
            Err(EciesError::UnwrappingFailed)
        ));
    }

    #[test]
    fn test_unwrap_wrong_key_generic_error() {
        let (_, pk) = test_keypair();
        let (other_sk, _) = test_keypair();
        let wrapped = wrap_key(b"secret", &pk).unwrap();
        assert!(matches!(
            unwrap_key(&wrapped, &other_sk),
            Err(EciesError::UnwrappingFailed)
        ));
    }
}
