//! Crate-wide error kinds.
//!
//! Every failure surfaced by the core is one of these tagged variants.
//! Crypto and codec messages are deliberately generic: the reason a blob
//! failed to decrypt or validate is never disclosed to the caller.

use thiserror::Error;

use crate::api::transport::TransportError;
use crate::codec::CodecError;
use crate::crypto::aes::AesError;
use crate::crypto::aes_ctr::AesCtrError;
use crate::crypto::ecies::EciesError;
use crate::crypto::ed25519::Ed25519Error;
use crate::crypto::hkdf::HkdfError;
use crate::crypto::ipns::IpnsError;

#[derive(Debug, Error)]
pub enum CoreError {
    // Shape errors: programmer/input mistakes, fatal to the operation.
    #[error("Invalid key size")]
    InvalidKeySize,
    #[error("Invalid IV size")]
    InvalidIvSize,
    #[error("Invalid public key size")]
    InvalidPublicKeySize,
    #[error("Invalid private key size")]
    InvalidPrivateKeySize,
    #[error("Invalid signature size")]
    InvalidSignatureSize,

    // Crypto/codec failures: generic by contract.
    #[error("Encryption failed")]
    EncryptionFailed,
    #[error("Decryption failed")]
    DecryptionFailed,
    #[error("Key wrapping failed")]
    KeyWrappingFailed,
    #[error("Key unwrapping failed")]
    KeyUnwrappingFailed,
    #[error("Signing failed")]
    SigningFailed,

    // Vault bootstrap.
    #[error("Identity missing")]
    IdentityMissing,
    #[error("Vault not initialized")]
    VaultNotInitialized,

    // Publish pipeline.
    #[error("No cached or resolvable sequence for pointer")]
    SequenceUnknown,
    #[error("Resolved record signature did not verify")]
    SignatureMismatch,
    #[error("Routing layer unavailable")]
    RoutingUnavailable,

    // Operation refusals, surfaced before side effects.
    #[error("Name already exists in folder: {0}")]
    NameCollision(String),
    #[error("Storage quota exceeded")]
    QuotaExceeded,
    #[error("Rate limited by backend")]
    RateLimited,

    #[error("Entry not found: {0}")]
    NotFound(String),
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl From<AesError> for CoreError {
    fn from(e: AesError) -> Self {
        match e {
            AesError::InvalidKeySize => CoreError::InvalidKeySize,
            AesError::InvalidIvSize => CoreError::InvalidIvSize,
            AesError::EncryptionFailed => CoreError::EncryptionFailed,
            AesError::DecryptionFailed => CoreError::DecryptionFailed,
        }
    }
}

impl From<AesCtrError> for CoreError {
    fn from(e: AesCtrError) -> Self {
        match e {
            AesCtrError::InvalidKeySize => CoreError::InvalidKeySize,
            AesCtrError::InvalidIvSize => CoreError::InvalidIvSize,
            AesCtrError::InvalidRange => CoreError::InvalidOperation("invalid byte range".into()),
            _ => CoreError::DecryptionFailed,
        }
    }
}

impl From<EciesError> for CoreError {
    fn from(e: EciesError) -> Self {
        match e {
            EciesError::InvalidPublicKeySize | EciesError::InvalidPublicKeyFormat => {
                CoreError::InvalidPublicKeySize
            }
            EciesError::InvalidPrivateKeySize => CoreError::InvalidPrivateKeySize,
            EciesError::WrappingFailed => CoreError::KeyWrappingFailed,
            EciesError::UnwrappingFailed => CoreError::KeyUnwrappingFailed,
        }
    }
}

impl From<Ed25519Error> for CoreError {
    fn from(e: Ed25519Error) -> Self {
        match e {
            Ed25519Error::InvalidPrivateKeySize => CoreError::InvalidPrivateKeySize,
            Ed25519Error::InvalidPublicKey => CoreError::InvalidPublicKeySize,
            Ed25519Error::SigningFailed => CoreError::SigningFailed,
        }
    }
}

impl From<HkdfError> for CoreError {
    fn from(e: HkdfError) -> Self {
        match e {
            HkdfError::InvalidKeySize => CoreError::InvalidKeySize,
            _ => CoreError::KeyUnwrappingFailed,
        }
    }
}

impl From<IpnsError> for CoreError {
    fn from(e: IpnsError) -> Self {
        match e {
            IpnsError::SigningFailed | IpnsError::InvalidPrivateKey => CoreError::SigningFailed,
            IpnsError::SignatureMismatch => CoreError::SignatureMismatch,
            _ => CoreError::SigningFailed,
        }
    }
}

impl From<CodecError> for CoreError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::EncryptionFailed => CoreError::EncryptionFailed,
            CodecError::DecryptionFailed => CoreError::DecryptionFailed,
        }
    }
}

impl From<TransportError> for CoreError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::QuotaExceeded => CoreError::QuotaExceeded,
            TransportError::RateLimited => CoreError::RateLimited,
            TransportError::Unavailable(_) | TransportError::Timeout => {
                CoreError::RoutingUnavailable
            }
            TransportError::NotFound => CoreError::NotFound("block or record".into()),
            TransportError::Unauthorized | TransportError::Protocol(_) => {
                CoreError::InvalidOperation("backend rejected request".into())
            }
        }
    }
}
