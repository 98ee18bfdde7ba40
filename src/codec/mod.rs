//! Versioned on-network object codec.
//!
//! Encodes and decodes the four object kinds stored on the network:
//! folder metadata, file metadata, device registry, and the vault export
//! bundle. Two independent implementations (web client and filesystem
//! mount) write these blobs, so the runtime validator here — not the Rust
//! type definitions — is the compatibility contract:
//!
//! - unknown top-level fields are ignored (forward compat);
//! - known fields are checked for type, range, length, and format;
//! - any validation failure is reported as a generic `DecryptionFailed`;
//! - documented defaults are applied after successful validation.
//!
//! Additive evolution (new optional field with a behavior-preserving
//! default) does not bump an object's `version` tag. Changing a default,
//! removing, renaming, or tightening a field does.

pub mod envelope;
pub mod export;
pub mod file;
pub mod folder;
pub mod registry;
pub mod validate;

use thiserror::Error;

pub use envelope::EncryptedEnvelope;
pub use export::{DerivationInfo, VaultExport};
pub use file::{EncryptionMode, FileMetadata, VersionEntry};
pub use folder::{FolderChild, FolderEntry, FolderMetadata, FilePointer};
pub use registry::{DeviceAuthStatus, DeviceEntry, DevicePlatform, DeviceRegistry};

/// Codec failures. Deliberately two-valued: the structural reason a blob
/// failed to decrypt or validate is never disclosed.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Encryption failed")]
    EncryptionFailed,
    #[error("Decryption failed")]
    DecryptionFailed,
}
