//! File metadata (`"v1"`): body pointer, crypto context, and the bounded
//! version chain for one file.
//!
//! The blob is encrypted under a key derived from the file's pointer
//! signing seed, so moving the file between folders never rewrites it.
//! The per-version body keys inside are ECIES-wrapped to the user's
//! public key; a body key is never reused across versions.

use serde::{Deserialize, Serialize};

use super::envelope::{self, EncryptedEnvelope};
use super::validate::{is_cid, is_hex_exact, is_text_max, is_wrapped_key_32};
use super::CodecError;

/// Current file metadata schema version.
pub const FILE_SCHEMA_VERSION: &str = "v1";

/// Retained past versions per file.
pub const MAX_VERSIONS_PER_FILE: usize = 10;

/// Maximum accepted MIME type length.
const MAX_MIME_TYPE_LEN: usize = 255;

/// Body encryption mode. Legacy records omit the field and mean GCM.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EncryptionMode {
    #[serde(rename = "GCM")]
    Gcm,
    #[serde(rename = "CTR")]
    Ctr,
}

impl EncryptionMode {
    /// Expected `fileIv` length in bytes: 12 for GCM, 16 for CTR.
    pub fn iv_len(self) -> usize {
        match self {
            EncryptionMode::Gcm => 12,
            EncryptionMode::Ctr => 16,
        }
    }
}

fn default_encryption_mode() -> EncryptionMode {
    EncryptionMode::Gcm
}

/// Decrypted per-file metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    /// Schema version tag.
    pub version: String,
    /// Current body block identifier.
    pub cid: String,
    /// Current body key, ECIES-wrapped to the user's public key (hex).
    pub file_key_encrypted: String,
    /// Hex IV for the current body (12 bytes GCM, 16 bytes CTR).
    pub file_iv: String,
    /// Plaintext body size in bytes.
    pub size: u64,
    /// MIME type of the original file.
    pub mime_type: String,
    /// Body cipher; missing in legacy records, defaulting to GCM.
    #[serde(default = "default_encryption_mode")]
    pub encryption_mode: EncryptionMode,
    /// Creation timestamp (Unix ms).
    pub created_at: u64,
    /// Last modification timestamp (Unix ms).
    pub modified_at: u64,
    /// Past versions, newest first. Omitted from the wire when empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub versions: Option<Vec<VersionEntry>>,
}

/// One retained past version with its full crypto context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VersionEntry {
    /// Body block identifier of this version.
    pub cid: String,
    /// Body key, ECIES-wrapped (hex).
    pub file_key_encrypted: String,
    /// Hex IV for this version's body.
    pub file_iv: String,
    /// Plaintext size in bytes.
    pub size: u64,
    /// When this version was superseded (Unix ms).
    pub timestamp: u64,
    /// Body cipher. Required on version entries; no default.
    pub encryption_mode: EncryptionMode,
}

impl FileMetadata {
    /// Past versions as a slice; empty when the field is omitted.
    pub fn versions(&self) -> &[VersionEntry] {
        self.versions.as_deref().unwrap_or(&[])
    }

    /// Normalize an empty version list back to the omitted form.
    pub fn normalize_versions(&mut self) {
        if self.versions.as_ref().is_some_and(|v| v.is_empty()) {
            self.versions = None;
        }
    }
}

/// Encrypt file metadata into its network envelope.
pub fn encrypt_file_metadata(
    metadata: &FileMetadata,
    metadata_key: &[u8; 32],
) -> Result<EncryptedEnvelope, CodecError> {
    envelope::seal_json(metadata, metadata_key)
}

/// Decrypt and strictly validate a file metadata envelope.
pub fn decrypt_and_validate_file_metadata(
    env: &EncryptedEnvelope,
    metadata_key: &[u8; 32],
) -> Result<FileMetadata, CodecError> {
    let json = envelope::open(env, metadata_key)?;
    let value: serde_json::Value =
        serde_json::from_slice(&json).map_err(|_| CodecError::DecryptionFailed)?;
    validate_file_metadata(value)
}

/// Parse and validate a plaintext file metadata value.
pub fn validate_file_metadata(value: serde_json::Value) -> Result<FileMetadata, CodecError> {
    let version = value
        .get("version")
        .and_then(|v| v.as_str())
        .ok_or(CodecError::DecryptionFailed)?;
    if version != FILE_SCHEMA_VERSION {
        return Err(CodecError::DecryptionFailed);
    }

    let metadata: FileMetadata =
        serde_json::from_value(value).map_err(|_| CodecError::DecryptionFailed)?;

    let current_ok = is_cid(&metadata.cid)
        && is_wrapped_key_32(&metadata.file_key_encrypted)
        && is_hex_exact(&metadata.file_iv, metadata.encryption_mode.iv_len())
        && is_text_max(&metadata.mime_type, MAX_MIME_TYPE_LEN);
    if !current_ok {
        return Err(CodecError::DecryptionFailed);
    }

    let versions = metadata.versions();
    if versions.len() > MAX_VERSIONS_PER_FILE {
        return Err(CodecError::DecryptionFailed);
    }
    let mut previous: Option<u64> = None;
    for entry in versions {
        let entry_ok = is_cid(&entry.cid)
            && is_wrapped_key_32(&entry.file_key_encrypted)
            && is_hex_exact(&entry.file_iv, entry.encryption_mode.iv_len());
        if !entry_ok {
            return Err(CodecError::DecryptionFailed);
        }
        // Newest first: timestamps must be non-increasing.
        if previous.is_some_and(|p| entry.timestamp > p) {
            return Err(CodecError::DecryptionFailed);
        }
        previous = Some(entry.timestamp);
    }

    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::utils::generate_symmetric_key;

    fn wrapped_32() -> String {
        "cd".repeat(129)
    }

    pub(crate) fn test_metadata() -> FileMetadata {
        FileMetadata {
            version: FILE_SCHEMA_VERSION.into(),
            cid: "bafybeigdyrzt5sfp7udm7hu76uh7y26nf3efuylqabf3oclgtqy55fbzdi".into(),
            file_key_encrypted: wrapped_32(),
            file_iv: "00".repeat(12),
            size: 5,
            mime_type: "text/plain".into(),
            encryption_mode: EncryptionMode::Gcm,
            created_at: 1_700_000_000_000,
            modified_at: 1_700_000_000_000,
            versions: None,
        }
    }

    fn test_version(timestamp: u64) -> VersionEntry {
        VersionEntry {
            cid: format!("bafyversion{}", timestamp),
            file_key_encrypted: wrapped_32(),
            file_iv: "11".repeat(12),
            size: 3,
            timestamp,
            encryption_mode: EncryptionMode::Gcm,
        }
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let key = generate_symmetric_key();
        let mut metadata = test_metadata();
        metadata.versions = Some(vec![test_version(200), test_version(100)]);

        let env = encrypt_file_metadata(&metadata, &key).unwrap();
        let decrypted = decrypt_and_validate_file_metadata(&env, &key).unwrap();
        assert_eq!(decrypted, metadata);
    }

    #[test]
    fn test_empty_versions_omitted_on_wire() {
        let metadata = test_metadata();
        let json = serde_json::to_string(&metadata).unwrap();
        assert!(!json.contains("versions"));
        assert!(json.contains("\"encryptionMode\":\"GCM\""));
        assert!(json.contains("\"fileKeyEncrypted\""));
    }

    #[test]
    fn test_legacy_record_defaults_to_gcm() {
        let mut value = serde_json::to_value(test_metadata()).unwrap();
        value.as_object_mut().unwrap().remove("encryptionMode");

        let parsed = validate_file_metadata(value).unwrap();
        assert_eq!(parsed.encryption_mode, EncryptionMode::Gcm);
    }

    #[test]
    fn test_version_entry_mode_required() {
        let mut metadata = test_metadata();
        metadata.versions = Some(vec![test_version(100)]);
        let mut value = serde_json::to_value(&metadata).unwrap();
        value["versions"][0]
            .as_object_mut()
            .unwrap()
            .remove("encryptionMode");

        assert!(matches!(
            validate_file_metadata(value),
            Err(CodecError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_ctr_mode_expects_16_byte_iv() {
        let mut metadata = test_metadata();
        metadata.encryption_mode = EncryptionMode::Ctr;
        // Still a 12-byte IV: invalid for CTR.
        let value = serde_json::to_value(&metadata).unwrap();
        assert!(validate_file_metadata(value).is_err());

        metadata.file_iv = "22".repeat(16);
        let value = serde_json::to_value(&metadata).unwrap();
        let parsed = validate_file_metadata(value).unwrap();
        assert_eq!(parsed.encryption_mode, EncryptionMode::Ctr);
    }

    #[test]
    fn test_versions_over_cap_rejected() {
        let mut metadata = test_metadata();
        metadata.versions = Some((0..11u64).map(|i| test_version(1000 - i)).collect());
        let value = serde_json::to_value(&metadata).unwrap();
        assert!(matches!(
            validate_file_metadata(value),
            Err(CodecError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_version_timestamps_must_not_increase() {
        let mut metadata = test_metadata();
        metadata.versions = Some(vec![test_version(100), test_version(200)]);
        let value = serde_json::to_value(&metadata).unwrap();
        assert!(validate_file_metadata(value).is_err());

        // Equal timestamps are fine.
        metadata.versions = Some(vec![test_version(100), test_version(100)]);
        let value = serde_json::to_value(&metadata).unwrap();
        assert!(validate_file_metadata(value).is_ok());
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let mut value = serde_json::to_value(test_metadata()).unwrap();
        value["thumbnailCid"] = serde_json::json!("bafythumb");
        let parsed = validate_file_metadata(value).unwrap();
        assert_eq!(parsed, test_metadata());
    }

    #[test]
    fn test_wrong_version_rejected() {
        let mut value = serde_json::to_value(test_metadata()).unwrap();
        value["version"] = serde_json::json!("v2");
        assert!(validate_file_metadata(value).is_err());
    }
}
