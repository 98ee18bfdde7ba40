//! Folder metadata (`"v2"`): the children list of a directory.
//!
//! A folder's metadata blob is encrypted under that folder's own key.
//! Child entry names are additionally encrypted per entry (same key, fresh
//! IV each write), so a future shared-folder grant of a child subtree does
//! not expose sibling names through the parent blob.

use serde::{Deserialize, Serialize};

use super::envelope::{self, EncryptedEnvelope};
use super::validate::{
    is_hex_at_least, is_hex_exact, is_object_id, is_pointer_name, is_wrapped_key_32,
    is_wrapped_signing_key,
};
use super::CodecError;
use crate::crypto::aes::{decrypt_aes_gcm, encrypt_aes_gcm, AES_GCM_IV_SIZE};
use crate::crypto::utils::generate_iv;

/// Current folder metadata schema version.
pub const FOLDER_SCHEMA_VERSION: &str = "v2";

/// Decrypted folder metadata. The whole object is one envelope under the
/// folder's key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FolderMetadata {
    /// Schema version tag.
    pub version: String,
    /// Folders and file pointers in this folder. Order carries no meaning.
    pub children: Vec<FolderChild>,
}

/// A child entry: a subfolder or a file pointer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FolderChild {
    Folder(FolderEntry),
    File(FilePointer),
}

/// Subfolder entry. Carries the ECIES-wrapped keys needed to open the
/// child folder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FolderEntry {
    /// Opaque id for internal reference.
    pub id: String,
    /// Hex AES-GCM ciphertext of the entry name.
    pub name_encrypted: String,
    /// Hex 12-byte IV for the name ciphertext.
    pub name_iv: String,
    /// Child folder's pointer name (k51...).
    pub ipns_name: String,
    /// Child folder key, ECIES-wrapped to the user's public key (hex).
    pub folder_key_encrypted: String,
    /// Child folder's pointer signing key, ECIES-wrapped (hex).
    pub ipns_private_key_encrypted: String,
    /// Creation timestamp (Unix ms).
    pub created_at: u64,
    /// Last modification timestamp (Unix ms).
    pub modified_at: u64,
}

/// File pointer entry. The file's real crypto context lives behind its own
/// mutable pointer; the parent folder holds only the name, the pointer id,
/// and the wrapped signing key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FilePointer {
    /// Opaque file id.
    pub id: String,
    /// Hex AES-GCM ciphertext of the entry name.
    pub name_encrypted: String,
    /// Hex 12-byte IV for the name ciphertext.
    pub name_iv: String,
    /// The file's own pointer name (k51...).
    pub file_meta_ipns_name: String,
    /// File pointer signing key, ECIES-wrapped (hex). Absent in records
    /// written by older clients; those fall back to HKDF derivation from
    /// the vault key and get the wrapped key written back on the parent's
    /// next publish.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipns_private_key_encrypted: Option<String>,
    /// Creation timestamp (Unix ms).
    pub created_at: u64,
    /// Last modification timestamp (Unix ms).
    pub modified_at: u64,
}

impl FolderMetadata {
    /// A freshly created, empty folder.
    pub fn empty() -> Self {
        Self {
            version: FOLDER_SCHEMA_VERSION.to_string(),
            children: Vec::new(),
        }
    }
}

impl FolderChild {
    pub fn id(&self) -> &str {
        match self {
            FolderChild::Folder(e) => &e.id,
            FolderChild::File(p) => &p.id,
        }
    }

    pub fn name_encrypted(&self) -> (&str, &str) {
        match self {
            FolderChild::Folder(e) => (&e.name_encrypted, &e.name_iv),
            FolderChild::File(p) => (&p.name_encrypted, &p.name_iv),
        }
    }
}

/// Encrypt folder metadata into its network envelope.
pub fn encrypt_folder_metadata(
    metadata: &FolderMetadata,
    folder_key: &[u8; 32],
) -> Result<EncryptedEnvelope, CodecError> {
    envelope::seal_json(metadata, folder_key)
}

/// Decrypt and strictly validate a folder metadata envelope.
pub fn decrypt_and_validate_folder_metadata(
    env: &EncryptedEnvelope,
    folder_key: &[u8; 32],
) -> Result<FolderMetadata, CodecError> {
    let json = envelope::open(env, folder_key)?;
    let value: serde_json::Value =
        serde_json::from_slice(&json).map_err(|_| CodecError::DecryptionFailed)?;
    validate_folder_metadata(value)
}

/// Parse and validate a plaintext folder metadata value.
///
/// Unknown top-level and per-entry fields are dropped silently; every
/// known-field violation is a generic `DecryptionFailed`.
pub fn validate_folder_metadata(value: serde_json::Value) -> Result<FolderMetadata, CodecError> {
    let version = value
        .get("version")
        .and_then(|v| v.as_str())
        .ok_or(CodecError::DecryptionFailed)?;
    if version != FOLDER_SCHEMA_VERSION {
        return Err(CodecError::DecryptionFailed);
    }

    let metadata: FolderMetadata =
        serde_json::from_value(value).map_err(|_| CodecError::DecryptionFailed)?;

    for child in &metadata.children {
        match child {
            FolderChild::Folder(entry) => validate_folder_entry(entry)?,
            FolderChild::File(pointer) => validate_file_pointer(pointer)?,
        }
    }

    Ok(metadata)
}

fn validate_folder_entry(entry: &FolderEntry) -> Result<(), CodecError> {
    let ok = is_object_id(&entry.id)
        && is_hex_exact(&entry.name_iv, AES_GCM_IV_SIZE)
        && is_hex_at_least(&entry.name_encrypted, 16)
        && is_pointer_name(&entry.ipns_name)
        && is_wrapped_key_32(&entry.folder_key_encrypted)
        && is_wrapped_signing_key(&entry.ipns_private_key_encrypted);
    if ok {
        Ok(())
    } else {
        Err(CodecError::DecryptionFailed)
    }
}

fn validate_file_pointer(pointer: &FilePointer) -> Result<(), CodecError> {
    let ok = is_object_id(&pointer.id)
        && is_hex_exact(&pointer.name_iv, AES_GCM_IV_SIZE)
        && is_hex_at_least(&pointer.name_encrypted, 16)
        && is_pointer_name(&pointer.file_meta_ipns_name)
        && pointer
            .ipns_private_key_encrypted
            .as_deref()
            .map_or(true, is_wrapped_signing_key);
    if ok {
        Ok(())
    } else {
        Err(CodecError::DecryptionFailed)
    }
}

/// Encrypt an entry name under the containing folder's key.
///
/// Returns (ciphertext hex, IV hex) for the entry's `nameEncrypted` /
/// `nameIv` fields.
pub fn encrypt_entry_name(
    name: &str,
    folder_key: &[u8; 32],
) -> Result<(String, String), CodecError> {
    let iv = generate_iv();
    let ciphertext = encrypt_aes_gcm(name.as_bytes(), folder_key, &iv)
        .map_err(|_| CodecError::EncryptionFailed)?;
    Ok((hex::encode(ciphertext), hex::encode(iv)))
}

/// Decrypt an entry name. Non-UTF-8 plaintext is a validation failure.
pub fn decrypt_entry_name(
    name_encrypted: &str,
    name_iv: &str,
    folder_key: &[u8; 32],
) -> Result<String, CodecError> {
    let iv_bytes = hex::decode(name_iv).map_err(|_| CodecError::DecryptionFailed)?;
    let iv: [u8; AES_GCM_IV_SIZE] = iv_bytes
        .try_into()
        .map_err(|_| CodecError::DecryptionFailed)?;
    let ciphertext = hex::decode(name_encrypted).map_err(|_| CodecError::DecryptionFailed)?;

    let plaintext =
        decrypt_aes_gcm(&ciphertext, folder_key, &iv).map_err(|_| CodecError::DecryptionFailed)?;
    String::from_utf8(plaintext).map_err(|_| CodecError::DecryptionFailed)
}
