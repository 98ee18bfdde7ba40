//! Vault export (`"1.0"`): the offline recovery bundle.
//!
//! Generated on demand and handed to the user as a download; never stored
//! on the network. A recovery tool holding the vault private key can open
//! the vault from this bundle alone.

use serde::{Deserialize, Serialize};

use super::validate::{is_pointer_name, is_wrapped_key_32, is_wrapped_signing_key};
use super::CodecError;
use crate::crypto::ipns::format_rfc3339_ms;

/// Fixed `format` discriminator for export files.
pub const EXPORT_FORMAT: &str = "cipherbox-vault-export";

/// Current export bundle version.
pub const EXPORT_VERSION: &str = "1.0";

/// How the vault keys in this bundle were produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DerivationInfo {
    /// Key production method (e.g., "mpc-threshold", "external-wallet").
    pub method: String,
    /// Derivation scheme version, when the method has one.
    pub derivation_version: Option<u32>,
}

/// The offline recovery bundle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VaultExport {
    /// Always `cipherbox-vault-export`.
    pub format: String,
    /// Bundle version, currently `1.0`.
    pub version: String,
    /// Generation time, RFC3339.
    pub exported_at: String,
    /// Root folder pointer name.
    pub root_ipns_name: String,
    /// Root folder key, ECIES-wrapped to the vault public key (hex).
    pub encrypted_root_folder_key: String,
    /// Root pointer signing key, ECIES-wrapped (hex).
    pub encrypted_root_ipns_private_key: String,
    /// Provenance of the vault keypair.
    pub derivation_info: DerivationInfo,
}

impl VaultExport {
    /// Build a bundle stamped with the given time.
    pub fn new(
        exported_at_ms: u64,
        root_ipns_name: String,
        encrypted_root_folder_key: String,
        encrypted_root_ipns_private_key: String,
        derivation_info: DerivationInfo,
    ) -> Self {
        Self {
            format: EXPORT_FORMAT.to_string(),
            version: EXPORT_VERSION.to_string(),
            exported_at: format_rfc3339_ms(exported_at_ms),
            root_ipns_name,
            encrypted_root_folder_key,
            encrypted_root_ipns_private_key,
            derivation_info,
        }
    }
}

/// Serialize a bundle to the JSON the user downloads.
pub fn encode_vault_export(export: &VaultExport) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec_pretty(export).map_err(|_| CodecError::EncryptionFailed)
}

/// Parse and strictly validate an export file.
pub fn decode_and_validate_vault_export(bytes: &[u8]) -> Result<VaultExport, CodecError> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|_| CodecError::DecryptionFailed)?;
    validate_vault_export(value)
}

/// Validate a parsed export value.
pub fn validate_vault_export(value: serde_json::Value) -> Result<VaultExport, CodecError> {
    let export: VaultExport =
        serde_json::from_value(value).map_err(|_| CodecError::DecryptionFailed)?;

    let ok = export.format == EXPORT_FORMAT
        && export.version == EXPORT_VERSION
        && is_pointer_name(&export.root_ipns_name)
        && is_wrapped_key_32(&export.encrypted_root_folder_key)
        && is_wrapped_signing_key(&export.encrypted_root_ipns_private_key);
    if ok {
        Ok(export)
    } else {
        Err(CodecError::DecryptionFailed)
    }
}
