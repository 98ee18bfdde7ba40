//! Device registry (`"v1"`): the per-user list of authorized devices.
//!
//! The registry travels in the standard encrypted envelope under a
//! symmetric key HKDF-derived from the vault key, referenced by a
//! deterministically derived pointer, so any session holding the vault
//! key can find and read it without backend help.

use serde::{Deserialize, Serialize};

use super::envelope::{self, EncryptedEnvelope};
use super::validate::{is_hex_exact, is_text_max};
use super::CodecError;

/// Current device registry schema version.
pub const REGISTRY_SCHEMA_VERSION: &str = "v1";

/// Maximum device name length (characters).
pub const MAX_DEVICE_NAME_LEN: usize = 200;

/// Maximum app version string length.
pub const MAX_APP_VERSION_LEN: usize = 50;

/// Maximum device model string length.
pub const MAX_DEVICE_MODEL_LEN: usize = 200;

/// Authorization status for a registered device.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeviceAuthStatus {
    Pending,
    Authorized,
    Revoked,
}

/// Platform a device runs on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DevicePlatform {
    Web,
    Macos,
    Linux,
    Windows,
}

/// One registered device. Revoked devices stay in the list as an audit
/// trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEntry {
    /// SHA-256 of the device's Ed25519 public key (64 hex chars).
    pub device_id: String,
    /// Device Ed25519 public key (64 hex chars).
    pub public_key: String,
    /// Human-readable device name.
    pub name: String,
    /// Platform identifier.
    pub platform: DevicePlatform,
    /// App version string.
    pub app_version: String,
    /// Device model or OS version.
    pub device_model: String,
    /// SHA-256 of the registration IP address (64 hex chars).
    pub ip_hash: String,
    /// Authorization status.
    pub status: DeviceAuthStatus,
    /// First registration (Unix ms).
    pub created_at: u64,
    /// Last registry sync from this device (Unix ms).
    pub last_seen_at: u64,
    /// Revocation time (Unix ms), present once revoked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<u64>,
    /// Device id that performed the revocation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_by: Option<String>,
}

/// The full device registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRegistry {
    /// Schema version tag.
    pub version: String,
    /// Monotone update counter.
    pub sequence_number: u64,
    /// All device entries, including revoked ones.
    pub devices: Vec<DeviceEntry>,
}

impl DeviceRegistry {
    /// An empty registry for a user's first device.
    pub fn empty() -> Self {
        Self {
            version: REGISTRY_SCHEMA_VERSION.to_string(),
            sequence_number: 0,
            devices: Vec::new(),
        }
    }
}

/// Encrypt a registry into its network envelope.
pub fn encrypt_device_registry(
    registry: &DeviceRegistry,
    registry_key: &[u8; 32],
) -> Result<EncryptedEnvelope, CodecError> {
    envelope::seal_json(registry, registry_key)
}

/// Decrypt and strictly validate a registry envelope.
pub fn decrypt_and_validate_device_registry(
    env: &EncryptedEnvelope,
    registry_key: &[u8; 32],
) -> Result<DeviceRegistry, CodecError> {
    let json = envelope::open(env, registry_key)?;
    let value: serde_json::Value =
        serde_json::from_slice(&json).map_err(|_| CodecError::DecryptionFailed)?;
    validate_device_registry(value)
}

/// Parse and validate a plaintext registry value.
pub fn validate_device_registry(value: serde_json::Value) -> Result<DeviceRegistry, CodecError> {
    let version = value
        .get("version")
        .and_then(|v| v.as_str())
        .ok_or(CodecError::DecryptionFailed)?;
    if version != REGISTRY_SCHEMA_VERSION {
        return Err(CodecError::DecryptionFailed);
    }

    let registry: DeviceRegistry =
        serde_json::from_value(value).map_err(|_| CodecError::DecryptionFailed)?;

    for device in &registry.devices {
        validate_device_entry(device)?;
    }

    Ok(registry)
}

fn validate_device_entry(device: &DeviceEntry) -> Result<(), CodecError> {
    let ok = is_hex_exact(&device.device_id, 32)
        && is_hex_exact(&device.public_key, 32)
        && is_hex_exact(&device.ip_hash, 32)
        && is_text_max(&device.name, MAX_DEVICE_NAME_LEN)
        && is_text_max(&device.app_version, MAX_APP_VERSION_LEN)
        && is_text_max(&device.device_model, MAX_DEVICE_MODEL_LEN)
        && device
            .revoked_by
            .as_deref()
            .map_or(true, |id| is_hex_exact(id, 32));
    if ok {
        Ok(())
    } else {
        Err(CodecError::DecryptionFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::utils::generate_symmetric_key;

    pub(crate) fn test_entry() -> DeviceEntry {
        DeviceEntry {
            device_id: "aa".repeat(32),
            public_key: "bb".repeat(32),
            name: "MacBook Pro".into(),
            platform: DevicePlatform::Macos,
            app_version: "0.1.0".into(),
            device_model: "macOS 15.2".into(),
            ip_hash: "cc".repeat(32),
            status: DeviceAuthStatus::Authorized,
            created_at: 1_700_000_000_000,
            last_seen_at: 1_700_000_001_000,
            revoked_at: None,
            revoked_by: None,
        }
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let key = generate_symmetric_key();
        let registry = DeviceRegistry {
            version: REGISTRY_SCHEMA_VERSION.into(),
            sequence_number: 3,
            devices: vec![test_entry()],
        };

        let env = encrypt_device_registry(&registry, &key).unwrap();
        let decrypted = decrypt_and_validate_device_registry(&env, &key).unwrap();
        assert_eq!(decrypted, registry);
    }

    #[test]
    fn test_camel_case_wire_format() {
        let registry = DeviceRegistry {
            version: REGISTRY_SCHEMA_VERSION.into(),
            sequence_number: 1,
            devices: vec![test_entry()],
        };
        let json = serde_json::to_string(&registry).unwrap();
        assert!(json.contains("\"sequenceNumber\":1"));
        assert!(json.contains("\"deviceId\""));
        assert!(json.contains("\"appVersion\":\"0.1.0\""));
        assert!(json.contains("\"platform\":\"macos\""));
        assert!(json.contains("\"status\":\"authorized\""));
        assert!(!json.contains("revokedAt"));
    }

    #[test]
    fn test_status_and_platform_whitelists() {
        for status in ["pending", "authorized", "revoked"] {
            let parsed: DeviceAuthStatus =
                serde_json::from_str(&format!("\"{}\"", status)).unwrap();
            assert_eq!(serde_json::to_string(&parsed).unwrap(), format!("\"{}\"", status));
        }
        assert!(serde_json::from_str::<DeviceAuthStatus>("\"disabled\"").is_err());

        for platform in ["web", "macos", "linux", "windows"] {
            assert!(serde_json::from_str::<DevicePlatform>(&format!("\"{}\"", platform)).is_ok());
        }
        assert!(serde_json::from_str::<DevicePlatform>("\"ios\"").is_err());
    }

    #[test]
    fn test_validation_rejects_bad_entries() {
        let base = DeviceRegistry {
            version: REGISTRY_SCHEMA_VERSION.into(),
            sequence_number: 1,
            devices: vec![test_entry()],
        };

        let cases: Vec<Box<dyn Fn(&mut DeviceEntry)>> = vec![
            Box::new(|d| d.device_id = "aa".repeat(31)),
            Box::new(|d| d.public_key = "xyz".into()),
            Box::new(|d| d.ip_hash = String::new()),
            Box::new(|d| d.name = "n".repeat(201)),
            Box::new(|d| d.app_version = "v".repeat(51)),
            Box::new(|d| d.device_model = "m".repeat(201)),
            Box::new(|d| d.revoked_by = Some("short".into())),
        ];

        for mutate in cases {
            let mut registry = base.clone();
            mutate(&mut registry.devices[0]);
            let value = serde_json::to_value(&registry).unwrap();
            assert!(matches!(
                validate_device_registry(value),
                Err(CodecError::DecryptionFailed)
            ));
        }
    }

    #[test]
    fn test_revoked_entry_round_trip() {
        let mut entry = test_entry();
        entry.status = DeviceAuthStatus::Revoked;
        entry.revoked_at = Some(1_700_000_002_000);
        entry.revoked_by = Some("dd".repeat(32));

        let registry = DeviceRegistry {
            version: REGISTRY_SCHEMA_VERSION.into(),
            sequence_number: 9,
            devices: vec![entry.clone()],
        };
        let value = serde_json::to_value(&registry).unwrap();
        let parsed = validate_device_registry(value).unwrap();
        assert_eq!(parsed.devices[0], entry);
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let registry = DeviceRegistry {
            version: REGISTRY_SCHEMA_VERSION.into(),
            sequence_number: 2,
            devices: vec![],
        };
        let mut value = serde_json::to_value(&registry).unwrap();
        value["pushTokens"] = serde_json::json!([]);
        assert_eq!(validate_device_registry(value).unwrap(), registry);
    }
}
