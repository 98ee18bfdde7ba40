//! Encrypted device registry client.
//!
//! Maintains the per-user device list stored behind the deterministically
//! derived registry pointer, enabling cross-device awareness: any session
//! holding the vault key can list, register, and revoke devices without
//! backend help. Registry updates must never block session start; callers
//! run `register_device` from a spawned task and log failures.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::api::transport::VaultTransport;
use crate::codec::envelope;
use crate::codec::registry::{
    decrypt_and_validate_device_registry, encrypt_device_registry, DeviceAuthStatus, DeviceEntry,
    DevicePlatform, DeviceRegistry,
};
use crate::crypto::hkdf::{derive_registry_ipns_keypair, derive_registry_key};
use crate::crypto::utils::now_ms;
use crate::error::CoreError;
use crate::publish::PublishPipeline;
use crate::vault::VaultKeypair;

/// What a device says about itself when registering.
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    /// The device's Ed25519 public key (32 bytes); its SHA-256 is the
    /// device id.
    pub device_public_key: [u8; 32],
    pub name: String,
    pub platform: DevicePlatform,
    pub app_version: String,
    pub device_model: String,
    /// SHA-256 of the registration IP, hex. Use [`hash_ip`].
    pub ip_hash: String,
}

impl DeviceDescriptor {
    /// Descriptor with host-derived defaults for the current machine.
    pub fn for_this_host(device_public_key: [u8; 32], app_version: &str) -> Self {
        Self {
            device_public_key,
            name: hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "CipherBox Device".to_string()),
            platform: current_platform(),
            app_version: app_version.to_string(),
            device_model: std::env::consts::OS.to_string(),
            ip_hash: hash_ip(""),
        }
    }
}

fn current_platform() -> DevicePlatform {
    if cfg!(target_os = "macos") {
        DevicePlatform::Macos
    } else if cfg!(target_os = "windows") {
        DevicePlatform::Windows
    } else {
        DevicePlatform::Linux
    }
}

/// SHA-256 of an IP address string, hex. The registry never stores raw IPs.
pub fn hash_ip(ip: &str) -> String {
    hex::encode(Sha256::digest(ip.as_bytes()))
}

/// Device id: SHA-256 of the device public key, hex.
pub fn device_id_for(device_public_key: &[u8; 32]) -> String {
    hex::encode(Sha256::digest(device_public_key))
}

/// Register this device, or refresh its entry if already present.
///
/// The first device of a vault is auto-authorized; later devices join as
/// pending until approved from an authorized device.
pub async fn register_device<T: VaultTransport>(
    transport: &Arc<T>,
    pipeline: &Arc<PublishPipeline<T>>,
    keypair: &VaultKeypair,
    descriptor: DeviceDescriptor,
) -> Result<DeviceEntry, CoreError> {
    let mut registry = load_registry(transport, pipeline, keypair)
        .await?
        .unwrap_or_else(DeviceRegistry::empty);
    let first_device = registry.devices.is_empty();

    let device_id = device_id_for(&descriptor.device_public_key);
    let now = now_ms();

    let entry = match registry.devices.iter_mut().find(|d| d.device_id == device_id) {
        Some(existing) => {
            existing.last_seen_at = now;
            existing.app_version = descriptor.app_version.clone();
            existing.clone()
        }
        None => {
            let entry = DeviceEntry {
                device_id,
                public_key: hex::encode(descriptor.device_public_key),
                name: descriptor.name,
                platform: descriptor.platform,
                app_version: descriptor.app_version,
                device_model: descriptor.device_model,
                ip_hash: descriptor.ip_hash,
                status: if first_device {
                    DeviceAuthStatus::Authorized
                } else {
                    DeviceAuthStatus::Pending
                },
                created_at: now,
                last_seen_at: now,
                revoked_at: None,
                revoked_by: None,
            };
            registry.devices.push(entry.clone());
            entry
        }
    };

    store_registry(transport, pipeline, keypair, &mut registry).await?;
    log::info!(
        "Device {} registered in encrypted registry ({} devices total)",
        entry.device_id,
        registry.devices.len()
    );
    Ok(entry)
}

/// Revoke a device. The entry stays in the registry as an audit record.
pub async fn revoke_device<T: VaultTransport>(
    transport: &Arc<T>,
    pipeline: &Arc<PublishPipeline<T>>,
    keypair: &VaultKeypair,
    device_id: &str,
    revoked_by: &str,
) -> Result<(), CoreError> {
    let mut registry = load_registry(transport, pipeline, keypair)
        .await?
        .ok_or_else(|| CoreError::NotFound("device registry".into()))?;

    let entry = registry
        .devices
        .iter_mut()
        .find(|d| d.device_id == device_id)
        .ok_or_else(|| CoreError::NotFound(device_id.to_string()))?;

    entry.status = DeviceAuthStatus::Revoked;
    entry.revoked_at = Some(now_ms());
    entry.revoked_by = Some(revoked_by.to_string());

    store_registry(transport, pipeline, keypair, &mut registry).await?;
    log::info!("Device {} revoked by {}", device_id, revoked_by);
    Ok(())
}

/// Fetch and decrypt the registry; `None` when no device was ever
/// registered.
pub async fn load_registry<T: VaultTransport>(
    transport: &Arc<T>,
    pipeline: &Arc<PublishPipeline<T>>,
    keypair: &VaultKeypair,
) -> Result<Option<DeviceRegistry>, CoreError> {
    let pointer = derive_registry_ipns_keypair(keypair.private_key())?;

    let resolved = match pipeline.resolve(&pointer.name).await {
        Ok(r) => r,
        Err(CoreError::NotFound(_)) => return Ok(None),
        Err(e) => return Err(e),
    };

    let blob = transport.get_block(&resolved.cid).await?;
    let env = envelope::from_network_bytes(&blob)?;
    let mut registry_key = derive_registry_key(keypair.private_key())?;
    let result = decrypt_and_validate_device_registry(&env, &registry_key);
    registry_key.zeroize();
    Ok(Some(result?))
}

/// Encrypt, pin, and publish a registry update.
async fn store_registry<T: VaultTransport>(
    transport: &Arc<T>,
    pipeline: &Arc<PublishPipeline<T>>,
    keypair: &VaultKeypair,
    registry: &mut DeviceRegistry,
) -> Result<(), CoreError> {
    registry.sequence_number += 1;

    let mut registry_key = derive_registry_key(keypair.private_key())?;
    let sealed = encrypt_device_registry(registry, &registry_key);
    registry_key.zeroize();
    let blob = envelope::to_network_bytes(&sealed?)?;

    let cid = transport.put_block(&blob).await?;

    let pointer = derive_registry_ipns_keypair(keypair.private_key())?;
    let signing_key: [u8; 32] = pointer
        .private_key
        .as_slice()
        .try_into()
        .map_err(|_| CoreError::SigningFailed)?;

    pipeline.register_new_pointer(&pointer.name).await;
    if let Err(e) = pipeline.publish(&pointer.name, &signing_key, &cid).await {
        // Orphaned registry blob; reclaim the pin.
        if let Err(unpin_err) = transport.unpin_block(&cid).await {
            log::warn!("Registry blob unpin failed: {}", unpin_err);
        }
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{vault_keypair, MockTransport};

    fn descriptor(seed: u8) -> DeviceDescriptor {
        DeviceDescriptor {
            device_public_key: [seed; 32],
            name: format!("Device {}", seed),
            platform: DevicePlatform::Linux,
            app_version: "0.1.0".into(),
            device_model: "test rig".into(),
            ip_hash: hash_ip("203.0.113.7"),
        }
    }

    fn harness() -> (
        Arc<MockTransport>,
        Arc<PublishPipeline<MockTransport>>,
        VaultKeypair,
    ) {
        let transport = Arc::new(MockTransport::new());
        let pipeline = Arc::new(PublishPipeline::new(transport.clone()));
        (transport, pipeline, vault_keypair())
    }

    #[tokio::test]
    async fn test_first_device_auto_authorized() {
        let (transport, pipeline, keypair) = harness();

        let entry = register_device(&transport, &pipeline, &keypair, descriptor(1))
            .await
            .unwrap();
        assert_eq!(entry.status, DeviceAuthStatus::Authorized);
        assert_eq!(entry.device_id, device_id_for(&[1u8; 32]));

        let registry = load_registry(&transport, &pipeline, &keypair)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(registry.sequence_number, 1);
        assert_eq!(registry.devices.len(), 1);
    }

    #[tokio::test]
    async fn test_second_device_pending() {
        let (transport, pipeline, keypair) = harness();

        register_device(&transport, &pipeline, &keypair, descriptor(1))
            .await
            .unwrap();
        let second = register_device(&transport, &pipeline, &keypair, descriptor(2))
            .await
            .unwrap();
        assert_eq!(second.status, DeviceAuthStatus::Pending);

        let registry = load_registry(&transport, &pipeline, &keypair)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(registry.devices.len(), 2);
        assert_eq!(registry.sequence_number, 2);
    }

    #[tokio::test]
    async fn test_reregistration_touches_not_duplicates() {
        let (transport, pipeline, keypair) = harness();

        register_device(&transport, &pipeline, &keypair, descriptor(1))
            .await
            .unwrap();
        let mut again = descriptor(1);
        again.app_version = "0.2.0".into();
        register_device(&transport, &pipeline, &keypair, again)
            .await
            .unwrap();

        let registry = load_registry(&transport, &pipeline, &keypair)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(registry.devices.len(), 1);
        assert_eq!(registry.devices[0].app_version, "0.2.0");
        assert_eq!(registry.devices[0].status, DeviceAuthStatus::Authorized);
    }

    #[tokio::test]
    async fn test_revoke_keeps_audit_trail() {
        let (transport, pipeline, keypair) = harness();

        let first = register_device(&transport, &pipeline, &keypair, descriptor(1))
            .await
            .unwrap();
        let second = register_device(&transport, &pipeline, &keypair, descriptor(2))
            .await
            .unwrap();

        revoke_device(&transport, &pipeline, &keypair, &second.device_id, &first.device_id)
            .await
            .unwrap();

        let registry = load_registry(&transport, &pipeline, &keypair)
            .await
            .unwrap()
            .unwrap();
        let revoked = registry
            .devices
            .iter()
            .find(|d| d.device_id == second.device_id)
            .unwrap();
        assert_eq!(revoked.status, DeviceAuthStatus::Revoked);
        assert!(revoked.revoked_at.is_some());
        assert_eq!(revoked.revoked_by.as_deref(), Some(first.device_id.as_str()));
        assert_eq!(registry.devices.len(), 2, "revoked entries are retained");
    }

    #[tokio::test]
    async fn test_registry_unreadable_without_vault_key() {
        let (transport, pipeline, keypair) = harness();
        register_device(&transport, &pipeline, &keypair, descriptor(1))
            .await
            .unwrap();

        // A different vault key derives a different registry pointer, so
        // the registry simply does not exist for it.
        let stranger = vault_keypair();
        let registry = load_registry(&transport, &pipeline, &stranger).await.unwrap();
        assert!(registry.is_none());
    }

    #[tokio::test]
    async fn test_empty_registry_missing() {
        let (transport, pipeline, keypair) = harness();
        let registry = load_registry(&transport, &pipeline, &keypair).await.unwrap();
        assert!(registry.is_none());

        let result =
            revoke_device(&transport, &pipeline, &keypair, &device_id_for(&[9u8; 32]), "x").await;
        assert!(matches!(result, Err(CoreError::NotFound(_))));
    }
}
