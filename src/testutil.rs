//! In-memory mock backend for unit and scenario tests.
//!
//! Implements [`VaultTransport`] against process-local maps: blocks are
//! content-addressed with a SHA-256-derived mock CID, published records
//! are unmarshaled and served back on resolve, and every operation counts
//! calls so tests can assert on network behavior (single-flight, retries,
//! orphan unpins).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use base64::Engine;
use sha2::{Digest, Sha256};

use crate::api::transport::{TransportError, VaultTransport};
use crate::api::types::{PublishRequest, QuotaInfo, ResolvedRecord, VaultBootstrap};
use crate::crypto::ipns;
use crate::crypto::wrap_key;
use crate::vault::VaultKeypair;

/// A fresh vault keypair for tests.
pub fn vault_keypair() -> VaultKeypair {
    let (sk, pk) = ecies::utils::generate_keypair();
    VaultKeypair::from_bytes(&sk.serialize(), &pk.serialize()).unwrap()
}

/// Two handles to the same vault identity (sessions consume keypairs).
pub fn vault_keypair_twice() -> (VaultKeypair, VaultKeypair) {
    let (sk, pk) = ecies::utils::generate_keypair();
    (
        VaultKeypair::from_bytes(&sk.serialize(), &pk.serialize()).unwrap(),
        VaultKeypair::from_bytes(&sk.serialize(), &pk.serialize()).unwrap(),
    )
}

/// Raw key bytes for tests that need the identity alongside a consumed
/// keypair.
pub fn vault_keypair_raw() -> ([u8; 32], [u8; 65]) {
    let (sk, pk) = ecies::utils::generate_keypair();
    (sk.serialize(), pk.serialize())
}

/// Install an encrypted vault bootstrap for `keypair` on the mock backend.
/// Returns the unwrapped (root folder key, root pointer seed).
pub fn install_vault(transport: &MockTransport, keypair: &VaultKeypair) -> ([u8; 32], [u8; 32]) {
    let root_folder_key = crate::crypto::utils::generate_symmetric_key();
    let (root_ipns_pk, root_ipns_sk) = crate::crypto::generate_ed25519_keypair();
    let root_ipns_seed: [u8; 32] = root_ipns_sk.try_into().unwrap();
    let root_ipns_name =
        ipns::derive_ipns_name(&root_ipns_pk.try_into().unwrap()).unwrap();

    let wrapped_folder = wrap_key(&root_folder_key, keypair.public_key()).unwrap();
    let wrapped_ipns = wrap_key(&root_ipns_seed, keypair.public_key()).unwrap();

    *transport.vault.lock().unwrap() = Some(VaultBootstrap {
        root_ipns_name,
        encrypted_root_folder_key: hex::encode(wrapped_folder),
        encrypted_root_ipns_private_key: hex::encode(wrapped_ipns),
    });

    (root_folder_key, root_ipns_seed)
}

/// Mock content address: "bafymock" + SHA-256 prefix, so identical bytes
/// get identical CIDs like the real pinning layer.
pub fn mock_cid(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    format!("bafymock{}", hex::encode(&digest[..16]))
}

#[derive(Default)]
pub struct MockTransport {
    pub blocks: Mutex<HashMap<String, Vec<u8>>>,
    pub pinned: Mutex<HashSet<String>>,
    pub records: Mutex<HashMap<String, ResolvedRecord>>,
    pub published: Mutex<Vec<PublishRequest>>,
    pub unpinned: Mutex<Vec<String>>,
    pub vault: Mutex<Option<VaultBootstrap>>,

    pub put_calls: AtomicU32,
    pub get_calls: AtomicU32,
    pub resolve_calls: AtomicU32,
    pub publish_calls: AtomicU32,

    pub quota_used: AtomicU64,
    pub quota_limit: AtomicU64,

    /// Delay applied inside resolve, for single-flight races.
    pub resolve_delay: Mutex<Option<Duration>>,
    /// Fail the next N resolves with a transient error.
    pub fail_resolves: AtomicU32,
    /// Fail the next N publishes with a transient error.
    pub fail_publishes: AtomicU32,
    /// Pointer names whose publishes always fail transiently.
    pub fail_publish_names: Mutex<HashSet<String>>,
    /// Serve resolves with this record's signature corrupted.
    pub corrupt_signatures: AtomicU32,
}

impl MockTransport {
    pub fn new() -> Self {
        let mock = Self::default();
        mock.quota_limit.store(500 * 1024 * 1024, Ordering::SeqCst);
        mock
    }

    /// Install a record for `ipns_name` as if another device published it.
    pub fn install_record(&self, ipns_name: &str, signing_key: &[u8; 32], cid: &str, sequence: u64) {
        let record = ipns::create_ipns_record(
            signing_key,
            &format!("/ipfs/{}", cid),
            sequence,
            86_400_000,
        )
        .unwrap();
        self.records.lock().unwrap().insert(
            ipns_name.to_string(),
            ResolvedRecord {
                cid: cid.to_string(),
                sequence,
                signature: record.signature_v2.clone(),
                signer_public_key: record.public_key.clone(),
                data: record.data.clone(),
                from_cache: false,
            },
        );
    }

    pub fn stored_block(&self, cid: &str) -> Option<Vec<u8>> {
        self.blocks.lock().unwrap().get(cid).cloned()
    }

    pub fn is_pinned(&self, cid: &str) -> bool {
        self.pinned.lock().unwrap().contains(cid)
    }

    pub fn published_for(&self, ipns_name: &str) -> Vec<PublishRequest> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.ipns_name == ipns_name)
            .cloned()
            .collect()
    }
}

impl VaultTransport for MockTransport {
    async fn fetch_vault(&self) -> Result<VaultBootstrap, TransportError> {
        self.vault
            .lock()
            .unwrap()
            .clone()
            .ok_or(TransportError::NotFound)
    }

    async fn put_block(&self, data: &[u8]) -> Result<String, TransportError> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);

        let used = self.quota_used.load(Ordering::SeqCst);
        let limit = self.quota_limit.load(Ordering::SeqCst);
        if used + data.len() as u64 > limit {
            return Err(TransportError::QuotaExceeded);
        }

        let cid = mock_cid(data);
        let newly_pinned = self.pinned.lock().unwrap().insert(cid.clone());
        if newly_pinned {
            self.quota_used.fetch_add(data.len() as u64, Ordering::SeqCst);
        }
        self.blocks.lock().unwrap().insert(cid.clone(), data.to_vec());
        Ok(cid)
    }

    async fn get_block(&self, cid: &str) -> Result<Vec<u8>, TransportError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.stored_block(cid).ok_or(TransportError::NotFound)
    }

    async fn unpin_block(&self, cid: &str) -> Result<(), TransportError> {
        self.unpinned.lock().unwrap().push(cid.to_string());
        if self.pinned.lock().unwrap().remove(cid) {
            let size = self
                .blocks
                .lock()
                .unwrap()
                .get(cid)
                .map(|b| b.len() as u64)
                .unwrap_or(0);
            let _ = self
                .quota_used
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                    Some(used.saturating_sub(size))
                });
        }
        Ok(())
    }

    async fn publish_record(&self, request: &PublishRequest) -> Result<(), TransportError> {
        self.publish_calls.fetch_add(1, Ordering::SeqCst);

        let failures = self.fail_publishes.load(Ordering::SeqCst);
        if failures > 0 {
            self.fail_publishes.store(failures - 1, Ordering::SeqCst);
            return Err(TransportError::Unavailable("mock outage".into()));
        }
        if self
            .fail_publish_names
            .lock()
            .unwrap()
            .contains(&request.ipns_name)
        {
            return Err(TransportError::Unavailable("mock pointer outage".into()));
        }

        let marshaled = base64::engine::general_purpose::STANDARD
            .decode(&request.record)
            .map_err(|_| TransportError::Protocol("bad record base64".into()))?;
        let record = ipns::unmarshal_ipns_record(&marshaled)
            .map_err(|_| TransportError::Protocol("bad record bytes".into()))?;

        self.records.lock().unwrap().insert(
            request.ipns_name.clone(),
            ResolvedRecord {
                cid: request.metadata_cid.clone(),
                sequence: record.sequence,
                signature: record.signature_v2,
                signer_public_key: record.public_key,
                data: record.data,
                from_cache: false,
            },
        );
        self.published.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn resolve_record(&self, ipns_name: &str) -> Result<ResolvedRecord, TransportError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.resolve_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failures = self.fail_resolves.load(Ordering::SeqCst);
        if failures > 0 {
            self.fail_resolves.store(failures - 1, Ordering::SeqCst);
            return Err(TransportError::Timeout);
        }

        let mut record = self
            .records
            .lock()
            .unwrap()
            .get(ipns_name)
            .cloned()
            .ok_or(TransportError::NotFound)?;

        let corruptions = self.corrupt_signatures.load(Ordering::SeqCst);
        if corruptions > 0 {
            self.corrupt_signatures.store(corruptions - 1, Ordering::SeqCst);
            record.signature[0] ^= 0xFF;
        }

        Ok(record)
    }

    async fn quota(&self) -> Result<QuotaInfo, TransportError> {
        Ok(QuotaInfo {
            used_bytes: self.quota_used.load(Ordering::SeqCst),
            limit_bytes: self.quota_limit.load(Ordering::SeqCst),
        })
    }
}
