//! The mutable-pointer publish pipeline.
//!
//! Owns everything between "this pointer should now target that CID" and
//! a verified view of what a pointer targets:
//!
//! - per-pointer serialization: at most one publish in flight per pointer;
//! - monotone sequences: every publish uses `max(cached, resolved) + 1`,
//!   and the local cache never decreases;
//! - signature verification on every resolve, against the self-certifying
//!   name;
//! - single-flight deduplication of concurrent resolves;
//! - cached-fallback reads when the routing layer is unavailable or a
//!   resolve fails verification.

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use tokio::sync::{broadcast, Mutex};

use crate::api::transport::{TransportError, VaultTransport};
use crate::api::types::PublishRequest;
use crate::crypto::ipns;
use crate::error::CoreError;

/// Validity window for published records: 48 hours.
const RECORD_LIFETIME_MS: u64 = 48 * 60 * 60 * 1000;

/// Bounded retry for transient publish failures.
const MAX_PUBLISH_ATTEMPTS: u32 = 3;

/// Base delay for exponential publish backoff.
const PUBLISH_BACKOFF_BASE: Duration = Duration::from_millis(500);

/// A verified (or cached-fallback) view of a pointer.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPointer {
    /// Target CID.
    pub cid: String,
    /// Record sequence, or the last known sequence on the stale path.
    pub sequence: u64,
    /// True when this is a cached value served because the routing layer
    /// was unavailable or the resolved record failed verification. Callers
    /// should treat stale data as read-only.
    pub stale: bool,
}

/// Clonable resolve failure for the single-flight broadcast.
#[derive(Debug, Clone, PartialEq)]
enum ResolveFailure {
    SignatureMismatch,
    Unavailable,
    NotFound,
}

impl From<ResolveFailure> for CoreError {
    fn from(f: ResolveFailure) -> Self {
        match f {
            ResolveFailure::SignatureMismatch => CoreError::SignatureMismatch,
            ResolveFailure::Unavailable => CoreError::RoutingUnavailable,
            ResolveFailure::NotFound => CoreError::NotFound("pointer record".into()),
        }
    }
}

type ResolveOutcome = Result<ResolvedPointer, ResolveFailure>;

/// Pointer state shared by a session.
pub struct PublishPipeline<T: VaultTransport> {
    transport: Arc<T>,
    /// Per-pointer publish locks, created on first use.
    publish_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Highest sequence this client has ever used or verified per pointer.
    sequences: Mutex<HashMap<String, u64>>,
    /// Last verified CID per pointer, the fallback read path.
    last_known: Mutex<HashMap<String, String>>,
    /// In-flight resolves for single-flight deduplication.
    inflight: Mutex<HashMap<String, broadcast::Sender<ResolveOutcome>>>,
}

impl<T: VaultTransport> PublishPipeline<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            publish_locks: Mutex::new(HashMap::new()),
            sequences: Mutex::new(HashMap::new()),
            last_known: Mutex::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Seed the sequence cache for a pointer this client just created.
    /// A fresh pointer has no resolvable record yet; without the seed its
    /// first publish would fail with `SequenceUnknown`.
    pub async fn register_new_pointer(&self, ipns_name: &str) {
        self.sequences
            .lock()
            .await
            .entry(ipns_name.to_string())
            .or_insert(0);
    }

    /// Drop all per-pointer state (session teardown).
    pub async fn clear(&self) {
        self.publish_locks.lock().await.clear();
        self.sequences.lock().await.clear();
        self.last_known.lock().await.clear();
        self.inflight.lock().await.clear();
    }

    /// Highest sequence known for a pointer, if any.
    pub async fn cached_sequence(&self, ipns_name: &str) -> Option<u64> {
        self.sequences.lock().await.get(ipns_name).copied()
    }

    /// Sign and publish a pointer update targeting `cid`.
    ///
    /// Serialized per pointer; concurrent calls for the same pointer run
    /// as non-overlapping attempts. Returns the sequence number used.
    pub async fn publish(
        &self,
        ipns_name: &str,
        signing_key: &[u8; 32],
        cid: &str,
    ) -> Result<u64, CoreError> {
        let lock = self.pointer_lock(ipns_name).await;
        let _guard = lock.lock().await;

        let next_sequence = self.next_sequence(ipns_name).await?;

        let value = format!("/ipfs/{}", cid);
        let record = ipns::create_ipns_record(signing_key, &value, next_sequence, RECORD_LIFETIME_MS)?;
        let marshaled = ipns::marshal_ipns_record(&record)?;
        let request = PublishRequest {
            ipns_name: ipns_name.to_string(),
            record: base64::engine::general_purpose::STANDARD.encode(marshaled),
            metadata_cid: cid.to_string(),
        };

        self.publish_with_retry(&request).await?;

        self.record_published(ipns_name, next_sequence, cid).await;
        log::debug!(
            "Published pointer {} -> {} (seq {})",
            ipns_name,
            cid,
            next_sequence
        );
        Ok(next_sequence)
    }

    /// Resolve a pointer to a verified CID, deduplicating concurrent
    /// resolves of the same pointer into one network call.
    pub async fn resolve(&self, ipns_name: &str) -> Result<ResolvedPointer, CoreError> {
        let mut inflight = self.inflight.lock().await;
        let existing = inflight.get(ipns_name).map(|sender| sender.subscribe());

        if let Some(mut receiver) = existing {
            // Another resolve for this pointer is in flight; wait for its
            // broadcast instead of issuing our own call.
            drop(inflight);
            return match receiver.recv().await {
                Ok(outcome) => outcome.map_err(CoreError::from),
                // Leader vanished without broadcasting; resolve directly.
                Err(_) => self.resolve_once(ipns_name).await.map_err(CoreError::from),
            };
        }

        let (sender, _retained) = broadcast::channel(1);
        inflight.insert(ipns_name.to_string(), sender);
        drop(inflight);

        let outcome = self.resolve_once(ipns_name).await;

        let mut inflight = self.inflight.lock().await;
        if let Some(sender) = inflight.remove(ipns_name) {
            let _ = sender.send(outcome.clone());
        }
        drop(inflight);

        outcome.map_err(CoreError::from)
    }

    /// One verified resolve with the cached-fallback policy applied.
    async fn resolve_once(&self, ipns_name: &str) -> ResolveOutcome {
        match self.transport.resolve_record(ipns_name).await {
            Ok(record) => {
                match ipns::validate_resolved_payload(
                    ipns_name,
                    &record.data,
                    &record.signature,
                    &record.signer_public_key,
                ) {
                    Ok(signed)
                        if signed.value == format!("/ipfs/{}", record.cid)
                            && signed.sequence == record.sequence =>
                    {
                        self.record_verified(ipns_name, record.sequence, &record.cid)
                            .await;
                        Ok(ResolvedPointer {
                            cid: record.cid,
                            sequence: record.sequence,
                            stale: false,
                        })
                    }
                    // Signed fields disagree with the response, or the
                    // signature/signer is wrong: the value is untrusted.
                    _ => {
                        log::warn!(
                            "Pointer {} resolve failed verification; serving cached value",
                            ipns_name
                        );
                        self.cached_fallback(ipns_name, ResolveFailure::SignatureMismatch)
                            .await
                    }
                }
            }
            Err(TransportError::NotFound) => Err(ResolveFailure::NotFound),
            Err(e) if e.is_transient() => {
                log::warn!(
                    "Routing unavailable for pointer {} ({}); serving cached value",
                    ipns_name,
                    e
                );
                self.cached_fallback(ipns_name, ResolveFailure::Unavailable)
                    .await
            }
            Err(_) => Err(ResolveFailure::Unavailable),
        }
    }

    async fn cached_fallback(&self, ipns_name: &str, failure: ResolveFailure) -> ResolveOutcome {
        let cached = self.last_known.lock().await.get(ipns_name).cloned();
        match cached {
            Some(cid) => {
                let sequence = self
                    .sequences
                    .lock()
                    .await
                    .get(ipns_name)
                    .copied()
                    .unwrap_or(0);
                Ok(ResolvedPointer {
                    cid,
                    sequence,
                    stale: true,
                })
            }
            None => Err(failure),
        }
    }

    /// Next sequence: `max(cached, verified remote) + 1`. Fails with
    /// `SequenceUnknown` when neither exists; never falls back to zero,
    /// which would roll the pointer back.
    async fn next_sequence(&self, ipns_name: &str) -> Result<u64, CoreError> {
        let cached = self.sequences.lock().await.get(ipns_name).copied();
        let remote = self.verified_remote_sequence(ipns_name).await;

        match (cached, remote) {
            (None, None) => Err(CoreError::SequenceUnknown),
            (c, r) => Ok(c.unwrap_or(0).max(r.unwrap_or(0)) + 1),
        }
    }

    /// Remote sequence, counted only if the record verifies.
    async fn verified_remote_sequence(&self, ipns_name: &str) -> Option<u64> {
        let record = self.transport.resolve_record(ipns_name).await.ok()?;
        let signed = ipns::validate_resolved_payload(
            ipns_name,
            &record.data,
            &record.signature,
            &record.signer_public_key,
        )
        .ok()?;
        (signed.sequence == record.sequence).then_some(record.sequence)
    }

    async fn publish_with_retry(&self, request: &PublishRequest) -> Result<(), CoreError> {
        let mut attempt = 0;
        loop {
            match self.transport.publish_record(request).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt + 1 < MAX_PUBLISH_ATTEMPTS => {
                    attempt += 1;
                    let delay = PUBLISH_BACKOFF_BASE * 2u32.pow(attempt - 1);
                    log::warn!(
                        "Publish of {} failed transiently (attempt {}): {}; retrying in {:?}",
                        request.ipns_name,
                        attempt,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Record a successful publish. The cached sequence never decreases.
    async fn record_published(&self, ipns_name: &str, sequence: u64, cid: &str) {
        let mut sequences = self.sequences.lock().await;
        let entry = sequences.entry(ipns_name.to_string()).or_insert(0);
        *entry = (*entry).max(sequence);
        drop(sequences);

        self.last_known
            .lock()
            .await
            .insert(ipns_name.to_string(), cid.to_string());
    }

    /// Record a verified resolve. Same monotonicity rule as publishes.
    async fn record_verified(&self, ipns_name: &str, sequence: u64, cid: &str) {
        let mut sequences = self.sequences.lock().await;
        let entry = sequences.entry(ipns_name.to_string()).or_insert(0);
        *entry = (*entry).max(sequence);
        drop(sequences);

        self.last_known
            .lock()
            .await
            .insert(ipns_name.to_string(), cid.to_string());
    }

    async fn pointer_lock(&self, ipns_name: &str) -> Arc<Mutex<()>> {
        self.publish_locks
            .lock()
            .await
            .entry(ipns_name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
