//! Background sync: cross-device change detection and deferred writes.
//!
//! The routing layer is eventually consistent, so the daemon polls the
//! root pointer every 30 seconds and compares sequence numbers (not CIDs)
//! against its cache. A detected change invalidates the metadata cache;
//! the next read fetches and decrypts fresh state. A manual trigger
//! channel serves "sync now" actions, and queued offline writes drain on
//! the first successful poll after an outage.

pub mod queue;

pub use queue::{QueuedWrite, UploadHandler, WriteQueue};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};

use crate::api::transport::VaultTransport;
use crate::cache::MetadataCache;
use crate::error::CoreError;
use crate::publish::PublishPipeline;

/// Default polling interval for pointer sync.
pub const SYNC_INTERVAL: Duration = Duration::from_secs(30);

/// Daemon status for UI surfaces (tray icon, web indicator).
#[derive(Debug, Clone, PartialEq)]
pub enum SyncStatus {
    Idle,
    Syncing,
    Synced,
    Offline,
    Error(String),
}

/// Sender half for manual "sync now" triggers.
pub type SyncTrigger = mpsc::Sender<()>;

/// The background sync daemon. Runs in a spawned task.
pub struct SyncDaemon<T: VaultTransport> {
    pipeline: Arc<PublishPipeline<T>>,
    /// Pointers to watch; the root folder pointer at minimum.
    watched: Vec<String>,
    poll_interval: Duration,
    /// Pointer name -> last observed sequence.
    cached_sequence_numbers: HashMap<String, u64>,
    sync_now_rx: mpsc::Receiver<()>,
    status_tx: watch::Sender<SyncStatus>,
    metadata_cache: Arc<Mutex<MetadataCache>>,
    write_queue: WriteQueue,
    was_offline: bool,
}

impl<T: VaultTransport> SyncDaemon<T> {
    /// Create a daemon watching the given pointers. Returns the daemon,
    /// the manual-trigger sender, and the status receiver.
    pub fn new(
        pipeline: Arc<PublishPipeline<T>>,
        watched: Vec<String>,
        poll_interval: Duration,
        metadata_cache: Arc<Mutex<MetadataCache>>,
    ) -> (Self, SyncTrigger, watch::Receiver<SyncStatus>) {
        let (sync_now_tx, sync_now_rx) = mpsc::channel(4);
        let (status_tx, status_rx) = watch::channel(SyncStatus::Idle);
        let daemon = Self {
            pipeline,
            watched,
            poll_interval,
            cached_sequence_numbers: HashMap::new(),
            sync_now_rx,
            status_tx,
            metadata_cache,
            write_queue: WriteQueue::default(),
            was_offline: false,
        };
        (daemon, sync_now_tx, status_rx)
    }

    /// Main loop; call from a spawned task. Ends when the trigger channel
    /// closes and the task is dropped.
    pub async fn run<H: UploadHandler>(&mut self, handler: &H) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        // The first tick fires immediately; skip it so session start-up
        // finishes before the first poll.
        ticker.tick().await;

        log::info!(
            "Sync daemon started (interval: {}s, {} pointers)",
            self.poll_interval.as_secs(),
            self.watched.len()
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sync_cycle(handler).await;
                }
                Some(()) = self.sync_now_rx.recv() => {
                    log::info!("Manual sync triggered");
                    self.sync_cycle(handler).await;
                }
            }
        }
    }

    /// One cycle: poll every watched pointer, then drain the write queue.
    pub async fn sync_cycle<H: UploadHandler>(&mut self, handler: &H) {
        let _ = self.status_tx.send(SyncStatus::Syncing);

        match self.poll().await {
            Ok(()) => {
                if self.was_offline {
                    log::info!("Connectivity restored, resuming sync");
                    self.was_offline = false;
                }

                if !self.write_queue.is_empty() {
                    let pending = self.write_queue.len();
                    let processed = self.write_queue.process(handler).await;
                    log::info!("Processed {}/{} queued writes", processed, pending);
                }

                let _ = self.status_tx.send(SyncStatus::Synced);
            }
            Err(CoreError::RoutingUnavailable) => {
                if !self.was_offline {
                    log::info!("Routing layer offline, pausing active sync");
                    self.was_offline = true;
                }
                let _ = self.status_tx.send(SyncStatus::Offline);
            }
            Err(e) => {
                log::warn!("Sync poll failed: {}", e);
                let _ = self.status_tx.send(SyncStatus::Error(e.to_string()));
            }
        }
    }

    /// Poll watched pointers and compare sequences. A changed pointer's
    /// cache entry is invalidated so the next read refetches.
    async fn poll(&mut self) -> Result<(), CoreError> {
        for ipns_name in self.watched.clone() {
            let resolved = match self.pipeline.resolve(&ipns_name).await {
                Ok(r) => r,
                // Never-published pointers are simply not synced yet.
                Err(CoreError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };

            if resolved.stale {
                return Err(CoreError::RoutingUnavailable);
            }

            let cached = self
                .cached_sequence_numbers
                .get(&ipns_name)
                .copied()
                .unwrap_or(0);
            if resolved.sequence != cached {
                log::info!(
                    "Pointer {} changed: seq {} -> {} (cid {})",
                    ipns_name,
                    cached,
                    resolved.sequence,
                    resolved.cid
                );
                self.cached_sequence_numbers
                    .insert(ipns_name.clone(), resolved.sequence);
                self.metadata_cache.lock().await.invalidate(&ipns_name);
            }
        }
        Ok(())
    }

    /// Watch an additional pointer (e.g., a newly created folder).
    pub fn watch(&mut self, ipns_name: String) {
        if !self.watched.contains(&ipns_name) {
            self.watched.push(ipns_name);
        }
    }

    /// Queue a write for retry when connectivity returns.
    pub fn enqueue_write(&mut self, write: QueuedWrite) {
        self.write_queue.enqueue(write);
    }

    pub fn pending_writes(&self) -> usize {
        self.write_queue.len()
    }
}
