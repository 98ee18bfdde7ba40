//! Offline write queue for deferred uploads.
//!
//! A write made while the routing layer is down is encrypted immediately
//! and queued in memory, then retried when connectivity returns. Memory
//! only: queued items do not survive the session.

use std::collections::VecDeque;

use crate::codec::file::EncryptionMode;

/// A single queued write, already encrypted at queue time.
#[derive(Debug, Clone)]
pub struct QueuedWrite {
    /// Unique id for this queued item.
    pub id: String,
    /// Folder the file belongs in.
    pub parent_folder_id: String,
    /// Target file name.
    pub name: String,
    /// Encrypted body bytes.
    pub ciphertext: Vec<u8>,
    /// ECIES-wrapped body key (hex).
    pub file_key_encrypted: String,
    /// Body IV (hex).
    pub file_iv: String,
    /// Body cipher.
    pub encryption_mode: EncryptionMode,
    /// Plaintext size in bytes.
    pub size: u64,
    /// Failed upload attempts so far.
    pub retries: u32,
}

/// Upload seam, implemented by the session layer in production and by
/// mocks in tests.
#[allow(async_fn_in_trait)]
pub trait UploadHandler {
    /// Upload one queued write and register it in its parent folder.
    async fn upload_queued(&self, write: &QueuedWrite) -> Result<(), String>;
}

/// FIFO queue of deferred writes with bounded retries. Failed items move
/// to the back with `retries` incremented; items exceeding the bound are
/// dropped.
pub struct WriteQueue {
    queue: VecDeque<QueuedWrite>,
    max_retries: u32,
}

impl WriteQueue {
    pub fn new(max_retries: u32) -> Self {
        Self {
            queue: VecDeque::new(),
            max_retries,
        }
    }

    pub fn enqueue(&mut self, write: QueuedWrite) {
        self.queue.push_back(write);
    }

    /// Process every queued item once. Returns how many succeeded.
    pub async fn process<H: UploadHandler>(&mut self, handler: &H) -> usize {
        if self.queue.is_empty() {
            return 0;
        }

        let mut processed = 0;
        let mut remaining = VecDeque::new();

        while let Some(mut item) = self.queue.pop_front() {
            match handler.upload_queued(&item).await {
                Ok(()) => {
                    log::info!("Queued write uploaded: {} ({})", item.name, item.id);
                    processed += 1;
                }
                Err(e) => {
                    item.retries += 1;
                    if item.retries > self.max_retries {
                        log::error!(
                            "Queued write dropped after {} retries: {} ({}) - {}",
                            self.max_retries,
                            item.name,
                            item.id,
                            e
                        );
                    } else {
                        log::warn!(
                            "Queued write retry {}/{}: {} ({}) - {}",
                            item.retries,
                            self.max_retries,
                            item.name,
                            item.id,
                            e
                        );
                        remaining.push_back(item);
                    }
                }
            }
        }

        self.queue = remaining;
        processed
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Default for WriteQueue {
    fn default() -> Self {
        Self::new(5)
    }
}
