//! Session caches: decrypted folder metadata with TTL, and the streamed
//! media cache used by the in-browser service worker path.
//!
//! - `MetadataCache`: folder metadata keyed by pointer name, 30 s TTL
//!   matching the sync polling interval.
//! - `MediaStreamCache`: up to 5 encrypted file bodies, oldest evicted
//!   first; per-stream body keys are dropped and zeroized the moment a
//!   stream unregisters.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use zeroize::Zeroize;

use crate::codec::folder::FolderMetadata;

/// Time-to-live for cached folder metadata (matches the 30 s sync poll).
pub const METADATA_TTL: Duration = Duration::from_secs(30);

/// Maximum encrypted files held by the media cache.
pub const MAX_CACHED_STREAMS: usize = 5;

// ── Metadata cache ────────────────────────────────────────────────────────────

/// Cached folder metadata with its blob CID and fetch time.
pub struct CachedMetadata {
    pub metadata: FolderMetadata,
    pub cid: String,
    fetched_at: Instant,
}

/// Decrypted folder metadata keyed by pointer name. Stale entries return
/// `None` but stay in the map until overwritten or invalidated.
pub struct MetadataCache {
    entries: HashMap<String, CachedMetadata>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Fresh entry for a pointer name, if within TTL.
    pub fn get(&self, ipns_name: &str) -> Option<&CachedMetadata> {
        self.entries
            .get(ipns_name)
            .filter(|entry| entry.fetched_at.elapsed() < METADATA_TTL)
    }

    pub fn set(&mut self, ipns_name: &str, metadata: FolderMetadata, cid: String) {
        self.entries.insert(
            ipns_name.to_string(),
            CachedMetadata {
                metadata,
                cid,
                fetched_at: Instant::now(),
            },
        );
    }

    /// Drop one entry (pointer known to have changed).
    pub fn invalidate(&mut self, ipns_name: &str) {
        self.entries.remove(ipns_name);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new()
    }
}

// ── Media stream cache ────────────────────────────────────────────────────────

/// One cached encrypted body with insertion order for eviction.
struct CachedStreamBody {
    ciphertext: Vec<u8>,
    inserted_at: Instant,
}

/// A registered stream's decryption key, zeroized on unregister.
struct StreamKey {
    key: [u8; 32],
}

impl Drop for StreamKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Bounded cache of encrypted media bodies plus the per-stream key table.
///
/// Bodies are stored encrypted; keys live only while a stream is
/// registered and never outlive it.
pub struct MediaStreamCache {
    bodies: HashMap<String, CachedStreamBody>,
    keys: HashMap<String, StreamKey>,
}

impl MediaStreamCache {
    pub fn new() -> Self {
        Self {
            bodies: HashMap::new(),
            keys: HashMap::new(),
        }
    }

    /// Cache an encrypted body, evicting the oldest entry once over the
    /// cap.
    pub fn put_body(&mut self, cid: &str, ciphertext: Vec<u8>) {
        self.bodies.remove(cid);
        while self.bodies.len() >= MAX_CACHED_STREAMS {
            if let Some(oldest) = self
                .bodies
                .iter()
                .min_by_key(|(_, body)| body.inserted_at)
                .map(|(cid, _)| cid.clone())
            {
                self.bodies.remove(&oldest);
            } else {
                break;
            }
        }
        self.bodies.insert(
            cid.to_string(),
            CachedStreamBody {
                ciphertext,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn body(&self, cid: &str) -> Option<&[u8]> {
        self.bodies.get(cid).map(|b| b.ciphertext.as_slice())
    }

    /// Register a stream's decryption key.
    pub fn register_stream(&mut self, stream_id: &str, key: [u8; 32]) {
        self.keys.insert(stream_id.to_string(), StreamKey { key });
    }

    pub fn stream_key(&self, stream_id: &str) -> Option<&[u8; 32]> {
        self.keys.get(stream_id).map(|k| &k.key)
    }

    /// Drop a stream's key; the key bytes are zeroized immediately.
    pub fn unregister_stream(&mut self, stream_id: &str) {
        self.keys.remove(stream_id);
    }

    /// Full teardown: every body dropped, every key zeroized.
    pub fn clear(&mut self) {
        self.bodies.clear();
        self.keys.clear();
    }

    pub fn cached_count(&self) -> usize {
        self.bodies.len()
    }
}

impl Default for MediaStreamCache {
    fn default() -> Self {
        Self::new()
    }
}
