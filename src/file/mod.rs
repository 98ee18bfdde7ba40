//! Per-file version chain policy.
//!
//! Pure metadata transforms: the same rules run in the web client and the
//! filesystem mount, so nothing here performs I/O. Pruned and deleted body
//! CIDs are returned to the caller, which owns unpinning them.

use thiserror::Error;

use crate::codec::file::{EncryptionMode, FileMetadata, VersionEntry};

pub use crate::codec::file::MAX_VERSIONS_PER_FILE;

/// Minimum elapsed time between two body updates that still produces a
/// version entry: 15 minutes.
pub const VERSION_COOLDOWN_MS: u64 = 15 * 60 * 1000;

#[derive(Debug, Error, PartialEq)]
pub enum VersionError {
    #[error("No such version")]
    NoSuchVersion,
}

/// Crypto context of a freshly encrypted body, about to become current.
#[derive(Debug, Clone)]
pub struct NewBodyContext {
    pub cid: String,
    pub file_key_encrypted: String,
    pub file_iv: String,
    pub size: u64,
    pub encryption_mode: EncryptionMode,
}

/// What a content update did to the chain.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOutcome {
    /// Whether the previous current state was retained as a version entry.
    pub version_created: bool,
    /// CID pruned from the tail of the chain, to be unpinned by the caller.
    pub pruned_cid: Option<String>,
}

/// Apply a body update to file metadata.
///
/// The previous current state is snapshotted as the new newest version
/// entry unless versions already exist and the newest one is younger than
/// the cooldown. The first update always produces the baseline entry.
/// `force_version` bypasses the cooldown (explicit "replace this file"
/// actions); the regular save path does not.
pub fn apply_content_update(
    metadata: &mut FileMetadata,
    new_body: NewBodyContext,
    force_version: bool,
    now_ms: u64,
) -> UpdateOutcome {
    let snapshot = VersionEntry {
        cid: metadata.cid.clone(),
        file_key_encrypted: metadata.file_key_encrypted.clone(),
        file_iv: metadata.file_iv.clone(),
        size: metadata.size,
        timestamp: now_ms,
        encryption_mode: metadata.encryption_mode,
    };

    let within_cooldown = metadata
        .versions()
        .first()
        .is_some_and(|newest| now_ms.saturating_sub(newest.timestamp) < VERSION_COOLDOWN_MS);

    let create_version = force_version || !within_cooldown || metadata.versions().is_empty();

    let mut pruned_cid = None;
    if create_version {
        let versions = metadata.versions.get_or_insert_with(Vec::new);
        versions.insert(0, snapshot);
        if versions.len() > MAX_VERSIONS_PER_FILE {
            // Tail entry is the oldest; its body block is now unreferenced.
            pruned_cid = versions.pop().map(|entry| entry.cid);
        }
    }

    metadata.cid = new_body.cid;
    metadata.file_key_encrypted = new_body.file_key_encrypted;
    metadata.file_iv = new_body.file_iv;
    metadata.size = new_body.size;
    metadata.encryption_mode = new_body.encryption_mode;
    metadata.modified_at = now_ms;
    metadata.normalize_versions();

    UpdateOutcome {
        version_created: create_version,
        pruned_cid,
    }
}

/// Restore the past version at `index` (0 = newest retained entry).
///
/// The current state becomes the new newest version entry (stamped `now`),
/// the restored entry leaves the list and becomes current. The chain only
/// ever grows through restoration; no past version is lost.
pub fn restore_version(
    metadata: &mut FileMetadata,
    index: usize,
    now_ms: u64,
) -> Result<(), VersionError> {
    if index >= metadata.versions().len() {
        return Err(VersionError::NoSuchVersion);
    }

    let snapshot = VersionEntry {
        cid: metadata.cid.clone(),
        file_key_encrypted: metadata.file_key_encrypted.clone(),
        file_iv: metadata.file_iv.clone(),
        size: metadata.size,
        timestamp: now_ms,
        encryption_mode: metadata.encryption_mode,
    };

    let versions = metadata.versions.as_mut().ok_or(VersionError::NoSuchVersion)?;
    let restored = versions.remove(index);
    versions.insert(0, snapshot);

    metadata.cid = restored.cid;
    metadata.file_key_encrypted = restored.file_key_encrypted;
    metadata.file_iv = restored.file_iv;
    metadata.size = restored.size;
    metadata.encryption_mode = restored.encryption_mode;
    metadata.modified_at = now_ms;

    Ok(())
}

/// Delete the past version at `index`, returning its CID for unpinning.
pub fn delete_version(metadata: &mut FileMetadata, index: usize) -> Result<String, VersionError> {
    let versions = metadata.versions.as_mut().ok_or(VersionError::NoSuchVersion)?;
    if index >= versions.len() {
        return Err(VersionError::NoSuchVersion);
    }
    let removed = versions.remove(index);
    metadata.normalize_versions();
    Ok(removed.cid)
}

/// User-facing label for the version at storage `index`: entries are
/// stored newest-first but labeled oldest-first (`v1`..`vN`).
pub fn version_label(metadata: &FileMetadata, index: usize) -> Result<String, VersionError> {
    let len = metadata.versions().len();
    if index >= len {
        return Err(VersionError::NoSuchVersion);
    }
    Ok(format!("v{}", len - index))
}

/// Every CID referenced by this file: current body plus all retained
/// versions. Used for delete-time unpinning.
pub fn referenced_cids(metadata: &FileMetadata) -> Vec<String> {
    let mut cids = vec![metadata.cid.clone()];
    cids.extend(metadata.versions().iter().map(|v| v.cid.clone()));
    cids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::file::FILE_SCHEMA_VERSION;

    const T0: u64 = 1_700_000_000_000;
    const MINUTE: u64 = 60 * 1000;

    fn wrapped() -> String {
        "ab".repeat(129)
    }

    fn uploaded(cid: &str) -> FileMetadata {
        FileMetadata {
            version: FILE_SCHEMA_VERSION.into(),
            cid: cid.into(),
            file_key_encrypted: wrapped(),
            file_iv: "00".repeat(12),
            size: 1,
            mime_type: "text/plain".into(),
            encryption_mode: EncryptionMode::Gcm,
            created_at: T0,
            modified_at: T0,
            versions: None,
        }
    }

    fn body(cid: &str) -> NewBodyContext {
        NewBodyContext {
            cid: cid.into(),
            file_key_encrypted: wrapped(),
            file_iv: "01".repeat(12),
            size: 2,
            encryption_mode: EncryptionMode::Gcm,
        }
    }

    #[test]
    fn test_first_update_creates_baseline_even_within_cooldown() {
        let mut meta = uploaded("cid-a");

        let outcome = apply_content_update(&mut meta, body("cid-ab"), false, T0 + MINUTE);
        assert!(outcome.version_created);
        assert_eq!(outcome.pruned_cid, None);
        assert_eq!(meta.cid, "cid-ab");
        assert_eq!(meta.versions().len(), 1);
        assert_eq!(meta.versions()[0].cid, "cid-a");
    }

    #[test]
    fn test_cooldown_suppresses_version_then_force_bypasses() {
        let mut meta = uploaded("cid-a");
        apply_content_update(&mut meta, body("cid-ab"), false, T0 + MINUTE);

        // Within cooldown of the baseline entry: current replaced, no entry.
        let outcome = apply_content_update(&mut meta, body("cid-abc"), false, T0 + 2 * MINUTE);
        assert!(!outcome.version_created);
        assert_eq!(meta.cid, "cid-abc");
        assert_eq!(meta.versions().len(), 1);

        // Force bypasses the cooldown and captures the replaced state.
        let outcome = apply_content_update(&mut meta, body("cid-abcd"), true, T0 + 3 * MINUTE);
        assert!(outcome.version_created);
        assert_eq!(meta.cid, "cid-abcd");
        assert_eq!(meta.versions().len(), 2);
        assert_eq!(meta.versions()[0].cid, "cid-abc");
        assert_eq!(meta.versions()[1].cid, "cid-a");
    }

    #[test]
    fn test_cooldown_expiry_creates_version() {
        let mut meta = uploaded("cid-a");
        apply_content_update(&mut meta, body("cid-b"), false, T0 + MINUTE);

        let outcome = apply_content_update(
            &mut meta,
            body("cid-c"),
            false,
            T0 + MINUTE + VERSION_COOLDOWN_MS,
        );
        assert!(outcome.version_created);
        assert_eq!(meta.versions().len(), 2);
        assert_eq!(meta.versions()[0].cid, "cid-b");
    }

    #[test]
    fn test_retention_prunes_oldest_once_over_cap() {
        let mut meta = uploaded("cid-0");
        let mut unpinned = Vec::new();

        for i in 1..=11 {
            let outcome = apply_content_update(
                &mut meta,
                body(&format!("cid-{}", i)),
                true,
                T0 + i as u64 * MINUTE,
            );
            if let Some(cid) = outcome.pruned_cid {
                unpinned.push(cid);
            }
        }

        assert_eq!(meta.versions().len(), MAX_VERSIONS_PER_FILE);
        assert_eq!(unpinned, vec!["cid-0".to_string()]);
        // The pruned CID is referenced by neither current nor any retained version.
        assert!(!referenced_cids(&meta).contains(&"cid-0".to_string()));
        assert_eq!(meta.cid, "cid-11");
        assert_eq!(meta.versions()[0].cid, "cid-10");
        assert_eq!(meta.versions()[9].cid, "cid-1");
    }

    #[test]
    fn test_version_timestamps_non_increasing() {
        let mut meta = uploaded("cid-0");
        for i in 1..=5u64 {
            apply_content_update(&mut meta, body(&format!("cid-{}", i)), true, T0 + i * MINUTE);
        }
        let timestamps: Vec<u64> = meta.versions().iter().map(|v| v.timestamp).collect();
        for pair in timestamps.windows(2) {
            assert!(pair[0] >= pair[1]);
        }
    }

    #[test]
    fn test_restore_keeps_every_version() {
        // current = v5, versions = [v4, v3, v2, v1]
        let mut meta = uploaded("cid-v1");
        for v in ["cid-v2", "cid-v3", "cid-v4", "cid-v5"] {
            apply_content_update(&mut meta, body(v), true, T0 + MINUTE);
        }
        assert_eq!(meta.cid, "cid-v5");

        // Restore v2: storage index 2 in [v4, v3, v2, v1].
        restore_version(&mut meta, 2, T0 + 10 * MINUTE).unwrap();

        assert_eq!(meta.cid, "cid-v2");
        let chain: Vec<&str> = meta.versions().iter().map(|v| v.cid.as_str()).collect();
        assert_eq!(chain, vec!["cid-v5", "cid-v4", "cid-v3", "cid-v1"]);
        assert_eq!(meta.versions()[0].timestamp, T0 + 10 * MINUTE);
    }

    #[test]
    fn test_restore_out_of_range() {
        let mut meta = uploaded("cid-a");
        assert_eq!(
            restore_version(&mut meta, 0, T0),
            Err(VersionError::NoSuchVersion)
        );
    }

    #[test]
    fn test_delete_version_returns_pruned_cid() {
        let mut meta = uploaded("cid-a");
        apply_content_update(&mut meta, body("cid-b"), true, T0 + MINUTE);
        apply_content_update(&mut meta, body("cid-c"), true, T0 + 2 * MINUTE);

        let pruned = delete_version(&mut meta, 1).unwrap();
        assert_eq!(pruned, "cid-a");
        assert_eq!(meta.versions().len(), 1);

        let pruned = delete_version(&mut meta, 0).unwrap();
        assert_eq!(pruned, "cid-b");
        // Empty chain collapses back to the omitted wire form.
        assert!(meta.versions.is_none());

        assert_eq!(delete_version(&mut meta, 0), Err(VersionError::NoSuchVersion));
    }

    #[test]
    fn test_labels_oldest_first() {
        let mut meta = uploaded("cid-a");
        apply_content_update(&mut meta, body("cid-b"), true, T0 + MINUTE);
        apply_content_update(&mut meta, body("cid-c"), true, T0 + 2 * MINUTE);

        // Storage [cid-b(newest), cid-a(oldest)] labels as [v2, v1].
        assert_eq!(version_label(&meta, 0).unwrap(), "v2");
        assert_eq!(version_label(&meta, 1).unwrap(), "v1");
        assert!(version_label(&meta, 2).is_err());
    }

    #[test]
    fn test_mixed_mode_chain() {
        let mut meta = uploaded("cid-gcm");
        let ctr_body = NewBodyContext {
            cid: "cid-ctr".into(),
            file_key_encrypted: wrapped(),
            file_iv: "02".repeat(16),
            size: 9,
            encryption_mode: EncryptionMode::Ctr,
        };
        apply_content_update(&mut meta, ctr_body, true, T0 + MINUTE);

        assert_eq!(meta.encryption_mode, EncryptionMode::Ctr);
        assert_eq!(meta.versions()[0].encryption_mode, EncryptionMode::Gcm);

        restore_version(&mut meta, 0, T0 + 2 * MINUTE).unwrap();
        assert_eq!(meta.encryption_mode, EncryptionMode::Gcm);
        assert_eq!(meta.versions()[0].encryption_mode, EncryptionMode::Ctr);
    }
}
