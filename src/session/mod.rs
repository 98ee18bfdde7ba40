//! The vault session: one authenticated user, one in-memory projection.
//!
//! Ties the vault root, the folder graph, the codec, and the publish
//! pipeline into the user-level operations (upload, download, rename,
//! move, delete, version). Per-folder operation locks serialize edits on
//! the same folder; operations on different folders proceed concurrently,
//! each linearizable against its own pointer.
//!
//! Publish ordering inside one operation is always child-before-parent:
//! file metadata (or a new subfolder's metadata) publishes before the
//! parent folder that references it, so a partial failure leaves a
//! reachable, reclaimable blob rather than a dangling reference.


use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use zeroize::Zeroize;

use crate::api::transport::VaultTransport;
use crate::api::types::QuotaInfo;
use crate::codec::envelope;
use crate::codec::export::{DerivationInfo, VaultExport};
use crate::codec::file::{
    decrypt_and_validate_file_metadata, encrypt_file_metadata, EncryptionMode, FileMetadata,
    FILE_SCHEMA_VERSION,
};
use crate::codec::folder::{
    decrypt_and_validate_folder_metadata, encrypt_entry_name, encrypt_folder_metadata,
    FilePointer, FolderChild, FolderEntry, FolderMetadata,
};
use crate::crypto::aes_ctr::AES_CTR_IV_SIZE;
use crate::crypto::ecies::wrap_key;
use crate::crypto::utils::{
    generate_ctr_iv, generate_iv, generate_object_id, generate_symmetric_key, now_ms,
};
use crate::crypto::{
    decrypt_aes_ctr, decrypt_aes_ctr_range, decrypt_aes_gcm, derive_file_ipns_keypair,
    derive_file_metadata_key, encrypt_aes_ctr, encrypt_aes_gcm, generate_ed25519_keypair,
    unwrap_key,
};
use crate::crypto::ipns::derive_ipns_name;
use crate::error::CoreError;
use crate::file::{
    apply_content_update, delete_version, referenced_cids, restore_version, NewBodyContext,
    UpdateOutcome,
};
use crate::graph::{ChildSummary, FolderGraph, FolderNode, ROOT_ID};
use crate::publish::PublishPipeline;
use crate::vault::{self, VaultKeypair, VaultRoot};

/// An open vault session.
pub struct VaultSession<T: VaultTransport> {
    transport: Arc<T>,
    pipeline: Arc<PublishPipeline<T>>,
    keypair: VaultKeypair,
    root: VaultRoot,
    graph: RwLock<FolderGraph>,
    /// Per-folder operation locks; edits on one folder serialize, edits on
    /// different folders run concurrently.
    folder_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<T: VaultTransport> VaultSession<T> {
    /// Open the vault and materialize the root folder.
    ///
    /// A vault whose root pointer has never been published starts with an
    /// empty root folder in memory; the first edit publishes it.
    pub async fn open(transport: Arc<T>, keypair: VaultKeypair) -> Result<Self, CoreError> {
        let root = vault::open(transport.as_ref(), &keypair).await?;
        let pipeline = Arc::new(PublishPipeline::new(transport.clone()));

        // The root pointer is ours; its sequence counter starts at the
        // vault root's zero-initialized counter.
        pipeline.register_new_pointer(&root.root_ipns_name).await;

        let graph = FolderGraph::new(
            *root.root_folder_key(),
            *root.root_ipns_private_key(),
            root.root_ipns_name.clone(),
        );

        let session = Self {
            transport,
            pipeline,
            keypair,
            root,
            graph: RwLock::new(graph),
            folder_locks: Mutex::new(HashMap::new()),
        };

        session.load_root().await?;
        Ok(session)
    }

    /// Tear the session down: clear pointer state and zeroize the graph.
    /// Key material in the root and nodes is zeroized on drop as well.
    pub async fn close(self) {
        self.pipeline.clear().await;
        let mut graph = self.graph.write().await;
        *graph = FolderGraph::new([0u8; 32], [0u8; 32], String::new());
    }

    /// The offline recovery bundle for this vault.
    pub fn export(&self, derivation_info: DerivationInfo) -> VaultExport {
        self.root.export(derivation_info)
    }

    /// Current pin quota usage.
    pub async fn quota(&self) -> Result<QuotaInfo, CoreError> {
        Ok(self.transport.quota().await?)
    }

    /// Root pointer name of this vault.
    pub fn root_ipns_name(&self) -> &str {
        &self.root.root_ipns_name
    }

    // ── Listing and navigation ───────────────────────────────────────────

    /// Decrypted listing of a loaded folder.
    pub async fn list_folder(&self, folder_id: &str) -> Result<Vec<ChildSummary>, CoreError> {
        let graph = self.graph.read().await;
        let node = graph.node(folder_id)?;
        if !node.is_loaded {
            return Err(CoreError::InvalidOperation(
                "folder not loaded".to_string(),
            ));
        }
        Ok(node.children())
    }

    /// Materialize and load a child folder from its parent entry.
    /// Returns the child folder id (stable across calls).
    pub async fn open_child_folder(
        &self,
        parent_id: &str,
        child_id: &str,
    ) -> Result<String, CoreError> {
        {
            let graph = self.graph.read().await;
            if graph.contains(child_id) && graph.node(child_id)?.is_loaded {
                return Ok(child_id.to_string());
            }
        }

        let (entry, name) = {
            let graph = self.graph.read().await;
            let parent = graph.node(parent_id)?;
            let entry = parent
                .metadata
                .children
                .iter()
                .find_map(|c| match c {
                    FolderChild::Folder(e) if e.id == child_id => Some(e.clone()),
                    _ => None,
                })
                .ok_or_else(|| CoreError::NotFound(child_id.to_string()))?;
            let name = parent
                .child_name(child_id)
                .unwrap_or_default()
                .to_string();
            (entry, name)
        };

        let folder_key = self.unwrap_32(&entry.folder_key_encrypted)?;
        let ipns_private_key = self.unwrap_32(&entry.ipns_private_key_encrypted)?;

        let mut node = FolderNode::new(
            child_id.to_string(),
            name,
            folder_key,
            ipns_private_key,
            entry.ipns_name.clone(),
            Some(parent_id.to_string()),
        );

        match self.fetch_folder_metadata(&entry.ipns_name, &node.folder_key).await? {
            Some((metadata, cid, sequence)) => {
                node.load_metadata(metadata)?;
                node.metadata_cid = Some(cid);
                node.sequence_number = sequence;
            }
            None => {
                // Never published: freshly created empty folder.
                node.load_metadata(FolderMetadata::empty())?;
            }
        }

        self.graph.write().await.insert(node);
        Ok(child_id.to_string())
    }

    /// Walk a `/`-separated path from the root, loading folders as needed.
    pub async fn resolve_path(&self, path: &str) -> Result<String, CoreError> {
        let mut current = ROOT_ID.to_string();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let child = {
                let graph = self.graph.read().await;
                let node = graph.node(&current)?;
                node.child_id_by_name(segment)
                    .ok_or_else(|| CoreError::NotFound(segment.to_string()))?
                    .to_string()
            };
            current = self.open_child_folder(&current, &child).await?;
        }
        Ok(current)
    }

    // ── Folder operations ────────────────────────────────────────────────

    /// Create an empty subfolder. Publishes the new child's pointer first,
    /// then the parent that references it.
    pub async fn create_folder(&self, parent_id: &str, name: &str) -> Result<String, CoreError> {
        let _op = self.lock_folder(parent_id).await;

        let parent_key = {
            let graph = self.graph.read().await;
            let parent = graph.node(parent_id)?;
            parent.ensure_name_available(name)?;
            parent.folder_key
        };

        // Child identity and keys.
        let folder_id = generate_object_id();
        let folder_key = generate_symmetric_key();
        let (ipns_public, ipns_private) = generate_ed25519_keypair();
        let ipns_seed: [u8; 32] = ipns_private
            .try_into()
            .map_err(|_| CoreError::SigningFailed)?;
        let ipns_name = derive_ipns_name(
            &ipns_public
                .try_into()
                .map_err(|_| CoreError::InvalidPublicKeySize)?,
        )?;

        // Empty child metadata onto the network, pointer published before
        // the parent references it.
        let metadata = FolderMetadata::empty();
        let blob = envelope::to_network_bytes(&encrypt_folder_metadata(&metadata, &folder_key)?)?;
        let metadata_cid = self.transport.put_block(&blob).await?;

        self.pipeline.register_new_pointer(&ipns_name).await;
        if let Err(e) = self.pipeline.publish(&ipns_name, &ipns_seed, &metadata_cid).await {
            self.unpin_quiet(&metadata_cid).await;
            return Err(e);
        }

        let now = now_ms();
        let (name_encrypted, name_iv) = encrypt_entry_name(name, &parent_key)?;
        let entry = FolderEntry {
            id: folder_id.clone(),
            name_encrypted,
            name_iv,
            ipns_name: ipns_name.clone(),
            folder_key_encrypted: hex::encode(wrap_key(&folder_key, self.keypair.public_key())?),
            ipns_private_key_encrypted: hex::encode(wrap_key(
                &ipns_seed,
                self.keypair.public_key(),
            )?),
            created_at: now,
            modified_at: now,
        };

        {
            let mut graph = self.graph.write().await;
            graph
                .node_mut(parent_id)?
                .add_child(FolderChild::Folder(entry), name.to_string())?;
        }

        if let Err(e) = self.flush_folder(parent_id).await {
            // Roll the projection back; the child blob stays reachable
            // through its own pointer and is reclaimed by the unpin.
            let mut graph = self.graph.write().await;
            let _ = graph.node_mut(parent_id)?.remove_child(&folder_id);
            drop(graph);
            self.unpin_quiet(&metadata_cid).await;
            return Err(e);
        }

        let mut node = FolderNode::new(
            folder_id.clone(),
            name.to_string(),
            folder_key,
            ipns_seed,
            ipns_name,
            Some(parent_id.to_string()),
        );
        node.load_metadata(FolderMetadata::empty())?;
        node.metadata_cid = Some(metadata_cid);
        node.sequence_number = 1;
        self.graph.write().await.insert(node);

        Ok(folder_id)
    }

    /// Rename a file or folder. Touches the parent folder's metadata only;
    /// the object's own pointer and blobs are untouched.
    pub async fn rename_entry(
        &self,
        folder_id: &str,
        child_id: &str,
        new_name: &str,
    ) -> Result<(), CoreError> {
        let _op = self.lock_folder(folder_id).await;

        let previous_name = {
            let mut graph = self.graph.write().await;
            let node = graph.node_mut(folder_id)?;
            let previous = node
                .child_name(child_id)
                .ok_or_else(|| CoreError::NotFound(child_id.to_string()))?
                .to_string();
            node.rename_child(child_id, new_name, now_ms())?;
            previous
        };

        if let Err(e) = self.flush_folder(folder_id).await {
            let mut graph = self.graph.write().await;
            let _ = graph
                .node_mut(folder_id)?
                .rename_child(child_id, &previous_name, now_ms());
            return Err(e);
        }
        Ok(())
    }

    /// Move an entry between folders. The destination publishes first, so
    /// the object is always reachable: briefly from both parents, never
    /// from neither.
    pub async fn move_entry(
        &self,
        source_id: &str,
        child_id: &str,
        destination_id: &str,
    ) -> Result<(), CoreError> {
        if source_id == destination_id {
            return Ok(());
        }
        let _ops = self.lock_folder_pair(source_id, destination_id).await;

        let (child, name) = {
            let mut graph = self.graph.write().await;
            let name = graph
                .node(source_id)?
                .child_name(child_id)
                .ok_or_else(|| CoreError::NotFound(child_id.to_string()))?
                .to_string();
            graph.node(destination_id)?.ensure_name_available(&name)?;

            let mut child = graph.node_mut(source_id)?.remove_child(child_id)?;
            // Entry names are encrypted under the containing folder's key;
            // crossing folders means re-encrypting under the destination's.
            let destination_key = graph.node(destination_id)?.folder_key;
            let (name_encrypted, name_iv) = encrypt_entry_name(&name, &destination_key)?;
            match &mut child {
                FolderChild::Folder(entry) => {
                    entry.name_encrypted = name_encrypted;
                    entry.name_iv = name_iv;
                    entry.modified_at = now_ms();
                }
                FolderChild::File(pointer) => {
                    pointer.name_encrypted = name_encrypted;
                    pointer.name_iv = name_iv;
                    pointer.modified_at = now_ms();
                }
            }
            graph
                .node_mut(destination_id)?
                .add_child(child.clone(), name.clone())?;
            (child, name)
        };

        // Destination first.
        if let Err(e) = self.flush_folder(destination_id).await {
            let mut graph = self.graph.write().await;
            let restored = graph.node_mut(destination_id)?.remove_child(child_id);
            if let Ok(mut restored) = restored {
                let source_key = graph.node(source_id)?.folder_key;
                let (name_encrypted, name_iv) = encrypt_entry_name(&name, &source_key)?;
                match &mut restored {
                    FolderChild::Folder(entry) => {
                        entry.name_encrypted = name_encrypted;
                        entry.name_iv = name_iv;
                    }
                    FolderChild::File(pointer) => {
                        pointer.name_encrypted = name_encrypted;
                        pointer.name_iv = name_iv;
                    }
                }
                let _ = graph.node_mut(source_id)?.add_child(restored, name.clone());
            }
            return Err(e);
        }

        // Then the source. A failure here leaves the object reachable from
        // both parents, which is strictly safer than unreachable; the next
        // successful source edit converges.
        self.flush_folder(source_id).await?;

        if let FolderChild::Folder(_) = child {
            let mut graph = self.graph.write().await;
            if graph.contains(child_id) {
                graph.node_mut(child_id)?.parent_id = Some(destination_id.to_string());
            }
        }
        Ok(())
    }

    /// Delete a file: drop it from the parent folder, then release every
    /// block it referenced (current body, retained versions, metadata).
    pub async fn delete_file(&self, folder_id: &str, child_id: &str) -> Result<(), CoreError> {
        let _op = self.lock_folder(folder_id).await;

        let pointer = self.file_pointer(folder_id, child_id).await?;

        // Collect the doomed CIDs before touching the parent; after the
        // parent publishes the pointer is no longer reachable from the tree.
        let mut doomed = Vec::new();
        if let Ok((metadata, meta_cid, _)) = self.fetch_file_metadata(&pointer).await {
            doomed.extend(referenced_cids(&metadata));
            doomed.push(meta_cid);
        }

        let (child, name) = {
            let mut graph = self.graph.write().await;
            let node = graph.node_mut(folder_id)?;
            let name = node
                .child_name(child_id)
                .unwrap_or_default()
                .to_string();
            (node.remove_child(child_id)?, name)
        };

        if let Err(e) = self.flush_folder(folder_id).await {
            let mut graph = self.graph.write().await;
            let _ = graph.node_mut(folder_id)?.add_child(child, name);
            return Err(e);
        }

        for cid in doomed {
            self.unpin_quiet(&cid).await;
        }
        Ok(())
    }

    /// Delete a folder and its entire subtree: every descendant file's
    /// blocks and every descendant folder's metadata blob are released
    /// after the parent publish succeeds.
    pub async fn delete_folder(&self, parent_id: &str, child_id: &str) -> Result<(), CoreError> {
        let _op = self.lock_folder(parent_id).await;

        // Make sure the subtree is materialized so the cleanup set is
        // complete, then walk it iteratively.
        self.open_child_folder(parent_id, child_id).await?;
        let mut doomed = Vec::new();
        let mut stack = vec![child_id.to_string()];
        while let Some(folder) = stack.pop() {
            let (file_pointers, subfolders, metadata_cid) = {
                let graph = self.graph.read().await;
                let node = graph.node(&folder)?;
                let mut files = Vec::new();
                let mut dirs = Vec::new();
                for child in &node.metadata.children {
                    match child {
                        FolderChild::File(p) => files.push(p.clone()),
                        FolderChild::Folder(e) => dirs.push(e.id.clone()),
                    }
                }
                (files, dirs, node.metadata_cid.clone())
            };

            if let Some(cid) = metadata_cid {
                doomed.push(cid);
            }
            for pointer in file_pointers {
                if let Ok((metadata, meta_cid, _)) = self.fetch_file_metadata(&pointer).await {
                    doomed.extend(referenced_cids(&metadata));
                    doomed.push(meta_cid);
                }
            }
            for sub in subfolders {
                self.open_child_folder(&folder, &sub).await?;
                stack.push(sub);
            }
        }

        let (child, name) = {
            let mut graph = self.graph.write().await;
            let node = graph.node_mut(parent_id)?;
            let name = node
                .child_name(child_id)
                .unwrap_or_default()
                .to_string();
            (node.remove_child(child_id)?, name)
        };

        if let Err(e) = self.flush_folder(parent_id).await {
            let mut graph = self.graph.write().await;
            let _ = graph.node_mut(parent_id)?.add_child(child, name);
            return Err(e);
        }

        self.graph.write().await.remove_subtree(child_id);
        for cid in doomed {
            self.unpin_quiet(&cid).await;
        }
        Ok(())
    }

    // ── File operations ──────────────────────────────────────────────────

    /// Upload a new file into a folder.
    ///
    /// The name check runs before any encryption or upload; the body pins
    /// first, then the file metadata, then the file pointer publishes,
    /// and only then does the parent folder reference it.
    pub async fn upload_file(
        &self,
        folder_id: &str,
        name: &str,
        content: &[u8],
        mime_type: &str,
        mode: EncryptionMode,
    ) -> Result<String, CoreError> {
        let _op = self.lock_folder(folder_id).await;

        let folder_key = {
            let graph = self.graph.read().await;
            let node = graph.node(folder_id)?;
            node.ensure_name_available(name)?;
            node.folder_key
        };

        // Fresh per-version body key; encrypt before anything leaves.
        let mut file_key = generate_symmetric_key();
        let (ciphertext, iv_hex) = encrypt_body(content, &file_key, mode)?;
        let file_key_encrypted = hex::encode(wrap_key(&file_key, self.keypair.public_key())?);
        file_key.zeroize();

        let body_cid = self.transport.put_block(&ciphertext).await?;

        let now = now_ms();
        let file_id = generate_object_id();
        let metadata = FileMetadata {
            version: FILE_SCHEMA_VERSION.to_string(),
            cid: body_cid.clone(),
            file_key_encrypted,
            file_iv: iv_hex,
            size: content.len() as u64,
            mime_type: mime_type.to_string(),
            encryption_mode: mode,
            created_at: now,
            modified_at: now,
            versions: None,
        };

        let result = self
            .publish_new_file(folder_id, &folder_key, &file_id, name, metadata, now)
            .await;

        if result.is_err() {
            // Orphan-pin cleanup: the body was pinned but never became
            // reachable from the tree.
            self.unpin_quiet(&body_cid).await;
        }
        result.map(|_| file_id)
    }

    /// Everything after the body pin of an upload: metadata blob, file
    /// pointer publish, parent folder publish.
    async fn publish_new_file(
        &self,
        folder_id: &str,
        folder_key: &[u8; 32],
        file_id: &str,
        name: &str,
        metadata: FileMetadata,
        now: u64,
    ) -> Result<(), CoreError> {
        let (pointer_public, pointer_private) = generate_ed25519_keypair();
        let pointer_seed: [u8; 32] = pointer_private
            .try_into()
            .map_err(|_| CoreError::SigningFailed)?;
        let file_meta_ipns_name = derive_ipns_name(
            &pointer_public
                .try_into()
                .map_err(|_| CoreError::InvalidPublicKeySize)?,
        )?;

        // The metadata envelope key rides on the pointer seed, so a later
        // move never has to rewrite this blob.
        let mut meta_key = derive_file_metadata_key(&pointer_seed)?;
        let sealed = encrypt_file_metadata(&metadata, &meta_key);
        meta_key.zeroize();
        let blob = envelope::to_network_bytes(&sealed?)?;
        let meta_cid = self.transport.put_block(&blob).await?;

        self.pipeline.register_new_pointer(&file_meta_ipns_name).await;
        if let Err(e) = self
            .pipeline
            .publish(&file_meta_ipns_name, &pointer_seed, &meta_cid)
            .await
        {
            self.unpin_quiet(&meta_cid).await;
            return Err(e);
        }

        let (name_encrypted, name_iv) = encrypt_entry_name(name, folder_key)?;
        let pointer = FilePointer {
            id: file_id.to_string(),
            name_encrypted,
            name_iv,
            file_meta_ipns_name,
            ipns_private_key_encrypted: Some(hex::encode(wrap_key(
                &pointer_seed,
                self.keypair.public_key(),
            )?)),
            created_at: now,
            modified_at: now,
        };

        {
            let mut graph = self.graph.write().await;
            graph
                .node_mut(folder_id)?
                .add_child(FolderChild::File(pointer), name.to_string())?;
        }

        if let Err(e) = self.flush_folder(folder_id).await {
            let mut graph = self.graph.write().await;
            let _ = graph.node_mut(folder_id)?.remove_child(file_id);
            drop(graph);
            self.unpin_quiet(&meta_cid).await;
            return Err(e);
        }
        Ok(())
    }

    /// Download and decrypt a file's current body.
    pub async fn download_file(
        &self,
        folder_id: &str,
        child_id: &str,
    ) -> Result<Vec<u8>, CoreError> {
        let pointer = self.file_pointer(folder_id, child_id).await?;
        let (metadata, _, _) = self.fetch_file_metadata(&pointer).await?;

        self.decrypt_body(
            &metadata.cid,
            &metadata.file_key_encrypted,
            &metadata.file_iv,
            metadata.encryption_mode,
        )
        .await
    }

    /// Download a byte range. CTR bodies decrypt just the covering blocks;
    /// GCM bodies authenticate the whole blob first, then slice.
    pub async fn download_file_range(
        &self,
        folder_id: &str,
        child_id: &str,
        start: usize,
        end: usize,
    ) -> Result<Vec<u8>, CoreError> {
        // Rejected up front so both cipher paths behave the same; the
        // caller cannot know which mode backs a file.
        if start > end {
            return Err(CoreError::InvalidOperation("invalid byte range".into()));
        }

        let pointer = self.file_pointer(folder_id, child_id).await?;
        let (metadata, _, _) = self.fetch_file_metadata(&pointer).await?;

        match metadata.encryption_mode {
            EncryptionMode::Ctr => {
                let ciphertext = self.transport.get_block(&metadata.cid).await?;
                let mut file_key = self.unwrap_32(&metadata.file_key_encrypted)?;
                let iv = decode_ctr_iv(&metadata.file_iv)?;
                let result = decrypt_aes_ctr_range(&ciphertext, &file_key, &iv, start, end)
                    .map_err(CoreError::from);
                file_key.zeroize();
                result
            }
            EncryptionMode::Gcm => {
                let mut full = self
                    .decrypt_body(
                        &metadata.cid,
                        &metadata.file_key_encrypted,
                        &metadata.file_iv,
                        EncryptionMode::Gcm,
                    )
                    .await?;
                if start >= full.len() {
                    full.zeroize();
                    return Ok(Vec::new());
                }
                let clamped_end = end.min(full.len() - 1);
                let slice = full[start..=clamped_end].to_vec();
                full.zeroize();
                Ok(slice)
            }
        }
    }

    /// Download a past version's body. The caller labels it with the
    /// file's current name.
    pub async fn download_file_version(
        &self,
        folder_id: &str,
        child_id: &str,
        version_index: usize,
    ) -> Result<Vec<u8>, CoreError> {
        let pointer = self.file_pointer(folder_id, child_id).await?;
        let (metadata, _, _) = self.fetch_file_metadata(&pointer).await?;

        let entry = metadata
            .versions()
            .get(version_index)
            .ok_or_else(|| CoreError::NotFound(format!("version {}", version_index)))?;

        self.decrypt_body(
            &entry.cid,
            &entry.file_key_encrypted,
            &entry.file_iv,
            entry.encryption_mode,
        )
        .await
    }

    /// Replace a file's body. Touches only the file's own pointer; the
    /// previous body becomes a version entry per the retention policy, and
    /// only tail-pruned CIDs are unpinned.
    pub async fn update_file_body(
        &self,
        folder_id: &str,
        child_id: &str,
        content: &[u8],
        mime_type: Option<&str>,
        mode: EncryptionMode,
        force_version: bool,
    ) -> Result<UpdateOutcome, CoreError> {
        let pointer = self.file_pointer(folder_id, child_id).await?;
        let (mut metadata, previous_meta_cid, _) = self.fetch_file_metadata(&pointer).await?;

        let mut file_key = generate_symmetric_key();
        let (ciphertext, iv_hex) = encrypt_body(content, &file_key, mode)?;
        let file_key_encrypted = hex::encode(wrap_key(&file_key, self.keypair.public_key())?);
        file_key.zeroize();

        let body_cid = self.transport.put_block(&ciphertext).await?;

        let outcome = apply_content_update(
            &mut metadata,
            NewBodyContext {
                cid: body_cid.clone(),
                file_key_encrypted,
                file_iv: iv_hex,
                size: content.len() as u64,
                encryption_mode: mode,
            },
            force_version,
            now_ms(),
        );
        if let Some(mime) = mime_type {
            metadata.mime_type = mime.to_string();
        }

        if let Err(e) = self.publish_file_metadata(&pointer, &metadata).await {
            self.unpin_quiet(&body_cid).await;
            return Err(e);
        }

        // Previous metadata blob is unreferenced now; the previous body is
        // NOT unpinned, it lives on as a version entry (or was just pruned).
        self.unpin_quiet(&previous_meta_cid).await;
        if let Some(pruned) = &outcome.pruned_cid {
            self.unpin_quiet(pruned).await;
        }
        Ok(outcome)
    }

    /// Restore a past version to current. File pointer only.
    pub async fn restore_file_version(
        &self,
        folder_id: &str,
        child_id: &str,
        version_index: usize,
    ) -> Result<(), CoreError> {
        let pointer = self.file_pointer(folder_id, child_id).await?;
        let (mut metadata, previous_meta_cid, _) = self.fetch_file_metadata(&pointer).await?;

        restore_version(&mut metadata, version_index, now_ms())
            .map_err(|_| CoreError::NotFound(format!("version {}", version_index)))?;

        self.publish_file_metadata(&pointer, &metadata).await?;
        self.unpin_quiet(&previous_meta_cid).await;
        Ok(())
    }

    /// Delete a specific past version; its body block is released.
    pub async fn delete_file_version(
        &self,
        folder_id: &str,
        child_id: &str,
        version_index: usize,
    ) -> Result<String, CoreError> {
        let pointer = self.file_pointer(folder_id, child_id).await?;
        let (mut metadata, previous_meta_cid, _) = self.fetch_file_metadata(&pointer).await?;

        let pruned = delete_version(&mut metadata, version_index)
            .map_err(|_| CoreError::NotFound(format!("version {}", version_index)))?;

        self.publish_file_metadata(&pointer, &metadata).await?;
        self.unpin_quiet(&previous_meta_cid).await;
        self.unpin_quiet(&pruned).await;
        Ok(pruned)
    }

    // ── Internals ────────────────────────────────────────────────────────

    /// Load the root folder metadata (empty for a never-published root).
    async fn load_root(&self) -> Result<(), CoreError> {
        let root_key = *self.root.root_folder_key();
        let fetched = self
            .fetch_folder_metadata(&self.root.root_ipns_name.clone(), &root_key)
            .await?;

        let mut graph = self.graph.write().await;
        let node = graph.node_mut(ROOT_ID)?;
        match fetched {
            Some((metadata, cid, sequence)) => {
                node.load_metadata(metadata)?;
                node.metadata_cid = Some(cid);
                node.sequence_number = sequence;
            }
            None => {
                node.load_metadata(FolderMetadata::empty())?;
            }
        }
        Ok(())
    }

    /// Resolve and decrypt a folder's metadata; `None` for a pointer that
    /// has never been published.
    async fn fetch_folder_metadata(
        &self,
        ipns_name: &str,
        folder_key: &[u8; 32],
    ) -> Result<Option<(FolderMetadata, String, u64)>, CoreError> {
        let resolved = match self.pipeline.resolve(ipns_name).await {
            Ok(r) => r,
            Err(CoreError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let blob = self.transport.get_block(&resolved.cid).await?;
        let env = envelope::from_network_bytes(&blob)?;
        let metadata = decrypt_and_validate_folder_metadata(&env, folder_key)?;
        Ok(Some((metadata, resolved.cid, resolved.sequence)))
    }

    /// Resolve and decrypt a file's metadata, returning the blob CID it
    /// was read from. The envelope key is derived from the pointer's
    /// signing seed.
    async fn fetch_file_metadata(
        &self,
        pointer: &FilePointer,
    ) -> Result<(FileMetadata, String, u64), CoreError> {
        let resolved = self.pipeline.resolve(&pointer.file_meta_ipns_name).await?;
        let blob = self.transport.get_block(&resolved.cid).await?;
        let env = envelope::from_network_bytes(&blob)?;

        let mut seed = self.file_pointer_signing_key(pointer)?;
        let mut meta_key = derive_file_metadata_key(&seed)?;
        seed.zeroize();
        let metadata = decrypt_and_validate_file_metadata(&env, &meta_key);
        meta_key.zeroize();

        Ok((metadata?, resolved.cid, resolved.sequence))
    }

    /// Encrypt and publish updated file metadata through the file's own
    /// pointer.
    async fn publish_file_metadata(
        &self,
        pointer: &FilePointer,
        metadata: &FileMetadata,
    ) -> Result<(), CoreError> {
        let mut signing_key = self.file_pointer_signing_key(pointer)?;
        let mut meta_key = derive_file_metadata_key(&signing_key)?;
        let sealed = encrypt_file_metadata(metadata, &meta_key);
        meta_key.zeroize();

        let blob = match sealed.map_err(CoreError::from).and_then(|s| {
            envelope::to_network_bytes(&s).map_err(CoreError::from)
        }) {
            Ok(blob) => blob,
            Err(e) => {
                signing_key.zeroize();
                return Err(e);
            }
        };

        let meta_cid = match self.transport.put_block(&blob).await {
            Ok(cid) => cid,
            Err(e) => {
                signing_key.zeroize();
                return Err(e.into());
            }
        };

        let result = self
            .pipeline
            .publish(&pointer.file_meta_ipns_name, &signing_key, &meta_cid)
            .await;
        signing_key.zeroize();

        if let Err(e) = result {
            self.unpin_quiet(&meta_cid).await;
            return Err(e);
        }
        Ok(())
    }

    /// The signing key for a file's pointer: the wrapped key from the
    /// parent entry, or the legacy HKDF derivation for records written
    /// before the wrapped key existed.
    fn file_pointer_signing_key(&self, pointer: &FilePointer) -> Result<[u8; 32], CoreError> {
        match &pointer.ipns_private_key_encrypted {
            Some(wrapped) => self.unwrap_32(wrapped),
            None => {
                let derived =
                    derive_file_ipns_keypair(self.keypair.private_key(), &pointer.id)?;
                let seed: [u8; 32] = derived
                    .private_key
                    .as_slice()
                    .try_into()
                    .map_err(|_| CoreError::KeyUnwrappingFailed)?;
                Ok(seed)
            }
        }
    }

    /// Encrypt and publish a folder's current metadata, then record the
    /// new blob CID and sequence on the node. Also performs lazy migration:
    /// legacy FilePointers get their wrapped signing key written back.
    async fn flush_folder(&self, folder_id: &str) -> Result<(), CoreError> {
        let (mut metadata, folder_key, signing_key, ipns_name, previous_cid) = {
            let mut graph = self.graph.write().await;
            let node = graph.node_mut(folder_id)?;
            (
                node.metadata.clone(),
                node.folder_key,
                node.ipns_private_key,
                node.ipns_name.clone(),
                node.metadata_cid.clone(),
            )
        };

        // Lazy migration on the way out.
        let mut migrated = false;
        for child in &mut metadata.children {
            if let FolderChild::File(pointer) = child {
                if pointer.ipns_private_key_encrypted.is_none() {
                    let derived =
                        derive_file_ipns_keypair(self.keypair.private_key(), &pointer.id)?;
                    pointer.ipns_private_key_encrypted = Some(hex::encode(wrap_key(
                        &derived.private_key,
                        self.keypair.public_key(),
                    )?));
                    migrated = true;
                }
            }
        }

        let blob = envelope::to_network_bytes(&encrypt_folder_metadata(&metadata, &folder_key)?)?;
        let cid = self.transport.put_block(&blob).await?;

        match self.pipeline.publish(&ipns_name, &signing_key, &cid).await {
            Ok(sequence) => {
                let mut graph = self.graph.write().await;
                let node = graph.node_mut(folder_id)?;
                if migrated {
                    node.metadata = metadata;
                }
                node.metadata_cid = Some(cid);
                node.sequence_number = sequence;
                drop(graph);
                if let Some(previous) = previous_cid {
                    self.unpin_quiet(&previous).await;
                }
                Ok(())
            }
            Err(e) => {
                self.unpin_quiet(&cid).await;
                Err(e)
            }
        }
    }

    /// Fetch, unwrap and decrypt one body blob.
    async fn decrypt_body(
        &self,
        cid: &str,
        file_key_encrypted: &str,
        file_iv: &str,
        mode: EncryptionMode,
    ) -> Result<Vec<u8>, CoreError> {
        let ciphertext = self.transport.get_block(cid).await?;
        let mut file_key = self.unwrap_32(file_key_encrypted)?;

        let result = match mode {
            EncryptionMode::Gcm => {
                let iv_bytes =
                    hex::decode(file_iv).map_err(|_| CoreError::DecryptionFailed)?;
                let iv: [u8; 12] = iv_bytes
                    .try_into()
                    .map_err(|_| CoreError::InvalidIvSize)?;
                decrypt_aes_gcm(&ciphertext, &file_key, &iv).map_err(CoreError::from)
            }
            EncryptionMode::Ctr => {
                let iv = decode_ctr_iv(file_iv)?;
                decrypt_aes_ctr(&ciphertext, &file_key, &iv).map_err(CoreError::from)
            }
        };
        file_key.zeroize();
        result
    }

    /// The FilePointer entry for a child file.
    async fn file_pointer(
        &self,
        folder_id: &str,
        child_id: &str,
    ) -> Result<FilePointer, CoreError> {
        let graph = self.graph.read().await;
        let node = graph.node(folder_id)?;
        node.metadata
            .children
            .iter()
            .find_map(|c| match c {
                FolderChild::File(p) if p.id == child_id => Some(p.clone()),
                _ => None,
            })
            .ok_or_else(|| CoreError::NotFound(child_id.to_string()))
    }

    /// Unwrap a hex ECIES envelope to exactly 32 bytes.
    fn unwrap_32(&self, wrapped_hex: &str) -> Result<[u8; 32], CoreError> {
        let wrapped = hex::decode(wrapped_hex).map_err(|_| CoreError::KeyUnwrappingFailed)?;
        let mut plaintext = unwrap_key(&wrapped, self.keypair.private_key())?;
        let result = match plaintext.len() {
            32 => {
                let mut key = [0u8; 32];
                key.copy_from_slice(&plaintext);
                Ok(key)
            }
            64 => {
                let mut key = [0u8; 32];
                key.copy_from_slice(&plaintext[..32]);
                Ok(key)
            }
            _ => Err(CoreError::KeyUnwrappingFailed),
        };
        plaintext.zeroize();
        result
    }

    /// Fire-and-forget unpin; failures are logged, never surfaced.
    async fn unpin_quiet(&self, cid: &str) {
        if let Err(e) = self.transport.unpin_block(cid).await {
            log::warn!("Unpin of {} failed (will be reclaimed later): {}", cid, e);
        }
    }

    async fn lock_folder(&self, folder_id: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.folder_locks.lock().await;
            locks
                .entry(folder_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Acquire two folder locks in a deterministic order so concurrent
    /// opposite-direction moves cannot deadlock.
    async fn lock_folder_pair(
        &self,
        a: &str,
        b: &str,
    ) -> (
        tokio::sync::OwnedMutexGuard<()>,
        tokio::sync::OwnedMutexGuard<()>,
    ) {
        if a <= b {
            let first = self.lock_folder(a).await;
            let second = self.lock_folder(b).await;
            (first, second)
        } else {
            let second = self.lock_folder(b).await;
            let first = self.lock_folder(a).await;
            (first, second)
        }
    }
}

/// Encrypt a body under the given mode, returning (ciphertext, IV hex).
fn encrypt_body(
    content: &[u8],
    file_key: &[u8; 32],
    mode: EncryptionMode,
) -> Result<(Vec<u8>, String), CoreError> {
    match mode {
        EncryptionMode::Gcm => {
            let iv = generate_iv();
            let ciphertext = encrypt_aes_gcm(content, file_key, &iv)?;
            Ok((ciphertext, hex::encode(iv)))
        }
        EncryptionMode::Ctr => {
            let iv = generate_ctr_iv();
            let ciphertext = encrypt_aes_ctr(content, file_key, &iv)?;
            Ok((ciphertext, hex::encode(iv)))
        }
    }
}

fn decode_ctr_iv(file_iv: &str) -> Result<[u8; AES_CTR_IV_SIZE], CoreError> {
    let iv_bytes = hex::decode(file_iv).map_err(|_| CoreError::DecryptionFailed)?;
    iv_bytes.try_into().map_err(|_| CoreError::InvalidIvSize)
}
