//! In-memory projection of the encrypted folder tree.
//!
//! Each loaded folder owns its symmetric key, its pointer signing key, the
//! authoritative codec metadata (with per-entry encrypted names), and a
//! side map of decrypted names. Children of unvisited folders exist only
//! as entries in their parent's metadata until navigated into.
//!
//! The graph is purely in-memory; the session layer flushes edits as
//! publish sets. Parent back-pointers are id strings looked up in the node
//! map, never owning links, so the projection stays acyclic.

use std::collections::HashMap;

use zeroize::Zeroize;

use crate::codec::folder::{
    decrypt_entry_name, encrypt_entry_name, FolderChild, FolderMetadata,
};
use crate::error::CoreError;

/// Fixed id of the root folder node.
pub const ROOT_ID: &str = "root";

/// Decrypted view of one child entry, for listings.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildSummary {
    pub id: String,
    pub name: String,
    pub kind: ChildKind,
    pub created_at: u64,
    pub modified_at: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChildKind {
    Folder { ipns_name: String },
    File { file_meta_ipns_name: String },
}

/// One loaded folder: keys, pointer identity, metadata, decrypted names.
pub struct FolderNode {
    pub id: String,
    pub name: String,
    pub folder_key: [u8; 32],
    pub ipns_private_key: [u8; 32],
    pub ipns_name: String,
    /// Parent folder id; `None` for the root.
    pub parent_id: Option<String>,
    /// Authoritative metadata as last decrypted or edited.
    pub metadata: FolderMetadata,
    /// Child id -> decrypted name.
    names: HashMap<String, String>,
    /// Whether `metadata` reflects a fetched (or freshly created) state
    /// rather than a stub entry from the parent.
    pub is_loaded: bool,
    /// Last sequence observed or published for this folder's pointer.
    pub sequence_number: u64,
    /// Blob CID the current metadata was read from or published as.
    pub metadata_cid: Option<String>,
}

impl Drop for FolderNode {
    fn drop(&mut self) {
        self.folder_key.zeroize();
        self.ipns_private_key.zeroize();
    }
}

impl FolderNode {
    pub fn new(
        id: String,
        name: String,
        folder_key: [u8; 32],
        ipns_private_key: [u8; 32],
        ipns_name: String,
        parent_id: Option<String>,
    ) -> Self {
        Self {
            id,
            name,
            folder_key,
            ipns_private_key,
            ipns_name,
            parent_id,
            metadata: FolderMetadata::empty(),
            names: HashMap::new(),
            is_loaded: false,
            sequence_number: 0,
            metadata_cid: None,
        }
    }

    /// Install fetched metadata, decrypting every entry name.
    pub fn load_metadata(&mut self, metadata: FolderMetadata) -> Result<(), CoreError> {
        let mut names = HashMap::new();
        for child in &metadata.children {
            let (name_encrypted, name_iv) = child.name_encrypted();
            let name = decrypt_entry_name(name_encrypted, name_iv, &self.folder_key)?;
            names.insert(child.id().to_string(), name);
        }
        self.metadata = metadata;
        self.names = names;
        self.is_loaded = true;
        Ok(())
    }

    /// Decrypted name of a child entry.
    pub fn child_name(&self, child_id: &str) -> Option<&str> {
        self.names.get(child_id).map(String::as_str)
    }

    /// Child id carrying `name`, if any. Case-sensitive, both entry kinds.
    pub fn child_id_by_name(&self, name: &str) -> Option<&str> {
        self.names
            .iter()
            .find(|(_, n)| n.as_str() == name)
            .map(|(id, _)| id.as_str())
    }

    /// Refuse a name already present in this folder. Checked before any
    /// encryption or upload starts, so collisions cost nothing.
    pub fn ensure_name_available(&self, name: &str) -> Result<(), CoreError> {
        if self.child_id_by_name(name).is_some() {
            return Err(CoreError::NameCollision(name.to_string()));
        }
        Ok(())
    }

    /// Append a child entry with its decrypted name.
    pub fn add_child(&mut self, child: FolderChild, name: String) -> Result<(), CoreError> {
        self.ensure_name_available(&name)?;
        self.names.insert(child.id().to_string(), name);
        self.metadata.children.push(child);
        Ok(())
    }

    /// Remove and return a child entry.
    pub fn remove_child(&mut self, child_id: &str) -> Result<FolderChild, CoreError> {
        let index = self
            .metadata
            .children
            .iter()
            .position(|c| c.id() == child_id)
            .ok_or_else(|| CoreError::NotFound(child_id.to_string()))?;
        self.names.remove(child_id);
        Ok(self.metadata.children.remove(index))
    }

    /// Rename a child entry in place: fresh name ciphertext and IV, new
    /// modification stamp.
    pub fn rename_child(
        &mut self,
        child_id: &str,
        new_name: &str,
        now_ms: u64,
    ) -> Result<(), CoreError> {
        if self
            .child_id_by_name(new_name)
            .is_some_and(|id| id != child_id)
        {
            return Err(CoreError::NameCollision(new_name.to_string()));
        }

        let (name_encrypted, name_iv) = encrypt_entry_name(new_name, &self.folder_key)?;
        let child = self
            .metadata
            .children
            .iter_mut()
            .find(|c| c.id() == child_id)
            .ok_or_else(|| CoreError::NotFound(child_id.to_string()))?;

        match child {
            FolderChild::Folder(entry) => {
                entry.name_encrypted = name_encrypted;
                entry.name_iv = name_iv;
                entry.modified_at = now_ms;
            }
            FolderChild::File(pointer) => {
                pointer.name_encrypted = name_encrypted;
                pointer.name_iv = name_iv;
                pointer.modified_at = now_ms;
            }
        }
        self.names.insert(child_id.to_string(), new_name.to_string());
        Ok(())
    }

    /// Decrypted listing of this folder.
    pub fn children(&self) -> Vec<ChildSummary> {
        self.metadata
            .children
            .iter()
            .map(|child| {
                let name = self
                    .names
                    .get(child.id())
                    .cloned()
                    .unwrap_or_default();
                match child {
                    FolderChild::Folder(entry) => ChildSummary {
                        id: entry.id.clone(),
                        name,
                        kind: ChildKind::Folder {
                            ipns_name: entry.ipns_name.clone(),
                        },
                        created_at: entry.created_at,
                        modified_at: entry.modified_at,
                    },
                    FolderChild::File(pointer) => ChildSummary {
                        id: pointer.id.clone(),
                        name,
                        kind: ChildKind::File {
                            file_meta_ipns_name: pointer.file_meta_ipns_name.clone(),
                        },
                        created_at: pointer.created_at,
                        modified_at: pointer.modified_at,
                    },
                }
            })
            .collect()
    }
}

/// The folder tree projection for one session.
pub struct FolderGraph {
    nodes: HashMap<String, FolderNode>,
}

impl FolderGraph {
    /// Start a graph from the materialized vault root.
    pub fn new(
        root_folder_key: [u8; 32],
        root_ipns_private_key: [u8; 32],
        root_ipns_name: String,
    ) -> Self {
        let root = FolderNode::new(
            ROOT_ID.to_string(),
            String::new(),
            root_folder_key,
            root_ipns_private_key,
            root_ipns_name,
            None,
        );
        let mut nodes = HashMap::new();
        nodes.insert(ROOT_ID.to_string(), root);
        Self { nodes }
    }

    pub fn node(&self, id: &str) -> Result<&FolderNode, CoreError> {
        self.nodes
            .get(id)
            .ok_or_else(|| CoreError::NotFound(id.to_string()))
    }

    pub fn node_mut(&mut self, id: &str) -> Result<&mut FolderNode, CoreError> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| CoreError::NotFound(id.to_string()))
    }

    pub fn root(&self) -> &FolderNode {
        self.nodes.get(ROOT_ID).expect("root node always present")
    }

    pub fn insert(&mut self, node: FolderNode) {
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Remove a folder node and every loaded descendant folder node.
    /// Returns the removed node ids.
    pub fn remove_subtree(&mut self, id: &str) -> Vec<String> {
        let mut removed = Vec::new();
        let mut stack = vec![id.to_string()];
        while let Some(current) = stack.pop() {
            let descendants: Vec<String> = self
                .nodes
                .values()
                .filter(|n| n.parent_id.as_deref() == Some(current.as_str()))
                .map(|n| n.id.clone())
                .collect();
            stack.extend(descendants);
            if self.nodes.remove(&current).is_some() {
                removed.push(current);
            }
        }
        removed
    }

    /// Walk a `/`-separated path from the root to a folder node id.
    pub fn folder_id_by_path(&self, path: &str) -> Result<String, CoreError> {
        let mut current = ROOT_ID.to_string();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let node = self.node(&current)?;
            let child_id = node
                .child_id_by_name(segment)
                .ok_or_else(|| CoreError::NotFound(segment.to_string()))?
                .to_string();
            if !self.nodes.contains_key(&child_id) {
                return Err(CoreError::NotFound(segment.to_string()));
            }
            current = child_id;
        }
        Ok(current)
    }

    /// Loaded folder count (diagnostics).
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::folder::{FilePointer, FolderEntry};
    use crate::crypto::utils::{generate_object_id, generate_symmetric_key};

    fn test_graph() -> FolderGraph {
        FolderGraph::new(
            generate_symmetric_key(),
            [1u8; 32],
            "k51root00000000000000000000000000000000000000000000000000000".into(),
        )
    }

    fn file_child(key: &[u8; 32], name: &str) -> (FolderChild, String) {
        let (name_encrypted, name_iv) = encrypt_entry_name(name, key).unwrap();
        let pointer = FilePointer {
            id: generate_object_id(),
            name_encrypted,
            name_iv,
            file_meta_ipns_name:
                "k51qzi5uqu5dlmw4ipjtjkkgysrl3gtrm46mxx8qe8fhsr29zkp6c1mqv9um2k".into(),
            ipns_private_key_encrypted: Some("ab".repeat(129)),
            created_at: 1,
            modified_at: 1,
        };
        (FolderChild::File(pointer), name.to_string())
    }

    fn folder_child(key: &[u8; 32], name: &str) -> (FolderChild, String) {
        let (name_encrypted, name_iv) = encrypt_entry_name(name, key).unwrap();
        let entry = FolderEntry {
            id: generate_object_id(),
            name_encrypted,
            name_iv,
            ipns_name: "k51qzi5uqu5dkkciu33khkzbcmxtyhn376i1e83tya8kuy7z9euedzyr5nhoew"
                .into(),
            folder_key_encrypted: "cd".repeat(129),
            ipns_private_key_encrypted: "ef".repeat(129),
            created_at: 2,
            modified_at: 2,
        };
        (FolderChild::Folder(entry), name.to_string())
    }

    #[test]
    fn test_add_and_list_children() {
        let mut graph = test_graph();
        let key = graph.root().folder_key;

        let root = graph.node_mut(ROOT_ID).unwrap();
        let (file, name) = file_child(&key, "hello.txt");
        root.add_child(file, name).unwrap();
        let (folder, name) = folder_child(&key, "Documents");
        root.add_child(folder, name).unwrap();

        let children = graph.root().children();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].name, "hello.txt");
        assert!(matches!(children[0].kind, ChildKind::File { .. }));
        assert_eq!(children[1].name, "Documents");
        assert!(matches!(children[1].kind, ChildKind::Folder { .. }));
    }

    #[test]
    fn test_name_collision_across_kinds() {
        let mut graph = test_graph();
        let key = graph.root().folder_key;

        let root = graph.node_mut(ROOT_ID).unwrap();
        let (file, name) = file_child(&key, "report");
        root.add_child(file, name).unwrap();

        // A folder cannot take a file's name either.
        let (folder, name) = folder_child(&key, "report");
        assert!(matches!(
            root.add_child(folder, name),
            Err(CoreError::NameCollision(n)) if n == "report"
        ));

        // Case differs: allowed.
        let (folder, name) = folder_child(&key, "Report");
        root.add_child(folder, name).unwrap();
    }

    #[test]
    fn test_rename_reencrypts_name() {
        let mut graph = test_graph();
        let key = graph.root().folder_key;

        let root = graph.node_mut(ROOT_ID).unwrap();
        let (file, name) = file_child(&key, "old.txt");
        root.add_child(file, name).unwrap();
        let child_id = root.child_id_by_name("old.txt").unwrap().to_string();

        let before = match &root.metadata.children[0] {
            FolderChild::File(p) => (p.name_encrypted.clone(), p.name_iv.clone()),
            _ => unreachable!(),
        };

        root.rename_child(&child_id, "new.txt", 99).unwrap();

        assert_eq!(root.child_name(&child_id), Some("new.txt"));
        match &root.metadata.children[0] {
            FolderChild::File(p) => {
                assert_ne!((p.name_encrypted.clone(), p.name_iv.clone()), before);
                assert_eq!(p.modified_at, 99);
                assert_eq!(
                    decrypt_entry_name(&p.name_encrypted, &p.name_iv, &key).unwrap(),
                    "new.txt"
                );
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_rename_to_own_name_allowed() {
        let mut graph = test_graph();
        let key = graph.root().folder_key;
        let root = graph.node_mut(ROOT_ID).unwrap();
        let (file, name) = file_child(&key, "same.txt");
        root.add_child(file, name).unwrap();
        let child_id = root.child_id_by_name("same.txt").unwrap().to_string();

        root.rename_child(&child_id, "same.txt", 5).unwrap();
        assert_eq!(root.child_name(&child_id), Some("same.txt"));
    }

    #[test]
    fn test_rename_collision_rejected() {
        let mut graph = test_graph();
        let key = graph.root().folder_key;
        let root = graph.node_mut(ROOT_ID).unwrap();
        let (a, name) = file_child(&key, "a.txt");
        root.add_child(a, name).unwrap();
        let (b, name) = file_child(&key, "b.txt");
        root.add_child(b, name).unwrap();
        let a_id = root.child_id_by_name("a.txt").unwrap().to_string();

        assert!(matches!(
            root.rename_child(&a_id, "b.txt", 5),
            Err(CoreError::NameCollision(_))
        ));
    }

    #[test]
    fn test_remove_child_round_trip() {
        let mut graph = test_graph();
        let key = graph.root().folder_key;
        let root = graph.node_mut(ROOT_ID).unwrap();
        let (file, name) = file_child(&key, "mv.txt");
        root.add_child(file, name).unwrap();
        let child_id = root.child_id_by_name("mv.txt").unwrap().to_string();

        let removed = root.remove_child(&child_id).unwrap();
        assert_eq!(removed.id(), child_id);
        assert!(root.child_id_by_name("mv.txt").is_none());
        assert!(root.metadata.children.is_empty());

        assert!(matches!(
            root.remove_child(&child_id),
            Err(CoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_load_metadata_decrypts_names() {
        let mut graph = test_graph();
        let key = graph.root().folder_key;

        let (file, _) = file_child(&key, "fetched.txt");
        let metadata = FolderMetadata {
            version: crate::codec::folder::FOLDER_SCHEMA_VERSION.into(),
            children: vec![file],
        };

        let root = graph.node_mut(ROOT_ID).unwrap();
        assert!(!root.is_loaded);
        root.load_metadata(metadata).unwrap();
        assert!(root.is_loaded);
        assert!(root.child_id_by_name("fetched.txt").is_some());
    }

    #[test]
    fn test_remove_subtree_drops_descendants() {
        let mut graph = test_graph();

        let child = FolderNode::new(
            "child".into(),
            "child".into(),
            generate_symmetric_key(),
            [2u8; 32],
            "k51child0000000000000000000000000000000000000000000000000000".into(),
            Some(ROOT_ID.to_string()),
        );
        let grandchild = FolderNode::new(
            "grandchild".into(),
            "grandchild".into(),
            generate_symmetric_key(),
            [3u8; 32],
            "k51grandchild00000000000000000000000000000000000000000000000".into(),
            Some("child".to_string()),
        );
        graph.insert(child);
        graph.insert(grandchild);
        assert_eq!(graph.len(), 3);

        let removed = graph.remove_subtree("child");
        assert_eq!(removed.len(), 2);
        assert!(!graph.contains("child"));
        assert!(!graph.contains("grandchild"));
        assert!(graph.contains(ROOT_ID));
    }

    #[test]
    fn test_path_walk() {
        let mut graph = test_graph();
        let root_key = graph.root().folder_key;

        let (folder, name) = folder_child(&root_key, "docs");
        let folder_id = folder.id().to_string();
        graph
            .node_mut(ROOT_ID)
            .unwrap()
            .add_child(folder, name)
            .unwrap();

        let node = FolderNode::new(
            folder_id.clone(),
            "docs".into(),
            generate_symmetric_key(),
            [4u8; 32],
            "k51docs00000000000000000000000000000000000000000000000000000".into(),
            Some(ROOT_ID.to_string()),
        );
        graph.insert(node);

        assert_eq!(graph.folder_id_by_path("/").unwrap(), ROOT_ID);
        assert_eq!(graph.folder_id_by_path("/docs").unwrap(), folder_id);
        assert!(matches!(
            graph.folder_id_by_path("/missing"),
            Err(CoreError::NotFound(_))
        ));
    }
}
