//! Sled-backed site store.

use crate::error::StorageError;
use crate::resource::Resource;
use crate::store::{NodeChanges, SiteStore, ThrottleKey};
use crate::sync::throttle::Throttle;
use crate::tree::path::descendant_prefix;
use crate::tree::TreeNode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};
use sled::{Db, Tree};
use std::collections::{BTreeSet, VecDeque};
use std::path::Path;

const NODES_TREE: &str = "nodes";
const THROTTLES_TREE: &str = "throttles";
const RESOURCES_TREE: &str = "resources";
const OWNERS_TREE: &str = "resource_owners";

/// Separates the node path from the suffix in composite keys.
const KEY_SEPARATOR: u8 = 0;

pub struct SledSiteStore {
    db: Db,
    nodes: Tree,
    throttles: Tree,
    resources: Tree,
    owners: Tree,
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    Ok(bincode::serialize(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    Ok(bincode::deserialize(bytes)?)
}

fn composite_key(path: &str, suffix: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(path.len() + 1 + suffix.len());
    key.extend_from_slice(path.as_bytes());
    key.push(KEY_SEPARATOR);
    key.extend_from_slice(suffix);
    key
}

fn owner_prefix(path: &str) -> Vec<u8> {
    composite_key(path, &[])
}

fn map_transaction_error(err: TransactionError<StorageError>) -> StorageError {
    match err {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => StorageError::Sled(e),
    }
}

impl SledSiteStore {
    /// Open (or create) a store at the given directory.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        std::fs::create_dir_all(path)?;
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// A throwaway store, removed when dropped.
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    pub fn from_db(db: Db) -> Result<Self, StorageError> {
        Ok(Self {
            nodes: db.open_tree(NODES_TREE)?,
            throttles: db.open_tree(THROTTLES_TREE)?,
            resources: db.open_tree(RESOURCES_TREE)?,
            owners: db.open_tree(OWNERS_TREE)?,
            db,
        })
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    fn scan_nodes(&self, prefix: &str) -> Result<Vec<TreeNode>, StorageError> {
        let mut out = Vec::new();
        for item in self.nodes.scan_prefix(prefix.as_bytes()) {
            let (_, value) = item?;
            out.push(decode(&value)?);
        }
        Ok(out)
    }

    fn owned_urls(&self, path: &str) -> Result<Vec<Vec<u8>>, StorageError> {
        let prefix = owner_prefix(path);
        let mut urls = Vec::new();
        for item in self.owners.scan_prefix(&prefix) {
            let (key, _) = item?;
            urls.push(key[prefix.len()..].to_vec());
        }
        Ok(urls)
    }

    fn throttle_keys(&self, path: &str) -> Result<Vec<Vec<u8>>, StorageError> {
        let mut keys = Vec::new();
        for item in self.throttles.scan_prefix(owner_prefix(path)) {
            let (key, _) = item?;
            keys.push(key.to_vec());
        }
        Ok(keys)
    }
}

impl SiteStore for SledSiteStore {
    fn get_node(&self, path: &str) -> Result<Option<TreeNode>, StorageError> {
        match self.nodes.get(path.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_node(&self, node: &TreeNode) -> Result<(), StorageError> {
        self.nodes.insert(node.path.as_bytes(), encode(node)?)?;
        Ok(())
    }

    fn children(&self, dir_path: &str) -> Result<Vec<TreeNode>, StorageError> {
        let prefix = descendant_prefix(dir_path);
        Ok(self
            .scan_nodes(&prefix)?
            .into_iter()
            .filter(|n| n.parent.as_deref() == Some(dir_path))
            .collect())
    }

    fn parentless_nodes(&self) -> Result<Vec<TreeNode>, StorageError> {
        Ok(self
            .all_nodes()?
            .into_iter()
            .filter(|n| n.parent.is_none())
            .collect())
    }

    fn all_nodes(&self) -> Result<Vec<TreeNode>, StorageError> {
        self.scan_nodes("")
    }

    fn subtree_paths(&self, path: &str) -> Result<Vec<String>, StorageError> {
        let mut out = Vec::new();
        let mut pending = VecDeque::from([path.to_string()]);
        while let Some(current) = pending.pop_front() {
            for child in self.children(&current)? {
                if child.path != current {
                    pending.push_back(child.path);
                }
            }
            out.push(current);
        }
        Ok(out)
    }

    fn apply_changes(&self, changes: &NodeChanges) -> Result<(), StorageError> {
        let mut doomed_nodes = BTreeSet::new();
        for root in &changes.removed {
            doomed_nodes.extend(self.subtree_paths(root)?);
        }

        let mut doomed_throttles = Vec::new();
        let mut doomed_resources = Vec::new();
        for path in &doomed_nodes {
            doomed_throttles.extend(self.throttle_keys(path)?);
            for url in self.owned_urls(path)? {
                doomed_resources.push((composite_key(path, &url), url));
            }
        }

        let mut puts = Vec::with_capacity(changes.updated.len());
        for node in &changes.updated {
            puts.push((node.path.clone(), encode(node)?));
        }

        (&self.nodes, &self.throttles, &self.resources, &self.owners)
            .transaction(|(nodes, throttles, resources, owners)| {
                for path in &doomed_nodes {
                    nodes.remove(path.as_bytes())?;
                }
                for key in &doomed_throttles {
                    throttles.remove(key.as_slice())?;
                }
                for (owner_key, url) in &doomed_resources {
                    owners.remove(owner_key.as_slice())?;
                    resources.remove(url.as_slice())?;
                }
                for (path, bytes) in &puts {
                    nodes.insert(path.as_bytes(), bytes.as_slice())?;
                }
                Ok::<(), ConflictableTransactionError<StorageError>>(())
            })
            .map_err(map_transaction_error)
    }

    fn throttles_for(&self, path: &str) -> Result<Vec<(ThrottleKey, Throttle)>, StorageError> {
        let mut out = Vec::new();
        for item in self.throttles.scan_prefix(owner_prefix(path)) {
            let (key, value) = item?;
            out.push((ThrottleKey(key.to_vec()), decode(&value)?));
        }
        Ok(out)
    }

    fn put_throttle(&self, path: &str, throttle: &Throttle) -> Result<ThrottleKey, StorageError> {
        let sequence = self.db.generate_id()?;
        let key = composite_key(path, &sequence.to_be_bytes());
        self.throttles.insert(key.as_slice(), encode(throttle)?)?;
        Ok(ThrottleKey(key))
    }

    fn delete_throttles(&self, keys: &[ThrottleKey]) -> Result<(), StorageError> {
        let mut batch = sled::Batch::default();
        for key in keys {
            batch.remove(key.0.as_slice());
        }
        self.throttles.apply_batch(batch)?;
        Ok(())
    }

    fn get_resource(&self, url: &str) -> Result<Option<Resource>, StorageError> {
        match self.resources.get(url.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_resource(&self, resource: &Resource) -> Result<(), StorageError> {
        let bytes = encode(resource)?;
        let url = resource.url.as_bytes();
        let owner_key = composite_key(&resource.owner, url);
        (&self.resources, &self.owners)
            .transaction(|(resources, owners)| {
                if let Some(previous) = resources.get(url)? {
                    let previous: Resource = decode(&previous)
                        .map_err(ConflictableTransactionError::Abort)?;
                    if previous.owner != resource.owner {
                        owners.remove(composite_key(&previous.owner, url))?;
                    }
                }
                resources.insert(url, bytes.as_slice())?;
                owners.insert(owner_key.as_slice(), &[] as &[u8])?;
                Ok(())
            })
            .map_err(map_transaction_error)
    }

    fn delete_resource(&self, url: &str) -> Result<Option<Resource>, StorageError> {
        let url = url.as_bytes();
        (&self.resources, &self.owners)
            .transaction(|(resources, owners)| {
                let Some(previous) = resources.remove(url)? else {
                    return Ok(None);
                };
                let previous: Resource =
                    decode(&previous).map_err(ConflictableTransactionError::Abort)?;
                owners.remove(composite_key(&previous.owner, url))?;
                Ok(Some(previous))
            })
            .map_err(map_transaction_error)
    }

    fn resources_owned_by(&self, path: &str) -> Result<Vec<Resource>, StorageError> {
        let mut out = Vec::new();
        for url in self.owned_urls(path)? {
            if let Some(bytes) = self.resources.get(&url)? {
                out.push(decode(&bytes)?);
            }
        }
        Ok(out)
    }

    fn all_resources(&self) -> Result<Vec<Resource>, StorageError> {
        let mut out = Vec::new();
        for item in self.resources.iter() {
            let (_, value) = item?;
            out.push(decode(&value)?);
        }
        Ok(out)
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.nodes.clear()?;
        self.throttles.clear()?;
        self.resources.clear()?;
        self.owners.clear()?;
        Ok(())
    }
}

impl std::fmt::Debug for SledSiteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledSiteStore")
            .field("nodes", &self.nodes.len())
            .field("resources", &self.resources.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{Resource, ResourceClass};

    fn node(path: &str, parent: Option<&str>, is_dir: bool) -> TreeNode {
        let mut n = TreeNode::fake(path);
        n.parent = parent.map(str::to_string);
        n.is_dir = is_dir;
        n
    }

    fn seeded() -> SledSiteStore {
        let store = SledSiteStore::temporary().unwrap();
        store.put_node(&TreeNode::root()).unwrap();
        store.put_node(&node("/b", Some("/"), true)).unwrap();
        store.put_node(&node("/b/b1.txt", Some("/b"), false)).unwrap();
        store.put_node(&node("/b/c", Some("/b"), true)).unwrap();
        store.put_node(&node("/b/c/c1.txt", Some("/b/c"), false)).unwrap();
        store.put_node(&node("/bb.txt", Some("/"), false)).unwrap();
        store.put_node(&TreeNode::fake("/b/orphan.txt")).unwrap();
        store
    }

    #[test]
    fn test_children_follow_parent_links() {
        let store = seeded();
        let mut children: Vec<String> =
            store.children("/b").unwrap().into_iter().map(|n| n.path).collect();
        children.sort();
        assert_eq!(children, vec!["/b/b1.txt", "/b/c"]);

        let root_children: Vec<String> =
            store.children("/").unwrap().into_iter().map(|n| n.path).collect();
        assert_eq!(root_children, vec!["/b", "/bb.txt"]);
    }

    #[test]
    fn test_apply_changes_removes_subtree_and_owned_records() {
        let store = seeded();
        store
            .put_resource(&Resource::new("/b/c/c1", "/b/c/c1.txt", ResourceClass::Text))
            .unwrap();
        store
            .put_resource(&Resource::new("/bb", "/bb.txt", ResourceClass::Text))
            .unwrap();
        store
            .put_throttle("/b/c", &Throttle::new(chrono::Utc::now()))
            .unwrap();

        let changes = NodeChanges {
            removed: vec!["/b".to_string()],
            updated: vec![node("/b", Some("/"), false)],
        };
        store.apply_changes(&changes).unwrap();

        let b = store.get_node("/b").unwrap().unwrap();
        assert!(!b.is_dir);
        assert!(store.get_node("/b/c/c1.txt").unwrap().is_none());
        assert!(store.get_node("/b/b1.txt").unwrap().is_none());
        // Orphans are not part of the parent-linked subtree.
        assert!(store.get_node("/b/orphan.txt").unwrap().is_some());
        assert!(store.get_resource("/b/c/c1").unwrap().is_none());
        assert!(store.get_resource("/bb").unwrap().is_some());
        assert!(store.throttles_for("/b/c").unwrap().is_empty());
    }

    #[test]
    fn test_put_resource_moves_owner_reference() {
        let store = seeded();
        store
            .put_resource(&Resource::new("/", "/", ResourceClass::Page))
            .unwrap();
        store
            .put_resource(&Resource::new("/", "/index.txt", ResourceClass::Page))
            .unwrap();
        assert!(store.resources_owned_by("/").unwrap().is_empty());
        assert_eq!(store.resources_owned_by("/index.txt").unwrap().len(), 1);

        let removed = store.delete_resource("/").unwrap().unwrap();
        assert_eq!(removed.owner, "/index.txt");
        assert!(store.resources_owned_by("/index.txt").unwrap().is_empty());
    }

    #[test]
    fn test_throttles_are_scoped_to_node() {
        let store = seeded();
        let now = chrono::Utc::now();
        let k1 = store.put_throttle("/b", &Throttle::new(now)).unwrap();
        store.put_throttle("/b/c", &Throttle::new(now)).unwrap();
        assert_eq!(store.throttles_for("/b").unwrap().len(), 1);
        store.delete_throttles(&[k1]).unwrap();
        assert!(store.throttles_for("/b").unwrap().is_empty());
        assert_eq!(store.throttles_for("/b/c").unwrap().len(), 1);
    }
}
