//! In-memory remote store.
//!
//! A scriptable remote tree used by tests and tools. Revisions come from a
//! single change counter, directory hashes are derived from member listings and
//! request counters make redundant remote calls observable.

use crate::error::RemoteError;
use crate::remote::{listing_hash, MetadataResponse, RemoteEntry, RemoteStore};
use crate::tree::path::{normalize_path, parent_path, ROOT_PATH};
use crate::types::Timestamp;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone)]
struct MemoryEntry {
    path: String,
    is_dir: bool,
    revision: u64,
    modified: Timestamp,
    content: Vec<u8>,
}

#[derive(Debug, Default)]
struct MemoryTree {
    entries: BTreeMap<String, MemoryEntry>,
    changes: u64,
    failures: HashMap<String, u16>,
}

impl MemoryTree {
    fn next_revision(&mut self) -> (u64, Timestamp) {
        self.changes += 1;
        let modified = Utc
            .timestamp_opt(1_300_000_000 + self.changes as i64, 0)
            .single()
            .unwrap_or_default();
        (self.changes, modified)
    }

    fn touch(&mut self, key: &str) {
        let (revision, modified) = self.next_revision();
        if let Some(entry) = self.entries.get_mut(key) {
            entry.revision = revision;
            entry.modified = modified;
        }
    }

    fn remove_subtree(&mut self, key: &str) -> bool {
        let prefix = format!("{}/", key);
        let doomed: Vec<String> = self
            .entries
            .keys()
            .filter(|k| k.as_str() == key || k.starts_with(&prefix))
            .cloned()
            .collect();
        for k in &doomed {
            self.entries.remove(k);
        }
        !doomed.is_empty()
    }

    fn ensure_dir(&mut self, display: &str) {
        let key = normalize_path(display);
        if let Some(existing) = self.entries.get(&key) {
            if existing.is_dir {
                return;
            }
            self.entries.remove(&key);
        }
        if let Some(parent) = parent_path(&key) {
            let parent_display = parent_display(display);
            self.ensure_dir(&parent_display);
            self.touch(&parent);
        }
        let (revision, modified) = self.next_revision();
        self.entries.insert(
            key,
            MemoryEntry {
                path: clean_display(display),
                is_dir: true,
                revision,
                modified,
                content: Vec::new(),
            },
        );
    }

    fn members(&self, key: &str) -> Vec<&MemoryEntry> {
        self.entries
            .iter()
            .filter(|(k, _)| parent_path(k).as_deref() == Some(key))
            .map(|(_, e)| e)
            .collect()
    }
}

fn clean_display(path: &str) -> String {
    let trimmed: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", trimmed.join("/"))
}

fn parent_display(path: &str) -> String {
    let clean = clean_display(path);
    match clean.rfind('/') {
        Some(0) | None => ROOT_PATH.to_string(),
        Some(idx) => clean[..idx].to_string(),
    }
}

fn to_remote(entry: &MemoryEntry, hash: Option<String>) -> RemoteEntry {
    RemoteEntry {
        path: entry.path.clone(),
        is_dir: entry.is_dir,
        revision: format!("{:x}", entry.revision),
        hash,
        bytes: entry.content.len() as u64,
        modified: entry.modified,
        contents: Vec::new(),
    }
}

/// Remote tree held in memory. Paths are matched case-insensitively.
#[derive(Debug)]
pub struct MemoryRemote {
    tree: RwLock<MemoryTree>,
    metadata_calls: AtomicUsize,
    download_calls: AtomicUsize,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    /// A remote holding only the root directory.
    pub fn new() -> Self {
        let mut tree = MemoryTree::default();
        tree.ensure_dir(ROOT_PATH);
        Self {
            tree: RwLock::new(tree),
            metadata_calls: AtomicUsize::new(0),
            download_calls: AtomicUsize::new(0),
        }
    }

    /// Create or replace a file, creating missing parent directories.
    pub fn put_file(&self, path: &str, content: impl Into<Vec<u8>>) {
        let content = content.into();
        let mut tree = self.tree.write();
        let key = normalize_path(path);
        let existing_same = tree
            .entries
            .get(&key)
            .map(|e| !e.is_dir && e.content == content)
            .unwrap_or(false);
        if existing_same {
            return;
        }
        let is_new = match tree.entries.get(&key) {
            Some(e) if e.is_dir => {
                tree.remove_subtree(&key);
                true
            }
            Some(_) => false,
            None => true,
        };
        if let Some(parent) = parent_path(&key) {
            tree.ensure_dir(&parent_display(path));
            if is_new {
                tree.touch(&parent);
            }
        }
        let (revision, modified) = tree.next_revision();
        tree.entries.insert(
            key,
            MemoryEntry {
                path: clean_display(path),
                is_dir: false,
                revision,
                modified,
                content,
            },
        );
    }

    /// Create a directory (and its parents) if missing.
    pub fn put_dir(&self, path: &str) {
        self.tree.write().ensure_dir(path);
    }

    /// Remove an entry and everything below it.
    pub fn remove(&self, path: &str) {
        let mut tree = self.tree.write();
        let key = normalize_path(path);
        if tree.remove_subtree(&key) {
            if let Some(parent) = parent_path(&key) {
                tree.touch(&parent);
            }
        }
    }

    /// Make every request for `path` fail with `status`.
    pub fn fail_path(&self, path: &str, status: u16) {
        self.tree.write().failures.insert(normalize_path(path), status);
    }

    pub fn clear_failures(&self) {
        self.tree.write().failures.clear();
    }

    pub fn metadata_calls(&self) -> usize {
        self.metadata_calls.load(Ordering::SeqCst)
    }

    pub fn download_calls(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        self.metadata_calls.store(0, Ordering::SeqCst);
        self.download_calls.store(0, Ordering::SeqCst);
    }

    fn check_failure(tree: &MemoryTree, key: &str) -> Result<(), RemoteError> {
        match tree.failures.get(key) {
            Some(status) => Err(RemoteError::new(*status, format!("Injected failure for {}", key))),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn metadata(
        &self,
        path: &str,
        hash: Option<&str>,
    ) -> Result<MetadataResponse, RemoteError> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        let tree = self.tree.read();
        let key = normalize_path(path);
        Self::check_failure(&tree, &key)?;
        let Some(entry) = tree.entries.get(&key) else {
            return Ok(MetadataResponse::NotFound);
        };
        if !entry.is_dir {
            return Ok(MetadataResponse::Found(to_remote(entry, None)));
        }
        let contents: Vec<RemoteEntry> = tree
            .members(&key)
            .into_iter()
            .map(|m| to_remote(m, None))
            .collect();
        let dir_hash = listing_hash(contents.iter());
        if hash == Some(dir_hash.as_str()) {
            return Ok(MetadataResponse::Unchanged);
        }
        let mut listing = to_remote(entry, Some(dir_hash));
        listing.contents = contents;
        Ok(MetadataResponse::Found(listing))
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, RemoteError> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        let tree = self.tree.read();
        let key = normalize_path(path);
        Self::check_failure(&tree, &key)?;
        match tree.entries.get(&key) {
            Some(entry) if !entry.is_dir => Ok(entry.content.clone()),
            Some(_) => Err(RemoteError::new(400, format!("{} is a directory", path))),
            None => Err(RemoteError::new(404, format!("{} not found", path))),
        }
    }
}
