//! Tree node record.

use crate::remote::RemoteEntry;
use crate::tree::path::{self, ROOT_PATH};
use crate::types::{beginning_of_time, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One remote filesystem entry, directory or leaf.
///
/// Only the root (path `/`) is a parentless directory. A parentless leaf is a
/// fake node: it was created before its real parent was known and is reclaimed
/// by the next sync that lists its parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub path: String,
    pub parent: Option<String>,
    pub is_dir: bool,
    /// Remote-assigned revision, changes whenever the entry changes.
    pub revision: String,
    /// Directory listing hash, used as the conditional token for listings.
    pub content_hash: Option<String>,
    pub modified: Timestamp,
    pub bytes: u64,
}

impl TreeNode {
    /// The root node as materialized on first access.
    pub fn root() -> Self {
        Self {
            path: ROOT_PATH.to_string(),
            parent: None,
            is_dir: true,
            revision: String::new(),
            content_hash: None,
            modified: beginning_of_time(),
            bytes: 0,
        }
    }

    /// A parentless placeholder node.
    pub fn fake(path: &str) -> Self {
        Self {
            path: path::normalize_path(path),
            parent: None,
            is_dir: false,
            revision: String::new(),
            content_hash: None,
            modified: beginning_of_time(),
            bytes: 0,
        }
    }

    /// A fresh member of `parent`, populated from the remote entry.
    pub fn from_remote(node_path: String, parent: &str, entry: &RemoteEntry) -> Self {
        let mut node = Self {
            path: node_path,
            parent: Some(parent.to_string()),
            is_dir: entry.is_dir,
            revision: String::new(),
            content_hash: None,
            modified: beginning_of_time(),
            bytes: 0,
        };
        node.apply_remote(entry);
        node
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none() && self.path == ROOT_PATH
    }

    pub fn is_fake(&self) -> bool {
        self.parent.is_none() && self.path != ROOT_PATH
    }

    /// Path used for pattern matching: directories end with `/`.
    pub fn canonical_path(&self) -> String {
        path::canonical_path(&self.path, self.is_dir)
    }

    /// Overwrite fields from remote metadata. Returns the names of the fields
    /// that changed.
    pub fn apply_remote(&mut self, entry: &RemoteEntry) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if self.modified != entry.modified {
            self.modified = entry.modified;
            changed.push("modified");
        }
        if self.revision != entry.revision {
            self.revision = entry.revision.clone();
            changed.push("revision");
        }
        if self.is_dir != entry.is_dir {
            self.is_dir = entry.is_dir;
            changed.push("is_dir");
        }
        if self.bytes != entry.bytes {
            self.bytes = entry.bytes;
            changed.push("bytes");
        }
        if self.content_hash != entry.hash {
            self.content_hash = entry.hash.clone();
            changed.push("hash");
        }
        changed
    }
}

impl fmt::Display for TreeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} rev. {}@{}",
            if self.is_dir { "D" } else { "F" },
            self.path,
            self.revision,
            self.modified.to_rfc3339()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn entry(is_dir: bool, revision: &str) -> RemoteEntry {
        RemoteEntry {
            path: "/a.txt".to_string(),
            is_dir,
            revision: revision.to_string(),
            hash: None,
            bytes: 12,
            modified: Utc.with_ymd_and_hms(2011, 7, 19, 14, 59, 42).unwrap(),
            contents: Vec::new(),
        }
    }

    #[test]
    fn test_root_and_fake_classification() {
        let root = TreeNode::root();
        assert!(root.is_root());
        assert!(!root.is_fake());
        assert_eq!(root.canonical_path(), "/");

        let fake = TreeNode::fake("/A.txt");
        assert_eq!(fake.path, "/a.txt");
        assert!(fake.is_fake());
        assert!(!fake.is_root());
    }

    #[test]
    fn test_apply_remote_reports_changes_once() {
        let mut node = TreeNode::fake("/a.txt");
        let changed = node.apply_remote(&entry(false, "r1"));
        assert!(changed.contains(&"revision"));
        assert!(changed.contains(&"bytes"));
        assert!(node.apply_remote(&entry(false, "r1")).is_empty());
        assert_eq!(node.apply_remote(&entry(false, "r2")), vec!["revision"]);
    }

    #[test]
    fn test_from_remote_sets_parent() {
        let node = TreeNode::from_remote("/a.txt".to_string(), "/", &entry(false, "r1"));
        assert_eq!(node.parent.as_deref(), Some("/"));
        assert_eq!(node.revision, "r1");
        assert!(!node.is_fake());
    }
}
