//! Site Store
//!
//! Persistent records for tree nodes, throttles and derived resources.
//! Nodes are keyed by path, throttles by (owning node, creation order) and
//! resources by url with a back-reference to the owning node.

pub mod persistence;

use crate::error::StorageError;
use crate::resource::Resource;
use crate::sync::throttle::Throttle;
use crate::tree::TreeNode;

pub use persistence::SledSiteStore;

/// Opaque throttle key: owning node path plus creation sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleKey(pub Vec<u8>);

/// The removal and update set produced by one visit.
///
/// Removing a node removes its whole subtree together with the throttles and
/// resources owned by any node in it. Removals are applied before updates, so a
/// node present in both ends up stored with its new fields and no descendants.
#[derive(Debug, Clone, Default)]
pub struct NodeChanges {
    pub removed: Vec<String>,
    pub updated: Vec<TreeNode>,
}

impl NodeChanges {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.updated.is_empty()
    }
}

/// Storage port used by the sync engine, throttle manager and resolver.
pub trait SiteStore: Send + Sync {
    fn get_node(&self, path: &str) -> Result<Option<TreeNode>, StorageError>;
    fn put_node(&self, node: &TreeNode) -> Result<(), StorageError>;
    /// Nodes whose parent field equals `dir_path`.
    fn children(&self, dir_path: &str) -> Result<Vec<TreeNode>, StorageError>;
    /// The root and every fake node, ordered by path.
    fn parentless_nodes(&self) -> Result<Vec<TreeNode>, StorageError>;
    fn all_nodes(&self) -> Result<Vec<TreeNode>, StorageError>;
    /// `path` and every node reachable from it through parent links.
    fn subtree_paths(&self, path: &str) -> Result<Vec<String>, StorageError>;
    /// Apply one visit's changes atomically.
    fn apply_changes(&self, changes: &NodeChanges) -> Result<(), StorageError>;

    fn throttles_for(&self, path: &str) -> Result<Vec<(ThrottleKey, Throttle)>, StorageError>;
    fn put_throttle(&self, path: &str, throttle: &Throttle) -> Result<ThrottleKey, StorageError>;
    fn delete_throttles(&self, keys: &[ThrottleKey]) -> Result<(), StorageError>;

    fn get_resource(&self, url: &str) -> Result<Option<Resource>, StorageError>;
    /// Insert or replace; moves the owner back-reference when the owner changes.
    fn put_resource(&self, resource: &Resource) -> Result<(), StorageError>;
    fn delete_resource(&self, url: &str) -> Result<Option<Resource>, StorageError>;
    fn resources_owned_by(&self, path: &str) -> Result<Vec<Resource>, StorageError>;
    fn all_resources(&self) -> Result<Vec<Resource>, StorageError>;

    /// Drop every record.
    fn clear(&self) -> Result<(), StorageError>;
}
