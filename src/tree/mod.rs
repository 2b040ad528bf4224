//! Cached mirror of the remote file tree.
//!
//! Nodes are keyed by their normalized path. The parent relation is an explicit
//! parent-path field on each node; "children of X" is a store query.

pub mod listing;
pub mod node;
pub mod path;

pub use node::TreeNode;
pub use path::ROOT_PATH;
