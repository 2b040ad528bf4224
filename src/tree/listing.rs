//! Text rendering of the cached tree.

use crate::error::StorageError;
use crate::store::SiteStore;
use crate::tree::path::{file_name, ROOT_PATH};
use crate::tree::TreeNode;
use std::fmt::Write;

fn line(out: &mut String, node: &TreeNode, depth: usize) {
    let kind = if node.is_dir { 'd' } else { 'f' };
    let name = if depth == 0 { node.path.as_str() } else { file_name(&node.path) };
    let _ = writeln!(out, "{}{}: {}{}", kind, node.revision, "  ".repeat(depth), name);
}

/// Render the tree reachable from the root, members sorted by path, followed by
/// any fake nodes.
pub fn render_listing(store: &dyn SiteStore) -> Result<String, StorageError> {
    let mut out = String::new();
    if let Some(root) = store.get_node(ROOT_PATH)? {
        let mut stack = vec![(root, 0usize)];
        while let Some((node, depth)) = stack.pop() {
            line(&mut out, &node, depth);
            if node.is_dir {
                let mut children = store.children(&node.path)?;
                children.sort_by(|a, b| b.path.cmp(&a.path));
                stack.extend(children.into_iter().map(|c| (c, depth + 1)));
            }
        }
    }
    for fake in store.parentless_nodes()?.into_iter().filter(TreeNode::is_fake) {
        let _ = writeln!(out, "orphan f{}: {}", fake.revision, fake.path);
    }
    Ok(out)
}
