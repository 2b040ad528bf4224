//! Visit planning.
//!
//! Turns one remote metadata answer for a node into the removal set, the update
//! set and the directories still to visit. Planning reads the store only through
//! the orphan lookup; applying the plan is the engine's job.

use crate::error::ApiError;
use crate::remote::{MetadataResponse, RemoteEntry};
use crate::tree::path::normalize_remote_path;
use crate::tree::TreeNode;
use std::collections::BTreeMap;
use tracing::warn;

/// Changes decided for one visited node.
#[derive(Debug, Clone, Default)]
pub struct VisitPlan {
    /// Nodes whose subtree is purged. Removal happens before updates.
    pub removed: Vec<TreeNode>,
    /// Nodes written with new fields.
    pub updated: Vec<TreeNode>,
    /// Directories to visit next.
    pub visit: Vec<TreeNode>,
}

impl VisitPlan {
    fn remove(&mut self, node: &TreeNode) {
        if !self.removed.iter().any(|n| n.path == node.path) {
            self.removed.push(node.clone());
        }
    }
}

/// Inputs describing the cached state of the visited node.
pub struct VisitContext<'a> {
    /// The node as currently stored, or as it will be created.
    pub node: &'a TreeNode,
    /// Whether `node` exists in the store.
    pub persisted: bool,
    /// Nodes whose parent is `node`.
    pub cached_children: Vec<TreeNode>,
    /// Remote base directory stripped from listed paths.
    pub base_dir: &'a str,
}

/// Plan the visit of `ctx.node` given the remote `response`.
///
/// `find_orphan` returns the stored fake node at a path, if any.
pub fn plan_visit<F>(
    ctx: VisitContext<'_>,
    response: &MetadataResponse,
    mut find_orphan: F,
) -> Result<VisitPlan, ApiError>
where
    F: FnMut(&str) -> Result<Option<TreeNode>, ApiError>,
{
    let mut plan = VisitPlan::default();
    let node = ctx.node;

    match response {
        MetadataResponse::NotFound => {
            plan.remove(node);
        }
        MetadataResponse::Unchanged => {
            plan.visit = ctx
                .cached_children
                .into_iter()
                .filter(|c| c.is_dir)
                .collect();
        }
        MetadataResponse::Found(entry) if !entry.is_dir => {
            let mut updated = node.clone();
            if node.is_dir && ctx.persisted {
                plan.remove(node);
            }
            let changed = updated.apply_remote(entry);
            if !changed.is_empty() || !ctx.persisted {
                plan.updated.push(updated);
            }
        }
        MetadataResponse::Found(listing) => {
            if !node.is_dir && ctx.persisted {
                plan.remove(node);
            }
            let mut updated = node.clone();
            let own_changes = updated.apply_remote(listing);
            if !own_changes.is_empty() || !ctx.persisted {
                plan.updated.push(updated);
            }
            plan_members(&mut plan, ctx, listing, &mut find_orphan)?;
        }
    }

    Ok(plan)
}

fn plan_members<F>(
    plan: &mut VisitPlan,
    ctx: VisitContext<'_>,
    listing: &RemoteEntry,
    find_orphan: &mut F,
) -> Result<(), ApiError>
where
    F: FnMut(&str) -> Result<Option<TreeNode>, ApiError>,
{
    let dir_path = ctx.node.path.as_str();

    let mut remote: BTreeMap<String, &RemoteEntry> = BTreeMap::new();
    for member in &listing.contents {
        let path = normalize_remote_path(ctx.base_dir, &member.path)?;
        remote.insert(path, member);
    }
    let mut cached: BTreeMap<String, TreeNode> = ctx
        .cached_children
        .into_iter()
        .map(|c| (c.path.clone(), c))
        .collect();

    // Locally present, remote absent.
    let gone: Vec<String> = cached
        .keys()
        .filter(|p| !remote.contains_key(*p))
        .cloned()
        .collect();
    for path in gone {
        if let Some(child) = cached.remove(&path) {
            plan.remove(&child);
        }
    }

    for (path, member) in remote {
        match cached.remove(&path) {
            Some(child) if member.is_dir => {
                plan.visit.push(child);
            }
            Some(child) => {
                let mut updated = child.clone();
                let changed = updated.apply_remote(member);
                if child.is_dir {
                    plan.remove(&child);
                }
                if !changed.is_empty() {
                    plan.updated.push(updated);
                }
            }
            None => {
                let created = match find_orphan(&path)? {
                    Some(mut orphan) => {
                        if orphan.content_hash.is_some() {
                            warn!(
                                path = %orphan.path,
                                "Reclaimed orphan already carries a listing hash, clearing it"
                            );
                            orphan.content_hash = None;
                        }
                        orphan.parent = Some(dir_path.to_string());
                        orphan.apply_remote(member);
                        if member.is_dir {
                            orphan.content_hash = None;
                        }
                        orphan
                    }
                    None => TreeNode::from_remote(path, dir_path, member),
                };
                if created.is_dir {
                    plan.visit.push(created.clone());
                }
                plan.updated.push(created);
            }
        }
    }
    Ok(())
}
