//! Tree sync engine.
//!
//! Walks an explicit work list. Every visit asks the remote store about one
//! node, plans the delta against the cached children and commits it in one store
//! transaction before any of its directories are visited.

use crate::error::{ApiError, RemoteError};
use crate::remote::RemoteStore;
use crate::store::{NodeChanges, SiteStore};
use crate::sync::visit::{plan_visit, VisitContext};
use crate::task::Task;
use crate::tree::path::remote_path;
use crate::tree::TreeNode;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument};

/// Receives the changes of every visit.
pub trait TreeListener: Send + Sync {
    /// Called before the nodes (and their subtrees) are deleted, while their
    /// records are still readable. Returns the tasks to dispatch once the
    /// deletion is committed.
    fn nodes_removed(&self, nodes: &[TreeNode]) -> Result<Vec<Task>, ApiError>;
    /// Called once the visit is persisted, with the follow-ups collected by
    /// `nodes_removed` and the updated nodes.
    fn visit_committed(&self, follow_ups: Vec<Task>, updated: &[TreeNode]) -> Result<(), ApiError>;
}

/// Counters for one `sync_subtree` run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub visited: usize,
    pub updated: usize,
    pub removed: usize,
}

pub struct SyncEngine {
    remote: Arc<dyn RemoteStore>,
    store: Arc<dyn SiteStore>,
    base_dir: String,
}

impl SyncEngine {
    pub fn new(remote: Arc<dyn RemoteStore>, store: Arc<dyn SiteStore>, base_dir: impl Into<String>) -> Self {
        Self {
            remote,
            store,
            base_dir: base_dir.into(),
        }
    }

    /// Reconcile `seeds` and everything below them against the remote store.
    #[instrument(skip(self, seeds, listener), fields(seeds = seeds.len()))]
    pub async fn sync_subtree(
        &self,
        seeds: Vec<TreeNode>,
        listener: &dyn TreeListener,
    ) -> Result<SyncReport, ApiError> {
        let start = Instant::now();
        let mut report = SyncReport::default();
        let mut pending: VecDeque<TreeNode> = seeds.into();

        while let Some(queued) = pending.pop_front() {
            let (node, persisted) = match self.store.get_node(&queued.path)? {
                Some(stored) => (stored, true),
                None => (queued, false),
            };
            report.visited += 1;

            let token = if node.is_dir { node.content_hash.as_deref() } else { None };
            let response = self
                .remote
                .metadata(&remote_path(&self.base_dir, &node.path), token)
                .await?;

            let cached_children = if persisted && node.is_dir {
                self.store.children(&node.path)?
            } else {
                Vec::new()
            };
            let store = &self.store;
            let plan = plan_visit(
                VisitContext {
                    node: &node,
                    persisted,
                    cached_children,
                    base_dir: &self.base_dir,
                },
                &response,
                |path| {
                    Ok(store
                        .get_node(path)?
                        .filter(TreeNode::is_fake))
                },
            )?;

            if let Some(first) = plan.removed.first() {
                if first.parent.is_none() {
                    return Err(ApiError::RemoteAccess(RemoteError::new(
                        404,
                        format!("Site root {} is not accessible", first.path),
                    )));
                }
            }

            debug!(
                path = %node.path,
                removed = plan.removed.len(),
                updated = plan.updated.len(),
                visit = plan.visit.len(),
                "Visited node"
            );

            let follow_ups = if plan.removed.is_empty() {
                Vec::new()
            } else {
                listener.nodes_removed(&plan.removed)?
            };
            let changes = NodeChanges {
                removed: plan.removed.iter().map(|n| n.path.clone()).collect(),
                updated: plan.updated.clone(),
            };
            if !changes.is_empty() {
                self.store.apply_changes(&changes)?;
            }
            if !follow_ups.is_empty() || !plan.updated.is_empty() {
                listener.visit_committed(follow_ups, &plan.updated)?;
            }

            report.removed += plan.removed.len();
            report.updated += plan.updated.len();
            pending.extend(plan.visit);
        }

        info!(
            visited = report.visited,
            updated = report.updated,
            removed = report.removed,
            duration_ms = start.elapsed().as_millis(),
            "Sync pass completed"
        );
        Ok(report)
    }
}
