//! Site controller.
//!
//! [`Site`] wires the sync engine, throttles, resolver and configuration
//! together. It is the public entry point for callers and the
//! [`TaskRunner`] behind every scheduled task.

pub mod config;
pub mod listener;

use crate::error::ApiError;
use crate::format::FormatterRegistry;
use crate::remote::RemoteStore;
use crate::resource::resolver::{reconcile, ReconcileOutcome};
use crate::resource::serve::{ServeRequest, ServeResponse, ServeSettings};
use crate::resource::state::{apply_fetch, apply_format, ResourceContext};
use crate::resource::{Resource, ResourceClass};
use crate::store::SiteStore;
use crate::sync::engine::{SyncEngine, SyncReport, TreeListener};
use crate::sync::throttle::{Admission, ScheduleOutcome, ThrottleManager};
use crate::task::{ScheduleOptions, Task, TaskDispatcher, TaskRunner};
use crate::tree::path::{self, ROOT_PATH};
use crate::tree::{listing, TreeNode};
use crate::types::{Attributes, Timestamp};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub use config::{parse_site_config, ConfigCache, PatternRule, SiteConfig};
pub use listener::{LoggingListener, RecordingListener, SiteEvent, SiteListener};

/// Delay before a configuration change triggers a consistency pass.
const CONFIG_CHANGE_DELAY: std::time::Duration = std::time::Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct SiteSettings {
    /// Remote-side prefix of the site tree.
    pub base_dir: String,
    /// Path of the site configuration file.
    pub config_path: String,
    pub dir_poll_interval: Duration,
    pub file_poll_interval: Duration,
    pub fetch_timeout: Duration,
    pub serve: ServeSettings,
}

impl Default for SiteSettings {
    fn default() -> Self {
        Self {
            base_dir: String::new(),
            config_path: "/site.yaml".to_string(),
            dir_poll_interval: Duration::seconds(120),
            file_poll_interval: Duration::seconds(10),
            fetch_timeout: Duration::seconds(600),
            serve: ServeSettings::default(),
        }
    }
}

/// Counters for one consistency pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub reconciled: usize,
    /// Extra reconciles of nodes claiming a url released during the pass.
    pub reclaimed: usize,
    /// Urls of resources deleted because their owner is gone.
    pub orphans_deleted: Vec<String>,
}

pub struct Site {
    remote: Arc<dyn RemoteStore>,
    store: Arc<dyn SiteStore>,
    dispatcher: Arc<dyn TaskDispatcher>,
    listener: Arc<dyn SiteListener>,
    formatters: FormatterRegistry,
    engine: SyncEngine,
    throttles: ThrottleManager,
    config_cache: ConfigCache,
    settings: SiteSettings,
    /// Tasks the dispatcher refused, handed over again by the next sync.
    undelivered: Mutex<Vec<Task>>,
}

impl Site {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        store: Arc<dyn SiteStore>,
        dispatcher: Arc<dyn TaskDispatcher>,
        settings: SiteSettings,
    ) -> Self {
        let config_path = path::normalize_path(&settings.config_path);
        Self {
            engine: SyncEngine::new(remote.clone(), store.clone(), settings.base_dir.clone()),
            throttles: ThrottleManager::new(
                store.clone(),
                settings.dir_poll_interval,
                settings.file_poll_interval,
            ),
            config_cache: ConfigCache::new(config_path),
            remote,
            store,
            dispatcher,
            listener: Arc::new(LoggingListener),
            formatters: FormatterRegistry::with_builtin(),
            settings,
            undelivered: Mutex::new(Vec::new()),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn SiteListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn with_formatters(mut self, formatters: FormatterRegistry) -> Self {
        self.formatters = formatters;
        self
    }

    pub fn settings(&self) -> &SiteSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn SiteStore> {
        &self.store
    }

    fn resource_context(&self, now: Timestamp) -> ResourceContext<'_> {
        ResourceContext {
            store: self.store.as_ref(),
            remote: self.remote.as_ref(),
            dispatcher: self.dispatcher.as_ref(),
            listener: self.listener.as_ref(),
            formatters: &self.formatters,
            base_dir: &self.settings.base_dir,
            fetch_timeout: self.settings.fetch_timeout,
            now,
        }
    }

    fn schedule(&self, task: Task) -> Result<(), ApiError> {
        let options = ScheduleOptions::for_task(&task);
        self.dispatcher.schedule(task, options)?;
        Ok(())
    }

    /// Schedule `tasks` in order. On the first refusal the remaining tasks are
    /// kept and redelivered before the next task or sync runs, so a retried
    /// step that no longer sees any change still hands its work over.
    fn schedule_all(&self, tasks: Vec<Task>) -> Result<(), ApiError> {
        let mut tasks = tasks.into_iter();
        while let Some(task) = tasks.next() {
            if let Err(err) = self.schedule(task.clone()) {
                let mut undelivered = self.undelivered.lock();
                undelivered.push(task);
                undelivered.extend(tasks);
                warn!(pending = undelivered.len(), error = %err, "Dispatcher refused task");
                return Err(err);
            }
        }
        Ok(())
    }

    fn redeliver(&self) -> Result<(), ApiError> {
        let tasks = std::mem::take(&mut *self.undelivered.lock());
        if tasks.is_empty() {
            return Ok(());
        }
        info!(count = tasks.len(), "Redelivering refused tasks");
        self.schedule_all(tasks)
    }

    /// Tasks waiting for redelivery.
    pub fn undelivered(&self) -> Vec<Task> {
        self.undelivered.lock().clone()
    }

    /// The root node, materialized on first access.
    pub fn root(&self) -> Result<TreeNode, ApiError> {
        if let Some(root) = self.store.get_node(ROOT_PATH)? {
            return Ok(root);
        }
        let root = TreeNode::root();
        self.store.put_node(&root)?;
        debug!("Materialized root node");
        Ok(root)
    }

    pub fn get_resource_by_url(&self, url: &str) -> Result<Option<Resource>, ApiError> {
        let mut key = path::normalize_path(url);
        if url.ends_with('/') && key != ROOT_PATH {
            key.push('/');
        }
        Ok(self.store.get_resource(&key)?)
    }

    /// Serve a stored resource and ask for a refresh of its owner.
    pub fn serve(&self, request: &ServeRequest, now: Timestamp) -> Result<ServeResponse, ApiError> {
        let resource = self.get_resource_by_url(&request.url)?;
        self.listener.resource_accessed(&request.url);
        let Some(resource) = resource else {
            self.schedule_sync(None, now)?;
            return Ok(ServeResponse::not_found());
        };
        let outcome = self.schedule_sync(Some(&resource.owner), now)?;
        debug!(url = %resource.url, outcome = ?outcome, "Served resource");
        Ok(resource.serve(request, &self.settings.serve))
    }

    fn admit_and_dispatch(&self, node: &TreeNode, now: Timestamp) -> Result<ScheduleOutcome, ApiError> {
        match self.throttles.admit(node, now)? {
            Admission::Admitted { next_eligible } => {
                self.schedule(Task::SyncNode {
                    path: node.path.clone(),
                })?;
                debug!(path = %node.path, "Sync scheduled");
                Ok(ScheduleOutcome::Scheduled {
                    path: node.path.clone(),
                    next_eligible,
                })
            }
            Admission::Denied { until } => Ok(ScheduleOutcome::Throttled {
                path: node.path.clone(),
                until,
            }),
        }
    }

    /// Schedule a sync of the root, or of `path` when the root is throttled.
    pub fn schedule_sync(&self, path: Option<&str>, now: Timestamp) -> Result<ScheduleOutcome, ApiError> {
        let root = self.root()?;
        let root_outcome = self.admit_and_dispatch(&root, now)?;
        if matches!(root_outcome, ScheduleOutcome::Scheduled { .. }) {
            return Ok(root_outcome);
        }
        let Some(path) = path.map(path::normalize_path) else {
            return Ok(root_outcome);
        };
        if path == ROOT_PATH {
            return Ok(root_outcome);
        }
        let node = self
            .store
            .get_node(&path)?
            .ok_or_else(|| ApiError::NodeNotFound(path.clone()))?;
        if node.is_fake() {
            debug!(path = %node.path, "Not scheduling sync for fake node");
            return Ok(ScheduleOutcome::NotApplicable { path });
        }
        self.admit_and_dispatch(&node, now)
    }

    /// Sync `path` (the root by default) right away, ignoring throttles.
    pub async fn force_sync(&self, path: Option<&str>) -> Result<SyncReport, ApiError> {
        self.redeliver()?;
        self.sync_node(path.unwrap_or(ROOT_PATH)).await
    }

    #[instrument(skip(self))]
    async fn sync_node(&self, path: &str) -> Result<SyncReport, ApiError> {
        let path = path::normalize_path(path);
        let node = if path == ROOT_PATH {
            self.root()?
        } else {
            self.store.get_node(&path)?.ok_or_else(|| {
                ApiError::PermanentTaskFailure(format!("Unable to retrieve node {}", path))
            })?
        };
        match self.engine.sync_subtree(vec![node], self).await {
            Err(ApiError::RemoteAccess(err)) => {
                self.listener.access_error(&format!("Sync of {} failed: {}", path, err));
                Err(ApiError::RemoteAccess(err))
            }
            other => other,
        }
    }

    /// Default attributes for a path. Existing nodes use their canonical path;
    /// otherwise a trailing `/` marks a directory.
    pub fn compute_default_attributes(&self, path: &str) -> Result<Attributes, ApiError> {
        let normalized = path::normalize_path(path);
        let canonical = match self.store.get_node(&normalized)? {
            Some(node) => node.canonical_path(),
            None => path::canonical_path(&normalized, path.ends_with('/')),
        };
        Ok(self
            .config_cache
            .default_attributes(self.store.as_ref(), self.listener.as_ref(), &canonical)?)
    }

    /// Parsed site configuration as currently stored.
    pub fn site_config(&self) -> Result<Arc<SiteConfig>, ApiError> {
        Ok(self
            .config_cache
            .site_config(self.store.as_ref(), self.listener.as_ref())?)
    }

    fn reconcile_with(&self, node: &TreeNode, now: Timestamp) -> Result<ReconcileOutcome, ApiError> {
        let attributes = self.config_cache.default_attributes(
            self.store.as_ref(),
            self.listener.as_ref(),
            &node.canonical_path(),
        )?;
        reconcile(node, &attributes, &self.resource_context(now))
    }

    /// Nodes other than `node` whose resource would serve at one of the urls
    /// `outcome` released.
    fn released_claimants(&self, node: &TreeNode, outcome: &ReconcileOutcome) -> Result<Vec<String>, ApiError> {
        let excluded = HashSet::from([node.path.as_str()]);
        let mut claimants = Vec::new();
        for url in outcome.released() {
            for path in self.claimants_of(url, &excluded)? {
                if !claimants.contains(&path) {
                    debug!(url = %url, released_by = %node.path, claimant = %path, "Url released");
                    claimants.push(path);
                }
            }
        }
        Ok(claimants)
    }

    /// Re-derive the resource of the node at `path`, then schedule the nodes
    /// claiming any url it gave up. A missing node has nothing to reconcile.
    pub fn reconcile_node(&self, path: &str, now: Timestamp) -> Result<Option<ReconcileOutcome>, ApiError> {
        let Some(node) = self.store.get_node(&path::normalize_path(path))? else {
            debug!(path, "Reconcile skipped, node is gone");
            return Ok(None);
        };
        let outcome = self.reconcile_with(&node, now)?;
        let follow_ups = self
            .released_claimants(&node, &outcome)?
            .into_iter()
            .map(|path| Task::Reconcile { path })
            .collect();
        self.schedule_all(follow_ups)?;
        Ok(Some(outcome))
    }

    /// Re-derive every resource from the cached tree, directories after their
    /// file members, fake nodes last, then drop resources without an owner.
    ///
    /// Urls released on the way are settled within the same pass.
    pub fn verify_all_consistency(&self, now: Timestamp) -> Result<VerifyReport, ApiError> {
        let mut report = VerifyReport::default();
        let parentless = self.store.parentless_nodes()?;
        if parentless.is_empty() {
            debug!("Consistency pass on an empty tree");
        }
        let (roots, fakes): (Vec<TreeNode>, Vec<TreeNode>) =
            parentless.into_iter().partition(TreeNode::is_root);

        let mut released = VecDeque::new();
        let mut visit = roots;
        while let Some(dir) = visit.pop() {
            for member in self.store.children(&dir.path)? {
                if member.is_dir {
                    visit.push(member);
                } else {
                    let outcome = self.reconcile_with(&member, now)?;
                    released.extend(self.released_claimants(&member, &outcome)?);
                    report.reconciled += 1;
                }
            }
            let outcome = self.reconcile_with(&dir, now)?;
            released.extend(self.released_claimants(&dir, &outcome)?);
            report.reconciled += 1;
        }
        for fake in &fakes {
            let outcome = self.reconcile_with(fake, now)?;
            released.extend(self.released_claimants(fake, &outcome)?);
            report.reconciled += 1;
        }

        // Each claimant is settled once per pass.
        let mut settled = HashSet::new();
        while let Some(path) = released.pop_front() {
            if !settled.insert(path.clone()) {
                continue;
            }
            let Some(node) = self.store.get_node(&path)? else {
                continue;
            };
            let outcome = self.reconcile_with(&node, now)?;
            released.extend(self.released_claimants(&node, &outcome)?);
            report.reclaimed += 1;
        }

        for resource in self.store.all_resources()? {
            if self.store.get_node(&resource.owner)?.is_none() {
                warn!(resource = %resource, "Deleting orphan resource");
                self.store.delete_resource(&resource.url)?;
                report.orphans_deleted.push(resource.url);
            }
        }

        info!(
            reconciled = report.reconciled,
            reclaimed = report.reclaimed,
            orphans_deleted = report.orphans_deleted.len(),
            "Consistency pass completed"
        );
        Ok(report)
    }

    /// Invalidate cached configuration and schedule a consistency pass.
    pub fn handle_config_changes(&self) -> Result<(), ApiError> {
        info!("Site configuration changed");
        self.config_cache.invalidate();
        let task = Task::VerifyConsistency;
        let options = ScheduleOptions::for_task(&task).with_delay(CONFIG_CHANGE_DELAY);
        self.dispatcher.schedule(task, options)?;
        Ok(())
    }

    /// Delete every node, throttle and resource.
    pub fn flush_all(&self) -> Result<(), ApiError> {
        self.store.clear()?;
        self.config_cache.invalidate();
        info!("Flushed all site records");
        Ok(())
    }

    pub fn orphans(&self) -> Result<Vec<TreeNode>, ApiError> {
        Ok(self
            .store
            .parentless_nodes()?
            .into_iter()
            .filter(TreeNode::is_fake)
            .collect())
    }

    pub fn tree_listing(&self) -> Result<String, ApiError> {
        Ok(listing::render_listing(self.store.as_ref())?)
    }

    pub fn resources(&self) -> Result<Vec<Resource>, ApiError> {
        Ok(self.store.all_resources()?)
    }

    /// Nodes that could serve at `url`: the directory itself for a
    /// directory url, and the files of the directory the url lives in whose
    /// own path or page url is `url`.
    fn claimants_of(&self, url: &str, excluded: &HashSet<&str>) -> Result<Vec<String>, ApiError> {
        let dir_path = if url.ends_with('/') {
            path::normalize_path(url)
        } else {
            match path::parent_path(&path::normalize_path(url)) {
                Some(parent) => parent,
                None => return Ok(Vec::new()),
            }
        };
        let mut candidates = Vec::new();
        if url.ends_with('/') {
            candidates.extend(self.store.get_node(&dir_path)?);
        }
        candidates.extend(
            self.store
                .children(&dir_path)?
                .into_iter()
                .filter(|member| !member.is_dir),
        );
        Ok(candidates
            .into_iter()
            .filter(|node| !excluded.contains(node.path.as_str()))
            .filter(|node| {
                let canonical = node.canonical_path();
                canonical == url || ResourceClass::Page.compute_url(&canonical) == url
            })
            .map(|node| node.path)
            .collect())
    }
}

impl TreeListener for Site {
    fn nodes_removed(&self, nodes: &[TreeNode]) -> Result<Vec<Task>, ApiError> {
        self.listener.metadata_removed(nodes);
        let removed_paths: HashSet<&str> = nodes.iter().map(|n| n.path.as_str()).collect();
        let doomed_prefixes: Vec<String> = nodes
            .iter()
            .filter(|n| n.is_dir)
            .map(|n| path::descendant_prefix(&n.path))
            .collect();
        let mut claimants: Vec<String> = Vec::new();
        for node in nodes {
            for resource in self.store.resources_owned_by(&node.path)? {
                for path in self.claimants_of(&resource.url, &removed_paths)? {
                    // Members of a removed directory go with it.
                    if doomed_prefixes.iter().any(|prefix| path.starts_with(prefix.as_str())) {
                        continue;
                    }
                    if !claimants.contains(&path) {
                        debug!(removed = %node.path, claimant = %path, "Url released");
                        claimants.push(path);
                    }
                }
            }
        }
        Ok(claimants
            .into_iter()
            .map(|path| Task::Reconcile { path })
            .collect())
    }

    fn visit_committed(&self, follow_ups: Vec<Task>, updated: &[TreeNode]) -> Result<(), ApiError> {
        if !updated.is_empty() {
            self.listener.metadata_updated(updated);
        }
        let mut tasks = follow_ups;
        for node in updated {
            let task = Task::Reconcile {
                path: node.path.clone(),
            };
            if !tasks.contains(&task) {
                tasks.push(task);
            }
        }
        self.schedule_all(tasks)
    }
}

#[async_trait]
impl TaskRunner for Site {
    async fn run_task(&self, task: &Task) -> Result<(), ApiError> {
        self.redeliver()?;
        let now = Utc::now();
        match task {
            Task::SyncNode { path } => self.sync_node(path).await.map(|_| ()),
            Task::Reconcile { path } => self.reconcile_node(path, now).map(|_| ()),
            Task::Fetch { url, revision } => {
                let ctx = self.resource_context(now);
                let outcome = apply_fetch(url, revision, &ctx).await?;
                if outcome.config_changed {
                    self.handle_config_changes()?;
                }
                Ok(())
            }
            Task::Format { url } => apply_format(url, &self.resource_context(now)).map(|_| ()),
            Task::VerifyConsistency => self.verify_all_consistency(now).map(|_| ()),
        }
    }
}
