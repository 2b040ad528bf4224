//! Per-variant resource state machines.
//!
//! `verify_state` compares a resource against its node and freshly computed
//! default attributes and schedules whatever fetch or format work is needed.
//! The scheduled tasks come back through `apply_fetch` and `apply_format`.

use crate::error::ApiError;
use crate::format::{FormattedPage, FormatterRegistry};
use crate::remote::RemoteStore;
use crate::resource::{image_content_type, PageContent, PendingFetch, Resource, ResourceKind};
use crate::site::SiteListener;
use crate::store::SiteStore;
use crate::task::{ScheduleOptions, Task, TaskDispatcher};
use crate::tree::path::remote_path;
use crate::tree::TreeNode;
use crate::types::{Attributes, Timestamp};
use chrono::Duration;
use tracing::{debug, info};

/// Collaborators used by the resource state machines.
pub struct ResourceContext<'a> {
    pub store: &'a dyn SiteStore,
    pub remote: &'a dyn RemoteStore,
    pub dispatcher: &'a dyn TaskDispatcher,
    pub listener: &'a dyn SiteListener,
    pub formatters: &'a FormatterRegistry,
    pub base_dir: &'a str,
    /// A pending fetch older than this is considered lost.
    pub fetch_timeout: Duration,
    pub now: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    /// Content does not match the node revision and no fetch is under way.
    Stale,
    /// A fetch for the node revision was scheduled recently.
    Fetching,
    Current,
}

impl Resource {
    pub fn fetch_state(&self, node_revision: &str, now: Timestamp, timeout: Duration) -> FetchState {
        if self.revision.as_deref() == Some(node_revision) {
            return FetchState::Current;
        }
        match &self.pending_fetch {
            Some(pending)
                if pending.revision == node_revision && now - pending.requested_at < timeout =>
            {
                FetchState::Fetching
            }
            _ => FetchState::Stale,
        }
    }
}

/// What a completed fetch changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOutcome {
    pub updated: bool,
    pub config_changed: bool,
}

fn schedule_fetch(resource: &mut Resource, node: &TreeNode, ctx: &ResourceContext<'_>) -> Result<bool, ApiError> {
    if node.is_dir {
        return Ok(false);
    }
    match resource.fetch_state(&node.revision, ctx.now, ctx.fetch_timeout) {
        FetchState::Stale => {}
        state => {
            debug!(url = %resource.url, state = ?state, "Fetch not needed");
            return Ok(false);
        }
    }
    let task = Task::Fetch {
        url: resource.url.clone(),
        revision: node.revision.clone(),
    };
    let options = ScheduleOptions::for_task(&task);
    debug!(url = %resource.url, revision = %node.revision, "Scheduling fetch");
    ctx.dispatcher.schedule(task, options)?;
    resource.pending_fetch = Some(PendingFetch {
        revision: node.revision.clone(),
        requested_at: ctx.now,
    });
    ctx.store.put_resource(resource)?;
    Ok(true)
}

fn schedule_format(resource: &Resource, ctx: &ResourceContext<'_>) -> Result<(), ApiError> {
    let task = Task::Format {
        url: resource.url.clone(),
    };
    let options = ScheduleOptions::for_task(&task);
    ctx.dispatcher.schedule(task, options)?;
    Ok(())
}

/// Bring `resource` in line with `node` and its default attributes.
pub fn verify_state(
    resource: &mut Resource,
    node: &TreeNode,
    defaults: &Attributes,
    ctx: &ResourceContext<'_>,
) -> Result<(), ApiError> {
    match resource.kind {
        ResourceKind::Raw(_) | ResourceKind::Image(_) => verify_raw(resource, node, defaults, ctx),
        ResourceKind::Text(_) | ResourceKind::Config(_) => {
            schedule_fetch(resource, node, ctx)?;
            Ok(())
        }
        ResourceKind::Page(_) => verify_page(resource, node, defaults, ctx),
    }
}

fn verify_raw(
    resource: &mut Resource,
    node: &TreeNode,
    defaults: &Attributes,
    ctx: &ResourceContext<'_>,
) -> Result<(), ApiError> {
    let changed = match &mut resource.kind {
        ResourceKind::Raw(content) => {
            let wanted = defaults.get("content_type").cloned();
            let changed = content.content_type != wanted;
            content.content_type = wanted;
            changed
        }
        ResourceKind::Image(content) => {
            let wanted = defaults
                .get("content_type")
                .cloned()
                .or_else(|| image_content_type(&node.path).map(str::to_string));
            let changed = content.content_type != wanted;
            content.content_type = wanted;
            changed
        }
        _ => false,
    };
    if changed {
        ctx.store.put_resource(resource)?;
        ctx.listener.resource_updated(resource);
    }
    schedule_fetch(resource, node, ctx)?;
    Ok(())
}

/// Flags describing how a page changed during verification.
#[derive(Default)]
struct PageChanges {
    defaults: bool,
    content: bool,
}

fn verify_page_fields(page: &mut PageContent, node: &TreeNode, defaults: &Attributes) -> PageChanges {
    let mut changes = PageChanges::default();
    let mut defaults = defaults.clone();
    let format = defaults.remove("format");
    if format != page.source_format {
        page.source_format = format;
        changes.defaults = true;
    }
    if page.default_attributes != defaults {
        page.default_attributes = defaults;
        changes.defaults = true;
    }
    if node.is_dir {
        if page.source.take().is_some() {
            changes.content = true;
        }
        if page.body.take().is_some() {
            changes.content = true;
        }
        if page.attributes != page.default_attributes {
            page.attributes = page.default_attributes.clone();
            changes.content = true;
        }
    }
    changes
}

fn verify_page(
    resource: &mut Resource,
    node: &TreeNode,
    defaults: &Attributes,
    ctx: &ResourceContext<'_>,
) -> Result<(), ApiError> {
    let stale = !node.is_dir && resource.revision.as_deref() != Some(node.revision.as_str());
    let ResourceKind::Page(page) = &mut resource.kind else {
        return Ok(());
    };
    let mut changes = verify_page_fields(page, node, defaults);

    let mut reformat = false;
    if !stale && changes.defaults && !node.is_dir {
        if page.source.is_some() {
            reformat = true;
        } else if page.body.take().is_some() {
            changes.content = true;
        }
    }

    if changes.defaults || changes.content {
        ctx.store.put_resource(resource)?;
    }
    if changes.content {
        ctx.listener.resource_updated(resource);
    }
    if stale {
        schedule_fetch(resource, node, ctx)?;
    } else if reformat {
        debug!(url = %resource.url, "Default attributes changed, scheduling format");
        schedule_format(resource, ctx)?;
    }
    Ok(())
}

/// Render `page.source` with its formatter. Failures fall back to the escaped
/// source and the unmodified defaults.
pub fn run_formatter(
    url: &str,
    page: &mut PageContent,
    formatters: &FormatterRegistry,
    listener: &dyn SiteListener,
) {
    let source = page.source.as_deref().unwrap_or_default();
    let formatted = match page.source_format.as_deref() {
        None => FormattedPage::fallback(source, &page.default_attributes),
        Some(name) => match formatters.get(name) {
            None => {
                listener.config_error(&format!(
                    "Formatter {} specified for {} was not found",
                    name, url
                ));
                FormattedPage::fallback(source, &page.default_attributes)
            }
            Some(formatter) => match formatter.format(source, &page.default_attributes) {
                Ok(formatted) => formatted,
                Err(err) => {
                    listener.format_error(url, &err);
                    FormattedPage::fallback(source, &page.default_attributes)
                }
            },
        },
    };
    page.body = Some(formatted.body);
    page.attributes = formatted.attributes;
}

/// Download the content for `revision` and store it.
pub async fn apply_fetch(
    url: &str,
    revision: &str,
    ctx: &ResourceContext<'_>,
) -> Result<FetchOutcome, ApiError> {
    let Some(resource) = ctx.store.get_resource(url)? else {
        return Err(ApiError::PermanentTaskFailure(format!(
            "Resource {} no longer exists",
            url
        )));
    };
    if resource.revision.as_deref() == Some(revision) {
        debug!(url, revision, "Resource already current, skipping fetch");
        return Ok(FetchOutcome::default());
    }
    let node = ctx
        .store
        .get_node(&resource.owner)?
        .ok_or_else(|| ApiError::PermanentTaskFailure(format!("Owner of {} is gone", url)))?;
    if node.revision != revision {
        debug!(url, revision, current = %node.revision, "Fetch for outdated revision skipped");
        return Ok(FetchOutcome::default());
    }

    let bytes = match ctx.remote.download(&remote_path(ctx.base_dir, &node.path)).await {
        Ok(bytes) => bytes,
        Err(err) => {
            ctx.listener
                .access_error(&format!("While reading {}: {}", node.path, err));
            return Err(err.into());
        }
    };

    // Re-read: the record may have moved on while downloading.
    let Some(mut resource) = ctx.store.get_resource(url)? else {
        return Ok(FetchOutcome::default());
    };
    if resource.owner != node.path {
        return Ok(FetchOutcome::default());
    }

    match &mut resource.kind {
        ResourceKind::Raw(content) | ResourceKind::Image(content) => {
            content.source = Some(bytes);
        }
        ResourceKind::Text(content) | ResourceKind::Config(content) => {
            content.source = Some(String::from_utf8_lossy(&bytes).into_owned());
        }
        ResourceKind::Page(page) => {
            page.source = Some(String::from_utf8_lossy(&bytes).into_owned());
            run_formatter(url, page, ctx.formatters, ctx.listener);
        }
    }
    resource.revision = Some(revision.to_string());
    resource.pending_fetch = None;
    ctx.store.put_resource(&resource)?;
    info!(url, revision, bytes = resource.content_len(), "Fetched resource");
    ctx.listener.resource_updated(&resource);

    Ok(FetchOutcome {
        updated: true,
        config_changed: matches!(resource.kind, ResourceKind::Config(_)),
    })
}

/// Re-run the formatter of a page. Returns whether anything was stored.
pub fn apply_format(url: &str, ctx: &ResourceContext<'_>) -> Result<bool, ApiError> {
    let Some(mut resource) = ctx.store.get_resource(url)? else {
        debug!(url, "Format skipped, resource is gone");
        return Ok(false);
    };
    let ResourceKind::Page(page) = &mut resource.kind else {
        return Ok(false);
    };
    if page.source.is_none() {
        return Ok(false);
    }
    let before = (page.body.clone(), page.attributes.clone());
    run_formatter(url, page, ctx.formatters, ctx.listener);
    if before == (page.body.clone(), page.attributes.clone()) {
        return Ok(false);
    }
    ctx.store.put_resource(&resource)?;
    ctx.listener.resource_updated(&resource);
    Ok(true)
}
