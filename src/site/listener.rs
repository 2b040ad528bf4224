//! Collaborator notifications.
//!
//! Every method has a no-op default so implementors pick what they need.

use crate::error::ApiError;
use crate::resource::Resource;
use crate::tree::TreeNode;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

pub trait SiteListener: Send + Sync {
    /// The remote store could not be read.
    fn access_error(&self, _message: &str) {}
    /// A formatter failed; the page fell back to its escaped source.
    fn format_error(&self, _url: &str, _error: &ApiError) {}
    /// The site configuration is missing or invalid.
    fn config_error(&self, _message: &str) {}
    fn resource_updated(&self, _resource: &Resource) {}
    fn metadata_updated(&self, _nodes: &[TreeNode]) {}
    fn metadata_removed(&self, _nodes: &[TreeNode]) {}
    fn resource_accessed(&self, _url: &str) {}
}

/// Reports every notification through tracing.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingListener;

impl SiteListener for LoggingListener {
    fn access_error(&self, message: &str) {
        warn!(message, "Remote access error");
    }

    fn format_error(&self, url: &str, error: &ApiError) {
        warn!(url, error = %error, "Format error");
    }

    fn config_error(&self, message: &str) {
        warn!(message, "Site configuration error");
    }

    fn resource_updated(&self, resource: &Resource) {
        info!(url = %resource.url, class = %resource.class(), "Resource updated");
    }

    fn metadata_updated(&self, nodes: &[TreeNode]) {
        debug!(count = nodes.len(), "Tree nodes updated");
    }

    fn metadata_removed(&self, nodes: &[TreeNode]) {
        debug!(count = nodes.len(), "Tree nodes removed");
    }

    fn resource_accessed(&self, url: &str) {
        debug!(url, "Resource accessed");
    }
}

/// One recorded notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteEvent {
    AccessError(String),
    FormatError { url: String, error: String },
    ConfigError(String),
    ResourceUpdated(String),
    MetadataUpdated(Vec<String>),
    MetadataRemoved(Vec<String>),
    ResourceAccessed(String),
}

/// Keeps every notification in memory, for tests and tools.
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<SiteEvent>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<SiteEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    pub fn access_errors(&self) -> Vec<String> {
        self.collect(|e| match e {
            SiteEvent::AccessError(m) => Some(m.clone()),
            _ => None,
        })
    }

    pub fn format_errors(&self) -> Vec<String> {
        self.collect(|e| match e {
            SiteEvent::FormatError { url, .. } => Some(url.clone()),
            _ => None,
        })
    }

    pub fn config_errors(&self) -> Vec<String> {
        self.collect(|e| match e {
            SiteEvent::ConfigError(m) => Some(m.clone()),
            _ => None,
        })
    }

    pub fn updated_urls(&self) -> Vec<String> {
        self.collect(|e| match e {
            SiteEvent::ResourceUpdated(url) => Some(url.clone()),
            _ => None,
        })
    }

    /// Paths of every node reported updated, in order.
    pub fn updated_paths(&self) -> Vec<String> {
        self.collect(|e| match e {
            SiteEvent::MetadataUpdated(paths) => Some(paths.clone()),
            _ => None,
        })
        .concat()
    }

    pub fn removed_paths(&self) -> Vec<String> {
        self.collect(|e| match e {
            SiteEvent::MetadataRemoved(paths) => Some(paths.clone()),
            _ => None,
        })
        .concat()
    }

    fn collect<T>(&self, f: impl Fn(&SiteEvent) -> Option<T>) -> Vec<T> {
        self.events.lock().iter().filter_map(f).collect()
    }

    fn push(&self, event: SiteEvent) {
        self.events.lock().push(event);
    }
}

fn paths(nodes: &[TreeNode]) -> Vec<String> {
    nodes.iter().map(|n| n.path.clone()).collect()
}

impl SiteListener for RecordingListener {
    fn access_error(&self, message: &str) {
        self.push(SiteEvent::AccessError(message.to_string()));
    }

    fn format_error(&self, url: &str, error: &ApiError) {
        self.push(SiteEvent::FormatError {
            url: url.to_string(),
            error: error.to_string(),
        });
    }

    fn config_error(&self, message: &str) {
        self.push(SiteEvent::ConfigError(message.to_string()));
    }

    fn resource_updated(&self, resource: &Resource) {
        self.push(SiteEvent::ResourceUpdated(resource.url.clone()));
    }

    fn metadata_updated(&self, nodes: &[TreeNode]) {
        self.push(SiteEvent::MetadataUpdated(paths(nodes)));
    }

    fn metadata_removed(&self, nodes: &[TreeNode]) {
        self.push(SiteEvent::MetadataRemoved(paths(nodes)));
    }

    fn resource_accessed(&self, url: &str) {
        self.push(SiteEvent::ResourceAccessed(url.to_string()));
    }
}
