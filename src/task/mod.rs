//! Deferred work.
//!
//! Every unit of work is a serializable [`Task`] handed to a [`TaskDispatcher`].
//! The dispatcher later hands it back to a [`TaskRunner`], which is the only
//! place that knows how to execute it. Tasks run at least once and must be
//! idempotent.

pub mod inline;
pub mod queue;

use crate::error::{ApiError, TaskDisposition};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{error, warn};

pub use inline::InlineDispatcher;
pub use queue::{QueueConfig, QueueStats, TaskQueue};

/// Job description for one deferred unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Task {
    /// Sync the subtree below a node.
    SyncNode { path: String },
    /// Re-derive the resource of a node.
    Reconcile { path: String },
    /// Download the content of a resource at the given node revision.
    Fetch { url: String, revision: String },
    /// Re-run the formatter of a page resource.
    Format { url: String },
    /// Re-derive every resource from the cached tree.
    VerifyConsistency,
}

impl Task {
    pub fn default_queue(&self) -> QueueName {
        match self {
            Task::SyncNode { .. } => QueueName::Sync,
            Task::Reconcile { .. } | Task::Fetch { .. } | Task::Format { .. } => QueueName::Resource,
            Task::VerifyConsistency => QueueName::Default,
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::SyncNode { path } => write!(f, "sync {}", path),
            Task::Reconcile { path } => write!(f, "reconcile {}", path),
            Task::Fetch { url, revision } => write!(f, "fetch {} @{}", url, revision),
            Task::Format { url } => write!(f, "format {}", url),
            Task::VerifyConsistency => write!(f, "verify consistency"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    Sync,
    Resource,
    Default,
}

impl QueueName {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Sync => "sync",
            QueueName::Resource => "resource",
            QueueName::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleOptions {
    pub delay: Duration,
    pub queue: QueueName,
}

impl ScheduleOptions {
    pub fn for_task(task: &Task) -> Self {
        Self {
            delay: Duration::ZERO,
            queue: task.default_queue(),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Opaque handle of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(pub u64);

pub trait TaskDispatcher: Send + Sync {
    fn schedule(&self, task: Task, options: ScheduleOptions) -> Result<TaskHandle, ApiError>;
}

#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run_task(&self, task: &Task) -> Result<(), ApiError>;
}

/// Classify a failed task and log it accordingly.
pub(crate) fn classify_failure(task: &Task, err: &ApiError, attempt: usize) -> TaskDisposition {
    let disposition = err.disposition();
    match disposition {
        TaskDisposition::Retry => {
            warn!(task = %task, attempt, error = %err, "Task failed temporarily");
        }
        TaskDisposition::Drop => {
            warn!(task = %task, error = %err, "Task failed permanently, dropping");
        }
        TaskDisposition::Bug => {
            error!(
                task = ?task,
                attempt,
                error = ?err,
                "Unclassified task failure, dropping task"
            );
        }
    }
    disposition
}
