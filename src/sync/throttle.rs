//! Per-node sync throttling.
//!
//! Each admitted sync leaves a throttle record under its node. A record is live
//! until its `earliest_allowed` time; expired records are swept whenever the
//! node is checked again.

use crate::error::StorageError;
use crate::store::SiteStore;
use crate::tree::TreeNode;
use crate::types::Timestamp;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Throttle {
    pub earliest_allowed: Timestamp,
}

impl Throttle {
    pub fn new(earliest_allowed: Timestamp) -> Self {
        Self { earliest_allowed }
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.earliest_allowed <= now
    }
}

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A new throttle was recorded; the next sync is allowed at `next_eligible`.
    Admitted { next_eligible: Timestamp },
    /// A live throttle exists until `until`.
    Denied { until: Timestamp },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }

    /// `(allowed, next eligible time)`.
    pub fn as_pair(&self) -> (bool, Timestamp) {
        match *self {
            Admission::Admitted { next_eligible } => (true, next_eligible),
            Admission::Denied { until } => (false, until),
        }
    }
}

/// Outcome of a schedule request, as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// A sync task for `path` was dispatched.
    Scheduled { path: String, next_eligible: Timestamp },
    Throttled { path: String, until: Timestamp },
    /// Fake nodes are never synced on their own.
    NotApplicable { path: String },
}

pub struct ThrottleManager {
    store: Arc<dyn SiteStore>,
    dir_interval: Duration,
    file_interval: Duration,
}

impl ThrottleManager {
    pub fn new(store: Arc<dyn SiteStore>, dir_interval: Duration, file_interval: Duration) -> Self {
        Self {
            store,
            dir_interval,
            file_interval,
        }
    }

    pub fn interval_for(&self, node: &TreeNode) -> Duration {
        if node.is_dir {
            self.dir_interval
        } else {
            self.file_interval
        }
    }

    pub fn admit(&self, node: &TreeNode, now: Timestamp) -> Result<Admission, StorageError> {
        let mut expired = Vec::new();
        let mut live_until: Option<Timestamp> = None;
        for (key, throttle) in self.store.throttles_for(&node.path)? {
            if throttle.is_expired(now) {
                expired.push(key);
            } else {
                live_until = Some(match live_until {
                    Some(t) if t >= throttle.earliest_allowed => t,
                    _ => throttle.earliest_allowed,
                });
            }
        }
        if !expired.is_empty() {
            debug!(path = %node.path, count = expired.len(), "Sweeping expired throttles");
            self.store.delete_throttles(&expired)?;
        }

        if let Some(until) = live_until {
            debug!(path = %node.path, until = %until, "Sync throttled");
            return Ok(Admission::Denied { until });
        }

        let next_eligible = now + self.interval_for(node);
        self.store.put_throttle(&node.path, &Throttle::new(next_eligible))?;
        Ok(Admission::Admitted { next_eligible })
    }
}
