//! Core types shared across the engine.

use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;

/// Ordered attribute map (pattern defaults, formatter output).
pub type Attributes = BTreeMap<String, String>;

/// Wall clock timestamp used for throttles and remote modification times.
pub type Timestamp = DateTime<Utc>;

/// Modification time of nodes the remote store has not described yet.
pub fn beginning_of_time() -> Timestamp {
    Utc.with_ymd_and_hms(1900, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}
