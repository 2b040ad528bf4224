//! Tree synchronization: throttled admission, visit planning and the engine
//! that commits each visit.

pub mod engine;
pub mod throttle;
pub mod visit;

pub use engine::{SyncEngine, SyncReport, TreeListener};
pub use throttle::{Admission, ScheduleOutcome, Throttle, ThrottleManager};
pub use visit::{plan_visit, VisitPlan};
