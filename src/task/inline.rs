//! Deterministic dispatcher.
//!
//! Collects scheduled tasks in FIFO order and runs them when asked to drain.
//! Delays are recorded but not waited for.

use crate::error::{ApiError, TaskDisposition};
use crate::task::{classify_failure, ScheduleOptions, Task, TaskDispatcher, TaskHandle, TaskRunner};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::debug;

const DEFAULT_MAX_ATTEMPTS: usize = 3;
const DEFAULT_MAX_STEPS: usize = 100_000;

#[derive(Debug, Clone)]
struct Scheduled {
    task: Task,
    options: ScheduleOptions,
    attempt: usize,
}

/// Counters for one drain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub completed: usize,
    pub retried: usize,
    pub dropped: usize,
}

#[derive(Debug)]
pub struct InlineDispatcher {
    pending: Mutex<VecDeque<Scheduled>>,
    next_handle: Mutex<u64>,
    history: Mutex<Vec<(Task, ScheduleOptions)>>,
    max_attempts: usize,
}

impl Default for InlineDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl InlineDispatcher {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            next_handle: Mutex::new(0),
            history: Mutex::new(Vec::new()),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Tasks waiting to run, in order.
    pub fn pending(&self) -> Vec<Task> {
        self.pending.lock().iter().map(|s| s.task.clone()).collect()
    }

    /// Tasks waiting to run with the options they were scheduled with.
    pub fn pending_with_options(&self) -> Vec<(Task, ScheduleOptions)> {
        self.pending
            .lock()
            .iter()
            .map(|s| (s.task.clone(), s.options))
            .collect()
    }

    /// Every task scheduled so far, with its options.
    pub fn history(&self) -> Vec<(Task, ScheduleOptions)> {
        self.history.lock().clone()
    }

    pub fn clear(&self) {
        self.pending.lock().clear();
        self.history.lock().clear();
    }

    /// Pop and run only the next task.
    pub async fn run_next(&self, runner: &dyn TaskRunner) -> Option<Result<(), ApiError>> {
        let next = self.pending.lock().pop_front()?;
        Some(runner.run_task(&next.task).await)
    }

    /// Run tasks until none are left, including tasks scheduled while draining.
    pub async fn drain(&self, runner: &dyn TaskRunner) -> Result<DrainReport, ApiError> {
        let mut report = DrainReport::default();
        let mut steps = 0;
        loop {
            let Some(mut next) = self.pending.lock().pop_front() else {
                break;
            };
            steps += 1;
            if steps > DEFAULT_MAX_STEPS {
                return Err(ApiError::ConfigError(format!(
                    "Inline dispatcher exceeded {} steps, tasks keep rescheduling",
                    DEFAULT_MAX_STEPS
                )));
            }
            next.attempt += 1;
            debug!(task = %next.task, attempt = next.attempt, "Running inline task");
            match runner.run_task(&next.task).await {
                Ok(()) => report.completed += 1,
                Err(err) => match classify_failure(&next.task, &err, next.attempt) {
                    TaskDisposition::Retry if next.attempt < self.max_attempts => {
                        report.retried += 1;
                        self.pending.lock().push_back(next);
                    }
                    _ => report.dropped += 1,
                },
            }
        }
        Ok(report)
    }
}

impl TaskDispatcher for InlineDispatcher {
    fn schedule(&self, task: Task, options: ScheduleOptions) -> Result<TaskHandle, ApiError> {
        let handle = {
            let mut next = self.next_handle.lock();
            *next += 1;
            TaskHandle(*next)
        };
        self.history.lock().push((task.clone(), options));
        self.pending.lock().push_back(Scheduled {
            task,
            options,
            attempt: 0,
        });
        Ok(handle)
    }
}
