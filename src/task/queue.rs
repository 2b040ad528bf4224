//! Task Queue
//!
//! Background worker pool executing scheduled tasks. Tasks are ordered by due
//! time (creation order breaks ties); failed tasks are retried with backoff
//! when their error is classified as temporary.

use crate::error::{ApiError, TaskDisposition};
use crate::task::{classify_failure, ScheduleOptions, Task, TaskDispatcher, TaskHandle, TaskRunner};
use parking_lot::{Mutex, RwLock};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Idle workers re-check the queue at least this often.
const IDLE_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
struct QueuedTask {
    handle: TaskHandle,
    task: Task,
    options: ScheduleOptions,
    due: Instant,
    attempt: usize,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.handle == other.handle
    }
}

impl Eq for QueuedTask {}

impl Ord for QueuedTask {
    /// BinaryHeap is a max-heap: the earliest due task compares greatest, then
    /// the oldest handle.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.handle.0.cmp(&self.handle.0))
    }
}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Number of worker tasks
    pub workers: usize,
    /// Maximum attempts per task, including the first
    pub max_retry_attempts: usize,
    /// Base delay between retries (milliseconds), doubled per attempt
    pub retry_delay_ms: u64,
    /// Maximum queue size
    pub max_queue_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            max_retry_attempts: 3,
            retry_delay_ms: 1000,
            max_queue_size: 10000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub retried: usize,
    pub dropped: usize,
}

struct Shared {
    heap: Mutex<BinaryHeap<QueuedTask>>,
    notify: Notify,
    running: RwLock<bool>,
    stats: RwLock<QueueStats>,
    config: QueueConfig,
}

pub struct TaskQueue {
    shared: Arc<Shared>,
    workers: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    next_handle: AtomicU64,
}

impl TaskQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                heap: Mutex::new(BinaryHeap::new()),
                notify: Notify::new(),
                running: RwLock::new(false),
                stats: RwLock::new(QueueStats::default()),
                config,
            }),
            workers: Mutex::new(Vec::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Start background workers executing tasks with `runner`.
    pub fn start(&self, runner: Arc<dyn TaskRunner>) -> Result<(), ApiError> {
        {
            let mut running = self.shared.running.write();
            if *running {
                return Ok(());
            }
            *running = true;
        }

        let mut workers = self.workers.lock();
        for worker_id in 0..self.shared.config.workers.max(1) {
            let shared = Arc::clone(&self.shared);
            let runner = Arc::clone(&runner);
            workers.push(tokio::spawn(async move {
                Self::worker_loop(worker_id, shared, runner).await;
            }));
        }

        info!(worker_count = workers.len(), "Started task queue workers");
        Ok(())
    }

    /// Stop background workers after their current task.
    pub async fn stop(&self) -> Result<(), ApiError> {
        {
            let mut running = self.shared.running.write();
            if !*running {
                return Ok(());
            }
            *running = false;
        }
        self.shared.notify.notify_waiters();

        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            let _ = handle.await;
        }

        info!("Stopped task queue workers");
        Ok(())
    }

    pub fn stats(&self) -> QueueStats {
        self.shared.stats.read().clone()
    }

    /// Wait until no task is pending or running.
    pub async fn wait_for_completion(&self, timeout: Option<Duration>) -> Result<(), ApiError> {
        let start = Instant::now();
        loop {
            let idle = {
                let heap = self.shared.heap.lock();
                let stats = self.shared.stats.read();
                heap.is_empty() && stats.processing == 0
            };
            if idle {
                return Ok(());
            }

            if let Some(timeout) = timeout {
                if start.elapsed() >= timeout {
                    return Err(ApiError::TemporaryTaskFailure(
                        "Timeout waiting for task queue to drain".to_string(),
                    ));
                }
            }

            sleep(IDLE_POLL).await;
        }
    }

    fn push(shared: &Shared, queued: QueuedTask) {
        shared.heap.lock().push(queued);
        shared.stats.write().pending += 1;
        shared.notify.notify_one();
    }

    /// Pop the next due task, or report how long until one is due.
    fn pop_due(shared: &Shared) -> Result<QueuedTask, Option<Duration>> {
        let mut heap = shared.heap.lock();
        let now = Instant::now();
        match heap.peek() {
            Some(next) if next.due <= now => {}
            Some(next) => return Err(Some(next.due - now)),
            None => return Err(None),
        }
        let queued = heap.pop().ok_or(None)?;
        let mut stats = shared.stats.write();
        stats.pending = stats.pending.saturating_sub(1);
        stats.processing += 1;
        Ok(queued)
    }

    async fn worker_loop(worker_id: usize, shared: Arc<Shared>, runner: Arc<dyn TaskRunner>) {
        debug!(worker_id, "Worker started");

        while *shared.running.read() {
            let mut queued = match Self::pop_due(&shared) {
                Ok(queued) => queued,
                Err(wait) => {
                    let wait = wait.map(|w| w.min(IDLE_POLL)).unwrap_or(IDLE_POLL);
                    tokio::select! {
                        _ = shared.notify.notified() => continue,
                        _ = sleep(wait) => continue,
                    }
                }
            };

            queued.attempt += 1;
            debug!(
                worker_id,
                task = %queued.task,
                queue = queued.options.queue.as_str(),
                attempt = queued.attempt,
                "Processing task"
            );
            let result = runner.run_task(&queued.task).await;

            let retry = match &result {
                Ok(()) => false,
                Err(err) => {
                    classify_failure(&queued.task, err, queued.attempt) == TaskDisposition::Retry
                        && queued.attempt < shared.config.max_retry_attempts
                }
            };

            // Re-queue before releasing the processing slot so waiters never
            // observe an idle queue in between.
            if retry {
                let backoff = shared
                    .config
                    .retry_delay_ms
                    .saturating_mul(1u64 << (queued.attempt - 1).min(16));
                queued.due = Instant::now() + Duration::from_millis(backoff);
                Self::push(&shared, queued);
            }

            let mut stats = shared.stats.write();
            stats.processing = stats.processing.saturating_sub(1);
            match (&result, retry) {
                (Ok(()), _) => stats.completed += 1,
                (Err(_), true) => stats.retried += 1,
                (Err(_), false) => stats.dropped += 1,
            }
        }

        debug!(worker_id, "Worker stopped");
    }
}

impl TaskDispatcher for TaskQueue {
    fn schedule(&self, task: Task, options: ScheduleOptions) -> Result<TaskHandle, ApiError> {
        let queue_len = self.shared.heap.lock().len();
        if queue_len >= self.shared.config.max_queue_size {
            warn!(
                queue_size = queue_len,
                max_size = self.shared.config.max_queue_size,
                "Task queue is full, dropping task"
            );
            return Err(ApiError::TemporaryTaskFailure("Task queue is full".to_string()));
        }

        let handle = TaskHandle(self.next_handle.fetch_add(1, AtomicOrdering::SeqCst));
        debug!(
            task = %task,
            queue = options.queue.as_str(),
            delay_ms = options.delay.as_millis(),
            "Scheduled task"
        );
        Self::push(
            &self.shared,
            QueuedTask {
                handle,
                task,
                options,
                due: Instant::now() + options.delay,
                attempt: 0,
            },
        );
        Ok(handle)
    }
}
