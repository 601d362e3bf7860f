use crate::barrier::{BarrierError, QuiescenceBarrier};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use jobq_core::{JobError, JobId, QueueName};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error};

/// One scheduled-but-not-finished job execution.
pub struct PendingJob {
    pub queue: QueueName,
    pub scheduled_at: DateTime<Utc>,
    done: watch::Receiver<bool>,
}

/// Owns the worker's view of outstanding work: the pending set, the job
/// counters, and the single recorded fatal error.
///
/// A job is a member of the pending set from the moment it is scheduled
/// until its completion is observed, exactly once, by `complete`.
pub struct TaskTracker {
    pending: DashMap<JobId, PendingJob>,
    jobs_complete: AtomicU64,
    jobs_failed: AtomicU64,
    fatal: Mutex<Option<JobError>>,
    last_handler_error: Mutex<Option<String>>,
    idle: QuiescenceBarrier,
}

impl TaskTracker {
    pub fn new() -> Self {
        TaskTracker {
            pending: DashMap::new(),
            jobs_complete: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            fatal: Mutex::new(None),
            last_handler_error: Mutex::new(None),
            idle: QuiescenceBarrier::new(),
        }
    }

    pub(crate) fn insert(&self, id: JobId, queue: &str, done: watch::Receiver<bool>) {
        self.idle.enter();
        self.pending.insert(
            id,
            PendingJob {
                queue: queue.to_string(),
                scheduled_at: Utc::now(),
                done,
            },
        );
    }

    /// Observe a job's completion. Every scheduled job passes through here
    /// exactly once.
    pub(crate) fn complete(&self, id: JobId) -> Option<PendingJob> {
        let removed = self.pending.remove(&id).map(|(_, job)| job);
        match removed {
            Some(job) => {
                if let Err(err) = self.idle.exit() {
                    error!(%id, %err, "job completion left the idle barrier inconsistent");
                }
                debug!(%id, queue = %job.queue, pending = self.pending.len(), "job left the pending set");
                Some(job)
            }
            None => {
                error!(%id, "completion observed for a job missing from the pending set");
                None
            }
        }
    }

    pub(crate) fn add_complete(&self) {
        self.jobs_complete.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the worker's fatal error. Only the first one sticks.
    pub(crate) fn record_fatal(&self, err: JobError) {
        let mut slot = self.fatal.lock();
        if slot.is_none() {
            *slot = Some(err);
        } else {
            debug!(%err, "fatal error already recorded, keeping the first");
        }
    }

    /// Move the recorded fatal error out, if any. Called once after drain.
    pub(crate) fn take_fatal(&self) -> Option<JobError> {
        self.fatal.lock().take()
    }

    pub fn has_fatal(&self) -> bool {
        self.fatal.lock().is_some()
    }

    /// Last non-fatal handler error, kept for diagnostics only.
    pub(crate) fn record_handler_error(&self, message: String) {
        *self.last_handler_error.lock() = Some(message);
    }

    pub fn last_handler_error(&self) -> Option<String> {
        self.last_handler_error.lock().clone()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn jobs_complete(&self) -> u64 {
        self.jobs_complete.load(Ordering::Relaxed)
    }

    pub fn jobs_failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::Relaxed)
    }

    /// Completion signals for exactly the jobs pending right now. Jobs
    /// scheduled after the snapshot is taken are not in it.
    pub(crate) fn snapshot(&self) -> Vec<(JobId, watch::Receiver<bool>)> {
        self.pending
            .iter()
            .map(|entry| (*entry.key(), entry.value().done.clone()))
            .collect()
    }

    /// Wait until no tracked jobs remain in flight.
    pub async fn wait_idle(&self, timeout: Option<Duration>) -> Result<(), BarrierError> {
        self.idle.wait_all_done(timeout).await
    }
}

impl Default for TaskTracker {
    fn default() -> Self {
        Self::new()
    }
}
