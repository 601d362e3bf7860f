use crate::handler::JobHandler;
use crate::shutdown::{RunFlag, RunState};
use crate::tracker::TaskTracker;
use anyhow::anyhow;
use jobq_core::{JobError, JobId, Payload, QueueName, StatusCode, STATUS_OK};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Schedules handler executions and folds their outcomes back into the
/// tracker.
#[derive(Clone)]
pub struct Dispatcher {
    tracker: Arc<TaskTracker>,
    run: RunFlag,
}

impl Dispatcher {
    pub fn new(tracker: Arc<TaskTracker>, run: RunFlag) -> Self {
        Dispatcher { tracker, run }
    }

    /// Spawn one independent execution of `handler` for a message popped
    /// from `queue`. The execution is in the pending set before this
    /// returns; its completion is observed exactly once.
    pub fn schedule(
        &self,
        queue: &QueueName,
        handler: Arc<dyn JobHandler>,
        payload: Payload,
    ) -> JobId {
        let id = JobId::new_v4();
        let (done_tx, done_rx) = watch::channel(false);
        self.tracker.insert(id, queue, done_rx);

        let tracker = self.tracker.clone();
        let run = self.run.clone();
        let queue = queue.clone();
        tokio::spawn(async move {
            let outcome = run_job(&tracker, id, &queue, handler, payload).await;
            job_callback(&tracker, &run, id, outcome);
            // only signal the drain once the tracker has been updated
            let _ = done_tx.send(true);
        });

        id
    }
}

/// Invoke the handler and classify its outcome.
///
/// Everything except a termination request is recovered here and reduced
/// to a status code: cancellation and shutdown interruption count as clean
/// completions, any other failure is logged and becomes a logical failure.
async fn run_job(
    tracker: &TaskTracker,
    id: JobId,
    queue: &str,
    handler: Arc<dyn JobHandler>,
    payload: Payload,
) -> jobq_core::Result<StatusCode> {
    // run the invocation on its own task so a panicking handler cannot
    // skip the completion bookkeeping
    let invocation = tokio::spawn(async move { handler.run(payload).await });
    let result = match invocation.await {
        Ok(result) => result,
        Err(join_err) if join_err.is_panic() => {
            Err(JobError::Other(anyhow!("handler panicked")))
        }
        // the runtime tore the invocation down; same as a cancelled job
        Err(_) => Err(JobError::Cancelled),
    };

    match result {
        Ok(status) => {
            debug!(%id, queue, status, "job finished");
            Ok(status)
        }
        Err(JobError::Cancelled) => {
            info!(%id, queue, "job cancelled by its handler");
            Ok(STATUS_OK)
        }
        Err(JobError::Interrupted) => {
            info!(%id, queue, "job interrupted by shutdown, treated as done");
            Ok(STATUS_OK)
        }
        Err(err @ JobError::Terminate(_)) => Err(err),
        Err(JobError::Other(err)) => {
            error!(%id, queue, error = %err, "job failed");
            tracker.record_handler_error(format!("{err:#}"));
            Ok(1)
        }
    }
}

/// Observe a finished execution: leave the pending set, bump the counters,
/// and escalate the one fatal path.
fn job_callback(
    tracker: &TaskTracker,
    run: &RunFlag,
    id: JobId,
    outcome: jobq_core::Result<StatusCode>,
) {
    tracker.complete(id);
    tracker.add_complete();

    match outcome {
        Err(fatal) => {
            // stop pulling new work right away; the fatal error resurfaces
            // from start() once the drain is finished
            run.advance(RunState::Stopping);
            warn!(%id, error = %fatal, "fatal job outcome, stopping worker");
            tracker.record_fatal(fatal);
        }
        Ok(status) if status != STATUS_OK => {
            tracker.add_failed();
            debug!(
                complete = tracker.jobs_complete(),
                failed = tracker.jobs_failed(),
                "job marked as failed"
            );
        }
        Ok(_) => {}
    }
}
