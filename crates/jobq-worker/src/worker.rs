use crate::barrier::BarrierError;
use crate::config::WorkerConfig;
use crate::dispatch::Dispatcher;
use crate::handler::HandlerRegistry;
use crate::shutdown::{self, RunFlag, RunState, ShutdownController};
use crate::tracker::TaskTracker;
use jobq_client::{Broker, BrokerConnector, BrokerError};
use jobq_core::JobError;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("worker terminated by a job handler: {0}")]
    Fatal(#[source] JobError),

    #[error("failed to install signal handlers: {0}")]
    Signals(#[from] std::io::Error),
}

struct PoolSlot {
    broker: Option<Arc<dyn Broker>>,
    closed: bool,
}

/// The job-queue worker: polls the broker across every registered queue,
/// fans messages out to handlers, and drains in-flight work on shutdown.
pub struct Worker {
    config: WorkerConfig,
    worker_id: String,
    registry: Arc<HandlerRegistry>,
    tracker: Arc<TaskTracker>,
    dispatcher: Dispatcher,
    run: RunFlag,
    connector: Arc<dyn BrokerConnector>,
    pool: Mutex<PoolSlot>,
    drain_lock: Mutex<()>,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        registry: HandlerRegistry,
        connector: Arc<dyn BrokerConnector>,
    ) -> Self {
        let worker_id = config.resolve_worker_id();
        let run = RunFlag::new();
        let tracker = Arc::new(TaskTracker::new());
        let dispatcher = Dispatcher::new(tracker.clone(), run.clone());

        Worker {
            config,
            worker_id,
            registry: Arc::new(registry),
            tracker,
            dispatcher,
            run,
            connector,
            pool: Mutex::new(PoolSlot {
                broker: None,
                closed: false,
            }),
            drain_lock: Mutex::new(()),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn run_state(&self) -> RunState {
        self.run.current()
    }

    pub fn jobs_complete(&self) -> u64 {
        self.tracker.jobs_complete()
    }

    pub fn jobs_failed(&self) -> u64 {
        self.tracker.jobs_failed()
    }

    pub fn pending_jobs(&self) -> usize {
        self.tracker.pending_len()
    }

    /// Request a graceful stop, as if a shutdown signal had arrived.
    pub fn stop(&self) {
        self.run.advance(RunState::Stopping);
    }

    /// Wait until no scheduled jobs remain in flight.
    pub async fn wait_idle(&self, timeout: Option<Duration>) -> Result<(), BarrierError> {
        self.tracker.wait_idle(timeout).await
    }

    /// Run until stopped, then drain. The drain always runs, even when the
    /// poll loop exits with an error; a fatal job outcome recorded at any
    /// point resurfaces here after the drain completes.
    pub async fn start(&self) -> Result<(), WorkerError> {
        info!(
            worker_id = %self.worker_id,
            queues = ?self.registry.queue_names(),
            "worker starting"
        );

        if self.config.handle_signals {
            let (events_tx, events_rx) = mpsc::channel(8);
            shutdown::spawn_signal_listeners(events_tx)?;
            let controller = ShutdownController::new(self.run.clone(), self.tracker.clone());
            tokio::spawn(controller.run(events_rx));
        }

        let poll_result = self.poll().await;
        let drain_result = self.drain().await;

        if let Some(fatal) = self.tracker.take_fatal() {
            warn!(error = %fatal, "worker stopped by fatal job outcome");
            return Err(WorkerError::Fatal(fatal));
        }

        poll_result?;
        drain_result?;

        info!(
            complete = self.jobs_complete(),
            failed = self.jobs_failed(),
            "worker stopped cleanly"
        );
        Ok(())
    }

    /// Pull messages while running and schedule one execution per handler
    /// registered for the message's queue. Leaves connections alone; the
    /// drain owns teardown.
    async fn poll(&self) -> Result<(), WorkerError> {
        let queues = self.registry.queue_names().to_vec();
        if queues.is_empty() {
            return Err(BrokerError::NoQueues.into());
        }

        let mut run_rx = self.run.subscribe();
        while self.run.is_running() {
            let broker = self.broker().await?;
            tokio::select! {
                changed = run_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                popped = broker.pop(&queues) => {
                    let Some(delivery) = popped? else { continue };
                    let handlers = self.registry.handlers(&delivery.queue);
                    debug!(
                        queue = %delivery.queue,
                        handlers = handlers.len(),
                        bytes = delivery.payload.len(),
                        "dispatching message"
                    );
                    for handler in handlers {
                        self.dispatcher
                            .schedule(&delivery.queue, handler.clone(), delivery.payload.clone());
                    }
                }
            }
        }
        Ok(())
    }

    /// Wait for every job pending at this moment, then release the broker.
    /// The lock keeps a second drain attempt from racing the first; jobs
    /// scheduled after the snapshot are not waited on.
    async fn drain(&self) -> Result<(), WorkerError> {
        let _guard = self.drain_lock.lock().await;

        let snapshot = self.tracker.snapshot();
        if !snapshot.is_empty() {
            info!(jobs = snapshot.len(), "shutting down, waiting for in-flight jobs");
            for (id, mut done) in snapshot {
                if done.wait_for(|finished| *finished).await.is_err() {
                    // sender dropped: the execution is gone either way
                    debug!(%id, "job task went away before signalling completion");
                }
            }
        }

        self.close_broker().await?;
        Ok(())
    }

    /// Lazily connected broker pool, shared by the poll loop and anything
    /// else that needs the connection.
    async fn broker(&self) -> Result<Arc<dyn Broker>, BrokerError> {
        let mut slot = self.pool.lock().await;
        if slot.closed {
            return Err(BrokerError::Closed);
        }
        if let Some(broker) = &slot.broker {
            return Ok(broker.clone());
        }

        info!(address = %self.config.broker.address(), "connecting broker pool");
        let broker = self.connector.connect().await?;
        slot.broker = Some(broker.clone());
        Ok(broker)
    }

    /// Release the pool. Only the first call does anything.
    async fn close_broker(&self) -> Result<(), BrokerError> {
        let mut slot = self.pool.lock().await;
        if slot.closed {
            return Ok(());
        }
        slot.closed = true;
        if let Some(broker) = slot.broker.take() {
            broker.close().await?;
        }
        Ok(())
    }
}
