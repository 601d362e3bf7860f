use crate::tracker::TaskTracker;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

/// How long a graceful drain may take before the worker force-exits.
pub const DRAIN_DEADLINE: Duration = Duration::from_secs(30);

/// Worker lifecycle state. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RunState {
    Running,
    Stopping,
    Forced,
}

/// Shared, monotonic view of [`RunState`].
///
/// The poll loop subscribes to it to stop issuing blocking pops the moment
/// the state leaves `Running`; the dispatcher advances it when a fatal job
/// outcome is observed.
#[derive(Clone)]
pub struct RunFlag {
    tx: Arc<watch::Sender<RunState>>,
}

impl RunFlag {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(RunState::Running);
        RunFlag { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> RunState {
        *self.tx.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.current() == RunState::Running
    }

    /// Advance to `next` if it is further along than the current state.
    /// Returns whether the state changed; transitions never move backwards.
    pub fn advance(&self, next: RunState) -> bool {
        let mut changed = false;
        self.tx.send_modify(|state| {
            if next > *state {
                *state = next;
                changed = true;
            }
        });
        changed
    }

    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.tx.subscribe()
    }
}

impl Default for RunFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Out-of-band shutdown input, pushed from signal listener tasks (or the
/// deadline timer) into the controller's channel. Nothing outside the
/// controller's own task ever mutates worker state on signal delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownEvent {
    /// SIGINT / SIGTERM (or ctrl-c where unix signals are unavailable)
    Interrupt,
    /// SIGUSR1
    User,
    /// The graceful-drain deadline expired
    Deadline,
}

/// What the controller must do in response to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Ignore,
    BeginStop,
    Force,
}

/// The RUNNING → STOPPING → FORCED transition table, kept free of signal
/// and process concerns so it can be tested directly.
#[derive(Debug, Default)]
pub struct ShutdownMachine {
    stopping: bool,
}

impl ShutdownMachine {
    pub fn observe(&mut self, event: ShutdownEvent) -> Step {
        match (self.stopping, event) {
            (false, ShutdownEvent::Interrupt | ShutdownEvent::User) => {
                self.stopping = true;
                Step::BeginStop
            }
            // the deadline is only armed once stopping has begun
            (false, ShutdownEvent::Deadline) => Step::Ignore,
            (true, ShutdownEvent::Interrupt) => Step::Force,
            (true, ShutdownEvent::User) => Step::Ignore,
            (true, ShutdownEvent::Deadline) => Step::Force,
        }
    }
}

/// Consumes shutdown events and drives the run flag: the first signal
/// begins a graceful stop and arms the drain deadline; a repeated
/// interrupt-style signal or the deadline forces the process down.
pub struct ShutdownController {
    run: RunFlag,
    tracker: Arc<TaskTracker>,
    deadline: Duration,
}

impl ShutdownController {
    pub fn new(run: RunFlag, tracker: Arc<TaskTracker>) -> Self {
        ShutdownController {
            run,
            tracker,
            deadline: DRAIN_DEADLINE,
        }
    }

    pub async fn run(self, mut events: mpsc::Receiver<ShutdownEvent>) {
        let mut machine = ShutdownMachine::default();

        loop {
            let Some(event) = events.recv().await else {
                return;
            };
            match machine.observe(event) {
                Step::Ignore => continue,
                Step::BeginStop | Step::Force => {
                    self.run.advance(RunState::Stopping);
                    info!(
                        ?event,
                        pending = self.tracker.pending_len(),
                        "shutdown requested, draining in-flight jobs; repeat the signal to force exit"
                    );
                    break;
                }
            }
        }

        let deadline = tokio::time::sleep(self.deadline);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    if machine.observe(ShutdownEvent::Deadline) == Step::Force {
                        self.force_exit("drain deadline expired");
                    }
                }
                event = events.recv() => {
                    let Some(event) = event else { return };
                    match machine.observe(event) {
                        Step::Force => self.force_exit("repeated shutdown signal"),
                        Step::Ignore | Step::BeginStop => {
                            warn!(?event, "already stopping, ignoring");
                        }
                    }
                }
            }
        }
    }

    /// Abort the process immediately; no further draining is attempted.
    fn force_exit(&self, cause: &str) -> ! {
        self.run.advance(RunState::Forced);
        let abandoned = self.tracker.pending_len();
        error!("force exit ({cause}), abandoning {abandoned} incomplete tasks");
        std::process::exit(1);
    }
}

/// Install the process signal listeners. Each delivery becomes a
/// [`ShutdownEvent`] on `events`; no handler code runs outside the
/// worker's own tasks.
pub(crate) fn spawn_signal_listeners(
    events: mpsc::Sender<ShutdownEvent>,
) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let kinds = [
            (SignalKind::interrupt(), ShutdownEvent::Interrupt),
            (SignalKind::terminate(), ShutdownEvent::Interrupt),
            (SignalKind::user_defined1(), ShutdownEvent::User),
        ];

        for (kind, event) in kinds {
            let mut stream = signal(kind)?;
            let events = events.clone();
            tokio::spawn(async move {
                while stream.recv().await.is_some() {
                    if events.send(event).await.is_err() {
                        return;
                    }
                }
            });
        }
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            loop {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                if events.send(ShutdownEvent::Interrupt).await.is_err() {
                    return;
                }
            }
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_signal_begins_stop() {
        let mut machine = ShutdownMachine::default();
        assert_eq!(machine.observe(ShutdownEvent::Interrupt), Step::BeginStop);
    }

    #[test]
    fn test_user_signal_also_begins_stop_but_never_forces() {
        let mut machine = ShutdownMachine::default();
        assert_eq!(machine.observe(ShutdownEvent::User), Step::BeginStop);
        assert_eq!(machine.observe(ShutdownEvent::User), Step::Ignore);
    }

    #[test]
    fn test_second_interrupt_forces() {
        let mut machine = ShutdownMachine::default();
        machine.observe(ShutdownEvent::Interrupt);
        assert_eq!(machine.observe(ShutdownEvent::Interrupt), Step::Force);
    }

    #[test]
    fn test_deadline_forces_only_while_stopping() {
        let mut machine = ShutdownMachine::default();
        assert_eq!(machine.observe(ShutdownEvent::Deadline), Step::Ignore);
        machine.observe(ShutdownEvent::Interrupt);
        assert_eq!(machine.observe(ShutdownEvent::Deadline), Step::Force);
    }

    #[test]
    fn test_run_flag_only_moves_forward() {
        let flag = RunFlag::new();
        assert_eq!(flag.current(), RunState::Running);

        assert!(flag.advance(RunState::Stopping));
        assert!(!flag.advance(RunState::Stopping));
        assert_eq!(flag.current(), RunState::Stopping);

        assert!(!flag.advance(RunState::Running));
        assert_eq!(flag.current(), RunState::Stopping);

        assert!(flag.advance(RunState::Forced));
        assert_eq!(flag.current(), RunState::Forced);
    }

    #[tokio::test]
    async fn test_run_flag_wakes_subscribers() {
        let flag = RunFlag::new();
        let mut rx = flag.subscribe();

        let waiter = tokio::spawn(async move {
            rx.changed().await.unwrap();
            *rx.borrow()
        });

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        flag.advance(RunState::Stopping);
        assert_eq!(waiter.await.unwrap(), RunState::Stopping);
    }
}
