//! Supervised worker: lifecycle control around a repeating unit of work.
//!
//! A [`Worker`] owns one background task that drives the iteration loop in
//! `control`. `start()` and `stop()` are idempotent triggers into that loop;
//! failures inside the loop never escape it and only surface as a stop or an
//! automatic restart.

use crate::config::WorkerSettings;
use crate::error::{Error, Result};
use crate::event::{Event, EventBus, EventKind};
use crate::model::{Pace, WorkerState};
use crate::telemetry::worker::record_state_transition;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, error, info, warn};

use super::control::{self, Control};
use super::statistics::WorkerStatistics;

// ---------------------------------------------------------------------------
// Unit of work
// ---------------------------------------------------------------------------

/// The work a [`Worker`] repeats.
///
/// `execute` returning [`Error::Cancelled`] stops the worker; any other error
/// restarts it after the configured pause.
pub trait IterationUnit: Send + Sync + 'static {
    /// Called once per run, before the worker reports `Running`.
    fn on_starting(&self, ctx: &IterationContext) -> impl Future<Output = Result<()>> + Send {
        let _ = ctx;
        async { Ok(()) }
    }

    /// One iteration.
    fn execute(&self, ctx: &IterationContext) -> impl Future<Output = Result<Pace>> + Send;

    /// Called once per run, after the last iteration.
    fn on_stopping(&self) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// Liveness stamp shared between the iteration loop and its watchdog.
#[derive(Debug, Clone)]
pub struct Heartbeat(Arc<Mutex<Instant>>);

impl Heartbeat {
    pub(crate) fn new() -> Self {
        Self(Arc::new(Mutex::new(Instant::now())))
    }

    /// Record that the runner is alive.
    pub fn beat(&self) {
        *self.lock() = Instant::now();
    }

    /// Time since the last beat.
    pub fn elapsed(&self) -> Duration {
        self.lock().elapsed()
    }

    fn lock(&self) -> MutexGuard<'_, Instant> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// What a unit of work can see of its worker.
#[derive(Debug, Clone)]
pub struct IterationContext {
    worker: Arc<str>,
    heartbeat: Heartbeat,
    cancellation: CancellationToken,
    statistics: Arc<WorkerStatistics>,
}

impl IterationContext {
    pub(crate) fn new(
        worker: &str,
        heartbeat: Heartbeat,
        cancellation: CancellationToken,
        statistics: Arc<WorkerStatistics>,
    ) -> Self {
        Self {
            worker: Arc::from(worker),
            heartbeat,
            cancellation,
            statistics,
        }
    }

    pub fn worker(&self) -> &str {
        &self.worker
    }

    /// Refresh the heartbeat. Long iterations call this to avoid a
    /// liveness restart.
    pub fn runner_is_alive(&self) {
        self.heartbeat.beat();
    }

    pub fn heartbeat(&self) -> &Heartbeat {
        &self.heartbeat
    }

    /// Cancelled when the current run ends, by stop or by restart.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn statistics(&self) -> &WorkerStatistics {
        &self.statistics
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// State shared between the [`Worker`] handle and its loop task.
pub(crate) struct Shared<U> {
    pub(crate) name: String,
    pub(crate) settings: WorkerSettings,
    pub(crate) unit: U,
    pub(crate) statistics: Arc<WorkerStatistics>,
    pub(crate) state: watch::Sender<WorkerState>,
    pub(crate) events: EventBus,
    pub(crate) restarts: AtomicU64,
    pub(crate) restart_pending: AtomicBool,
}

impl<U> Shared<U> {
    pub(crate) fn transition(&self, to: WorkerState) {
        let from = self.state.send_replace(to);
        if from == to {
            return;
        }
        if !from.can_transition_to(to) {
            debug!(worker = %self.name, %from, %to, "unusual state transition");
        }
        record_state_transition(&Span::current(), &self.name, from, to);
        self.events.emit(EventKind::StateChanged { from, to });
    }

    /// Walk whatever state the worker is left in down to `Stopped`.
    pub(crate) fn settle_stopped(&self) {
        let current = *self.state.borrow();
        if current.is_active() {
            self.transition(WorkerState::Stopping);
        }
        self.transition(WorkerState::Stopped);
    }

    /// Log and publish an iteration failure, then decide stop vs restart.
    pub(crate) fn report_failure(&self, err: Error) -> control::RunExit {
        match &err {
            Error::Cancelled => {
                info!(worker = %self.name, "iteration cancelled, stopping");
                self.events.emit(EventKind::IterationFailed {
                    error: err.to_string(),
                    restart: false,
                });
                control::RunExit::Stop
            }
            Error::LivenessTimeout { elapsed_ms } => {
                error!(worker = %self.name, elapsed_ms, "liveness timeout, restart requested");
                self.events.emit(EventKind::LivenessTimeout {
                    elapsed_ms: *elapsed_ms,
                });
                control::RunExit::Restart
            }
            _ => {
                error!(worker = %self.name, error = %err, "iteration failed, restart requested");
                self.events.emit(EventKind::IterationFailed {
                    error: err.to_string(),
                    restart: true,
                });
                control::RunExit::Restart
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Worker handle
// ---------------------------------------------------------------------------

/// How a call to [`Worker::stop`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// Nothing was running.
    NotRunning,
    /// The loop finished within `wait_on_stop`.
    Graceful,
    /// The loop did not finish in time (or panicked) and was aborted.
    Forced,
}

struct Runner {
    control: mpsc::UnboundedSender<Control>,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// A named, restartable worker loop around an [`IterationUnit`].
pub struct Worker<U: IterationUnit> {
    shared: Arc<Shared<U>>,
    runner: Mutex<Option<Runner>>,
    /// Set while `stop()` waits for a loop it has already detached.
    stop_pending: AtomicBool,
}

impl<U: IterationUnit> Worker<U> {
    pub fn new(name: impl Into<String>, settings: WorkerSettings, unit: U) -> Self {
        let name = name.into();
        let (state, _) = watch::channel(WorkerState::Stopped);
        Self {
            shared: Arc::new(Shared {
                statistics: Arc::new(WorkerStatistics::new(name.clone())),
                events: EventBus::new(&name),
                name,
                settings,
                unit,
                state,
                restarts: AtomicU64::new(0),
                restart_pending: AtomicBool::new(false),
            }),
            runner: Mutex::new(None),
            stop_pending: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.shared.settings
    }

    pub fn unit(&self) -> &U {
        &self.shared.unit
    }

    pub fn state(&self) -> WorkerState {
        *self.shared.state.borrow()
    }

    /// Watch the current state.
    pub fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
        self.shared.state.subscribe()
    }

    /// Receive every lifecycle event from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.shared.events.subscribe()
    }

    pub fn statistics(&self) -> Arc<WorkerStatistics> {
        Arc::clone(&self.shared.statistics)
    }

    /// Number of automatic restarts since creation.
    pub fn restarts(&self) -> u64 {
        self.shared.restarts.load(Ordering::Relaxed)
    }

    /// Whether the worker is `Stopped` only for the pause before an
    /// automatic restart.
    pub fn is_restart_pending(&self) -> bool {
        self.shared.restart_pending.load(Ordering::Acquire)
    }

    /// Whether a `stop()` call is still waiting for the loop to settle.
    pub fn is_stop_pending(&self) -> bool {
        self.stop_pending.load(Ordering::Acquire)
    }

    /// Start the loop. Must be called from within a tokio runtime.
    ///
    /// Returns `false` without side effects if the loop is already active,
    /// including while it is pausing before an automatic restart, or while a
    /// `stop()` is still waiting for the previous loop to settle.
    pub fn start(&self) -> bool {
        let mut runner = self.lock_runner();

        if self.stop_pending.load(Ordering::Acquire) {
            debug!(worker = %self.shared.name, "start ignored: stop in progress");
            return false;
        }
        if self.state() == WorkerState::Stopping {
            debug!(worker = %self.shared.name, "start ignored: worker is stopping");
            return false;
        }
        if let Some(active) = runner.as_ref() {
            if !active.handle.is_finished() {
                debug!(worker = %self.shared.name, state = %self.state(), "start ignored: worker loop is active");
                return false;
            }
            // The previous loop ended on its own; make sure its state settled.
            self.shared.settle_stopped();
        }

        info!(worker = %self.shared.name, "starting worker");
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        self.shared.transition(WorkerState::Starting);
        let handle = tokio::spawn(control::supervise(
            Arc::clone(&self.shared),
            control_rx,
            control_tx.clone(),
            token.clone(),
        ));
        *runner = Some(Runner {
            control: control_tx,
            token,
            handle,
        });
        true
    }

    /// Stop the loop, waiting up to `wait_on_stop` for it to settle.
    ///
    /// `start()` is refused until this returns. If the returned future is
    /// dropped early, the loop is aborted.
    pub async fn stop(&self) -> Shutdown {
        let runner = {
            let mut slot = self.lock_runner();
            let Some(runner) = slot.take() else {
                return Shutdown::NotRunning;
            };
            if runner.handle.is_finished() {
                self.shared.settle_stopped();
                return Shutdown::NotRunning;
            }
            self.stop_pending.store(true, Ordering::Release);
            runner
        };

        info!(worker = %self.shared.name, "stopping worker");
        let _ = runner.control.send(Control::Stop);
        runner.token.cancel();

        let mut pending = PendingStop {
            worker: self,
            handle: Some(runner.handle),
        };
        let wait = self.shared.settings.wait_on_stop();
        let joined = match pending.handle.as_mut() {
            Some(handle) => tokio::time::timeout(wait, handle).await,
            None => return Shutdown::NotRunning,
        };

        match joined {
            Ok(Ok(())) => {
                pending.handle = None;
                Shutdown::Graceful
            }
            Ok(Err(err)) => {
                pending.handle = None;
                warn!(worker = %self.shared.name, error = %err, "worker loop panicked");
                self.shared.settle_stopped();
                Shutdown::Forced
            }
            Err(_) => {
                if let Some(handle) = pending.handle.take() {
                    handle.abort();
                }
                let waited_ms = wait.as_millis() as u64;
                warn!(worker = %self.shared.name, waited_ms, "worker did not stop in time, aborted");
                self.shared
                    .events
                    .emit(EventKind::ShutdownForced { waited_ms });
                self.shared.settle_stopped();
                Shutdown::Forced
            }
        }
    }

    fn lock_runner(&self) -> MutexGuard<'_, Option<Runner>> {
        self.runner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Clears the pending-stop flag once `stop()` is done, and aborts the loop if
/// `stop()` was dropped before the loop finished.
struct PendingStop<'a, U: IterationUnit> {
    worker: &'a Worker<U>,
    handle: Option<JoinHandle<()>>,
}

impl<U: IterationUnit> Drop for PendingStop<'_, U> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            self.worker.shared.settle_stopped();
        }
        // The loop is gone on every path that reaches here.
        self.worker
            .shared
            .restart_pending
            .store(false, Ordering::Release);
        self.worker.stop_pending.store(false, Ordering::Release);
    }
}

impl<U: IterationUnit> Drop for Worker<U> {
    fn drop(&mut self) {
        if let Some(runner) = self.lock_runner().take() {
            runner.token.cancel();
            runner.handle.abort();
        }
    }
}

impl<U: IterationUnit> std::fmt::Debug for Worker<U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .field("restarts", &self.restarts())
            .finish()
    }
}
