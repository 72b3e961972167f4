//! The supervised iteration loop behind every [`Worker`](super::Worker).
//!
//! One task per started worker runs [`supervise`]: it drives runs of the
//! iteration loop and, when a run ends with a restart request, walks the
//! worker through `Stopping -> Stopped`, pauses, and starts a new run.
//! Stop and restart requests arrive on a single command channel, fed by
//! `Worker::stop` and by the liveness watchdog.

use crate::error::Error;
use crate::model::{Pace, WorkerState};
use crate::telemetry::metrics;
use crate::telemetry::worker::start_run_span;
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};
use uuid::Uuid;

use super::watchdog;
use super::worker::{Heartbeat, IterationContext, IterationUnit, Shared};

/// Commands into a running loop.
#[derive(Debug)]
pub(crate) enum Control {
    Stop,
    Restart(Error),
}

/// Why a run of the iteration loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunExit {
    Stop,
    Restart,
}

pub(crate) async fn supervise<U: IterationUnit>(
    shared: Arc<Shared<U>>,
    mut control: mpsc::UnboundedReceiver<Control>,
    control_tx: mpsc::UnboundedSender<Control>,
    token: CancellationToken,
) {
    loop {
        // Restart requests left over from the previous run are stale.
        while let Ok(command) = control.try_recv() {
            if matches!(command, Control::Stop) {
                shared.settle_stopped();
                return;
            }
        }

        let run_id = Uuid::new_v4();
        let exit = run(&shared, &mut control, &control_tx, &token)
            .instrument(start_run_span(&shared.name, &run_id))
            .await;

        shared.transition(WorkerState::Stopping);
        shared.unit.on_stopping().await;
        shared.transition(WorkerState::Stopped);

        if exit == RunExit::Stop || token.is_cancelled() {
            info!(worker = %shared.name, "worker stopped");
            return;
        }

        shared.restart_pending.store(true, Ordering::Release);
        let restarts = shared.restarts.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::worker_restarts().add(1, &[KeyValue::new("worker", shared.name.clone())]);
        let delay = shared.settings.wait_on_restart();
        shared.events.emit(crate::event::EventKind::RestartScheduled {
            delay_ms: delay.as_millis() as u64,
        });
        warn!(
            worker = %shared.name,
            restarts,
            delay_ms = delay.as_millis() as u64,
            "worker will restart after pause"
        );

        let resume = pause(&mut control, &token, Instant::now() + delay).await;
        shared.restart_pending.store(false, Ordering::Release);
        if !resume {
            info!(worker = %shared.name, "worker stopped during restart pause");
            return;
        }

        shared.transition(WorkerState::Starting);
    }
}

/// Wait out the restart pause. Returns `false` if the worker was stopped
/// meanwhile; restart requests during the pause are ignored.
async fn pause(
    control: &mut mpsc::UnboundedReceiver<Control>,
    token: &CancellationToken,
    deadline: Instant,
) -> bool {
    loop {
        tokio::select! {
            _ = token.cancelled() => return false,
            _ = sleep_until(deadline) => return true,
            command = control.recv() => match command {
                Some(Control::Restart(_)) => continue,
                Some(Control::Stop) | None => return false,
            },
        }
    }
}

/// One run: startup hook, then iterations until a stop or restart request.
async fn run<U: IterationUnit>(
    shared: &Shared<U>,
    control: &mut mpsc::UnboundedReceiver<Control>,
    control_tx: &mpsc::UnboundedSender<Control>,
    token: &CancellationToken,
) -> RunExit {
    let run_token = token.child_token();
    let heartbeat = Heartbeat::new();
    let ctx = IterationContext::new(
        &shared.name,
        heartbeat.clone(),
        run_token.clone(),
        Arc::clone(&shared.statistics),
    );

    let started = tokio::select! {
        biased;
        command = control.recv() => return command_exit(shared, command),
        started = shared.unit.on_starting(&ctx) => started,
    };
    if let Err(err) = started {
        run_token.cancel();
        return shared.report_failure(err);
    }

    shared.transition(WorkerState::Running);
    let watchdog = watchdog::spawn(
        shared.name.clone(),
        heartbeat,
        shared.settings.timeout_runner_life(),
        control_tx.clone(),
        run_token.clone(),
    );

    let exit = iterate(shared, control, &ctx).await;

    run_token.cancel();
    if let Err(err) = watchdog.await {
        warn!(worker = %shared.name, error = %err, "watchdog task failed");
    }
    exit
}

async fn iterate<U: IterationUnit>(
    shared: &Shared<U>,
    control: &mut mpsc::UnboundedReceiver<Control>,
    ctx: &IterationContext,
) -> RunExit {
    let labels = [KeyValue::new("worker", shared.name.clone())];
    let min_time = shared.settings.min_time_per_iteration();

    loop {
        let started = Instant::now();
        ctx.runner_is_alive();
        shared.statistics.iteration_started_at(started);

        let outcome = tokio::select! {
            biased;
            command = control.recv() => {
                shared.statistics.iteration_abandoned();
                return command_exit(shared, command);
            }
            outcome = shared.unit.execute(ctx) => outcome,
        };

        let pace = match outcome {
            Ok(pace) => pace,
            Err(err) => {
                shared.statistics.iteration_abandoned();
                return shared.report_failure(err);
            }
        };

        let elapsed = shared.statistics.iteration_executed();
        metrics::worker_iterations().add(1, &labels);
        metrics::iteration_duration_ms().record(elapsed.as_secs_f64() * 1000.0, &labels);
        report_statistics(shared);

        if pace == Pace::Immediate {
            tokio::task::yield_now().await;
            continue;
        }

        let remaining = min_time.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            continue;
        }

        shared.statistics.sleep_started();
        let command = tokio::select! {
            biased;
            command = control.recv() => Some(command),
            _ = sleep(remaining) => None,
        };
        let slept = shared.statistics.sleep_finished();
        metrics::sleep_duration_ms().record(slept.as_secs_f64() * 1000.0, &labels);

        if let Some(command) = command {
            return command_exit(shared, command);
        }
    }
}

fn command_exit<U>(shared: &Shared<U>, command: Option<Control>) -> RunExit {
    match command {
        Some(Control::Restart(err)) => shared.report_failure(err),
        Some(Control::Stop) | None => {
            debug!(worker = %shared.name, "stop requested");
            RunExit::Stop
        }
    }
}

/// Log the summary and start a new window once `print_statistics_every` has passed.
fn report_statistics<U>(shared: &Shared<U>) {
    let statistics = &shared.statistics;
    if statistics.since_reset() < shared.settings.print_statistics_every() {
        return;
    }
    info!(worker = %shared.name, "{}", statistics.summary());
    metrics::busy_percent().record(
        statistics.busy_percent(),
        &[KeyValue::new("worker", shared.name.clone())],
    );
    statistics.reset();
}
