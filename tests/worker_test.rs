//! Integration tests for the worker lifecycle, restart and liveness watchdog.
//!
//! All tests run on a paused clock; timers fire as soon as every task is idle.

use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use workloop::config::WorkerSettings;
use workloop::engine::{IterationContext, IterationUnit, Shutdown, Worker, simple_worker};
use workloop::event::{Event, EventKind};
use workloop::model::{Pace, WorkerState};
use workloop::{Error, Result};

use WorkerState::*;

fn settings() -> WorkerSettings {
    WorkerSettings::builder()
        .wait_on_stop(Duration::from_secs(1))
        .wait_on_restart(Duration::from_millis(100))
        .min_time_per_iteration(Duration::from_millis(10))
        .timeout_runner_life(Duration::from_millis(50))
        .print_statistics_every(Duration::from_secs(60))
        .build()
        .unwrap()
}

async fn next_event(rx: &mut broadcast::Receiver<Event>) -> EventKind {
    tokio::time::timeout(Duration::from_secs(30), rx.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event stream closed")
        .kind
}

async fn wait_for(rx: &mut broadcast::Receiver<Event>, wanted: impl Fn(&EventKind) -> bool) -> EventKind {
    loop {
        let kind = next_event(rx).await;
        if wanted(&kind) {
            return kind;
        }
    }
}

async fn wait_for_state(rx: &mut broadcast::Receiver<Event>, state: WorkerState) {
    wait_for(rx, |kind| matches!(kind, EventKind::StateChanged { to, .. } if *to == state)).await;
}

fn changed(from: WorkerState, to: WorkerState) -> EventKind {
    EventKind::StateChanged { from, to }
}

// ---------------------------------------------------------------------------
// Start / stop
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn start_runs_and_stop_settles_gracefully() {
    let worker = simple_worker("paced", settings(), |_ctx| async { Ok(Pace::Paced) });
    let mut events = worker.subscribe();
    assert_eq!(worker.state(), Stopped);

    assert!(worker.start());
    assert_eq!(next_event(&mut events).await, changed(Stopped, Starting));
    assert_eq!(next_event(&mut events).await, changed(Starting, Running));
    assert_eq!(worker.state(), Running);

    assert_eq!(worker.stop().await, Shutdown::Graceful);
    assert_eq!(next_event(&mut events).await, changed(Running, Stopping));
    assert_eq!(next_event(&mut events).await, changed(Stopping, Stopped));
    assert_eq!(worker.state(), Stopped);
    assert_eq!(worker.restarts(), 0);
}

#[tokio::test(start_paused = true)]
async fn second_start_is_a_no_op() {
    let worker = simple_worker("paced", settings(), |_ctx| async { Ok(Pace::Paced) });
    let mut events = worker.subscribe();

    assert!(worker.start());
    assert!(!worker.start());
    wait_for_state(&mut events, Running).await;
    assert!(!worker.start());

    assert_eq!(worker.stop().await, Shutdown::Graceful);

    let mut starts = 0;
    while let Ok(event) = events.try_recv() {
        if event.kind == changed(Stopped, Starting) {
            starts += 1;
        }
    }
    assert_eq!(starts, 0, "only the first start may enter Starting");
}

#[tokio::test]
async fn stop_without_start_reports_not_running() {
    let worker = simple_worker("idle", settings(), |_ctx| async { Ok(Pace::Paced) });
    assert_eq!(worker.stop().await, Shutdown::NotRunning);
    assert_eq!(worker.state(), Stopped);
}

#[tokio::test(start_paused = true)]
async fn start_is_refused_while_stop_is_settling() {
    let calls = Arc::new(AtomicU32::new(0));
    let worker = {
        let calls = Arc::clone(&calls);
        simple_worker("racy", settings(), move |_ctx| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(Pace::Paced) }
        })
    };
    let mut events = worker.subscribe();

    assert!(worker.start());
    wait_for_state(&mut events, Running).await;

    let (shutdown, started) = tokio::join!(worker.stop(), async { worker.start() });
    assert_eq!(shutdown, Shutdown::Graceful);
    assert!(!started, "start must not race a pending stop");
    assert!(!worker.is_stop_pending());
    assert_eq!(worker.state(), Stopped);

    let settled = calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(worker.state(), Stopped);
    assert_eq!(calls.load(Ordering::SeqCst), settled, "no loop may survive the stop");

    assert!(worker.start());
    wait_for_state(&mut events, Running).await;
    assert_eq!(worker.stop().await, Shutdown::Graceful);
}

#[tokio::test(start_paused = true)]
async fn worker_can_be_started_again_after_stop() {
    let worker = simple_worker("again", settings(), |_ctx| async { Ok(Pace::Paced) });
    let mut events = worker.subscribe();

    assert!(worker.start());
    wait_for_state(&mut events, Running).await;
    assert_eq!(worker.stop().await, Shutdown::Graceful);

    assert!(worker.start());
    wait_for_state(&mut events, Running).await;
    assert_eq!(worker.stop().await, Shutdown::Graceful);
    assert_eq!(worker.restarts(), 0);
}

// ---------------------------------------------------------------------------
// Failures and restarts
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn failed_iteration_restarts_after_pause() {
    let calls = Arc::new(AtomicU32::new(0));
    let worker = {
        let calls = Arc::clone(&calls);
        simple_worker("flaky", settings(), move |_ctx| {
            let calls = Arc::clone(&calls);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(Error::Iteration("boom".into()))
                } else {
                    Ok(Pace::Paced)
                }
            }
        })
    };
    let mut events = worker.subscribe();

    assert!(worker.start());
    assert!(!worker.is_restart_pending());
    let failure = [
        changed(Stopped, Starting),
        changed(Starting, Running),
        EventKind::IterationFailed {
            error: "iteration failed: boom".into(),
            restart: true,
        },
        changed(Running, Stopping),
        changed(Stopping, Stopped),
        EventKind::RestartScheduled { delay_ms: 100 },
    ];
    for kind in failure {
        assert_eq!(next_event(&mut events).await, kind);
    }
    assert_eq!(worker.state(), Stopped);
    assert!(worker.is_restart_pending());

    for kind in [changed(Stopped, Starting), changed(Starting, Running)] {
        assert_eq!(next_event(&mut events).await, kind);
    }
    assert!(!worker.is_restart_pending());

    assert_eq!(worker.restarts(), 1);
    assert_eq!(worker.state(), Running);
    assert!(calls.load(Ordering::SeqCst) >= 2);

    assert_eq!(worker.stop().await, Shutdown::Graceful);
    assert_eq!(worker.state(), Stopped);
}

#[tokio::test(start_paused = true)]
async fn cancelled_iteration_stops_without_restart() {
    let worker = simple_worker("quitter", settings(), |_ctx| async {
        Err::<Pace, _>(Error::Cancelled)
    });
    let mut events = worker.subscribe();

    assert!(worker.start());
    let expected = [
        changed(Stopped, Starting),
        changed(Starting, Running),
        EventKind::IterationFailed {
            error: "operation cancelled".into(),
            restart: false,
        },
        changed(Running, Stopping),
        changed(Stopping, Stopped),
    ];
    for kind in expected {
        assert_eq!(next_event(&mut events).await, kind);
    }

    let quiet = tokio::time::timeout(Duration::from_secs(5), events.recv()).await;
    assert!(quiet.is_err(), "no restart expected after cancellation");
    assert_eq!(worker.restarts(), 0);
    assert_eq!(worker.state(), Stopped);
}

#[tokio::test(start_paused = true)]
async fn stale_heartbeat_triggers_restart() {
    let calls = Arc::new(AtomicU32::new(0));
    let worker = {
        let calls = Arc::clone(&calls);
        simple_worker("stuck", settings(), move |_ctx| {
            let calls = Arc::clone(&calls);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
                Ok(Pace::Paced)
            }
        })
    };
    let mut events = worker.subscribe();

    assert!(worker.start());
    let timeout = wait_for(&mut events, |kind| matches!(kind, EventKind::LivenessTimeout { .. })).await;
    let EventKind::LivenessTimeout { elapsed_ms } = timeout else {
        unreachable!()
    };
    assert!(elapsed_ms > 50, "elapsed {elapsed_ms} ms");

    assert_eq!(next_event(&mut events).await, changed(Running, Stopping));
    assert_eq!(next_event(&mut events).await, changed(Stopping, Stopped));
    assert_eq!(
        next_event(&mut events).await,
        EventKind::RestartScheduled { delay_ms: 100 }
    );
    wait_for_state(&mut events, Running).await;
    assert_eq!(worker.restarts(), 1);

    // The second run beats regularly and must not trip the watchdog again.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(worker.restarts(), 1);
    assert_eq!(worker.state(), Running);

    assert_eq!(worker.stop().await, Shutdown::Graceful);
}

#[tokio::test(start_paused = true)]
async fn long_iteration_that_reports_liveness_is_not_restarted() {
    let worker = simple_worker("chatty", settings(), |ctx: IterationContext| async move {
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            ctx.runner_is_alive();
        }
        Ok(Pace::Paced)
    });
    let mut events = worker.subscribe();

    assert!(worker.start());
    wait_for_state(&mut events, Running).await;
    tokio::time::sleep(Duration::from_millis(700)).await;

    assert_eq!(worker.restarts(), 0);
    assert_eq!(worker.state(), Running);
    assert_eq!(worker.stop().await, Shutdown::Graceful);
}

#[tokio::test(start_paused = true)]
async fn stop_during_restart_pause_ends_the_worker() {
    let worker = simple_worker("failing", settings(), |_ctx| async {
        Err::<Pace, _>(Error::Iteration("always".into()))
    });
    let mut events = worker.subscribe();

    assert!(worker.start());
    wait_for(&mut events, |kind| matches!(kind, EventKind::RestartScheduled { .. })).await;
    assert_eq!(worker.state(), Stopped);
    assert!(worker.is_restart_pending());
    assert!(!worker.start(), "restart pause still counts as active");

    assert_eq!(worker.stop().await, Shutdown::Graceful);
    assert_eq!(worker.state(), Stopped);
    assert!(!worker.is_restart_pending());

    let quiet = tokio::time::timeout(Duration::from_secs(5), events.recv()).await;
    assert!(quiet.is_err(), "no restart expected after stop");
}

// ---------------------------------------------------------------------------
// Hooks and forced shutdown
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Hooks {
    started: AtomicU32,
    stopped: AtomicU32,
    hang_on_stop: bool,
}

impl IterationUnit for Hooks {
    async fn on_starting(&self, _ctx: &IterationContext) -> Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn execute(&self, _ctx: &IterationContext) -> Result<Pace> {
        Ok(Pace::Paced)
    }

    async fn on_stopping(&self) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
        if self.hang_on_stop {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn hooks_run_once_per_run() {
    let worker = Worker::new("hooks", settings(), Hooks::default());
    let mut events = worker.subscribe();

    assert!(worker.start());
    wait_for_state(&mut events, Running).await;
    assert_eq!(worker.unit().started.load(Ordering::SeqCst), 1);
    assert_eq!(worker.unit().stopped.load(Ordering::SeqCst), 0);

    assert_eq!(worker.stop().await, Shutdown::Graceful);
    assert_eq!(worker.unit().stopped.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_is_forced_when_loop_does_not_settle() {
    let unit = Hooks {
        hang_on_stop: true,
        ..Hooks::default()
    };
    let worker = Worker::new("stubborn", settings(), unit);
    let mut events = worker.subscribe();

    assert!(worker.start());
    wait_for_state(&mut events, Running).await;

    assert_eq!(worker.stop().await, Shutdown::Forced);
    assert_eq!(worker.state(), Stopped);
    wait_for(&mut events, |kind| {
        matches!(kind, EventKind::ShutdownForced { waited_ms: 1000 })
    })
    .await;
}

// ---------------------------------------------------------------------------
// Pacing and statistics
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn paced_iterations_sleep_out_the_minimum_time() {
    let worker = simple_worker("paced", settings(), |_ctx| async { Ok(Pace::Paced) });
    let mut events = worker.subscribe();

    assert!(worker.start());
    wait_for_state(&mut events, Running).await;
    tokio::time::sleep(Duration::from_millis(105)).await;

    let snapshot = worker.statistics().snapshot();
    assert!(snapshot.executions_count >= 5, "{snapshot:?}");
    assert!(snapshot.executions_count <= 12, "{snapshot:?}");
    assert!(snapshot.executions_total_sleep_time_ms >= 50, "{snapshot:?}");

    assert_eq!(worker.stop().await, Shutdown::Graceful);
}

#[tokio::test(start_paused = true)]
async fn immediate_iterations_do_not_sleep() {
    let worker = simple_worker("eager", settings(), |_ctx| async { Ok(Pace::Immediate) });
    let mut events = worker.subscribe();

    assert!(worker.start());
    wait_for_state(&mut events, Running).await;
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }

    let snapshot = worker.statistics().snapshot();
    assert!(snapshot.executions_count > 0, "{snapshot:?}");
    assert_eq!(snapshot.executions_total_sleep_time_ms, 0);

    assert_eq!(worker.stop().await, Shutdown::Graceful);
}

fn reporting_settings(print_every: Duration, timeout: Duration) -> WorkerSettings {
    WorkerSettings::builder()
        .wait_on_stop(Duration::from_secs(1))
        .wait_on_restart(Duration::from_millis(100))
        .min_time_per_iteration(Duration::from_millis(10))
        .timeout_runner_life(timeout)
        .print_statistics_every(print_every)
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn statistics_are_reported_and_reset_during_a_run() {
    let calls = Arc::new(AtomicU32::new(0));
    let settings = reporting_settings(Duration::from_millis(50), Duration::from_millis(50));
    let worker = {
        let calls = Arc::clone(&calls);
        simple_worker("reporting", settings, move |_ctx| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(Pace::Paced) }
        })
    };
    let mut events = worker.subscribe();

    assert!(worker.start());
    wait_for_state(&mut events, Running).await;
    tokio::time::sleep(Duration::from_millis(205)).await;

    let statistics = worker.statistics();
    let snapshot = statistics.snapshot();
    assert!(calls.load(Ordering::SeqCst) >= 15);
    assert!(snapshot.executions_count <= 6, "counters were never reset: {snapshot:?}");
    assert!(statistics.since_reset() <= Duration::from_millis(60));

    assert_eq!(worker.stop().await, Shutdown::Graceful);
}

#[tokio::test(start_paused = true)]
async fn reset_keeps_the_iteration_in_flight() {
    let settings = reporting_settings(Duration::from_secs(60), Duration::from_millis(200));
    let worker = simple_worker("slow", settings, |_ctx| async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        Ok(Pace::Paced)
    });
    let mut events = worker.subscribe();

    assert!(worker.start());
    wait_for_state(&mut events, Running).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    let statistics = worker.statistics();
    statistics.reset();
    assert!(statistics.snapshot().is_empty);

    while statistics.snapshot().executions_count == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    let snapshot = statistics.snapshot();
    assert_eq!(snapshot.executions_count, 1);
    assert_eq!(snapshot.execution_max_time_per_iteration_ms, 30);
    assert_eq!(snapshot.executions_total_time_ms, 30);

    assert_eq!(worker.stop().await, Shutdown::Graceful);
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

#[test]
fn state_machine_allows_only_lifecycle_edges() {
    assert!(Stopped.can_transition_to(Starting));
    assert!(Starting.can_transition_to(Running));
    assert!(Running.can_transition_to(Stopping));
    assert!(Stopping.can_transition_to(Stopped));
    assert!(!Stopped.can_transition_to(Running));
    assert!(!Running.can_transition_to(Starting));
    assert!(Running.is_active());
    assert!(!Stopping.is_active());
}

#[test]
fn state_round_trips_through_display() {
    for state in [Stopped, Starting, Running, Stopping] {
        assert_eq!(state.to_string().parse::<WorkerState>().unwrap(), state);
    }
    assert!("paused".parse::<WorkerState>().is_err());
}

#[test]
fn events_serialize_with_type_tag() {
    let value = serde_json::to_value(EventKind::StateChanged {
        from: Stopped,
        to: Starting,
    })
    .unwrap();
    assert_eq!(
        value,
        json!({"type": "state_changed", "from": "stopped", "to": "starting"})
    );
}
