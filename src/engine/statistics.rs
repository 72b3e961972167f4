//! Iteration statistics of a worker since the last reset.
//!
//! Only the owning worker loop records measurements; any thread may read a
//! snapshot or reset. Reset clears settled counters but keeps the start stamps
//! of an in-flight iteration or sleep, so that measurement completes intact.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatisticsSnapshot {
    pub executions_count: u64,
    pub executions_total_time_ms: u64,
    pub execution_max_time_per_iteration_ms: u64,
    pub executions_total_sleep_time_ms: u64,
    /// No iteration completed since the last reset.
    pub is_empty: bool,
    pub last_reset_at: DateTime<Utc>,
}

impl StatisticsSnapshot {
    pub fn average_time_per_iteration_ms(&self) -> Option<u64> {
        self.executions_total_time_ms
            .checked_div(self.executions_count)
    }
}

struct Counters {
    executions_count: u64,
    executions_total: Duration,
    execution_max: Duration,
    sleep_total: Duration,
    iteration_started: Option<Instant>,
    sleep_started: Option<Instant>,
    is_empty: bool,
    last_reset: Instant,
    last_reset_at: DateTime<Utc>,
}

impl Counters {
    fn new(now: Instant) -> Self {
        Self {
            executions_count: 0,
            executions_total: Duration::ZERO,
            execution_max: Duration::ZERO,
            sleep_total: Duration::ZERO,
            iteration_started: None,
            sleep_started: None,
            is_empty: true,
            last_reset: now,
            last_reset_at: Utc::now(),
        }
    }

    fn clear_settled(&mut self, now: Instant) {
        self.executions_count = 0;
        self.executions_total = Duration::ZERO;
        self.execution_max = Duration::ZERO;
        self.sleep_total = Duration::ZERO;
        self.is_empty = true;
        self.last_reset = now;
        self.last_reset_at = Utc::now();
    }
}

/// Counters and timers of one worker.
pub struct WorkerStatistics {
    worker: String,
    counters: Mutex<Counters>,
}

impl WorkerStatistics {
    pub fn new(worker: impl Into<String>) -> Self {
        Self {
            worker: worker.into(),
            counters: Mutex::new(Counters::new(Instant::now())),
        }
    }

    pub fn worker(&self) -> &str {
        &self.worker
    }

    pub fn iteration_started(&self) {
        self.iteration_started_at(Instant::now());
    }

    pub fn iteration_started_at(&self, now: Instant) {
        self.lock().iteration_started = Some(now);
    }

    /// Credit a completed iteration. Returns its duration.
    pub fn iteration_executed(&self) -> Duration {
        self.iteration_executed_at(Instant::now())
    }

    pub fn iteration_executed_at(&self, now: Instant) -> Duration {
        let mut counters = self.lock();
        let elapsed = counters
            .iteration_started
            .take()
            .map(|started| now.saturating_duration_since(started))
            .unwrap_or_default();
        counters.executions_count += 1;
        counters.executions_total += elapsed;
        if elapsed > counters.execution_max {
            counters.execution_max = elapsed;
        }
        counters.is_empty = false;
        elapsed
    }

    /// Forget the in-flight iteration without crediting it.
    pub fn iteration_abandoned(&self) {
        self.lock().iteration_started = None;
    }

    pub fn sleep_started(&self) {
        self.sleep_started_at(Instant::now());
    }

    pub fn sleep_started_at(&self, now: Instant) {
        self.lock().sleep_started = Some(now);
    }

    /// Credit the sleep opened by `sleep_started`. Returns its duration.
    pub fn sleep_finished(&self) -> Duration {
        self.sleep_finished_at(Instant::now())
    }

    pub fn sleep_finished_at(&self, now: Instant) -> Duration {
        let mut counters = self.lock();
        let slept = counters
            .sleep_started
            .take()
            .map(|started| now.saturating_duration_since(started))
            .unwrap_or_default();
        counters.sleep_total += slept;
        slept
    }

    pub fn reset(&self) {
        self.reset_at(Instant::now());
    }

    pub fn reset_at(&self, now: Instant) {
        self.lock().clear_settled(now);
    }

    /// Time since the last reset.
    pub fn since_reset(&self) -> Duration {
        self.lock().last_reset.elapsed()
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        let counters = self.lock();
        StatisticsSnapshot {
            executions_count: counters.executions_count,
            executions_total_time_ms: counters.executions_total.as_millis() as u64,
            execution_max_time_per_iteration_ms: counters.execution_max.as_millis() as u64,
            executions_total_sleep_time_ms: counters.sleep_total.as_millis() as u64,
            is_empty: counters.is_empty,
            last_reset_at: counters.last_reset_at,
        }
    }

    /// Share of wall time spent inside iterations since the last reset, in percent.
    pub fn busy_percent(&self) -> u64 {
        let counters = self.lock();
        let window = counters.last_reset.elapsed().as_millis() as u64;
        if window == 0 {
            return 0;
        }
        (counters.executions_total.as_millis() as u64).saturating_mul(100) / window
    }

    /// Human-readable one-line summary.
    pub fn summary(&self) -> String {
        let window_ms = self.since_reset().as_millis();
        let snapshot = self.snapshot();
        if snapshot.is_empty {
            return format!(
                "stat for last {window_ms} ms for worker {} is empty",
                self.worker
            );
        }
        let avg = snapshot
            .average_time_per_iteration_ms()
            .map(|avg| avg.to_string())
            .unwrap_or_else(|| "NaN".to_string());
        format!(
            "stat for last {window_ms} ms for worker {} is: count = {}, sleep_ms = {}, total_ms = {}, max_ms = {}, avg_ms = {avg}",
            self.worker,
            snapshot.executions_count,
            snapshot.executions_total_sleep_time_ms,
            snapshot.executions_total_time_ms,
            snapshot.execution_max_time_per_iteration_ms,
        )
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for WorkerStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerStatistics")
            .field("worker", &self.worker)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}
