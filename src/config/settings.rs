//! Validated settings for queues and workers.
//!
//! All instances are built through [`WorkerSettings::builder`],
//! [`WorkerSettings::from_millis`] or [`QueueSettings::new`], so a worker never
//! observes a zero interval or an empty queue.

use crate::error::{Error, Result};
use std::time::Duration;

pub const WAIT_ON_STOP_MS_DEFAULT: u64 = 3_000;
pub const WAIT_ON_RESTART_MS_DEFAULT: u64 = 30_000;
pub const MIN_TIME_PER_ITERATION_MS_DEFAULT: u64 = 1_000;
pub const TIMEOUT_RUNNER_LIFE_MS_DEFAULT: u64 = 20_000;
pub const PRINT_STATISTICS_EVERY_MS_DEFAULT: u64 = 1_000;

pub const MAX_QUEUE_SIZE_DEFAULT: usize = 10_000;
pub const PRIORITIES_COUNT_DEFAULT: usize = 8;

/// Timing knobs of a single worker loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    wait_on_stop: Duration,
    wait_on_restart: Duration,
    min_time_per_iteration: Duration,
    timeout_runner_life: Duration,
    print_statistics_every: Duration,
}

impl WorkerSettings {
    pub fn builder() -> WorkerSettingsBuilder {
        WorkerSettingsBuilder::default()
    }

    /// Build settings from raw millisecond values, as found in config files.
    pub fn from_millis(
        wait_on_stop_ms: u64,
        wait_on_restart_ms: u64,
        min_time_per_iteration_ms: u64,
        timeout_runner_life_ms: u64,
        print_statistics_every_ms: u64,
    ) -> Result<Self> {
        Self::builder()
            .wait_on_stop(Duration::from_millis(wait_on_stop_ms))
            .wait_on_restart(Duration::from_millis(wait_on_restart_ms))
            .min_time_per_iteration(Duration::from_millis(min_time_per_iteration_ms))
            .timeout_runner_life(Duration::from_millis(timeout_runner_life_ms))
            .print_statistics_every(Duration::from_millis(print_statistics_every_ms))
            .build()
    }

    /// How long `stop()` waits for the loop to settle before aborting it.
    pub fn wait_on_stop(&self) -> Duration {
        self.wait_on_stop
    }

    /// Pause between the failed run and the automatic restart.
    pub fn wait_on_restart(&self) -> Duration {
        self.wait_on_restart
    }

    /// Minimum spacing between the starts of two paced iterations.
    pub fn min_time_per_iteration(&self) -> Duration {
        self.min_time_per_iteration
    }

    /// Maximum time without a heartbeat before the watchdog forces a restart.
    pub fn timeout_runner_life(&self) -> Duration {
        self.timeout_runner_life
    }

    pub fn print_statistics_every(&self) -> Duration {
        self.print_statistics_every
    }

    pub fn validate(&self) -> Result<()> {
        ensure_positive(self.wait_on_stop, "wait_on_stop_ms")?;
        ensure_positive(self.wait_on_restart, "wait_on_restart_ms")?;
        ensure_positive(self.min_time_per_iteration, "min_time_per_iteration_ms")?;
        ensure_positive(self.timeout_runner_life, "timeout_runner_life_ms")?;
        ensure_positive(self.print_statistics_every, "print_statistics_every_ms")?;

        // The heartbeat is only refreshed between iterations, so a paced
        // sleep must never outlast the liveness timeout.
        if self.timeout_runner_life <= self.min_time_per_iteration {
            return Err(Error::Config(format!(
                "timeout_runner_life_ms ({}) must be greater than min_time_per_iteration_ms ({})",
                self.timeout_runner_life.as_millis(),
                self.min_time_per_iteration.as_millis()
            )));
        }
        Ok(())
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            wait_on_stop: Duration::from_millis(WAIT_ON_STOP_MS_DEFAULT),
            wait_on_restart: Duration::from_millis(WAIT_ON_RESTART_MS_DEFAULT),
            min_time_per_iteration: Duration::from_millis(MIN_TIME_PER_ITERATION_MS_DEFAULT),
            timeout_runner_life: Duration::from_millis(TIMEOUT_RUNNER_LIFE_MS_DEFAULT),
            print_statistics_every: Duration::from_millis(PRINT_STATISTICS_EVERY_MS_DEFAULT),
        }
    }
}

/// Builder for [`WorkerSettings`]; unset values keep their defaults.
#[derive(Debug, Default)]
pub struct WorkerSettingsBuilder {
    wait_on_stop: Option<Duration>,
    wait_on_restart: Option<Duration>,
    min_time_per_iteration: Option<Duration>,
    timeout_runner_life: Option<Duration>,
    print_statistics_every: Option<Duration>,
}

impl WorkerSettingsBuilder {
    pub fn wait_on_stop(mut self, value: Duration) -> Self {
        self.wait_on_stop = Some(value);
        self
    }

    pub fn wait_on_restart(mut self, value: Duration) -> Self {
        self.wait_on_restart = Some(value);
        self
    }

    pub fn min_time_per_iteration(mut self, value: Duration) -> Self {
        self.min_time_per_iteration = Some(value);
        self
    }

    pub fn timeout_runner_life(mut self, value: Duration) -> Self {
        self.timeout_runner_life = Some(value);
        self
    }

    pub fn print_statistics_every(mut self, value: Duration) -> Self {
        self.print_statistics_every = Some(value);
        self
    }

    pub fn build(self) -> Result<WorkerSettings> {
        let defaults = WorkerSettings::default();
        let settings = WorkerSettings {
            wait_on_stop: self.wait_on_stop.unwrap_or(defaults.wait_on_stop),
            wait_on_restart: self.wait_on_restart.unwrap_or(defaults.wait_on_restart),
            min_time_per_iteration: self
                .min_time_per_iteration
                .unwrap_or(defaults.min_time_per_iteration),
            timeout_runner_life: self
                .timeout_runner_life
                .unwrap_or(defaults.timeout_runner_life),
            print_statistics_every: self
                .print_statistics_every
                .unwrap_or(defaults.print_statistics_every),
        };
        settings.validate()?;
        Ok(settings)
    }
}

/// Shape of a prioritized queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    capacity: usize,
    lane_count: usize,
}

impl QueueSettings {
    pub fn new(capacity: usize, lane_count: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::Config("max_queue_size must be greater than 0".into()));
        }
        if lane_count == 0 {
            return Err(Error::Config(
                "priorities_count must be greater than 0".into(),
            ));
        }
        Ok(Self {
            capacity,
            lane_count,
        })
    }

    /// Soft limit on the total number of queued messages.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn lane_count(&self) -> usize {
        self.lane_count
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            capacity: MAX_QUEUE_SIZE_DEFAULT,
            lane_count: PRIORITIES_COUNT_DEFAULT,
        }
    }
}

fn ensure_positive(value: Duration, field: &str) -> Result<()> {
    if value.is_zero() {
        return Err(Error::Config(format!("{field} must be greater than 0")));
    }
    Ok(())
}
