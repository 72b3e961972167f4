//! Typed configuration.
//!
//! Process-level settings come from environment variables and load once at
//! startup. Component settings come from a TOML file; every component section
//! carries an `enabled` flag consumed by [`crate::components::Components`].
//! Both fail fast on invalid values.

pub mod settings;

pub use settings::{QueueSettings, WorkerSettings, WorkerSettingsBuilder};

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const SERVICE_NAME_DEFAULT: &str = "workloop";
pub const QUEUE_NAME_DEFAULT: &str = "messages-queue";
pub const EXECUTOR_NAME_DEFAULT: &str = "standard-messages-executor";
pub const SIMPLE_WORKER_NAME_DEFAULT: &str = "simple-worker";

#[derive(Debug)]
pub struct Config {
    pub service_name: String,
    pub log_level: String,
    pub otel_endpoint: Option<String>,
    pub config_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let service_name = std::env::var("WORKLOOP_SERVICE_NAME")
            .unwrap_or_else(|_| SERVICE_NAME_DEFAULT.to_string());
        if service_name.trim().is_empty() {
            return Err(Error::Config(
                "WORKLOOP_SERVICE_NAME must not be empty".to_string(),
            ));
        }

        Ok(Self {
            service_name,
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            config_path: std::env::var("WORKLOOP_CONFIG").ok().map(PathBuf::from),
        })
    }
}

// ---------------------------------------------------------------------------
// Component configuration (TOML)
// ---------------------------------------------------------------------------

/// Top-level component configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    pub queue: QueueSection,
    pub executor: WorkerSection,
    pub simple_worker: WorkerSection,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            queue: QueueSection::default(),
            executor: WorkerSection::named(EXECUTOR_NAME_DEFAULT),
            simple_worker: WorkerSection::named(SIMPLE_WORKER_NAME_DEFAULT),
        }
    }
}

impl ServiceConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: ServiceConfig = toml::from_str(content)?;
        if config.executor.name.is_empty() {
            config.executor.name = EXECUTOR_NAME_DEFAULT.to_string();
        }
        if config.simple_worker.name.is_empty() {
            config.simple_worker.name = SIMPLE_WORKER_NAME_DEFAULT.to_string();
        }
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Validate every enabled section.
    pub fn validate(&self) -> Result<()> {
        if self.queue.enabled {
            self.queue.settings()?;
        }
        if self.executor.enabled {
            if !self.queue.enabled {
                return Err(Error::Config(
                    "executor is enabled but the queue it drains is disabled".to_string(),
                ));
            }
            self.executor.settings()?;
        }
        if self.simple_worker.enabled {
            self.simple_worker.settings()?;
        }
        Ok(())
    }
}

/// `[queue]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueSection {
    pub enabled: bool,
    pub name: String,
    pub max_queue_size: usize,
    pub priorities_count: usize,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            enabled: true,
            name: QUEUE_NAME_DEFAULT.to_string(),
            max_queue_size: settings::MAX_QUEUE_SIZE_DEFAULT,
            priorities_count: settings::PRIORITIES_COUNT_DEFAULT,
        }
    }
}

impl QueueSection {
    pub fn settings(&self) -> Result<QueueSettings> {
        QueueSettings::new(self.max_queue_size, self.priorities_count)
    }
}

/// `[executor]` and `[simple_worker]` sections.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerSection {
    pub enabled: bool,
    pub name: String,
    pub wait_on_stop_ms: u64,
    pub wait_on_restart_ms: u64,
    pub min_time_per_iteration_ms: u64,
    pub timeout_runner_life_ms: u64,
    pub print_statistics_every_ms: u64,
}

impl WorkerSection {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn settings(&self) -> Result<WorkerSettings> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("worker name must not be empty".to_string()));
        }
        WorkerSettings::from_millis(
            self.wait_on_stop_ms,
            self.wait_on_restart_ms,
            self.min_time_per_iteration_ms,
            self.timeout_runner_life_ms,
            self.print_statistics_every_ms,
        )
    }
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            enabled: false,
            name: String::new(),
            wait_on_stop_ms: settings::WAIT_ON_STOP_MS_DEFAULT,
            wait_on_restart_ms: settings::WAIT_ON_RESTART_MS_DEFAULT,
            min_time_per_iteration_ms: settings::MIN_TIME_PER_ITERATION_MS_DEFAULT,
            timeout_runner_life_ms: settings::TIMEOUT_RUNNER_LIFE_MS_DEFAULT,
            print_statistics_every_ms: settings::PRINT_STATISTICS_EVERY_MS_DEFAULT,
        }
    }
}
