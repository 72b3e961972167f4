use std::time::Duration;
use workloop::Error;
use workloop::config::{
    Config, EXECUTOR_NAME_DEFAULT, QueueSettings, SIMPLE_WORKER_NAME_DEFAULT, ServiceConfig,
    WorkerSettings,
};

// Environment variables are process-global; keep every env-touching check in
// this one test.
#[test]
fn config_from_env_applies_overrides_and_defaults() {
    unsafe {
        std::env::remove_var("WORKLOOP_SERVICE_NAME");
        std::env::remove_var("OTEL_ENDPOINT");
        std::env::remove_var("WORKLOOP_CONFIG");
        std::env::remove_var("LOG_LEVEL");
    }
    let config = Config::from_env().unwrap();
    assert_eq!(config.service_name, "workloop");
    assert_eq!(config.log_level, "info");
    assert!(config.otel_endpoint.is_none());
    assert!(config.config_path.is_none());

    unsafe {
        std::env::set_var("WORKLOOP_SERVICE_NAME", "orders");
        std::env::set_var("OTEL_ENDPOINT", "http://localhost:4317");
        std::env::set_var("WORKLOOP_CONFIG", "/etc/workloop.toml");
    }
    let config = Config::from_env().unwrap();
    assert_eq!(config.service_name, "orders");
    assert_eq!(config.otel_endpoint.as_deref(), Some("http://localhost:4317"));
    assert_eq!(
        config.config_path.as_deref(),
        Some(std::path::Path::new("/etc/workloop.toml"))
    );

    unsafe {
        std::env::set_var("WORKLOOP_SERVICE_NAME", "  ");
    }
    assert!(Config::from_env().is_err());

    unsafe {
        std::env::remove_var("WORKLOOP_SERVICE_NAME");
        std::env::remove_var("OTEL_ENDPOINT");
        std::env::remove_var("WORKLOOP_CONFIG");
    }
}

#[test]
fn default_service_config_enables_only_the_queue() {
    let config = ServiceConfig::default();
    assert!(config.queue.enabled);
    assert!(!config.executor.enabled);
    assert!(!config.simple_worker.enabled);
    assert_eq!(config.queue.max_queue_size, 10_000);
    assert_eq!(config.queue.priorities_count, 8);
    assert_eq!(config.executor.name, EXECUTOR_NAME_DEFAULT);
    assert_eq!(config.simple_worker.name, SIMPLE_WORKER_NAME_DEFAULT);
    config.validate().unwrap();
}

#[test]
fn toml_sections_override_defaults() {
    let config = ServiceConfig::from_toml_str(
        r#"
        [queue]
        max_queue_size = 50
        priorities_count = 3

        [executor]
        enabled = true
        min_time_per_iteration_ms = 25
        wait_on_restart_ms = 500
        "#,
    )
    .unwrap();

    assert_eq!(config.queue.settings().unwrap(), QueueSettings::new(50, 3).unwrap());
    assert!(config.executor.enabled);
    assert_eq!(config.executor.name, EXECUTOR_NAME_DEFAULT);

    let settings = config.executor.settings().unwrap();
    assert_eq!(settings.min_time_per_iteration(), Duration::from_millis(25));
    assert_eq!(settings.wait_on_restart(), Duration::from_millis(500));
    assert_eq!(settings.wait_on_stop(), Duration::from_millis(3_000));
    assert_eq!(settings.timeout_runner_life(), Duration::from_millis(20_000));
    assert_eq!(settings.print_statistics_every(), Duration::from_millis(1_000));
}

#[test]
fn empty_document_is_the_default_config() {
    let config = ServiceConfig::from_toml_str("").unwrap();
    assert!(config.queue.enabled);
    assert_eq!(config.executor.name, EXECUTOR_NAME_DEFAULT);
}

#[test]
fn zero_interval_is_rejected() {
    let result = ServiceConfig::from_toml_str(
        r#"
        [simple_worker]
        enabled = true
        wait_on_stop_ms = 0
        "#,
    );
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn disabled_sections_are_not_validated() {
    let config = ServiceConfig::from_toml_str(
        r#"
        [simple_worker]
        wait_on_stop_ms = 0
        "#,
    )
    .unwrap();
    assert!(!config.simple_worker.enabled);
}

#[test]
fn liveness_timeout_must_exceed_iteration_time() {
    let result = ServiceConfig::from_toml_str(
        r#"
        [executor]
        enabled = true
        min_time_per_iteration_ms = 5000
        timeout_runner_life_ms = 5000
        "#,
    );
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn executor_requires_the_queue() {
    let result = ServiceConfig::from_toml_str(
        r#"
        [queue]
        enabled = false

        [executor]
        enabled = true
        "#,
    );
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn unknown_fields_are_rejected() {
    let result = ServiceConfig::from_toml_str(
        r#"
        [queue]
        max_size = 10
        "#,
    );
    assert!(matches!(result, Err(Error::Toml(_))));
}

#[test]
fn load_reads_a_file() {
    let path = std::env::temp_dir().join(format!("workloop-{}.toml", uuid::Uuid::new_v4()));
    std::fs::write(&path, "[queue]\npriorities_count = 2\n").unwrap();

    let config = ServiceConfig::load(&path).unwrap();
    assert_eq!(config.queue.priorities_count, 2);

    std::fs::remove_file(&path).unwrap();
    assert!(matches!(ServiceConfig::load(&path), Err(Error::Config(_))));
}

#[test]
fn worker_settings_builder_keeps_defaults_and_validates() {
    let settings = WorkerSettings::builder().build().unwrap();
    assert_eq!(settings, WorkerSettings::default());

    let err = WorkerSettings::builder()
        .min_time_per_iteration(Duration::ZERO)
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("min_time_per_iteration_ms"));

    assert!(WorkerSettings::from_millis(1, 1, 1, 2, 1).is_ok());
    assert!(WorkerSettings::from_millis(1, 1, 2, 1, 1).is_err());
}

#[test]
fn queue_settings_reject_zero() {
    assert!(QueueSettings::new(0, 1).is_err());
    assert!(QueueSettings::new(1, 0).is_err());
    let settings = QueueSettings::default();
    assert_eq!(settings.capacity(), 10_000);
    assert_eq!(settings.lane_count(), 8);
}
