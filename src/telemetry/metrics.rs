//! Metric instrument factories for workloop.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"workloop"` meter; without a
//! provider they are no-ops.

use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("workloop")
}

/// Counter: completed worker iterations.
/// Labels: `worker`.
pub fn worker_iterations() -> Counter<u64> {
    meter()
        .u64_counter("workloop.worker.iterations")
        .with_description("Number of completed worker iterations")
        .build()
}

/// Histogram: iteration duration in milliseconds.
/// Labels: `worker`.
pub fn iteration_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("workloop.worker.iteration.duration_ms")
        .with_description("Worker iteration duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Histogram: pacing sleep between iterations in milliseconds.
/// Labels: `worker`.
pub fn sleep_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("workloop.worker.sleep.duration_ms")
        .with_description("Pacing sleep between worker iterations")
        .with_unit("ms")
        .build()
}

/// Counter: automatic restarts.
/// Labels: `worker`.
pub fn worker_restarts() -> Counter<u64> {
    meter()
        .u64_counter("workloop.worker.restarts")
        .with_description("Number of automatic worker restarts")
        .build()
}

/// Gauge: share of the last statistics window spent in iterations.
/// Labels: `worker`.
pub fn busy_percent() -> Gauge<u64> {
    meter()
        .u64_gauge("workloop.worker.busy_percent")
        .with_description("Percent of wall time spent executing iterations")
        .with_unit("%")
        .build()
}

/// Counter: queue-level operations (push, poll).
/// Labels: `queue`, `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("workloop.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Counter: messages handed to the handler registry.
/// Labels: `worker`, `kind`, `result` ("ok" | "error").
pub fn messages_dispatched() -> Counter<u64> {
    meter()
        .u64_counter("workloop.messages.dispatched")
        .with_description("Number of dispatched messages")
        .build()
}
