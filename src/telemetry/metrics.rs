//! Metric instrument factories for beseri-rs.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"beseri-rs"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for beseri-rs instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("beseri-rs")
}

/// Counter: number of tasks published by producers.
/// Labels: `task_type`.
pub fn tasks_enqueued() -> Counter<u64> {
    meter()
        .u64_counter("beseri.tasks.enqueued")
        .with_description("Number of tasks enqueued")
        .build()
}

/// Counter: how claimed tasks left the in-flight area.
/// Labels: `task_type`, `result` ("completed" | "requeued" | "dead" | "error").
pub fn task_settlements() -> Counter<u64> {
    meter()
        .u64_counter("beseri.tasks.settled")
        .with_description("Number of claimed tasks settled, by result")
        .build()
}

/// Counter: store operations on the queue areas.
/// Labels: `queue`, `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("beseri.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Histogram: executor run time in milliseconds.
/// Labels: `task_type`.
pub fn execution_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("beseri.execution.duration_ms")
        .with_description("Executor run time in milliseconds")
        .with_unit("ms")
        .build()
}

/// Counter: in-flight tasks returned to the main queue by the reaper.
/// Labels: `reason` ("stale" | "orphan").
pub fn reaper_reclaimed() -> Counter<u64> {
    meter()
        .u64_counter("beseri.reaper.reclaimed")
        .with_description("Tasks reclaimed from the in-flight area")
        .build()
}

/// Counter: unparseable task records dropped.
/// Labels: `source` ("dispatch" | "reaper").
pub fn malformed_dropped() -> Counter<u64> {
    meter()
        .u64_counter("beseri.tasks.malformed")
        .with_description("Malformed task records dropped")
        .build()
}
