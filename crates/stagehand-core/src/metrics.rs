//! Metrics collection for Stagehand
//!
//! TigerStyle: Explicit metric names with units, type-safe recording.
//!
//! Instruments are recorded through OpenTelemetry when the `otel` feature is
//! enabled and exported via the Prometheus registry set up by
//! [`crate::telemetry::init_telemetry`]. Without the feature every function
//! is a no-op.

/// `status` label of an operation that succeeded
pub const STATUS_OK: &str = "ok";
/// `status` label of an operation that failed
pub const STATUS_ERROR: &str = "error";

/// The `status` label for an operation outcome
pub fn status_label<T, E>(outcome: &std::result::Result<T, E>) -> &'static str {
    if outcome.is_ok() {
        STATUS_OK
    } else {
        STATUS_ERROR
    }
}

#[cfg(feature = "otel")]
use crate::constants::*;
#[cfg(feature = "otel")]
use once_cell::sync::Lazy;
#[cfg(feature = "otel")]
use opentelemetry::metrics::{Counter, Histogram};
#[cfg(feature = "otel")]
use opentelemetry::{global, KeyValue};

#[cfg(feature = "otel")]
static ACTORS_ACTIVATED_COUNTER: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("stagehand")
        .u64_counter(METRIC_NAME_ACTORS_ACTIVATED_TOTAL)
        .with_description("Total number of actor activations")
        .init()
});

#[cfg(feature = "otel")]
static ACTORS_EVICTED_COUNTER: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("stagehand")
        .u64_counter(METRIC_NAME_ACTORS_EVICTED_TOTAL)
        .with_description("Total number of actor evictions")
        .init()
});

#[cfg(feature = "otel")]
static ACTIONS_COUNTER: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("stagehand")
        .u64_counter(METRIC_NAME_ACTIONS_TOTAL)
        .with_description("Total number of actions")
        .init()
});

#[cfg(feature = "otel")]
static ACTION_DURATION_HISTOGRAM: Lazy<Histogram<f64>> = Lazy::new(|| {
    global::meter("stagehand")
        .f64_histogram(METRIC_NAME_ACTION_DURATION_SECONDS)
        .with_description("Action duration in seconds")
        .init()
});

#[cfg(feature = "otel")]
static EVENTS_DELIVERED_COUNTER: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("stagehand")
        .u64_counter(METRIC_NAME_EVENTS_DELIVERED_TOTAL)
        .with_description("Total number of events delivered to connections")
        .init()
});

#[cfg(feature = "otel")]
static STORAGE_OPERATIONS_COUNTER: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("stagehand")
        .u64_counter(METRIC_NAME_STORAGE_OPERATIONS_TOTAL)
        .with_description("Total storage operations")
        .init()
});

#[cfg(feature = "otel")]
static STORAGE_DURATION_HISTOGRAM: Lazy<Histogram<f64>> = Lazy::new(|| {
    global::meter("stagehand")
        .f64_histogram(METRIC_NAME_STORAGE_DURATION_SECONDS)
        .with_description("Storage operation duration in seconds")
        .init()
});

/// Record an actor activation
#[cfg(feature = "otel")]
pub fn record_actor_activated(actor_type: &str) {
    ACTORS_ACTIVATED_COUNTER.add(1, &[KeyValue::new("actor_type", actor_type.to_string())]);
}

/// Record an actor eviction
#[cfg(feature = "otel")]
pub fn record_actor_evicted(actor_type: &str) {
    ACTORS_EVICTED_COUNTER.add(1, &[KeyValue::new("actor_type", actor_type.to_string())]);
}

/// Record an action
///
/// # Arguments
/// * `action` - The action name
/// * `status` - [`STATUS_OK`] or [`STATUS_ERROR`]
/// * `duration_seconds` - Duration in seconds
#[cfg(feature = "otel")]
pub fn record_action(action: &str, status: &str, duration_seconds: f64) {
    ACTIONS_COUNTER.add(
        1,
        &[
            KeyValue::new("action", action.to_string()),
            KeyValue::new("status", status.to_string()),
        ],
    );

    ACTION_DURATION_HISTOGRAM.record(
        duration_seconds,
        &[KeyValue::new("action", action.to_string())],
    );
}

/// Record events handed to connections by one broadcast
#[cfg(feature = "otel")]
pub fn record_events_delivered(count: u64) {
    EVENTS_DELIVERED_COUNTER.add(count, &[]);
}

/// Record a storage operation
///
/// # Arguments
/// * `operation` - "load", "save" or "delete"
/// * `status` - [`STATUS_OK`] or [`STATUS_ERROR`]
/// * `duration_seconds` - Duration in seconds
#[cfg(feature = "otel")]
pub fn record_storage_operation(operation: &str, status: &str, duration_seconds: f64) {
    STORAGE_OPERATIONS_COUNTER.add(
        1,
        &[
            KeyValue::new("operation", operation.to_string()),
            KeyValue::new("status", status.to_string()),
        ],
    );

    STORAGE_DURATION_HISTOGRAM.record(
        duration_seconds,
        &[KeyValue::new("operation", operation.to_string())],
    );
}

// No-op implementations when otel feature is disabled
#[cfg(not(feature = "otel"))]
pub fn record_actor_activated(_actor_type: &str) {}

#[cfg(not(feature = "otel"))]
pub fn record_actor_evicted(_actor_type: &str) {}

#[cfg(not(feature = "otel"))]
pub fn record_action(_action: &str, _status: &str, _duration_seconds: f64) {}

#[cfg(not(feature = "otel"))]
pub fn record_events_delivered(_count: u64) {}

#[cfg(not(feature = "otel"))]
pub fn record_storage_operation(_operation: &str, _status: &str, _duration_seconds: f64) {}
