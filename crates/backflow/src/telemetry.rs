//! # Metrics
//!
//! With the `metrics` feature enabled, dispatch sessions report OpenTelemetry
//! counters and histograms through handles registered by
//! [`init_metric_handles`]. Without the feature every recording function
//! compiles to a no-op.
//!
//! ## Instruments
//!
//! - `dispatches`: remote calls issued
//! - `dispatch_errors`: remote calls that failed or timed out
//! - `calls_inflight`: remote calls currently awaiting a response
//! - `call_duration`: remote call latency in milliseconds
//! - `items_processed`: items a session finished processing
//! - `source_pauses`: times a session paused its source
//!
//! Handles are process-global. Registering them again is a no-op.

#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

#[cfg(feature = "metrics")]
static DISPATCHES: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static DISPATCH_ERRORS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static CALLS_INFLIGHT: OnceLock<UpDownCounter<i64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static CALL_DURATION_MS: OnceLock<Histogram<f64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static ITEMS_PROCESSED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static SOURCE_PAUSES: OnceLock<Counter<u64>> = OnceLock::new();

/// Registers the instruments this crate records into.
#[cfg(feature = "metrics")]
pub fn init_metric_handles(meter: &Meter) {
    let _ = DISPATCHES.set(
        meter
            .u64_counter("dispatches")
            .with_description("Remote calls issued")
            .build(),
    );

    let _ = DISPATCH_ERRORS.set(
        meter
            .u64_counter("dispatch_errors")
            .with_description("Remote calls that failed or timed out")
            .build(),
    );

    let _ = CALLS_INFLIGHT.set(
        meter
            .i64_up_down_counter("calls_inflight")
            .with_description("Remote calls awaiting a response")
            .build(),
    );

    let _ = CALL_DURATION_MS.set(
        meter
            .f64_histogram("call_duration")
            .with_unit("ms")
            .with_description("Remote call latency")
            .build(),
    );

    let _ = ITEMS_PROCESSED.set(
        meter
            .u64_counter("items_processed")
            .with_description("Items processed by dispatch sessions")
            .build(),
    );

    let _ = SOURCE_PAUSES.set(
        meter
            .u64_counter("source_pauses")
            .with_description("Times a session paused its source")
            .build(),
    );
}

#[cfg(feature = "metrics")]
pub(crate) fn increment_dispatches() {
    if let Some(counter) = DISPATCHES.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn increment_dispatches() {}

#[cfg(feature = "metrics")]
pub(crate) fn increment_dispatch_errors() {
    if let Some(counter) = DISPATCH_ERRORS.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn increment_dispatch_errors() {}

#[cfg(feature = "metrics")]
pub(crate) fn increment_calls_inflight() {
    if let Some(counter) = CALLS_INFLIGHT.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn increment_calls_inflight() {}

#[cfg(feature = "metrics")]
pub(crate) fn decrement_calls_inflight() {
    if let Some(counter) = CALLS_INFLIGHT.get() {
        counter.add(-1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn decrement_calls_inflight() {}

#[cfg(feature = "metrics")]
pub(crate) fn record_call_duration(duration_ms: f64) {
    if let Some(histogram) = CALL_DURATION_MS.get() {
        histogram.record(duration_ms, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_call_duration(_duration_ms: f64) {}

#[cfg(feature = "metrics")]
pub(crate) fn increment_items_processed(count: u64) {
    if let Some(counter) = ITEMS_PROCESSED.get() {
        counter.add(count, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn increment_items_processed(_count: u64) {}

#[cfg(feature = "metrics")]
pub(crate) fn increment_source_pauses() {
    if let Some(counter) = SOURCE_PAUSES.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn increment_source_pauses() {}
