//! Store metrics for the entity store stack.
//!
//! Enable the `metrics` feature to use these metrics. Follows the naming
//! pattern `entitystore_backend_{operation}_{metric_type}`.

use std::time::Duration;

#[cfg(feature = "metrics")]
use std::time::Instant;

#[cfg(feature = "metrics")]
use std::sync::OnceLock;

/// Zero-cost timer for metrics collection.
pub struct Timer {
    #[cfg(feature = "metrics")]
    start: Instant,
}

impl Timer {
    /// Starts a timer, capturing the current instant if metrics are enabled.
    #[inline]
    pub fn new() -> Self {
        Self {
            #[cfg(feature = "metrics")]
            start: Instant::now(),
        }
    }

    /// Elapsed duration since timer creation (`Duration::ZERO` if metrics disabled).
    #[inline]
    pub fn elapsed(&self) -> Duration {
        #[cfg(feature = "metrics")]
        {
            self.start.elapsed()
        }
        #[cfg(not(feature = "metrics"))]
        {
            Duration::ZERO
        }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "metrics")]
fn describe_once() {
    static DESCRIBED: OnceLock<()> = OnceLock::new();
    DESCRIBED.get_or_init(|| {
        metrics::describe_counter!("entitystore_backend_read_total", "Total store read operations.");
        metrics::describe_histogram!(
            "entitystore_backend_read_duration_seconds",
            metrics::Unit::Seconds,
            "Duration of store read operations."
        );
        metrics::describe_counter!("entitystore_backend_write_total", "Total store write operations.");
        metrics::describe_histogram!(
            "entitystore_backend_write_duration_seconds",
            metrics::Unit::Seconds,
            "Duration of store write operations."
        );
        metrics::describe_counter!(
            "entitystore_backend_fill_total",
            "Total hot-tier fills performed after a cold-tier hit."
        );
        metrics::describe_counter!(
            "entitystore_backend_errors_total",
            "Total store operation errors."
        );
    });
}

/// Record a read with its duration.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_read(store: &str, duration: Duration) {
    describe_once();
    metrics::counter!("entitystore_backend_read_total", "store" => store.to_string()).increment(1);
    metrics::histogram!("entitystore_backend_read_duration_seconds", "store" => store.to_string())
        .record(duration.as_secs_f64());
}

/// Record a read with its duration (no-op when `metrics` is disabled).
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_read(_store: &str, _duration: Duration) {}

/// Record a write with its duration.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_write(store: &str, duration: Duration) {
    describe_once();
    metrics::counter!("entitystore_backend_write_total", "store" => store.to_string()).increment(1);
    metrics::histogram!("entitystore_backend_write_duration_seconds", "store" => store.to_string())
        .record(duration.as_secs_f64());
}

/// Record a write with its duration (no-op when `metrics` is disabled).
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_write(_store: &str, _duration: Duration) {}

/// Record a hot-tier fill after a cold-tier hit.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_fill(store: &str) {
    describe_once();
    metrics::counter!("entitystore_backend_fill_total", "store" => store.to_string()).increment(1);
}

/// Record a hot-tier fill (no-op when `metrics` is disabled).
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_fill(_store: &str) {}

/// Record an operation error.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_error(store: &str) {
    describe_once();
    metrics::counter!("entitystore_backend_errors_total", "store" => store.to_string()).increment(1);
}

/// Record an operation error (no-op when `metrics` is disabled).
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_error(_store: &str) {}
