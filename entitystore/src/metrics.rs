//! Scheduling and in-memory-tier metrics.
//!
//! Enable the `metrics` feature to use these metrics. Follows the naming
//! pattern `entitystore_{operation}_{metric_type}`.

use std::time::Duration;

#[cfg(feature = "metrics")]
use std::sync::OnceLock;

#[cfg(feature = "metrics")]
fn describe_once() {
    static DESCRIBED: OnceLock<()> = OnceLock::new();
    DESCRIBED.get_or_init(|| {
        metrics::describe_counter!("entitystore_queue_tasks_total", "Total tasks enqueued on an AsyncTaskQueue.");
        metrics::describe_counter!("entitystore_queue_tasks_timeout_total", "Total tasks whose queue slot released on timeout.");
        metrics::describe_histogram!(
            "entitystore_queue_wait_duration_seconds",
            metrics::Unit::Seconds,
            "Time a task spent waiting for its queue slot before running."
        );
        metrics::describe_histogram!(
            "entitystore_queue_barrier_duration_seconds",
            metrics::Unit::Seconds,
            "Time a barrier phase held exclusive access to the queue."
        );
        metrics::describe_counter!("entitystore_lru_evictions_total", "Total entries evicted from an LRUStore's recency tracker.");

        metrics::describe_counter!("entitystore_offload_tasks_spawned_total", "Total offload tasks spawned.");
        metrics::describe_counter!("entitystore_offload_tasks_completed_total", "Total offload tasks completed.");
        metrics::describe_counter!("entitystore_offload_tasks_timeout_total", "Total offload tasks whose timeout policy fired.");
        metrics::describe_counter!("entitystore_offload_tasks_deduplicated_total", "Total offload tasks joined onto an in-flight task.");
        metrics::describe_gauge!("entitystore_offload_tasks_active", "Currently running offload tasks.");
        metrics::describe_histogram!(
            "entitystore_offload_task_duration_seconds",
            metrics::Unit::Seconds,
            "Duration of an offload task from spawn to completion."
        );
    });
}

/// Record a task entering the queue and how long it waited for its slot.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_queue_task(wait: Duration) {
    describe_once();
    metrics::counter!("entitystore_queue_tasks_total").increment(1);
    metrics::histogram!("entitystore_queue_wait_duration_seconds").record(wait.as_secs_f64());
}

/// Record a task entering the queue (no-op when `metrics` is disabled).
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_queue_task(_wait: Duration) {}

/// Record a task whose slot was released by timeout rather than completion.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_queue_timeout() {
    describe_once();
    metrics::counter!("entitystore_queue_tasks_timeout_total").increment(1);
}

/// Record a queue timeout (no-op when `metrics` is disabled).
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_queue_timeout() {}

/// Record a barrier phase's held duration.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_barrier(duration: Duration) {
    describe_once();
    metrics::histogram!("entitystore_queue_barrier_duration_seconds").record(duration.as_secs_f64());
}

/// Record a barrier phase's duration (no-op when `metrics` is disabled).
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_barrier(_duration: Duration) {}

/// Record an LRU eviction.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_lru_eviction() {
    describe_once();
    metrics::counter!("entitystore_lru_evictions_total").increment(1);
}

/// Record an LRU eviction (no-op when `metrics` is disabled).
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_lru_eviction() {}

/// Offload task lifecycle metrics, used by [`crate::offload::OffloadManager`].
pub(crate) mod offload {
    #[cfg(feature = "metrics")]
    use super::describe_once;

    #[cfg(feature = "metrics")]
    #[inline]
    pub fn record_spawned(key_type: &str) {
        describe_once();
        metrics::counter!("entitystore_offload_tasks_spawned_total", "key_type" => key_type.to_string()).increment(1);
        metrics::gauge!("entitystore_offload_tasks_active", "key_type" => key_type.to_string()).increment(1.0);
    }
    #[cfg(not(feature = "metrics"))]
    #[inline]
    pub fn record_spawned(_key_type: &str) {}

    #[cfg(feature = "metrics")]
    #[inline]
    pub fn record_completed(key_type: &str, duration: std::time::Duration) {
        describe_once();
        metrics::counter!("entitystore_offload_tasks_completed_total", "key_type" => key_type.to_string()).increment(1);
        metrics::gauge!("entitystore_offload_tasks_active", "key_type" => key_type.to_string()).decrement(1.0);
        metrics::histogram!("entitystore_offload_task_duration_seconds", "key_type" => key_type.to_string())
            .record(duration.as_secs_f64());
    }
    #[cfg(not(feature = "metrics"))]
    #[inline]
    pub fn record_completed(_key_type: &str, _duration: std::time::Duration) {}

    #[cfg(feature = "metrics")]
    #[inline]
    pub fn record_timeout(key_type: &str, duration: std::time::Duration) {
        describe_once();
        metrics::counter!("entitystore_offload_tasks_timeout_total", "key_type" => key_type.to_string()).increment(1);
        metrics::gauge!("entitystore_offload_tasks_active", "key_type" => key_type.to_string()).decrement(1.0);
        metrics::histogram!("entitystore_offload_task_duration_seconds", "key_type" => key_type.to_string())
            .record(duration.as_secs_f64());
    }
    #[cfg(not(feature = "metrics"))]
    #[inline]
    pub fn record_timeout(_key_type: &str, _duration: std::time::Duration) {}

    #[cfg(feature = "metrics")]
    #[inline]
    pub fn record_deduplicated(key_type: &str) {
        describe_once();
        metrics::counter!("entitystore_offload_tasks_deduplicated_total", "key_type" => key_type.to_string()).increment(1);
    }
    #[cfg(not(feature = "metrics"))]
    #[inline]
    pub fn record_deduplicated(_key_type: &str) {}
}
