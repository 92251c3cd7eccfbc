//! Per-store configuration builders.
//!
//! Each store type that takes tunable parameters (queue concurrency, LRU
//! capacity) gets a small builder here rather than a constructor with a long
//! positional argument list. [`LRUStoreConfig`] uses a typestate
//! pattern via `NotSet`: the required `capacity`
//! field is a type parameter, so `build()` only compiles once it's been set.

use std::time::Duration;

/// Marker type for an unset required builder field.
///
/// If you see `NotSet` in a compiler error, you haven't called the
/// corresponding builder method yet.
pub struct NotSet;

/// Tuning knobs for an [`crate::queue::AsyncTaskQueue`].
///
/// Both fields are optional: an unbounded queue with no per-task timeout is
/// a reasonable default and needs no builder at all.
#[derive(Debug, Clone, Default)]
pub struct QueueConfig {
    max_concurrent_tasks: Option<usize>,
    default_timeout: Option<Duration>,
}

impl QueueConfig {
    /// Creates a builder with no limits set.
    pub fn builder() -> QueueConfigBuilder {
        QueueConfigBuilder::default()
    }

    /// Bound on concurrently-running non-barrier tasks, `None` if unbounded.
    pub fn max_concurrent_tasks(&self) -> Option<usize> {
        self.max_concurrent_tasks
    }

    /// Default per-task timeout applied by `enqueue`, if any.
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }
}

/// Builder for [`QueueConfig`].
#[derive(Debug, Clone, Default)]
pub struct QueueConfigBuilder {
    max_concurrent_tasks: Option<usize>,
    default_timeout: Option<Duration>,
}

impl QueueConfigBuilder {
    /// Bounds the number of non-barrier tasks that may run concurrently.
    pub fn max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = Some(max);
        self
    }

    /// Sets a default per-task timeout, applied unless a call overrides it.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Builds the [`QueueConfig`].
    pub fn build(self) -> QueueConfig {
        QueueConfig {
            max_concurrent_tasks: self.max_concurrent_tasks,
            default_timeout: self.default_timeout,
        }
    }
}

/// Tuning knobs for an [`crate::lru::LRUStore`].
///
/// `capacity` is required — there's no sane default bound for an LRU. The
/// type parameter enforces that at compile time: [`LRUStoreConfig::builder`]
/// starts at `LRUStoreConfig<NotSet>`, and only `LRUStoreConfig<usize>`
/// exposes `build`.
#[derive(Debug, Clone)]
pub struct LRUStoreConfig<Capacity = NotSet> {
    capacity: Capacity,
    max_concurrent_tasks: Option<usize>,
}

impl LRUStoreConfig<NotSet> {
    /// Creates a builder with no capacity set.
    pub fn builder() -> Self {
        Self {
            capacity: NotSet,
            max_concurrent_tasks: None,
        }
    }
}

impl Default for LRUStoreConfig<NotSet> {
    fn default() -> Self {
        Self::builder()
    }
}

impl<Capacity> LRUStoreConfig<Capacity> {
    /// Sets the maximum number of entries the store retains.
    pub fn capacity(self, capacity: usize) -> LRUStoreConfig<usize> {
        LRUStoreConfig {
            capacity,
            max_concurrent_tasks: self.max_concurrent_tasks,
        }
    }

    /// Bounds the barrier queue's non-exclusive task concurrency.
    pub fn max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = Some(max);
        self
    }
}

impl LRUStoreConfig<usize> {
    /// Bound on the number of retained entries.
    pub fn get_capacity(&self) -> usize {
        self.capacity
    }

    /// Queue concurrency bound to apply to the store's barrier queue.
    pub fn get_max_concurrent_tasks(&self) -> Option<usize> {
        self.max_concurrent_tasks
    }

    /// Builds the [`LRUStoreConfig`].
    pub fn build(self) -> Self {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_config_defaults_to_unbounded() {
        let config = QueueConfig::default();
        assert_eq!(config.max_concurrent_tasks(), None);
        assert_eq!(config.default_timeout(), None);
    }

    #[test]
    fn queue_config_builder_sets_fields() {
        let config = QueueConfig::builder()
            .max_concurrent_tasks(4)
            .default_timeout(Duration::from_millis(50))
            .build();
        assert_eq!(config.max_concurrent_tasks(), Some(4));
        assert_eq!(config.default_timeout(), Some(Duration::from_millis(50)));
    }

    #[test]
    fn lru_config_requires_capacity_before_build() {
        let config = LRUStoreConfig::builder().capacity(100).build();
        assert_eq!(config.get_capacity(), 100);
        assert_eq!(config.get_max_concurrent_tasks(), None);
    }
}
