#![warn(missing_docs)]
//! Task scheduling and the two identifier-keyed stores layered on it.
//!
//! [`queue::AsyncTaskQueue`] is the concurrency core: a FIFO scheduler with
//! an optional concurrency bound and a barrier phase for mutations that must
//! not interleave with in-flight reads. [`memory::InMemoryStore`] and
//! [`lru::LRUStore`] build on [`entitystore_backend::Store`] using it.

/// Typestate configuration builders for [`queue::AsyncTaskQueue`] and
/// [`lru::LRUStore`].
pub mod config;

/// Volatile, identifier-keyed store.
pub mod memory;

/// Bounded-size recency wrapper over any [`entitystore_backend::Store`].
pub mod lru;

/// Background task scheduling for remote response decoding.
pub mod offload;

/// The cooperative task scheduler underlying every store in this crate.
pub mod queue;

pub(crate) mod metrics;

pub use config::{LRUStoreConfig, NotSet, QueueConfig, QueueConfigBuilder};
pub use lru::LRUStore;
pub use memory::InMemoryStore;
pub use offload::{OffloadConfig, OffloadConfigBuilder, OffloadHandle, OffloadKey, OffloadManager, TimeoutPolicy};
pub use queue::AsyncTaskQueue;
