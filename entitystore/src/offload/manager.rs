//! OffloadManager implementation for background task execution.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use entitystore_core::Identifier;
use smol_str::SmolStr;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info_span, warn};

use super::policy::{OffloadConfig, TimeoutPolicy};

#[cfg(feature = "metrics")]
use crate::metrics::offload as offload_metrics;

/// Key for identifying offloaded tasks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OffloadKey {
    /// Key derived from an identifier (enables deduplication for decode/fetch tasks).
    Remote(Identifier),
    /// Auto-generated key for non-identifier tasks with a kind prefix.
    Generated {
        /// Kind of the task (e.g., "decode", "evict", "sync").
        kind: SmolStr,
        /// Unique identifier within the kind.
        id: u64,
    },
}

impl OffloadKey {
    /// Returns the key type for metrics labels.
    ///
    /// For `Remote` keys returns "remote".
    /// For `Generated` keys returns the kind.
    pub fn key_type(&self) -> SmolStr {
        match self {
            Self::Remote(_) => SmolStr::new_static("remote"),
            Self::Generated { kind, .. } => kind.clone(),
        }
    }
}

impl From<Identifier> for OffloadKey {
    fn from(identifier: Identifier) -> Self {
        Self::Remote(identifier)
    }
}

/// Handle to a spawned offload task.
#[derive(Debug)]
pub struct OffloadHandle {
    handle: JoinHandle<()>,
}

impl OffloadHandle {
    /// Check if the task is finished.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Abort the task.
    pub fn abort(&self) {
        self.handle.abort();
    }
}

/// Internal state shared across clones.
#[derive(Debug)]
struct OffloadManagerInner {
    config: OffloadConfig,
    tasks: DashMap<OffloadKey, OffloadHandle>,
    key_counter: AtomicU64,
}

/// Manager for offloading tasks to background execution.
///
/// Supports task deduplication, timeout policies, and metrics collection.
/// Used to schedule remote response decoding off the request path (see
/// [`crate::offload`] module docs).
#[derive(Clone, Debug)]
pub struct OffloadManager {
    inner: Arc<OffloadManagerInner>,
}

impl OffloadManager {
    /// Create a new OffloadManager with the given configuration.
    pub fn new(config: OffloadConfig) -> Self {
        Self {
            inner: Arc::new(OffloadManagerInner {
                config,
                tasks: DashMap::new(),
                key_counter: AtomicU64::new(0),
            }),
        }
    }

    /// Create a new OffloadManager with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(OffloadConfig::default())
    }

    /// Generate next auto-incrementing key with the given kind.
    fn next_key(&self, kind: impl Into<SmolStr>) -> OffloadKey {
        let id = self.inner.key_counter.fetch_add(1, Ordering::Relaxed);
        OffloadKey::Generated {
            kind: kind.into(),
            id,
        }
    }

    /// Spawn a task with auto-generated key and specified kind.
    ///
    /// The kind is used for metrics labels and tracing.
    pub fn spawn<F>(&self, kind: impl Into<SmolStr>, task: F) -> OffloadKey
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let key = self.next_key(kind);
        self.spawn_with_key(key.clone(), task);
        key
    }

    /// Spawn a task with a specific key.
    ///
    /// If a task with the same key is already in flight and deduplication
    /// is enabled, the new task will be skipped.
    ///
    /// Returns `true` if the task was spawned, `false` if it was deduplicated.
    pub fn spawn_with_key<K, F>(&self, key: K, task: F) -> bool
    where
        K: Into<OffloadKey>,
        F: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();

        if self.inner.config.deduplicate
            && matches!(&key, OffloadKey::Remote(_))
            && self.inner.tasks.contains_key(&key)
        {
            debug!(?key, "Task deduplicated - already in flight");
            #[cfg(feature = "metrics")]
            offload_metrics::record_deduplicated(&key.key_type());
            return false;
        }

        let key_type = key.key_type();
        let handle = self.spawn_inner(task, key.clone());
        self.inner.tasks.insert(key, handle);

        #[cfg(feature = "metrics")]
        offload_metrics::record_spawned(&key_type);
        #[cfg(not(feature = "metrics"))]
        let _ = key_type;

        true
    }

    /// Get the number of currently active tasks.
    pub fn active_task_count(&self) -> usize {
        self.inner.tasks.iter().filter(|e| !e.is_finished()).count()
    }

    /// Get the total number of tracked tasks (including finished).
    pub fn total_task_count(&self) -> usize {
        self.inner.tasks.len()
    }

    /// Clean up finished task handles.
    pub fn cleanup_finished(&self) {
        self.inner.tasks.retain(|_, handle| !handle.is_finished());
    }

    /// Cancel all running tasks.
    pub fn cancel_all(&self) {
        for entry in self.inner.tasks.iter() {
            entry.abort();
        }
    }

    /// Cancel a specific task by key.
    pub fn cancel(&self, key: &OffloadKey) -> bool {
        if let Some(entry) = self.inner.tasks.get(key) {
            entry.abort();
            true
        } else {
            false
        }
    }

    /// Check if a task with the given key is in flight.
    pub fn is_in_flight(&self, key: &OffloadKey) -> bool {
        self.inner.tasks.get(key).is_some_and(|h| !h.is_finished())
    }

    /// Wait for all currently tracked tasks to complete.
    pub async fn wait_all(&self) {
        loop {
            self.cleanup_finished();
            if self.inner.tasks.is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
    }

    /// Wait for all tasks with a timeout.
    ///
    /// Returns `true` if all tasks completed within the timeout,
    /// `false` if the timeout was reached.
    pub async fn wait_all_timeout(&self, timeout: std::time::Duration) -> bool {
        tokio::time::timeout(timeout, self.wait_all()).await.is_ok()
    }

    fn spawn_inner<F>(&self, task: F, key: OffloadKey) -> OffloadHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let timeout_policy = self.inner.config.timeout_policy.clone();
        let inner = self.inner.clone();
        let key_type = key.key_type();

        let span = info_span!(
            "offload_task",
            key_type = %key_type,
            key = ?key,
        );

        let handle = match timeout_policy {
            TimeoutPolicy::None => tokio::spawn(
                async move {
                    let start = Instant::now();
                    task.await;
                    inner.tasks.remove(&key);
                    #[cfg(feature = "metrics")]
                    offload_metrics::record_completed(&key_type, start.elapsed());
                    #[cfg(not(feature = "metrics"))]
                    let _ = start;
                }
                .instrument(span),
            ),
            TimeoutPolicy::Cancel(duration) => tokio::spawn(
                async move {
                    let start = Instant::now();
                    match tokio::time::timeout(duration, task).await {
                        Ok(()) => {
                            #[cfg(feature = "metrics")]
                            offload_metrics::record_completed(&key_type, start.elapsed());
                        }
                        Err(_) => {
                            warn!(?key, "Offload task cancelled due to timeout");
                            #[cfg(feature = "metrics")]
                            offload_metrics::record_timeout(&key_type, start.elapsed());
                        }
                    }
                    #[cfg(not(feature = "metrics"))]
                    let _ = start;
                    inner.tasks.remove(&key);
                }
                .instrument(span),
            ),
            TimeoutPolicy::Warn(duration) => tokio::spawn(
                async move {
                    let start = Instant::now();
                    task.await;
                    let elapsed = start.elapsed();
                    if elapsed > duration {
                        warn!(
                            ?key,
                            elapsed_ms = elapsed.as_millis(),
                            threshold_ms = duration.as_millis(),
                            "Offload task exceeded timeout threshold"
                        );
                    }
                    inner.tasks.remove(&key);
                    #[cfg(feature = "metrics")]
                    offload_metrics::record_completed(&key_type, elapsed);
                }
                .instrument(span),
            ),
        };

        OffloadHandle { handle }
    }
}

impl Default for OffloadManager {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl entitystore_core::Offload for OffloadManager {
    fn spawn<F>(&self, kind: impl Into<SmolStr>, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        OffloadManager::spawn(self, kind, future);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[tokio::test]
    async fn spawn_runs_task_to_completion() {
        let manager = OffloadManager::with_defaults();
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();
        manager.spawn("test", async move {
            ran_clone.store(true, Ordering::SeqCst);
        });
        manager.wait_all_timeout(Duration::from_millis(200)).await;
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn duplicate_key_is_deduplicated_when_in_flight() {
        let manager = OffloadManager::new(OffloadConfig::builder().deduplicate(true).build());
        let identifier = Identifier::from_local("widget", "L1");
        let started = Arc::new(tokio::sync::Notify::new());
        let release = Arc::new(tokio::sync::Notify::new());
        let (started_clone, release_clone) = (started.clone(), release.clone());

        let first = manager.spawn_with_key(identifier.clone(), async move {
            started_clone.notify_one();
            release_clone.notified().await;
        });
        started.notified().await;
        assert!(first);

        let second = manager.spawn_with_key(identifier, async {});
        assert!(!second);

        release.notify_one();
        manager.wait_all_timeout(Duration::from_millis(200)).await;
    }
}
