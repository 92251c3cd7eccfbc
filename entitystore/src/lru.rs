//! Bounded-size wrapper maintaining recency order over any inner store.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use entitystore_backend::{DeleteStatus, ReadContext, Store, WriteContext};
use entitystore_core::{Entity, EntityResult, Identifier, Query, QueryResult, StoreLabel};
use lru::LruCache;
use tracing::warn;

use crate::config::LRUStoreConfig;
use crate::queue::AsyncTaskQueue;

/// Wraps an inner [`Store`], evicting the least-recently-touched identifier
/// once the tracked set exceeds `capacity`.
///
/// Recency bookkeeping lives entirely in this layer — the `lru` crate's
/// doubly-linked-list implementation takes the place of a hand-rolled one,
/// tracking only identifiers (`LruCache<Identifier, ()>`); the entities
/// themselves stay in the inner store. Every successful `get`/`search`/`set`
/// touches the identifier's node; eviction issues a best-effort background
/// `remove` to the inner store.
pub struct LRUStore<S, E: Entity> {
    inner: S,
    order: Arc<StdMutex<LruCache<Identifier, ()>>>,
    queue: AsyncTaskQueue,
    label: StoreLabel,
    _entity: std::marker::PhantomData<fn() -> E>,
}

impl<S, E: Entity> Clone for LRUStore<S, E>
where
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            order: self.order.clone(),
            queue: self.queue.clone(),
            label: self.label.clone(),
            _entity: std::marker::PhantomData,
        }
    }
}

impl<S, E: Entity> LRUStore<S, E> {
    /// Wraps `inner`, bounding recency tracking to `config`'s capacity.
    pub fn new(inner: S, config: LRUStoreConfig<usize>) -> Self {
        let capacity = NonZeroUsize::new(config.get_capacity()).unwrap_or(NonZeroUsize::MIN);
        let queue = match config.get_max_concurrent_tasks() {
            Some(max) => AsyncTaskQueue::from_config(crate::config::QueueConfig::builder().max_concurrent_tasks(max).build()),
            None => AsyncTaskQueue::new(),
        };
        Self {
            inner,
            order: Arc::new(StdMutex::new(LruCache::new(capacity))),
            queue,
            label: StoreLabel::new_static("lru"),
            _entity: std::marker::PhantomData,
        }
    }

    /// Number of identifiers currently tracked (bounded by capacity).
    pub fn len(&self) -> usize {
        self.order.lock().expect("lru order mutex poisoned").len()
    }

    /// Whether no identifiers are currently tracked.
    pub fn is_empty(&self) -> bool {
        self.order.lock().expect("lru order mutex poisoned").is_empty()
    }
}

impl<S, E: Entity> LRUStore<S, E>
where
    S: Store<E> + Clone + Send + Sync + 'static,
    E: Send + Sync,
{
    /// Marks `identifier` as most-recently-used, evicting and
    /// background-removing the LRU entry if this pushed the tracked set over
    /// capacity. Runs as a queue barrier so concurrent touches never tear the
    /// list structure.
    async fn touch(&self, identifier: Identifier) {
        let order = self.order.clone();
        let inner = self.inner.clone();
        let evicted = self
            .queue
            .enqueue_barrier(move || async move {
                let mut order = order.lock().expect("lru order mutex poisoned");
                match order.push(identifier.clone(), ()) {
                    Some((evicted_id, _)) if evicted_id != identifier => Some(evicted_id),
                    _ => None,
                }
            })
            .await
            .unwrap_or(None);

        if let Some(evicted_id) = evicted {
            crate::metrics::record_lru_eviction();
            tokio::spawn(async move {
                if let Err(error) = inner.remove(&evicted_id, WriteContext::default()).await {
                    warn!(?evicted_id, %error, "LRU eviction's background remove failed");
                }
            });
        }
    }
}

#[async_trait]
impl<S, E> Store<E> for LRUStore<S, E>
where
    S: Store<E> + Clone + Send + Sync + 'static,
    E: Entity,
{
    async fn get(&self, identifier: &Identifier, ctx: ReadContext) -> EntityResult<Option<E>> {
        let result = self.inner.get(identifier, ctx).await?;
        if result.is_some() {
            self.touch(identifier.clone()).await;
        }
        Ok(result)
    }

    async fn search(&self, query: &Query, ctx: ReadContext) -> EntityResult<QueryResult<E>> {
        let result = self.inner.search(query, ctx).await?;
        if let Some(identifiers) = query.extract_identifiers() {
            for identifier in identifiers {
                self.touch(identifier).await;
            }
        }
        Ok(result)
    }

    async fn set(&self, entity: E, ctx: WriteContext) -> EntityResult<E> {
        let identifier = entity.identifier().clone();
        let written = self.inner.set(entity, ctx).await?;
        self.touch(identifier).await;
        Ok(written)
    }

    async fn remove_all(&self, query: &Query, ctx: WriteContext) -> EntityResult<DeleteStatus> {
        self.inner.remove_all(query, ctx).await
    }

    async fn remove(&self, identifier: &Identifier, ctx: WriteContext) -> EntityResult<DeleteStatus> {
        let status = self.inner.remove(identifier, ctx).await?;
        let order = self.order.clone();
        let identifier = identifier.clone();
        let _ = self
            .queue
            .enqueue_barrier(move || async move {
                order.lock().expect("lru order mutex poisoned").pop(&identifier);
            })
            .await;
        Ok(status)
    }

    fn label(&self) -> StoreLabel {
        self.label.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entitystore_core::entity::test_support::Widget;
    use entitystore_test::InMemoryMockStore;

    fn config(capacity: usize) -> LRUStoreConfig<usize> {
        LRUStoreConfig::builder().capacity(capacity).build()
    }

    #[tokio::test]
    async fn get_touches_recency_without_growing_past_capacity() {
        let inner = InMemoryMockStore::new();
        let id = Identifier::from_local("widget", "L1");
        inner.set(Widget::new(id.clone(), "gizmo"), WriteContext::default()).await.unwrap();

        let lru = LRUStore::new(inner, config(2));
        lru.get(&id, ReadContext::default()).await.unwrap();
        assert_eq!(lru.len(), 1);
    }

    #[tokio::test]
    async fn eviction_issues_background_remove_on_inner_store() {
        let inner = InMemoryMockStore::new();
        let ids: Vec<Identifier> = (0..3).map(|i| Identifier::from_local("widget", format!("L{i}"))).collect();
        for id in &ids {
            inner.set(Widget::new(id.clone(), "gizmo"), WriteContext::default()).await.unwrap();
        }

        let lru = LRUStore::new(inner.clone(), config(2));
        for id in &ids {
            lru.set(Widget::new(id.clone(), "gizmo"), WriteContext::default()).await.unwrap();
        }
        assert_eq!(lru.len(), 2);

        // Eviction's background remove is fire-and-forget; give it a moment.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(inner.remove_count(), 1);
    }

    #[tokio::test]
    async fn explicit_remove_drops_from_recency_tracking() {
        let inner = InMemoryMockStore::new();
        let id = Identifier::from_local("widget", "L1");
        inner.set(Widget::new(id.clone(), "gizmo"), WriteContext::default()).await.unwrap();

        let lru = LRUStore::new(inner, config(4));
        lru.get(&id, ReadContext::default()).await.unwrap();
        assert_eq!(lru.len(), 1);

        lru.remove(&id, WriteContext::default()).await.unwrap();
        assert_eq!(lru.len(), 0);
    }
}
