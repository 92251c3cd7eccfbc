//! Two-tier [`CacheStore`] composition and [`recoverable`]'s
//! mirrored-disk recovery.
//!
//! # Read strategy
//! 1. Check hot → hit: return.
//! 2. Check cold → hit: fill hot, return.
//! 3. Miss: return `None`.
//!
//! # Write strategy
//! Write-through: both tiers are written in parallel; the call succeeds if
//! at least one tier accepts the write, since a composed cache tolerates
//! one tier being temporarily unavailable.
//!
//! # At-most-one-fill guarantee
//! Concurrent cold-tier hits for the same identifier must not race to fill
//! the hot tier more than once. A per-identifier single-flight gate
//! ([`FillGate`]) ensures only the first caller performs the fill; every
//! other concurrent caller waits for it and then re-reads the hot tier.

pub mod recoverable;

use async_trait::async_trait;
use dashmap::DashMap;
use entitystore_core::{EntityResult, Entity, Identifier, Query, QueryResult, StoreLabel};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::metrics::Timer;
use crate::store::{DeleteStatus, ReadContext, Store, WriteContext};

/// Per-identifier single-flight gate preventing a cold-tier hit from being
/// filled into the hot tier more than once concurrently.
#[derive(Default)]
struct FillGate {
    inflight: DashMap<Identifier, Arc<Notify>>,
}

impl FillGate {
    /// Runs `fill` at most once per identifier among concurrent callers.
    /// Callers that lose the race await the winner's completion instead of
    /// running `fill` themselves.
    async fn run_once<F, Fut>(&self, identifier: &Identifier, fill: F)
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let notify = Arc::new(Notify::new());
        match self.inflight.entry(identifier.clone()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                let waiter = entry.get().clone();
                drop(entry);
                waiter.notified().await;
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(notify.clone());
                fill().await;
                self.inflight.remove(identifier);
                notify.notify_waiters();
            }
        }
    }
}

/// A two-tier cache composing a fast `Hot` store in front of a slower `Cold`
/// store, presenting the same [`Store`] contract as either tier alone.
pub struct CacheStore<Hot, Cold> {
    hot: Hot,
    cold: Cold,
    fill_gate: FillGate,
    label: StoreLabel,
}

impl<Hot, Cold> CacheStore<Hot, Cold> {
    /// Composes `hot` in front of `cold`.
    pub fn new(hot: Hot, cold: Cold) -> Self {
        Self {
            hot,
            cold,
            fill_gate: FillGate::default(),
            label: StoreLabel::new_static("cache"),
        }
    }

    /// Overrides the composed store's label (used for nested composition
    /// source paths, e.g. `"cache.inner"`).
    pub fn with_label(mut self, label: impl Into<StoreLabel>) -> Self {
        self.label = label.into();
        self
    }
}

#[async_trait]
impl<E, Hot, Cold> Store<E> for CacheStore<Hot, Cold>
where
    E: Entity,
    Hot: Store<E>,
    Cold: Store<E>,
{
    #[tracing::instrument(skip(self), level = "trace")]
    async fn get(&self, identifier: &Identifier, ctx: ReadContext) -> EntityResult<Option<E>> {
        if ctx != ReadContext::BypassHot {
            let timer = Timer::new();
            let hot_hit = self.hot.get(identifier, ReadContext::Default).await?;
            crate::metrics::record_read(self.label.as_str(), timer.elapsed());
            if hot_hit.is_some() {
                return Ok(hot_hit);
            }
        }

        let cold_hit = self.cold.get(identifier, ctx).await?;
        if let Some(entity) = &cold_hit {
            let entity = entity.clone();
            let hot = &self.hot;
            self.fill_gate
                .run_once(identifier, || async move {
                    if let Err(error) = hot.set(entity, WriteContext::FromRemote).await {
                        tracing::warn!(?error, "hot-tier fill failed after cold-tier hit");
                    } else {
                        crate::metrics::record_fill(self.label.as_str());
                    }
                })
                .await;
        }
        Ok(cold_hit)
    }

    #[tracing::instrument(skip(self), level = "trace")]
    async fn search(&self, query: &Query, ctx: ReadContext) -> EntityResult<QueryResult<E>> {
        // A query without a fully enumerable, unpaginated identifier set has
        // no deterministic way to reconcile hot/cold partial results, so it
        // bypasses the hot tier entirely and goes straight to cold. This is
        // the canonical (unrefined) behavior for non-deterministic search.
        if ctx == ReadContext::BypassHot || !query.is_enumerable_identifier_lookup() {
            return self.cold.search(query, ctx).await;
        }
        self.hot.search(query, ReadContext::Default).await
    }

    #[tracing::instrument(skip(self, entity), level = "trace")]
    async fn set(&self, entity: E, ctx: WriteContext) -> EntityResult<E> {
        let timer = Timer::new();
        let (hot_result, cold_result) =
            futures::join!(self.hot.set(entity.clone(), ctx), self.cold.set(entity, ctx));
        crate::metrics::record_write(self.label.as_str(), timer.elapsed());

        match (hot_result, cold_result) {
            (Ok(stored), _) => Ok(stored),
            (Err(hot_error), Ok(stored)) => {
                tracing::warn!(error = ?hot_error, "hot-tier write failed");
                Ok(stored)
            }
            (Err(hot_error), Err(cold_error)) => {
                tracing::error!(?hot_error, ?cold_error, "both tiers failed to write");
                crate::metrics::record_error(self.label.as_str());
                Err(cold_error)
            }
        }
    }

    #[tracing::instrument(skip(self), level = "trace")]
    async fn remove_all(&self, query: &Query, ctx: WriteContext) -> EntityResult<DeleteStatus> {
        let (hot_result, cold_result) =
            futures::join!(self.hot.remove_all(query, ctx), self.cold.remove_all(query, ctx));
        merge_delete_results(hot_result, cold_result, self.label.as_str())
    }

    #[tracing::instrument(skip(self), level = "trace")]
    async fn remove(&self, identifier: &Identifier, ctx: WriteContext) -> EntityResult<DeleteStatus> {
        let (hot_result, cold_result) =
            futures::join!(self.hot.remove(identifier, ctx), self.cold.remove(identifier, ctx));
        merge_delete_results(hot_result, cold_result, self.label.as_str())
    }

    fn label(&self) -> StoreLabel {
        self.label.clone()
    }
}

fn merge_delete_results(
    hot: EntityResult<DeleteStatus>,
    cold: EntityResult<DeleteStatus>,
    label: &str,
) -> EntityResult<DeleteStatus> {
    match (hot, cold) {
        (Ok(a), Ok(b)) => Ok(a.merge(b)),
        (Err(hot_error), Ok(status)) => {
            tracing::warn!(error = ?hot_error, "hot-tier delete failed");
            Ok(status)
        }
        (Ok(status), Err(cold_error)) => {
            tracing::warn!(error = ?cold_error, "cold-tier delete failed");
            Ok(status)
        }
        (Err(hot_error), Err(cold_error)) => {
            tracing::error!(?hot_error, ?cold_error, "both tiers failed to delete");
            crate::metrics::record_error(label);
            Err(cold_error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entitystore_test::InMemoryMockStore;

    #[tokio::test]
    async fn hot_hit_never_touches_cold() {
        let hot = InMemoryMockStore::<entitystore_core::entity::test_support::Widget>::new();
        let cold = InMemoryMockStore::new();
        let id = Identifier::from_remote("widget", 1);
        let widget = entitystore_core::entity::test_support::Widget::new(id.clone(), "hello");
        hot.set(widget.clone(), WriteContext::Default).await.unwrap();

        let cache = CacheStore::new(hot, cold);
        let found = cache.get(&id, ReadContext::Default).await.unwrap();
        assert_eq!(found.unwrap().name, "hello");
        assert_eq!(cache.cold.read_count(), 0);
    }

    #[tokio::test]
    async fn cold_hit_fills_hot_exactly_once_under_concurrency() {
        let hot = InMemoryMockStore::<entitystore_core::entity::test_support::Widget>::new();
        let cold = InMemoryMockStore::new();
        let id = Identifier::from_remote("widget", 1);
        let widget = entitystore_core::entity::test_support::Widget::new(id.clone(), "from-cold");
        cold.set(widget, WriteContext::Default).await.unwrap();

        let cache = Arc::new(CacheStore::new(hot, cold));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                cache.get(&id, ReadContext::Default).await.unwrap()
            }));
        }
        for handle in handles {
            let found = handle.await.unwrap();
            assert_eq!(found.unwrap().name, "from-cold");
        }
        assert_eq!(cache.hot.write_count(), 1);
    }

    #[tokio::test]
    async fn miss_on_both_tiers_returns_none() {
        let hot = InMemoryMockStore::<entitystore_core::entity::test_support::Widget>::new();
        let cold = InMemoryMockStore::new();
        let cache = CacheStore::new(hot, cold);
        let id = Identifier::from_remote("widget", 404);
        assert!(cache.get(&id, ReadContext::Default).await.unwrap().is_none());
    }
}
