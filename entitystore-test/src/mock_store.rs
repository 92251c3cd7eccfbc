//! An in-memory [`Store`] double with call counters and fault injection,
//! used across the workspace's unit tests instead of a real disk/remote tier.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use entitystore_backend::store::{DeleteStatus, ReadContext, Store, WriteContext};
use entitystore_core::{EntityResult, Entity, EntityStoreError, Identifier, Query, QueryResult, StoreLabel};

#[derive(Default)]
struct Counters {
    reads: AtomicUsize,
    writes: AtomicUsize,
    removes: AtomicUsize,
    searches: AtomicUsize,
}

/// A `Store` backed by a `DashMap`, for tests that need a real (if trivial)
/// implementation rather than a hand-mocked trait object.
#[derive(Clone)]
pub struct InMemoryMockStore<E: Entity> {
    entries: Arc<DashMap<Identifier, E>>,
    counters: Arc<Counters>,
    fail_next_search: Arc<AtomicBool>,
    label: StoreLabel,
}

impl<E: Entity> Default for InMemoryMockStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> InMemoryMockStore<E> {
    /// An empty mock store.
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            counters: Arc::new(Counters::default()),
            fail_next_search: Arc::new(AtomicBool::new(false)),
            label: StoreLabel::new_static("mock"),
        }
    }

    /// Number of `get` calls observed so far.
    pub fn read_count(&self) -> usize {
        self.counters.reads.load(Ordering::SeqCst)
    }

    /// Number of `set` calls observed so far.
    pub fn write_count(&self) -> usize {
        self.counters.writes.load(Ordering::SeqCst)
    }

    /// Number of `remove`/`remove_all` calls observed so far.
    pub fn remove_count(&self) -> usize {
        self.counters.removes.load(Ordering::SeqCst)
    }

    /// Number of `search` calls observed so far.
    pub fn search_count(&self) -> usize {
        self.counters.searches.load(Ordering::SeqCst)
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Arranges for the next `search` call to fail with
    /// `EntityStoreError::Engine`, simulating an unhealthy tier (used to
    /// exercise `RecoverableStore`'s rebuild path).
    pub fn fail_next_search(&self) {
        self.fail_next_search.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl<E: Entity> Store<E> for InMemoryMockStore<E> {
    async fn get(&self, identifier: &Identifier, _ctx: ReadContext) -> EntityResult<Option<E>> {
        self.counters.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.entries.get(identifier).map(|e| e.clone()))
    }

    async fn search(&self, _query: &Query, _ctx: ReadContext) -> EntityResult<QueryResult<E>> {
        self.counters.searches.fetch_add(1, Ordering::SeqCst);
        if self.fail_next_search.swap(false, Ordering::SeqCst) {
            return Err(EntityStoreError::Engine(Box::new(std::io::Error::other("mock failure"))));
        }
        let all: Vec<E> = self.entries.iter().map(|e| e.value().clone()).collect();
        Ok(QueryResult::Flat(all))
    }

    async fn set(&self, entity: E, _ctx: WriteContext) -> EntityResult<E> {
        self.counters.writes.fetch_add(1, Ordering::SeqCst);
        let identifier = entity.identifier().clone();
        let stored = match self.entries.get(&identifier) {
            Some(existing) => existing.clone().merging(entity),
            None => entity,
        };
        self.entries.insert(identifier, stored.clone());
        Ok(stored)
    }

    async fn remove_all(&self, _query: &Query, _ctx: WriteContext) -> EntityResult<DeleteStatus> {
        self.counters.removes.fetch_add(1, Ordering::SeqCst);
        let count = self.entries.len() as u32;
        self.entries.clear();
        if count == 0 {
            Ok(DeleteStatus::Missing)
        } else {
            Ok(DeleteStatus::Deleted(count))
        }
    }

    async fn remove(&self, identifier: &Identifier, _ctx: WriteContext) -> EntityResult<DeleteStatus> {
        self.counters.removes.fetch_add(1, Ordering::SeqCst);
        match self.entries.remove(identifier) {
            Some(_) => Ok(DeleteStatus::Deleted(1)),
            None => Ok(DeleteStatus::Missing),
        }
    }

    fn label(&self) -> StoreLabel {
        self.label.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entitystore_core::entity::test_support::Widget;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let store = InMemoryMockStore::<Widget>::new();
        let id = Identifier::from_remote("widget", 1);
        store.set(Widget::new(id.clone(), "a"), WriteContext::Default).await.unwrap();
        let found = store.get(&id, ReadContext::Default).await.unwrap();
        assert_eq!(found.unwrap().name, "a");
        assert_eq!(store.write_count(), 1);
        assert_eq!(store.read_count(), 1);
    }

    #[tokio::test]
    async fn fail_next_search_fires_once() {
        let store = InMemoryMockStore::<Widget>::new();
        store.fail_next_search();
        assert!(store.search(&Query::all(), ReadContext::Default).await.is_err());
        assert!(store.search(&Query::all(), ReadContext::Default).await.is_ok());
    }
}
