//! An in-memory [`Engine`] double, for tests exercising [`DiskStore`] and
//! [`MigrationRunner`] without doing real disk I/O.
//!
//! [`DiskStore`]: entitystore_backend::DiskStore
//! [`MigrationRunner`]: entitystore_backend::MigrationRunner

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use entitystore_backend::disk::Engine;
use entitystore_backend::store::DeleteStatus;
use entitystore_core::{EntityResult, Entity, Identifier, Query, QueryResult};

#[derive(Default)]
struct Counters {
    fetches: AtomicUsize,
    saves: AtomicUsize,
}

/// An `Engine` backed by two `DashMap`s (rows, settings), for tests that
/// need a real (if trivial) implementation rather than a hand-mocked trait
/// object.
#[derive(Clone)]
pub struct InMemoryMockEngine<E: Entity> {
    rows: Arc<DashMap<Identifier, E>>,
    settings: Arc<DashMap<String, String>>,
    counters: Arc<Counters>,
}

impl<E: Entity> Default for InMemoryMockEngine<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> InMemoryMockEngine<E> {
    /// An empty mock engine.
    pub fn new() -> Self {
        Self {
            rows: Arc::new(DashMap::new()),
            settings: Arc::new(DashMap::new()),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Number of `fetch` calls observed so far.
    pub fn fetch_count(&self) -> usize {
        self.counters.fetches.load(Ordering::SeqCst)
    }

    /// Number of `save`/`insert` calls observed so far.
    pub fn save_count(&self) -> usize {
        self.counters.saves.load(Ordering::SeqCst)
    }

    /// Number of rows currently persisted.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the engine holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl<E: Entity> Engine<E> for InMemoryMockEngine<E> {
    async fn fetch(&self, query: &Query) -> EntityResult<QueryResult<E>> {
        self.counters.fetches.fetch_add(1, Ordering::SeqCst);

        let entries: Vec<E> = if let Some(identifiers) = query.extract_identifiers() {
            identifiers.iter().filter_map(|id| self.rows.get(id).map(|e| e.clone())).collect()
        } else {
            self.rows
                .iter()
                .filter(|entry| query.filter().is_none_or(|filter| filter.matches(entry.value())))
                .map(|entry| entry.value().clone())
                .collect()
        };

        Ok(query.materialize(entries))
    }

    async fn insert(&self, entity: E) -> EntityResult<E> {
        self.counters.saves.fetch_add(1, Ordering::SeqCst);
        self.rows.insert(entity.identifier().clone(), entity.clone());
        Ok(entity)
    }

    async fn save(&self, entity: E) -> EntityResult<E> {
        self.counters.saves.fetch_add(1, Ordering::SeqCst);
        let identifier = entity.identifier().clone();
        let merged = match self.rows.get(&identifier) {
            Some(existing) => existing.clone().merging(entity),
            None => entity,
        };
        self.rows.insert(identifier, merged.clone());
        Ok(merged)
    }

    async fn delete(&self, identifier: &Identifier) -> EntityResult<DeleteStatus> {
        match self.rows.remove(identifier) {
            Some(_) => Ok(DeleteStatus::Deleted(1)),
            None => Ok(DeleteStatus::Missing),
        }
    }

    async fn batch_delete(&self, identifiers: &[Identifier]) -> EntityResult<DeleteStatus> {
        let removed = identifiers.iter().filter(|id| self.rows.remove(*id).is_some()).count();
        Ok(if removed > 0 {
            DeleteStatus::Deleted(removed as u32)
        } else {
            DeleteStatus::Missing
        })
    }

    async fn read_setting(&self, key: &str) -> EntityResult<Option<String>> {
        Ok(self.settings.get(key).map(|v| v.clone()))
    }

    async fn write_setting(&self, key: &str, value: &str) -> EntityResult<()> {
        self.settings.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entitystore_core::entity::test_support::Widget;

    #[tokio::test]
    async fn save_then_fetch_round_trips() {
        let engine = InMemoryMockEngine::new();
        let id = Identifier::from_local("widget", "L1");
        engine.save(Widget::new(id.clone(), "gizmo")).await.unwrap();

        let result = engine.fetch(&Query::by_identifier(&id)).await.unwrap();
        assert_eq!(result.into_flat(), vec![Widget::new(id, "gizmo")]);
        assert_eq!(engine.save_count(), 1);
    }

    #[tokio::test]
    async fn settings_round_trip() {
        let engine: InMemoryMockEngine<Widget> = InMemoryMockEngine::new();
        assert_eq!(engine.read_setting("last_migration_version").await.unwrap(), None);
        engine.write_setting("last_migration_version", "3").await.unwrap();
        assert_eq!(engine.read_setting("last_migration_version").await.unwrap(), Some("3".to_string()));
    }
}
