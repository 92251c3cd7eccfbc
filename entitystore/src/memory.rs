//! Volatile, identifier-keyed store with optional memory-pressure eviction.

use std::sync::Arc;

use async_trait::async_trait;
use entitystore_backend::{DeleteStatus, ReadContext, Store, WriteContext};
use entitystore_core::{Entity, EntityResult, Identifier, OrderedDualHashDictionary, Query, QueryResult, StoreLabel};
use tokio::sync::RwLock;
use tracing::instrument;

/// An entirely in-memory [`Store`] backed by an [`OrderedDualHashDictionary`].
///
/// Reads take the dictionary's shared lock; writes take the exclusive lock.
/// `search` always materializes its full result set before returning — there
/// is no streaming path. A query with no explicit `order` clause falls back
/// to the dictionary's own order (last-write-per-slot), for non-identifier
/// queries.
pub struct InMemoryStore<E: Entity> {
    dictionary: Arc<RwLock<OrderedDualHashDictionary<E>>>,
    label: StoreLabel,
}

impl<E: Entity> Clone for InMemoryStore<E> {
    fn clone(&self) -> Self {
        Self {
            dictionary: self.dictionary.clone(),
            label: self.label.clone(),
        }
    }
}

impl<E: Entity> InMemoryStore<E> {
    /// An empty store labeled `"memory"`.
    pub fn new() -> Self {
        Self {
            dictionary: Arc::new(RwLock::new(OrderedDualHashDictionary::new())),
            label: StoreLabel::new_static("memory"),
        }
    }

    /// Gives the store a more specific label (e.g. `"memory.widgets"`).
    pub fn with_label(mut self, label: impl Into<StoreLabel>) -> Self {
        self.label = label.into();
        self
    }

    /// Drops every entry. Intended as a memory-pressure signal hook — the
    /// caller decides when low-memory conditions warrant calling this.
    pub async fn clear(&self) {
        self.dictionary.write().await.clear();
    }

    /// Number of distinct entries currently held.
    pub async fn len(&self) -> usize {
        self.dictionary.read().await.len()
    }

    /// Whether the store currently holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.dictionary.read().await.is_empty()
    }
}

impl<E: Entity> Default for InMemoryStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E: Entity> Store<E> for InMemoryStore<E> {
    #[instrument(skip(self))]
    async fn get(&self, identifier: &Identifier, _ctx: ReadContext) -> EntityResult<Option<E>> {
        let dictionary = self.dictionary.read().await;
        Ok(dictionary.get(identifier).cloned())
    }

    #[instrument(skip(self, query))]
    async fn search(&self, query: &Query, _ctx: ReadContext) -> EntityResult<QueryResult<E>> {
        let dictionary = self.dictionary.read().await;

        let entries: Vec<E> = if let Some(identifiers) = query.extract_identifiers() {
            identifiers.iter().filter_map(|id| dictionary.get(id).cloned()).collect()
        } else {
            dictionary
                .iter_ordered()
                .filter(|(_, value)| query.filter().is_none_or(|filter| filter.matches(*value)))
                .map(|(_, value)| value.clone())
                .collect()
        };

        Ok(query.materialize(entries))
    }

    #[instrument(skip(self, entity))]
    async fn set(&self, entity: E, _ctx: WriteContext) -> EntityResult<E> {
        let mut dictionary = self.dictionary.write().await;
        let identifier = entity.identifier().clone();
        let stored = match dictionary.get(&identifier).cloned() {
            Some(existing) if existing.should_overwrite(&entity) => existing.merging(entity),
            Some(existing) => existing,
            None => entity,
        };
        dictionary.set(identifier, stored.clone());
        Ok(stored)
    }

    #[instrument(skip(self, query))]
    async fn remove_all(&self, query: &Query, _ctx: WriteContext) -> EntityResult<DeleteStatus> {
        let mut dictionary = self.dictionary.write().await;

        let targets: Vec<Identifier> = if let Some(identifiers) = query.extract_identifiers() {
            identifiers
        } else {
            dictionary
                .iter_ordered()
                .filter(|(_, value)| query.filter().is_none_or(|filter| filter.matches(*value)))
                .map(|(identifier, _)| identifier.clone())
                .collect()
        };

        let removed = targets.iter().filter(|id| dictionary.remove(id).is_some()).count();
        Ok(if removed > 0 {
            DeleteStatus::Deleted(removed as u32)
        } else {
            DeleteStatus::Missing
        })
    }

    #[instrument(skip(self))]
    async fn remove(&self, identifier: &Identifier, _ctx: WriteContext) -> EntityResult<DeleteStatus> {
        let mut dictionary = self.dictionary.write().await;
        Ok(match dictionary.remove(identifier) {
            Some(_) => DeleteStatus::Deleted(1),
            None => DeleteStatus::Missing,
        })
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
        let store = InMemoryStore::new();
        let id = Identifier::from_local("widget", "L1");
        let widget = Widget::new(id.clone(), "gizmo");
        store.set(widget.clone(), WriteContext::default()).await.unwrap();

        let fetched = store.get(&id, ReadContext::default()).await.unwrap();
        assert_eq!(fetched, Some(widget));
    }

    #[tokio::test]
    async fn set_merges_with_existing_entry() {
        let store = InMemoryStore::new();
        let id = Identifier::from_local("widget", "L1");
        let mut first = Widget::new(id.clone(), "gizmo");
        first.revision = 1;
        let mut second = Widget::new(id.clone(), "updated");
        second.revision = 2;

        store.set(first, WriteContext::default()).await.unwrap();
        store.set(second.clone(), WriteContext::default()).await.unwrap();

        let fetched = store.get(&id, ReadContext::default()).await.unwrap();
        assert_eq!(fetched, Some(second));
    }

    #[tokio::test]
    async fn remove_reports_missing_for_absent_identifier() {
        let store: InMemoryStore<Widget> = InMemoryStore::new();
        let id = Identifier::from_local("widget", "ghost");
        let status = store.remove(&id, WriteContext::default()).await.unwrap();
        assert!(matches!(status, DeleteStatus::Missing));
    }

    #[tokio::test]
    async fn search_filters_by_property() {
        let store = InMemoryStore::new();
        store
            .set(Widget::new(Identifier::from_local("widget", "L1"), "red"), WriteContext::default())
            .await
            .unwrap();
        store
            .set(Widget::new(Identifier::from_local("widget", "L2"), "blue"), WriteContext::default())
            .await
            .unwrap();

        let query = Query::all().with_filter(entitystore_core::Filter::EqualTo {
            property: "name".into(),
            value: entitystore_core::Value::Str("red".into()),
        });
        let result = store.search(&query, ReadContext::default()).await.unwrap();
        let flat = result.into_flat();
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0].name, "red");
    }

    #[tokio::test]
    async fn clear_drops_every_entry() {
        let store = InMemoryStore::new();
        store
            .set(Widget::new(Identifier::from_local("widget", "L1"), "gizmo"), WriteContext::default())
            .await
            .unwrap();
        assert_eq!(store.len().await, 1);
        store.clear().await;
        assert!(store.is_empty().await);
    }
}
