//! `RecoverableStore`: a mirrored-disk pair with automatic bidirectional
//! recovery of whichever side is empty or unhealthy.

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use entitystore_core::{EntityResult, Entity, EntityStoreError, Identifier, Query, QueryResult, StoreLabel};
use tokio::sync::{Mutex, Notify};

use crate::store::{DeleteStatus, ReadContext, Store, WriteContext};

/// Health classification used to decide whether the secondary needs a rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Health {
    Healthy,
    NeedsRebuild,
}

/// Construction-time readiness gate: every `Store` method waits here before
/// touching primary or secondary, so the recovery pass kicked off in
/// `RecoverableStore::new` always finishes before any operation the caller
/// can observe. Modeled on the check-then-wait double-check
/// [`tokio::sync::Notify`] idiom `CacheStore`'s fill gate already uses, to
/// avoid missing a wakeup that fires between the check and the wait.
#[derive(Default)]
struct RecoveryGate {
    ready: AtomicBool,
    notify: Notify,
}

impl RecoveryGate {
    async fn wait(&self) {
        loop {
            if self.ready.load(Ordering::Acquire) {
                return;
            }
            let notified = self.notify.notified();
            if self.ready.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }

    fn open(&self) {
        self.ready.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }
}

/// Wraps a `primary`/`secondary` pair of identically-shaped stores. Reads and
/// writes go to the primary; the secondary mirrors every write. If the
/// secondary is ever found unhealthy during a write (a write against it
/// errors), it's rebuilt from the primary's full contents, and the rebuild
/// runs exactly once even under concurrent triggers.
pub struct RecoverableStore<E, Primary, Secondary> {
    primary: Primary,
    secondary: Secondary,
    rebuild_lock: Mutex<()>,
    recovery: Arc<RecoveryGate>,
    label: StoreLabel,
    _entity: PhantomData<fn() -> E>,
}

impl<E, Primary, Secondary> RecoverableStore<E, Primary, Secondary>
where
    E: Entity,
    Primary: Store<E> + Clone + Send + Sync + 'static,
    Secondary: Store<E> + Clone + Send + Sync + 'static,
{
    /// Pairs `primary` (source of truth) with `secondary` (mirror) and kicks
    /// off a recovery pass in the background: if primary holds data, it's
    /// copied onto a freshly-cleared secondary; otherwise, if secondary holds
    /// data, it's copied onto primary; if both are empty, nothing happens.
    /// Every [`Store`] operation on the returned handle waits for this pass
    /// to finish before running, so recovery always completes before any
    /// caller-visible traffic.
    pub fn new(primary: Primary, secondary: Secondary) -> Self {
        let recovery = Arc::new(RecoveryGate::default());
        let store = Self {
            primary,
            secondary,
            rebuild_lock: Mutex::new(()),
            recovery: recovery.clone(),
            label: StoreLabel::new_static("recoverable"),
            _entity: PhantomData,
        };

        let primary_for_recovery = store.primary.clone();
        let secondary_for_recovery = store.secondary.clone();
        tokio::spawn(async move {
            if let Err(error) = recover(&primary_for_recovery, &secondary_for_recovery).await {
                tracing::error!(?error, "construction-time recovery pass failed");
            }
            recovery.open();
        });

        store
    }
}

/// Construction-time recovery: copies whichever side has data onto the
/// other, preferring primary as the source when both are non-empty.
async fn recover<E, Primary, Secondary>(primary: &Primary, secondary: &Secondary) -> EntityResult<()>
where
    E: Entity,
    Primary: Store<E>,
    Secondary: Store<E>,
{
    let primary_contents = primary.search(&Query::all(), ReadContext::Default).await;
    let entities = match primary_contents {
        Ok(result) if !result.is_empty() => result.into_flat(),
        _ => {
            let secondary_contents = secondary.search(&Query::all(), ReadContext::Default).await?;
            if secondary_contents.is_empty() {
                return Ok(());
            }
            for entity in secondary_contents.into_flat() {
                if let Err(error) = primary.set(entity, WriteContext::FromRemote).await {
                    tracing::warn!(?error, "recovery: failed to restore an entity into primary");
                }
            }
            return Ok(());
        }
    };

    if let Err(error) = secondary.remove_all(&Query::all(), WriteContext::Default).await {
        tracing::warn!(?error, "recovery: failed to clear secondary before rebuild");
    }
    for entity in entities {
        if let Err(error) = secondary.set(entity, WriteContext::FromRemote).await {
            tracing::warn!(?error, "recovery: failed to mirror an entity into secondary");
        }
    }
    Ok(())
}

impl<E, Primary, Secondary> RecoverableStore<E, Primary, Secondary>
where
    E: Entity,
    Primary: Store<E>,
    Secondary: Store<E>,
{
    async fn check_secondary_health(&self) -> Health {
        match self.secondary.search(&Query::all(), ReadContext::Default).await {
            Ok(_) => Health::Healthy,
            Err(_) => Health::NeedsRebuild,
        }
    }

    /// Rebuilds the secondary from every entity currently in the primary.
    /// Serialized by `rebuild_lock` so concurrent triggers collapse into one
    /// rebuild pass.
    async fn rebuild_secondary(&self) -> EntityResult<()> {
        let _guard = self.rebuild_lock.lock().await;
        if self.check_secondary_health().await == Health::Healthy {
            return Ok(());
        }
        tracing::warn!(store = %self.label, "rebuilding secondary store from primary");
        let everything = self.primary.search(&Query::all(), ReadContext::Default).await?;
        for entity in everything.into_flat() {
            self.secondary.set(entity, WriteContext::Default).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<E, Primary, Secondary> Store<E> for RecoverableStore<E, Primary, Secondary>
where
    E: Entity,
    Primary: Store<E>,
    Secondary: Store<E>,
{
    #[tracing::instrument(skip(self), level = "trace")]
    async fn get(&self, identifier: &Identifier, ctx: ReadContext) -> EntityResult<Option<E>> {
        self.recovery.wait().await;
        self.primary.get(identifier, ctx).await
    }

    #[tracing::instrument(skip(self), level = "trace")]
    async fn search(&self, query: &Query, ctx: ReadContext) -> EntityResult<QueryResult<E>> {
        self.recovery.wait().await;
        self.primary.search(query, ctx).await
    }

    #[tracing::instrument(skip(self, entity), level = "trace")]
    async fn set(&self, entity: E, ctx: WriteContext) -> EntityResult<E> {
        self.recovery.wait().await;
        let stored = self.primary.set(entity, ctx).await?;
        if let Err(error) = self.secondary.set(stored.clone(), ctx).await {
            tracing::error!(?error, "secondary mirror write failed, scheduling rebuild");
            if let Err(rebuild_error) = self.rebuild_secondary().await {
                tracing::error!(error = ?rebuild_error, "secondary rebuild failed");
                return Err(EntityStoreError::InvalidEngineState(
                    "secondary store could not be rebuilt after a mirror failure".into(),
                ));
            }
        }
        Ok(stored)
    }

    #[tracing::instrument(skip(self), level = "trace")]
    async fn remove_all(&self, query: &Query, ctx: WriteContext) -> EntityResult<DeleteStatus> {
        self.recovery.wait().await;
        let status = self.primary.remove_all(query, ctx).await?;
        let _ = self.secondary.remove_all(query, ctx).await;
        Ok(status)
    }

    #[tracing::instrument(skip(self), level = "trace")]
    async fn remove(&self, identifier: &Identifier, ctx: WriteContext) -> EntityResult<DeleteStatus> {
        self.recovery.wait().await;
        let status = self.primary.remove(identifier, ctx).await?;
        let _ = self.secondary.remove(identifier, ctx).await;
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

    #[tokio::test]
    async fn write_mirrors_to_secondary() {
        let primary = InMemoryMockStore::<Widget>::new();
        let secondary = InMemoryMockStore::new();
        let store = RecoverableStore::new(primary, secondary);

        let id = Identifier::from_remote("widget", 1);
        let widget = Widget::new(id.clone(), "mirrored");
        store.set(widget, WriteContext::Default).await.unwrap();

        let from_secondary = store.secondary.get(&id, ReadContext::Default).await.unwrap();
        assert_eq!(from_secondary.unwrap().name, "mirrored");
    }

    #[tokio::test]
    async fn construction_recovers_secondary_from_populated_primary() {
        let primary = InMemoryMockStore::<Widget>::new();
        let secondary = InMemoryMockStore::new();
        let id = Identifier::from_remote("widget", 1);
        primary.set(Widget::new(id.clone(), "from-primary"), WriteContext::Default).await.unwrap();

        let store = RecoverableStore::new(primary, secondary);
        let found = store.get(&id, ReadContext::Default).await.unwrap();
        assert_eq!(found.unwrap().name, "from-primary");

        let in_secondary = store.secondary.get(&id, ReadContext::Default).await.unwrap();
        assert_eq!(in_secondary.unwrap().name, "from-primary");
    }

    #[tokio::test]
    async fn construction_recovers_primary_from_populated_secondary_when_primary_is_empty() {
        let primary = InMemoryMockStore::<Widget>::new();
        let secondary = InMemoryMockStore::new();
        let id = Identifier::from_remote("widget", 1);
        secondary.set(Widget::new(id.clone(), "from-secondary"), WriteContext::Default).await.unwrap();

        let store = RecoverableStore::new(primary, secondary);
        let found = store.get(&id, ReadContext::Default).await.unwrap();
        assert_eq!(found.unwrap().name, "from-secondary");

        let in_primary = store.primary.get(&id, ReadContext::Default).await.unwrap();
        assert_eq!(in_primary.unwrap().name, "from-secondary");
    }

    #[tokio::test]
    async fn construction_with_both_sides_empty_does_nothing() {
        let primary = InMemoryMockStore::<Widget>::new();
        let secondary = InMemoryMockStore::new();
        let store = RecoverableStore::new(primary, secondary);

        let id = Identifier::from_remote("widget", 404);
        assert!(store.get(&id, ReadContext::Default).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mirror_write_failure_triggers_secondary_rebuild() {
        let primary = InMemoryMockStore::<Widget>::new();
        let secondary = InMemoryMockStore::new();
        let store = RecoverableStore::new(primary, secondary);

        let id = Identifier::from_remote("widget", 1);
        store.set(Widget::new(id.clone(), "a"), WriteContext::Default).await.unwrap();
        store.secondary.fail_next_search();
        store.rebuild_secondary().await.unwrap();

        let mirrored = store.secondary.get(&id, ReadContext::Default).await.unwrap();
        assert_eq!(mirrored.unwrap().name, "a");
    }
}
