//! Table-format persistence over an [`Engine`] abstraction.
//!
//! The concrete storage engine bleeds `fetch`/`insert`/`save`/`delete`/
//! `batch_delete` and a small settings accessor into its API; any engine
//! that can answer those satisfies [`Engine`], whether it has native
//! predicate support (a relational engine) or not (a flat KV store, which
//! must perform the `Query` -> filter/sort translation itself — see
//! `entitystore-feoxdb::FeOxEngine`).

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use entitystore_core::{EntityResult, Entity, Identifier, Query, QueryResult, StoreLabel};
use tokio::sync::Mutex;
use tracing::instrument;

use crate::store::{DeleteStatus, ReadContext, Store, WriteContext};

/// The object-persistence engine a [`DiskStore`] runs on.
#[async_trait]
pub trait Engine<E: Entity>: Send + Sync {
    /// Runs `query` against the persisted table, returning matches.
    async fn fetch(&self, query: &Query) -> EntityResult<QueryResult<E>>;

    /// Creates a new persisted row for `entity`. Callers that don't care
    /// whether a row already exists should use [`Engine::save`] instead.
    async fn insert(&self, entity: E) -> EntityResult<E>;

    /// Upserts `entity`: merges with any existing row for its identifier,
    /// or inserts if none exists. This is what [`DiskStore::set`] calls.
    async fn save(&self, entity: E) -> EntityResult<E>;

    /// Deletes the row for `identifier`, if any.
    async fn delete(&self, identifier: &Identifier) -> EntityResult<DeleteStatus>;

    /// Deletes every row in `identifiers` in one pass.
    async fn batch_delete(&self, identifiers: &[Identifier]) -> EntityResult<DeleteStatus>;

    /// Reads a small persisted setting (migration bookkeeping uses this).
    async fn read_setting(&self, key: &str) -> EntityResult<Option<String>>;

    /// Writes a small persisted setting.
    async fn write_setting(&self, key: &str, value: &str) -> EntityResult<()>;
}

/// A table-format persistent [`Store`] over any [`Engine`].
///
/// Thin pass-through: the interesting work (query translation, row
/// encoding) lives in the concrete `Engine` implementation.
pub struct DiskStore<Eng, E: Entity> {
    engine: Eng,
    label: StoreLabel,
    _entity: PhantomData<fn() -> E>,
}

impl<Eng: Clone, E: Entity> Clone for DiskStore<Eng, E> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            label: self.label.clone(),
            _entity: PhantomData,
        }
    }
}

impl<Eng, E: Entity> DiskStore<Eng, E> {
    /// Wraps `engine` as a [`Store`], labeled `"disk"`.
    pub fn new(engine: Eng) -> Self {
        Self {
            engine,
            label: StoreLabel::new_static("disk"),
            _entity: PhantomData,
        }
    }

    /// Gives the store a more specific label (e.g. `"disk.primary"`).
    pub fn with_label(mut self, label: impl Into<StoreLabel>) -> Self {
        self.label = label.into();
        self
    }

    /// Borrows the underlying engine (for migration setup, flushing, etc.).
    pub fn engine(&self) -> &Eng {
        &self.engine
    }
}

#[async_trait]
impl<Eng, E> Store<E> for DiskStore<Eng, E>
where
    Eng: Engine<E> + 'static,
    E: Entity,
{
    #[instrument(skip(self))]
    async fn get(&self, identifier: &Identifier, _ctx: ReadContext) -> EntityResult<Option<E>> {
        let result = self.engine.fetch(&Query::by_identifier(identifier)).await?;
        Ok(result.into_flat().into_iter().next())
    }

    #[instrument(skip(self, query))]
    async fn search(&self, query: &Query, _ctx: ReadContext) -> EntityResult<QueryResult<E>> {
        self.engine.fetch(query).await
    }

    #[instrument(skip(self, entity))]
    async fn set(&self, entity: E, _ctx: WriteContext) -> EntityResult<E> {
        self.engine.save(entity).await
    }

    #[instrument(skip(self, query))]
    async fn remove_all(&self, query: &Query, _ctx: WriteContext) -> EntityResult<DeleteStatus> {
        let matches = self.engine.fetch(query).await?.into_flat();
        let identifiers: Vec<Identifier> = matches.iter().map(|e| e.identifier().clone()).collect();
        self.engine.batch_delete(&identifiers).await
    }

    #[instrument(skip(self))]
    async fn remove(&self, identifier: &Identifier, _ctx: WriteContext) -> EntityResult<DeleteStatus> {
        self.engine.delete(identifier).await
    }

    fn label(&self) -> StoreLabel {
        self.label.clone()
    }
}

/// Which bookkeeping counter a [`Migration`] advances.
///
/// The runner tracks the two independently: "last legacy
/// migration version (integer) and last app version (semantic version
/// string)" — a legacy migration at version 5 and an app-version migration
/// at `1.2.0` are unrelated watermarks.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum MigrationVersion {
    /// Legacy integer version, compared numerically.
    Legacy(u32),
    /// App semantic version, compared per semver ordering.
    App(semver::Version),
}

type Transform<E> =
    Arc<dyn Fn(Arc<dyn Engine<E>>) -> Pin<Box<dyn Future<Output = EntityResult<()>> + Send>> + Send + Sync>;

/// A single registered migration: a version stamp and an opaque transform
/// run against the engine if its version exceeds the last-applied watermark
/// of the same kind.
pub struct Migration<E: Entity> {
    version: MigrationVersion,
    transform: Transform<E>,
}

impl<E: Entity> Migration<E> {
    /// Registers a migration at `version`, running `transform` against the
    /// engine when applied.
    pub fn new<F, Fut>(version: MigrationVersion, transform: F) -> Self
    where
        F: Fn(Arc<dyn Engine<E>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EntityResult<()>> + Send + 'static,
    {
        Self {
            version,
            transform: Arc::new(move |engine| Box::pin(transform(engine))),
        }
    }
}

const LEGACY_SETTING_KEY: &str = "last_migration_version";
const APP_SETTING_KEY: &str = "last_migration_app_version";

/// Runs registered [`Migration`]s against an engine exactly once each,
/// tracked via two settings keys persisted on the engine itself (spec
/// §4.6, §6).
///
/// Migrations run in the declared order; a migration only runs if its
/// version exceeds the last-applied watermark of its own kind (legacy
/// integer or app semver, tracked independently). The highest version of
/// each kind actually applied is recorded when the run completes, so a
/// later migration between two already-applied versions never reruns.
pub struct MigrationRunner<E: Entity> {
    engine: Arc<dyn Engine<E>>,
    migrations: Vec<Migration<E>>,
    run_once: Mutex<()>,
}

impl<E: Entity> MigrationRunner<E> {
    /// Builds a runner for `engine` with `migrations` in declared order.
    pub fn new(engine: Arc<dyn Engine<E>>, migrations: Vec<Migration<E>>) -> Self {
        Self {
            engine,
            migrations,
            run_once: Mutex::new(()),
        }
    }

    /// Applies every migration whose version exceeds its kind's persisted
    /// watermark, then persists the new highest-applied version per kind.
    /// Safe to call more than once; the run is serialized and a second
    /// concurrent caller simply waits for the first to finish before
    /// re-checking (which then finds nothing left to do).
    pub async fn run(&self) -> EntityResult<()> {
        let _guard = self.run_once.lock().await;

        let last_legacy: u32 = match self.engine.read_setting(LEGACY_SETTING_KEY).await? {
            Some(raw) => raw.parse().unwrap_or(0),
            None => 0,
        };
        let last_app: Option<semver::Version> = match self.engine.read_setting(APP_SETTING_KEY).await? {
            Some(raw) => semver::Version::parse(&raw).ok(),
            None => None,
        };

        let mut highest_legacy = last_legacy;
        let mut highest_app = last_app.clone();

        for migration in &self.migrations {
            let should_run = match &migration.version {
                MigrationVersion::Legacy(v) => *v > last_legacy,
                MigrationVersion::App(v) => last_app.as_ref().is_none_or(|last| v > last),
            };
            if !should_run {
                continue;
            }

            (migration.transform)(self.engine.clone()).await?;

            match &migration.version {
                MigrationVersion::Legacy(v) => highest_legacy = highest_legacy.max(*v),
                MigrationVersion::App(v) => {
                    highest_app = Some(match highest_app {
                        Some(current) if current >= *v => current,
                        _ => v.clone(),
                    });
                }
            }
        }

        self.engine.write_setting(LEGACY_SETTING_KEY, &highest_legacy.to_string()).await?;
        if let Some(app) = &highest_app {
            self.engine.write_setting(APP_SETTING_KEY, &app.to_string()).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entitystore_core::entity::test_support::Widget;
    use entitystore_test::InMemoryMockEngine;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn set_then_get_round_trips_through_disk_store() {
        let store = DiskStore::new(InMemoryMockEngine::new());
        let id = Identifier::from_local("widget", "L1");
        store.set(Widget::new(id.clone(), "gizmo"), WriteContext::default()).await.unwrap();

        let fetched = store.get(&id, ReadContext::default()).await.unwrap();
        assert_eq!(fetched, Some(Widget::new(id, "gizmo")));
    }

    #[tokio::test]
    async fn remove_reports_missing_for_absent_identifier() {
        let store: DiskStore<InMemoryMockEngine<Widget>, Widget> = DiskStore::new(InMemoryMockEngine::new());
        let id = Identifier::from_local("widget", "ghost");
        let status = store.remove(&id, WriteContext::default()).await.unwrap();
        assert!(matches!(status, DeleteStatus::Missing));
    }

    #[tokio::test]
    async fn migration_runs_once_per_version() {
        let engine: Arc<dyn Engine<Widget>> = Arc::new(InMemoryMockEngine::new());
        let applied = Arc::new(AtomicUsize::new(0));
        let applied_clone = applied.clone();

        let migration = Migration::new(MigrationVersion::Legacy(1), move |_engine| {
            let applied = applied_clone.clone();
            async move {
                applied.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let runner = MigrationRunner::new(engine, vec![migration]);
        runner.run().await.unwrap();
        runner.run().await.unwrap();

        assert_eq!(applied.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn migration_skips_versions_already_applied() {
        let engine: Arc<dyn Engine<Widget>> = Arc::new(InMemoryMockEngine::new());
        engine.write_setting(LEGACY_SETTING_KEY, "5").await.unwrap();

        let applied = Arc::new(AtomicUsize::new(0));
        let applied_clone = applied.clone();
        let migration = Migration::new(MigrationVersion::Legacy(3), move |_engine| {
            let applied = applied_clone.clone();
            async move {
                applied.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let runner = MigrationRunner::new(engine, vec![migration]);
        runner.run().await.unwrap();

        assert_eq!(applied.load(Ordering::SeqCst), 0);
    }
}
