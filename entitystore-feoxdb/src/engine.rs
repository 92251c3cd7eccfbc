use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bincode::config::standard as bincode_config;
use bincode::serde::{decode_from_slice, encode_to_vec};
use entitystore_backend::disk::Engine;
use entitystore_backend::store::DeleteStatus;
use entitystore_core::{EntityResult, Entity, EntityStoreError, Identifier, Query, QueryResult};
use feoxdb::{FeoxError, FeoxStore};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::FeOxEngineError;

const INDEX_KEY: &[u8] = b"__entitystore_identifier_index__";
const SETTING_PREFIX: &str = "__entitystore_setting__:";

fn index_key_for(identifier: &Identifier) -> Vec<u8> {
    identifier.to_string().into_bytes()
}

fn setting_key_for(key: &str) -> Vec<u8> {
    format!("{SETTING_PREFIX}{key}").into_bytes()
}

/// Embedded key-value [`Engine`] backed by FeOxDB.
///
/// FeOxDB has no native predicate or sort support, so this engine keeps a
/// small side index (the set of persisted identifier strings, itself stored
/// as a row) and performs every non-identifier [`Query`] by scanning that
/// index, fetching each candidate row, and filtering in process before
/// handing the survivors to [`Query::materialize`] for ordering/paging/
/// group-by. A query that reduces to an exact identifier set skips the scan
/// entirely and fetches those rows directly.
///
/// Use this when entity data must survive restarts or doesn't fit in
/// memory.
///
/// Cloning is cheap — clones share the same underlying database.
#[derive(Clone)]
pub struct FeOxEngine<E> {
    store: Arc<FeoxStore>,
    _entity: PhantomData<fn() -> E>,
}

impl<E> FeOxEngine<E> {
    /// Starts building a new engine.
    pub fn builder() -> FeOxEngineBuilder<E> {
        FeOxEngineBuilder::default()
    }

    /// In-memory engine for tests. Data is lost when dropped.
    pub fn in_memory() -> Result<Self, FeOxEngineError> {
        let store = FeoxStore::builder().build()?;
        Ok(Self {
            store: Arc::new(store),
            _entity: PhantomData,
        })
    }

    /// Forces pending writes to disk.
    ///
    /// FeOxDB buffers writes in memory and flushes them periodically.
    /// No-op in memory-only mode.
    pub fn flush(&self) {
        self.store.flush();
    }

    fn read_index(&self) -> Result<Vec<String>, FeOxEngineError> {
        match self.store.get(INDEX_KEY) {
            Ok(bytes) => {
                let (index, _): (Vec<String>, _) = decode_from_slice(&bytes, bincode_config())?;
                Ok(index)
            }
            Err(FeoxError::KeyNotFound) => Ok(Vec::new()),
            Err(error) => Err(error.into()),
        }
    }

    fn write_index(&self, index: &[String]) -> Result<(), FeOxEngineError> {
        let bytes = encode_to_vec(index, bincode_config())?;
        self.store.insert(INDEX_KEY, &bytes)?;
        Ok(())
    }

    fn add_to_index(&self, identifier: &Identifier) -> Result<(), FeOxEngineError> {
        let key = identifier.to_string();
        let mut index = self.read_index()?;
        if !index.contains(&key) {
            index.push(key);
            self.write_index(&index)?;
        }
        Ok(())
    }

    fn remove_from_index(&self, identifier: &Identifier) -> Result<(), FeOxEngineError> {
        let key = identifier.to_string();
        let mut index = self.read_index()?;
        let before = index.len();
        index.retain(|k| k != &key);
        if index.len() != before {
            self.write_index(&index)?;
        }
        Ok(())
    }
}

/// Builder for [`FeOxEngine`].
pub struct FeOxEngineBuilder<E> {
    path: Option<PathBuf>,
    max_file_size: Option<u64>,
    max_memory: Option<usize>,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Default for FeOxEngineBuilder<E> {
    fn default() -> Self {
        Self {
            path: None,
            max_file_size: None,
            max_memory: None,
            _entity: PhantomData,
        }
    }
}

impl<E> FeOxEngineBuilder<E> {
    /// Enables persistent storage at the given path.
    ///
    /// Without this, data lives only in memory and is lost on restart. If
    /// `path` is a directory, creates `entitystore.db` inside it.
    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Pre-allocates disk space and caps maximum storage.
    ///
    /// Default: 1 GB.
    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = Some(bytes);
        self
    }

    /// Limits RAM usage.
    ///
    /// Default: 1 GB.
    pub fn max_memory(mut self, bytes: usize) -> Self {
        self.max_memory = Some(bytes);
        self
    }

    /// Creates the engine.
    ///
    /// Fails if the database file can't be opened or created.
    pub fn build(self) -> Result<FeOxEngine<E>, FeOxEngineError> {
        let mut builder = FeoxStore::builder();

        if let Some(mut path) = self.path {
            if path.is_dir() {
                path.push("entitystore.db");
            }
            builder = builder.device_path(path.to_string_lossy().to_string());
        }

        if let Some(file_size) = self.max_file_size {
            builder = builder.file_size(file_size);
        }

        if let Some(memory) = self.max_memory {
            builder = builder.max_memory(memory);
        }

        let store = builder.build()?;
        Ok(FeOxEngine {
            store: Arc::new(store),
            _entity: PhantomData,
        })
    }
}

#[async_trait]
impl<E> Engine<E> for FeOxEngine<E>
where
    E: Entity + Serialize + DeserializeOwned,
{
    async fn fetch(&self, query: &Query) -> EntityResult<QueryResult<E>> {
        let store = self.store.clone();
        let query = query.clone();

        tokio::task::spawn_blocking(move || {
            let identifier_query = query.extract_identifiers();

            let candidate_keys: Vec<Vec<u8>> = match &identifier_query {
                Some(identifiers) => identifiers.iter().map(index_key_for).collect(),
                None => {
                    let engine = FeOxEngine::<E> {
                        store: store.clone(),
                        _entity: PhantomData,
                    };
                    engine.read_index().map_err(EntityStoreError::from)?.into_iter().map(String::into_bytes).collect()
                }
            };

            let mut entries = Vec::with_capacity(candidate_keys.len());
            for key in candidate_keys {
                match store.get(&key) {
                    Ok(bytes) => {
                        let (entity, _): (E, _) =
                            decode_from_slice(&bytes, bincode_config()).map_err(FeOxEngineError::from)?;
                        entries.push(entity);
                    }
                    Err(FeoxError::KeyNotFound) => continue,
                    Err(error) => return Err(EntityStoreError::from(FeOxEngineError::from(error))),
                }
            }

            if identifier_query.is_none() {
                entries.retain(|entity| query.filter().is_none_or(|filter| filter.matches(entity)));
            }

            Ok(query.materialize(entries))
        })
        .await
        .map_err(|error| EntityStoreError::Engine(Box::new(error)))?
    }

    async fn insert(&self, entity: E) -> EntityResult<E> {
        self.save(entity).await
    }

    async fn save(&self, entity: E) -> EntityResult<E> {
        let store = self.store.clone();
        let identifier = entity.identifier().clone();
        let key = index_key_for(&identifier);

        tokio::task::spawn_blocking(move || -> Result<E, FeOxEngineError> {
            let merged = match store.get(&key) {
                Ok(bytes) => {
                    let (existing, _): (E, _) = decode_from_slice(&bytes, bincode_config())?;
                    if existing.should_overwrite(&entity) { existing.merging(entity) } else { existing }
                }
                Err(FeoxError::KeyNotFound) => entity,
                Err(error) => return Err(error.into()),
            };

            let bytes = encode_to_vec(&merged, bincode_config())?;
            store.insert(&key, &bytes)?;

            let engine = FeOxEngine::<E> {
                store: store.clone(),
                _entity: PhantomData,
            };
            engine.add_to_index(&identifier)?;

            Ok(merged)
        })
        .await
        .map_err(|error| EntityStoreError::Engine(Box::new(error)))?
        .map_err(EntityStoreError::from)
    }

    async fn delete(&self, identifier: &Identifier) -> EntityResult<DeleteStatus> {
        let store = self.store.clone();
        let key = index_key_for(identifier);
        let identifier = identifier.clone();

        tokio::task::spawn_blocking(move || -> Result<DeleteStatus, FeOxEngineError> {
            let exists = store.contains_key(&key);
            if !exists {
                return Ok(DeleteStatus::Missing);
            }
            store.delete(&key)?;
            let engine = FeOxEngine::<E> {
                store: store.clone(),
                _entity: PhantomData,
            };
            engine.remove_from_index(&identifier)?;
            Ok(DeleteStatus::Deleted(1))
        })
        .await
        .map_err(|error| EntityStoreError::Engine(Box::new(error)))?
        .map_err(EntityStoreError::from)
    }

    async fn batch_delete(&self, identifiers: &[Identifier]) -> EntityResult<DeleteStatus> {
        let mut total = 0u32;
        for identifier in identifiers {
            if let DeleteStatus::Deleted(count) = self.delete(identifier).await? {
                total += count;
            }
        }
        Ok(if total > 0 { DeleteStatus::Deleted(total) } else { DeleteStatus::Missing })
    }

    async fn read_setting(&self, key: &str) -> EntityResult<Option<String>> {
        let store = self.store.clone();
        let setting_key = setting_key_for(key);

        tokio::task::spawn_blocking(move || match store.get(&setting_key) {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(FeoxError::KeyNotFound) => Ok(None),
            Err(error) => Err(EntityStoreError::from(FeOxEngineError::from(error))),
        })
        .await
        .map_err(|error| EntityStoreError::Engine(Box::new(error)))?
    }

    async fn write_setting(&self, key: &str, value: &str) -> EntityResult<()> {
        let store = self.store.clone();
        let setting_key = setting_key_for(key);
        let value = value.to_string();

        tokio::task::spawn_blocking(move || {
            store.insert(&setting_key, value.as_bytes()).map_err(|error| EntityStoreError::from(FeOxEngineError::from(error)))
        })
        .await
        .map_err(|error| EntityStoreError::Engine(Box::new(error)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entitystore_backend::store::{ReadContext, Store, WriteContext};
    use entitystore_backend::disk::DiskStore;
    use entitystore_core::entity::test_support::Widget;
    use tempfile::TempDir;

    #[tokio::test]
    async fn write_and_read_round_trip_through_disk() {
        let temp_dir = TempDir::new().unwrap();
        let engine: FeOxEngine<Widget> = FeOxEngine::builder().path(temp_dir.path()).build().unwrap();
        let disk = DiskStore::new(engine);

        let id = Identifier::from_local("widget", "L1");
        disk.set(Widget::new(id.clone(), "gizmo"), WriteContext::default()).await.unwrap();

        let fetched = disk.get(&id, ReadContext::default()).await.unwrap();
        assert_eq!(fetched, Some(Widget::new(id, "gizmo")));
    }

    #[tokio::test]
    async fn delete_reports_missing_for_absent_identifier() {
        let engine: FeOxEngine<Widget> = FeOxEngine::in_memory().unwrap();
        let id = Identifier::from_local("widget", "ghost");
        let status = engine.delete(&id).await.unwrap();
        assert!(matches!(status, DeleteStatus::Missing));
    }

    #[tokio::test]
    async fn settings_round_trip() {
        let engine: FeOxEngine<Widget> = FeOxEngine::in_memory().unwrap();
        assert_eq!(engine.read_setting("last_migration_version").await.unwrap(), None);
        engine.write_setting("last_migration_version", "7").await.unwrap();
        assert_eq!(engine.read_setting("last_migration_version").await.unwrap(), Some("7".to_string()));
    }

    #[tokio::test]
    async fn scan_survives_a_full_table_query() {
        let engine: FeOxEngine<Widget> = FeOxEngine::in_memory().unwrap();
        let disk = DiskStore::new(engine);

        disk.set(Widget::new(Identifier::from_local("widget", "L1"), "red"), WriteContext::default()).await.unwrap();
        disk.set(Widget::new(Identifier::from_local("widget", "L2"), "blue"), WriteContext::default()).await.unwrap();

        let query = Query::all().with_filter(entitystore_core::Filter::EqualTo {
            property: "name".into(),
            value: entitystore_core::Value::Str("red".into()),
        });
        let result = disk.search(&query, ReadContext::default()).await.unwrap();
        let flat = result.into_flat();
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0].name, "red");
    }
}
