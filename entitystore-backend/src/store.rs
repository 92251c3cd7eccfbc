//! The Storage API: the uniform contract every layer of the stack implements
//! every store layer implements.

use async_trait::async_trait;
use entitystore_core::{EntityResult, Entity, Identifier, Query, QueryResult, StoreLabel};

/// Outcome of a `remove`/`remove_all` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteStatus {
    /// Records were deleted. The count is `1` for a single-identifier
    /// `remove`; composed stores sum counts across layers.
    Deleted(u32),
    /// Nothing matched.
    Missing,
}

impl DeleteStatus {
    /// Merges two delete outcomes the way a composed store does: present
    /// counts add, two misses stay a miss.
    pub fn merge(self, other: DeleteStatus) -> DeleteStatus {
        match (self, other) {
            (DeleteStatus::Deleted(a), DeleteStatus::Deleted(b)) => DeleteStatus::Deleted(a + b),
            (DeleteStatus::Deleted(a), DeleteStatus::Missing) => DeleteStatus::Deleted(a),
            (DeleteStatus::Missing, DeleteStatus::Deleted(b)) => DeleteStatus::Deleted(b),
            (DeleteStatus::Missing, DeleteStatus::Missing) => DeleteStatus::Missing,
        }
    }
}

/// Controls how a `get`/`search` call is allowed to satisfy itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadContext {
    /// Honor whatever the store's own composition policy prescribes.
    #[default]
    Default,
    /// Force a cold-tier read even if the hot tier could answer (used by
    /// callers that suspect the hot tier is stale).
    BypassHot,
    /// Restrict the read to locally-available tiers; never reach the network.
    LocalOnly,
}

/// Controls how a `set`/`remove`/`remove_all` call should propagate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteContext {
    /// Write through every tier the store composes.
    #[default]
    Default,
    /// Write to local tiers only; never enqueue a remote mutation.
    LocalOnly,
    /// Mark the write as already confirmed by the remote (used when a
    /// store is rehydrating from a remote response instead of originating
    /// the change locally).
    FromRemote,
}

/// The uniform operation set every storage layer implements: in-memory, LRU,
/// disk, recoverable, two-tier cache, and remote.
///
/// # Merge policy
///
/// `set` never overwrites blindly: when an entry already exists for the
/// entity's identifier, the store merges the incoming value with the
/// existing one via [`Entity::merging`], unless [`Entity::should_overwrite`]
/// says otherwise. `set` returns the entity actually stored (the merge
/// result), or the previous value if the write lost (`should_overwrite`
/// rejected it).
#[async_trait]
pub trait Store<E: Entity>: Send + Sync {
    /// Fetches a single entity by identifier.
    ///
    /// `Ok(None)` is a definite miss, distinct from "request pending" — a
    /// store that cannot yet answer synchronously (e.g. `RemoteStore`) owns
    /// its own in-flight bookkeeping and only resolves this future once an
    /// answer (hit, miss, or error) is known.
    async fn get(&self, identifier: &Identifier, ctx: ReadContext) -> EntityResult<Option<E>>;

    /// Fetches every entity matching `query`.
    async fn search(&self, query: &Query, ctx: ReadContext) -> EntityResult<QueryResult<E>>;

    /// Inserts or merges `entity`, returning the entity actually stored.
    async fn set(&self, entity: E, ctx: WriteContext) -> EntityResult<E>;

    /// Removes every entity matching `query`.
    async fn remove_all(&self, query: &Query, ctx: WriteContext) -> EntityResult<DeleteStatus>;

    /// Removes a single entity by identifier.
    async fn remove(&self, identifier: &Identifier, ctx: WriteContext) -> EntityResult<DeleteStatus>;

    /// Label identifying this store layer, used in tracing spans and
    /// composed-store source paths (e.g. `"cache.memory"`).
    fn label(&self) -> StoreLabel {
        StoreLabel::new_static("store")
    }
}
