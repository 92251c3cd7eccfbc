//! `RemoteStore`: translates Storage API calls into HTTP requests, with
//! response caching, in-flight coalescing, and a durable request queue
//! underneath.
//!
//! Where a cache-aside middleware sits a cache in front of an upstream HTTP
//! call inside a middleware chain, `RemoteStore` is itself the cache-shaped
//! thing, sitting in front of a [`Transport`](crate::transport::Transport)
//! instead of a `Next` chain. In-flight request coalescing follows the same
//! dogpile-guard idea as a per-key semaphore, generalized here with a
//! `DashMap` keyed by [`RequestConfig`] rather than one semaphore per cache
//! key.

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use entitystore_backend::{DeleteStatus, ReadContext, Store, WriteContext};
use entitystore_core::{EntityResult, EntityStoreError, Entity, Identifier, Query, QueryResult, QueryResultMeta, StoreLabel, SyncState};
use entitystore_redis::{QueuedOutcome, QueuedRequest, RedisRequestQueue, Token};
use entitystore::offload::OffloadManager;
use tokio::sync::{broadcast, oneshot};
use tracing::{instrument, warn};

use crate::request::{EndpointBinding, RequestConfig};
use crate::response::{decode_json_array, shareable_error};
use crate::transport::Transport;

/// Outcome type shared between a dispatching caller and the listeners
/// coalesced onto its in-flight request.
type SharedOutcome<E> = EntityResult<(Vec<E>, QueryResultMeta)>;

/// Which endpoint-derivation mode applies to a mutation (
/// `derivedFromPath`/`derivedFromEntityType`/`request(config)` binding
/// kinds, collapsed to the two that matter for the not-supported check).
#[derive(Clone, Copy)]
struct MutationBindings {
    remove: EndpointBinding,
    remove_all: EndpointBinding,
}

impl Default for MutationBindings {
    fn default() -> Self {
        Self { remove: EndpointBinding::DerivedFromEntityType, remove_all: EndpointBinding::DerivedFromEntityType }
    }
}

/// Whether a `set`'s target has already been pushed to the remote before
/// (picks `update` vs `create`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    /// The entity has never been confirmed by the server.
    Create,
    /// The entity already has a server-assigned identifier.
    Update,
}

struct RemoteStoreInner<E: Entity> {
    transport: Arc<dyn Transport>,
    queue: Arc<RedisRequestQueue<RequestConfig>>,
    offload: OffloadManager,
    label: StoreLabel,
    bindings: MutationBindings,
    request_config: Arc<dyn Fn(&Query) -> RequestConfig + Send + Sync>,
    mutation_config: Arc<dyn Fn(&E, MutationKind) -> RequestConfig + Send + Sync>,
    removal_config: Arc<dyn Fn(&[Identifier]) -> RequestConfig + Send + Sync>,
    sync_state: Arc<dyn Fn(&Identifier) -> SyncState + Send + Sync>,
    has_been_pushed: Arc<dyn Fn(&Identifier) -> bool + Send + Sync>,
    mark_pending: Arc<dyn Fn(&Identifier) + Send + Sync>,
    decoder: Arc<dyn Fn(&[u8]) -> EntityResult<(Vec<E>, QueryResultMeta)> + Send + Sync>,
    response_cache: DashMap<RequestConfig, Arc<(Vec<E>, QueryResultMeta)>>,
    in_flight: DashMap<RequestConfig, broadcast::Sender<Arc<SharedOutcome<E>>>>,
}

/// The remote-store layer: HTTP, via a durable queue, with request
/// coalescing and a response cache in front.
pub struct RemoteStore<E: Entity> {
    inner: Arc<RemoteStoreInner<E>>,
}

impl<E: Entity> Clone for RemoteStore<E> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

/// A pending batch of entity pushes: resolves once every queued request in
/// the batch has reached a terminal result. Dropping it without awaiting leaves the
/// pushes running; it just stops you from learning the outcome.
pub struct PendingWrite {
    receiver: oneshot::Receiver<EntityResult<()>>,
    outstanding: usize,
    token: Option<Token>,
    queue: Arc<RedisRequestQueue<RequestConfig>>,
}

impl PendingWrite {
    /// Number of requests this batch is still waiting on at construction
    /// time. Doesn't update live — call [`PendingWrite::await_completion`]
    /// to actually wait.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Waits for every request in the batch to reach a terminal result.
    /// Resolves to the first failure seen, or `Ok(())` if every request in
    /// the batch succeeded.
    pub async fn await_completion(self) -> EntityResult<()> {
        self.receiver.await.unwrap_or(Err(EntityStoreError::NetworkCancelled))
    }
}

impl Drop for PendingWrite {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.queue.unregister(token);
        }
    }
}

/// Builder for [`RemoteStore`]. `request_config`, `mutation_config`, and
/// `removal_config` have no sensible default — each
/// entity needs a request config, either via a per-entity function or
/// an explicit context override, and this workspace doesn't yet model the
/// context-override path, so the function is mandatory.
pub struct RemoteStoreBuilder<E: Entity> {
    transport: Arc<dyn Transport>,
    queue: Arc<RedisRequestQueue<RequestConfig>>,
    offload: OffloadManager,
    label: StoreLabel,
    bindings: MutationBindings,
    request_config: Option<Arc<dyn Fn(&Query) -> RequestConfig + Send + Sync>>,
    mutation_config: Option<Arc<dyn Fn(&E, MutationKind) -> RequestConfig + Send + Sync>>,
    removal_config: Option<Arc<dyn Fn(&[Identifier]) -> RequestConfig + Send + Sync>>,
    sync_state: Arc<dyn Fn(&Identifier) -> SyncState + Send + Sync>,
    has_been_pushed: Arc<dyn Fn(&Identifier) -> bool + Send + Sync>,
    mark_pending: Arc<dyn Fn(&Identifier) + Send + Sync>,
    decoder: Arc<dyn Fn(&[u8]) -> EntityResult<(Vec<E>, QueryResultMeta)> + Send + Sync>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity + serde::de::DeserializeOwned> RemoteStoreBuilder<E> {
    /// Starts a builder wired to `transport` and `queue`.
    pub fn new(transport: Arc<dyn Transport>, queue: Arc<RedisRequestQueue<RequestConfig>>) -> Self {
        Self {
            transport,
            queue,
            offload: OffloadManager::with_defaults(),
            label: StoreLabel::new_static("remote"),
            bindings: MutationBindings::default(),
            request_config: None,
            mutation_config: None,
            removal_config: None,
            sync_state: Arc::new(|_| SyncState::Synced),
            has_been_pushed: Arc::new(|_| false),
            mark_pending: Arc::new(|_| {}),
            decoder: Arc::new(decode_json_array::<E>),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> RemoteStoreBuilder<E> {
    /// Maps a `get`/`search` query to its request config.
    pub fn request_config<F>(mut self, f: F) -> Self
    where
        F: Fn(&Query) -> RequestConfig + Send + Sync + 'static,
    {
        self.request_config = Some(Arc::new(f));
        self
    }

    /// Maps an entity and mutation kind (create/update) to its request
    /// config, for `set`.
    pub fn mutation_config<F>(mut self, f: F) -> Self
    where
        F: Fn(&E, MutationKind) -> RequestConfig + Send + Sync + 'static,
    {
        self.mutation_config = Some(Arc::new(f));
        self
    }

    /// Maps a batch of identifiers to their deletion request config, for
    /// `remove`/`remove_all`.
    pub fn removal_config<F>(mut self, f: F) -> Self
    where
        F: Fn(&[Identifier]) -> RequestConfig + Send + Sync + 'static,
    {
        self.removal_config = Some(Arc::new(f));
        self
    }

    /// Overrides the sync-state lookup used to gate requests before they
    /// reach the network. Default: every identifier is treated as `Synced`.
    pub fn sync_state_lookup<F>(mut self, f: F) -> Self
    where
        F: Fn(&Identifier) -> SyncState + Send + Sync + 'static,
    {
        self.sync_state = Arc::new(f);
        self
    }

    /// Overrides whether an identifier has already been pushed to the
    /// remote (decides `create` vs `update` in `set`). Default: always
    /// `false` (every `set` is a `create`).
    pub fn has_been_pushed<F>(mut self, f: F) -> Self
    where
        F: Fn(&Identifier) -> bool + Send + Sync + 'static,
    {
        self.has_been_pushed = Arc::new(f);
        self
    }

    /// Overrides the callback invoked to mark an identifier `pending` once
    /// its `set` has been enqueued. Default: no-op.
    pub fn on_mark_pending<F>(mut self, f: F) -> Self
    where
        F: Fn(&Identifier) + Send + Sync + 'static,
    {
        self.mark_pending = Arc::new(f);
        self
    }

    /// Overrides the response-body decoder. Default: [`decode_json_array`].
    pub fn decoder<F>(mut self, f: F) -> Self
    where
        F: Fn(&[u8]) -> EntityResult<(Vec<E>, QueryResultMeta)> + Send + Sync + 'static,
    {
        self.decoder = Arc::new(f);
        self
    }

    /// Sets the endpoint binding for `remove`. `DerivedFromPath` makes
    /// `remove` always fail with `NotSupported`.
    pub fn remove_binding(mut self, binding: EndpointBinding) -> Self {
        self.bindings.remove = binding;
        self
    }

    /// Sets the endpoint binding for `remove_all`.
    pub fn remove_all_binding(mut self, binding: EndpointBinding) -> Self {
        self.bindings.remove_all = binding;
        self
    }

    /// Overrides the label reported by `Store::label`.
    pub fn label(mut self, label: impl Into<StoreLabel>) -> Self {
        self.label = label.into();
        self
    }

    /// Overrides the offload manager used for response decoding.
    pub fn offload(mut self, offload: OffloadManager) -> Self {
        self.offload = offload;
        self
    }

    /// Builds the store. Panics if `request_config`, `mutation_config`, or
    /// `removal_config` weren't set — see the struct docs for why there's
    /// no default.
    pub fn build(self) -> RemoteStore<E> {
        RemoteStore {
            inner: Arc::new(RemoteStoreInner {
                transport: self.transport,
                queue: self.queue,
                offload: self.offload,
                label: self.label,
                bindings: self.bindings,
                request_config: self.request_config.expect("request_config must be set"),
                mutation_config: self.mutation_config.expect("mutation_config must be set"),
                removal_config: self.removal_config.expect("removal_config must be set"),
                sync_state: self.sync_state,
                has_been_pushed: self.has_been_pushed,
                mark_pending: self.mark_pending,
                decoder: self.decoder,
                response_cache: DashMap::new(),
                in_flight: DashMap::new(),
            }),
        }
    }
}

impl<E: Entity> RemoteStore<E> {
    /// Starts a builder. Requires a [`Transport`] and the shared
    /// [`RedisRequestQueue`] to enqueue through.
    pub fn builder(
        transport: Arc<dyn Transport>,
        queue: Arc<RedisRequestQueue<RequestConfig>>,
    ) -> RemoteStoreBuilder<E>
    where
        E: serde::de::DeserializeOwned,
    {
        RemoteStoreBuilder::new(transport, queue)
    }

    fn validate_synced(&self, identifiers: &[Identifier]) -> EntityResult<()> {
        for identifier in identifiers {
            if (self.inner.sync_state)(identifier) == SyncState::OutOfSync {
                return Err(EntityStoreError::IdentifierNotSynced);
            }
        }
        Ok(())
    }

    /// Pushes a batch of entities to the remote, returning a handle that
    /// resolves once every request in the batch has a terminal result.
    /// `set` itself returns synchronously; the queue drives the actual send.
    #[instrument(skip(self, entities))]
    pub async fn set_pending(&self, entities: Vec<E>) -> EntityResult<PendingWrite> {
        let mut queue_ids = Vec::with_capacity(entities.len());
        for entity in &entities {
            let identifier = entity.identifier().clone();
            let kind = if (self.inner.has_been_pushed)(&identifier) {
                MutationKind::Update
            } else {
                MutationKind::Create
            };
            let config = (self.inner.mutation_config)(entity, kind);
            let queue_id = self.inner.queue.append(config, vec![identifier.clone()]).await?;
            (self.inner.mark_pending)(&identifier);
            queue_ids.push(queue_id);
        }

        let (tx, rx) = oneshot::channel();
        let outstanding = queue_ids.len();
        if outstanding == 0 {
            let _ = tx.send(Ok(()));
            return Ok(PendingWrite { receiver: rx, outstanding: 0, token: None, queue: self.inner.queue.clone() });
        }

        let remaining = Arc::new(AtomicUsize::new(outstanding));
        let failure = Arc::new(std::sync::Mutex::new(None::<EntityStoreError>));
        let sender = Arc::new(std::sync::Mutex::new(Some(tx)));
        let ids = Arc::new(queue_ids);
        let watched_ids = ids.clone();

        let token = self.inner.queue.register(move |request, outcome| {
            if !watched_ids.contains(&request.id) {
                return;
            }
            if let QueuedOutcome::Failed(error) = outcome {
                *failure.lock().expect("pending-write mutex poisoned") = Some(shareable_error(error));
            }
            if remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                let outcome = failure.lock().expect("pending-write mutex poisoned").take().map_or(Ok(()), Err);
                if let Some(sender) = sender.lock().expect("pending-write mutex poisoned").take() {
                    let _ = sender.send(outcome);
                }
            }
        });

        Ok(PendingWrite { receiver: rx, outstanding, token: Some(token), queue: self.inner.queue.clone() })
    }

    async fn dispatch_or_join(&self, config: RequestConfig, identifiers: Vec<Identifier>) -> SharedOutcome<E> {
        let receiver = match self.inner.in_flight.entry(config.clone()) {
            Entry::Occupied(occupied) => Some(occupied.get().subscribe()),
            Entry::Vacant(vacant) => {
                let (sender, _) = broadcast::channel(1);
                vacant.insert(sender);
                None
            }
        };

        if let Some(mut receiver) = receiver {
            return match receiver.recv().await {
                Ok(shared) => clone_outcome(&shared),
                Err(_) => Err(EntityStoreError::NetworkCancelled),
            };
        }

        let outcome = self.execute_request(config.clone(), identifiers).await;
        let shared = Arc::new(outcome);

        if let Some((_, sender)) = self.inner.in_flight.remove(&config) {
            let _ = sender.send(shared.clone());
        }
        if let Ok((entities, meta)) = shared.as_ref() {
            self.inner
                .response_cache
                .insert(config, Arc::new((entities.clone(), meta.clone())));
        }

        clone_outcome(&shared)
    }

    /// Sends `config`, retrying transient network failures in place with a
    /// capped exponential backoff. Each retry's attempt count and backoff
    /// deadline are persisted onto the queued request itself via
    /// [`RedisRequestQueue::reschedule`], so a crash mid-backoff leaves the
    /// durable queue holding a request that still knows not to be retried
    /// too soon. A non-2xx/404 API response is never retried here — only a
    /// failure to complete the HTTP exchange at all is.
    async fn execute_request(&self, config: RequestConfig, identifiers: Vec<Identifier>) -> SharedOutcome<E> {
        let queue_id = self.inner.queue.append(config.clone(), identifiers.clone()).await?;

        let mut attempt = 0u32;
        let outcome: SharedOutcome<E> = loop {
            let transport_result = self.inner.transport.send(&config).await;
            let attempted: SharedOutcome<E> = match transport_result {
                Ok(response) if response.status == 404 => Ok((Vec::new(), QueryResultMeta::default())),
                Ok(response) if (200..300).contains(&response.status) => {
                    self.decode_on_offload(response.body).await
                }
                Ok(response) => Err(EntityStoreError::Api {
                    status: response.status,
                    payload: Some(String::from_utf8_lossy(&response.body).into_owned()),
                }),
                Err(error) => Err(error),
            };

            let Err(error) = &attempted else { break attempted };
            if attempt >= entitystore_redis::MAX_ATTEMPTS || !is_transient_network_error(error) {
                break attempted;
            }

            let snapshot = QueuedRequest {
                id: queue_id,
                body: config.clone(),
                identifiers: identifiers.clone(),
                attempt,
                not_before_ms: 0,
            };
            match self.inner.queue.reschedule(snapshot).await {
                Ok(next_attempt) => attempt = next_attempt,
                Err(reschedule_error) => {
                    warn!(?reschedule_error, "failed to persist retry backoff, giving up on this request");
                    break attempted;
                }
            }
            tokio::time::sleep(entitystore_redis::backoff_for_attempt(attempt)).await;
        };

        if let Err(error) = self.inner.queue.remove_requests(|queued| queued.id == queue_id).await {
            warn!(?error, "failed to remove completed request from durable queue");
        }

        let snapshot = QueuedRequest { id: queue_id, body: config, identifiers, attempt, not_before_ms: 0 };
        let queue_outcome = match &outcome {
            Ok(_) => QueuedOutcome::Success(Vec::new()),
            Err(error) => QueuedOutcome::Failed(shareable_error(error)),
        };
        self.inner.queue.complete(&snapshot, queue_outcome);

        outcome
    }

    async fn decode_on_offload(&self, body: Vec<u8>) -> SharedOutcome<E> {
        let (tx, rx) = oneshot::channel();
        let decoder = self.inner.decoder.clone();
        self.inner.offload.spawn("remote-decode", async move {
            let decoded = decoder(&body);
            let _ = tx.send(decoded);
        });
        rx.await.unwrap_or(Err(EntityStoreError::NetworkCancelled))
    }
}

/// Whether `error` represents a failure to complete the HTTP exchange at
/// all (DNS, connection refused, timeout) rather than a real response the
/// server sent. Only these are worth retrying with backoff — a non-2xx
/// status or a decode failure is a real answer from the server and retrying
/// it blindly would just repeat the same outcome.
fn is_transient_network_error(error: &EntityStoreError) -> bool {
    matches!(error, EntityStoreError::Engine(_) | EntityStoreError::NetworkCancelled)
}

fn clone_outcome<E: Entity>(shared: &SharedOutcome<E>) -> SharedOutcome<E> {
    match shared {
        Ok((entities, meta)) => Ok((entities.clone(), meta.clone())),
        Err(error) => Err(shareable_error(error)),
    }
}

#[async_trait]
impl<E: Entity> Store<E> for RemoteStore<E> {
    #[instrument(skip(self))]
    async fn get(&self, identifier: &Identifier, ctx: ReadContext) -> EntityResult<Option<E>> {
        let query = Query::by_identifier(identifier);
        match self.search(&query, ctx).await {
            Ok(result) => Ok(result.into_flat().into_iter().next()),
            Err(EntityStoreError::Api { status: 404, .. }) => Ok(None),
            Err(error) => Err(error),
        }
    }

    #[instrument(skip(self, query))]
    async fn search(&self, query: &Query, _ctx: ReadContext) -> EntityResult<QueryResult<E>> {
        let identifiers = query.extract_identifiers().unwrap_or_default();
        self.validate_synced(&identifiers)?;

        let config = (self.inner.request_config)(query);

        if let Some(cached) = self.inner.response_cache.get(&config) {
            let (entities, _meta) = cached.value().as_ref().clone();
            return Ok(QueryResult::Flat(entities));
        }

        let (entities, meta) = self.dispatch_or_join(config, identifiers).await?;
        let filtered = match meta.root_identifiers {
            Some(roots) => entities.into_iter().filter(|e| roots.contains(e.identifier())).collect(),
            None => entities,
        };
        Ok(QueryResult::Flat(filtered))
    }

    #[instrument(skip(self, entity))]
    async fn set(&self, entity: E, _ctx: WriteContext) -> EntityResult<E> {
        self.set_pending(vec![entity.clone()]).await?;
        Ok(entity)
    }

    #[instrument(skip(self, query))]
    async fn remove_all(&self, query: &Query, _ctx: WriteContext) -> EntityResult<DeleteStatus> {
        if self.inner.bindings.remove_all == EndpointBinding::DerivedFromPath {
            return Err(EntityStoreError::NotSupported);
        }
        let identifiers = query.extract_identifiers().unwrap_or_default();
        self.remove_by_identifiers(&identifiers).await
    }

    #[instrument(skip(self))]
    async fn remove(&self, identifier: &Identifier, _ctx: WriteContext) -> EntityResult<DeleteStatus> {
        if self.inner.bindings.remove == EndpointBinding::DerivedFromPath {
            return Err(EntityStoreError::NotSupported);
        }
        self.remove_by_identifiers(std::slice::from_ref(identifier)).await
    }

    fn label(&self) -> StoreLabel {
        self.inner.label.clone()
    }
}

impl<E: Entity> RemoteStore<E> {
    async fn remove_by_identifiers(&self, identifiers: &[Identifier]) -> EntityResult<DeleteStatus> {
        if identifiers.is_empty() {
            return Ok(DeleteStatus::Missing);
        }
        self.validate_synced(identifiers)?;
        let config = (self.inner.removal_config)(identifiers);
        let (entities, _meta) = self.dispatch_or_join(config, identifiers.to_vec()).await?;
        let _ = entities;
        Ok(DeleteStatus::Deleted(identifiers.len() as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportResponse;
    use entitystore_core::entity::test_support::Widget;
    use std::sync::atomic::AtomicUsize;

    struct StubTransport {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for StubTransport {
        async fn send(&self, _request: &RequestConfig) -> EntityResult<TransportResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(TransportResponse { status: 200, body: b"[]".to_vec() })
        }
    }

    fn builder(transport: Arc<dyn Transport>) -> RemoteStoreBuilder<Widget> {
        let queue = Arc::new(RedisRequestQueue::new("redis://127.0.0.1/", "test:remote").unwrap());
        RemoteStore::builder(transport, queue)
            .request_config(|_query| RequestConfig::get("/widgets"))
            .mutation_config(|entity, _kind| RequestConfig::get(format!("/widgets/{}", entity.id)))
            .removal_config(|ids| RequestConfig::get(format!("/widgets/{}", ids.len())))
    }

    fn store(transport: Arc<dyn Transport>) -> RemoteStore<Widget> {
        builder(transport)
            .remove_binding(EndpointBinding::DerivedFromEntityType)
            .remove_all_binding(EndpointBinding::DerivedFromEntityType)
            .build()
    }

    #[tokio::test]
    async fn remove_rejects_derived_from_path_binding_without_touching_transport() {
        let transport = Arc::new(StubTransport { calls: AtomicUsize::new(0) });
        let remote = builder(transport.clone())
            .remove_binding(EndpointBinding::DerivedFromPath)
            .remove_all_binding(EndpointBinding::DerivedFromEntityType)
            .build();
        let id = Identifier::from_remote("widget", 1);
        let result = remote.remove(&id, WriteContext::default()).await;
        assert!(matches!(result, Err(EntityStoreError::NotSupported)));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn remove_all_rejects_derived_from_path_binding() {
        let transport = Arc::new(StubTransport { calls: AtomicUsize::new(0) });
        let remote = builder(transport)
            .remove_binding(EndpointBinding::DerivedFromEntityType)
            .remove_all_binding(EndpointBinding::DerivedFromPath)
            .build();
        let result = remote.remove_all(&Query::all(), WriteContext::default()).await;
        assert!(matches!(result, Err(EntityStoreError::NotSupported)));
    }

    #[tokio::test]
    async fn search_rejects_out_of_sync_identifier_without_dispatching() {
        let transport = Arc::new(StubTransport { calls: AtomicUsize::new(0) });
        let remote = builder(transport.clone())
            .sync_state_lookup(|_id| entitystore_core::SyncState::OutOfSync)
            .build();

        let id = Identifier::from_local("widget", "L1");
        let query = Query::by_identifier(&id);
        let result = remote.search(&query, ReadContext::default()).await;
        assert!(matches!(result, Err(EntityStoreError::IdentifierNotSynced)));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn pending_write_with_no_requests_resolves_immediately() {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            let transport = Arc::new(StubTransport { calls: AtomicUsize::new(0) });
            let remote = store(transport);
            let pending = remote.set_pending(Vec::new()).await.unwrap();
            assert_eq!(pending.outstanding(), 0);
            assert!(pending.await_completion().await.is_ok());
        });
    }

    #[test]
    fn transient_network_errors_are_distinguished_from_real_responses() {
        assert!(is_transient_network_error(&EntityStoreError::Engine(Box::new(std::io::Error::other("refused")))));
        assert!(is_transient_network_error(&EntityStoreError::NetworkCancelled));
        assert!(!is_transient_network_error(&EntityStoreError::Api { status: 500, payload: None }));
        assert!(!is_transient_network_error(&EntityStoreError::IdentifierNotSynced));
    }
}
