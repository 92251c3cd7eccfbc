//! Durable FIFO request queue backed by Redis.
//!
//! Requests aren't stored in a native Redis list. Each queue keeps a pair of
//! integer counters (`head`, `tail`) in a small metadata key, both seeded at
//! `i64::MAX / 2`, and stores request bodies in a hash keyed by counter
//! value. `append` increments `tail` and writes there; `prepend` decrements
//! `head` and writes there. The huge headroom on both sides means ordinary
//! traffic never needs a compaction pass; `remove_requests` still performs
//! one explicitly, to keep the occupied range contiguous after a predicate
//! removes entries from the middle.
//!
//! `register`/`unregister` are process-local: a [`DashMap`] keyed by
//! [`Token`], not durable state. Handlers are callbacks a running process
//! installs to learn about request outcomes; they don't survive a restart,
//! and nothing about the contract requires them to.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use entitystore_core::{EntityResult, EntityStoreError, Identifier};
use redis::{AsyncCommands, Client, aio::ConnectionManager};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::OnceCell;
use tracing::{instrument, trace};

use crate::error::RedisQueueError;

/// Both counters start here, leaving roughly `i64::MAX / 2` of headroom on
/// either side before a real application could ever exhaust it.
const COUNTER_ORIGIN: i64 = i64::MAX / 2;

/// Delay before the first retry of a transiently-failed request.
const BASE_BACKOFF: Duration = Duration::from_millis(250);
/// Ceiling on the computed backoff delay, regardless of attempt count.
const MAX_BACKOFF: Duration = Duration::from_secs(30);
/// Attempts beyond this are the caller's call to make (give up, surface the
/// error); the queue itself never refuses to reschedule a request.
pub const MAX_ATTEMPTS: u32 = 6;

/// Capped exponential backoff: `BASE_BACKOFF * 2^attempt`, capped at
/// `MAX_BACKOFF`.
pub fn backoff_for_attempt(attempt: u32) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    BASE_BACKOFF.saturating_mul(factor).min(MAX_BACKOFF)
}

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

fn entries_key(prefix: &str) -> String {
    format!("{prefix}:entries")
}
fn head_key(prefix: &str) -> String {
    format!("{prefix}:head")
}
fn tail_key(prefix: &str) -> String {
    format!("{prefix}:tail")
}

/// Opaque handle returned by [`RedisRequestQueue::register`], used to
/// unregister a handler later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(u64);

/// A request sitting in the durable queue, carrying the identifiers it
/// affects alongside its opaque body.
///
/// The queue itself doesn't interpret `body` — that's the remote store's
/// job — it only needs `identifiers` to support
/// [`RedisRequestQueue::remove_requests`] predicates written against the
/// entities a cancelled call affects.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct QueuedRequest<R> {
    /// The position this request currently occupies. Stable until the
    /// request is dequeued or removed; a `prepend` followed by an `append`
    /// of the same logical request gets a new id.
    pub id: i64,
    /// The opaque request payload (an HTTP request config, in practice).
    pub body: R,
    /// Identifiers this request affects, for predicate-based cancellation.
    pub identifiers: Vec<Identifier>,
    /// Number of times this request has been sent and failed transiently.
    /// Zero for a request that has never been attempted.
    pub attempt: u32,
    /// Earliest time (milliseconds since the epoch) this request may be
    /// attempted again. Zero means it's eligible immediately.
    pub not_before_ms: i64,
}

/// Terminal result of a dequeued request, delivered to every registered
/// handler once the processing side has an answer.
#[derive(Debug, Clone)]
pub enum QueuedOutcome {
    /// The request completed; `payload` is the raw (still-encoded)
    /// response body for the caller to interpret.
    Success(Vec<u8>),
    /// The request was cancelled before completion (e.g. via
    /// `remove_requests`, or the caller's handle was dropped).
    Aborted,
    /// The request failed terminally.
    Failed(EntityStoreError),
}

type Handler<R> = Arc<dyn Fn(&QueuedRequest<R>, &QueuedOutcome) + Send + Sync>;

/// Durable, Redis-backed FIFO of [`QueuedRequest`]s, satisfying the
/// request-queue contract.
pub struct RedisRequestQueue<R> {
    client: Client,
    connection: OnceCell<ConnectionManager>,
    prefix: String,
    next_token: AtomicI64,
    handlers: DashMap<Token, Handler<R>>,
}

impl<R> RedisRequestQueue<R>
where
    R: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Builds a queue storing its entries under Redis keys prefixed with
    /// `prefix` (e.g. `"entitystore:requests"`).
    pub fn new(connection_info: impl Into<String>, prefix: impl Into<String>) -> Result<Self, RedisQueueError> {
        Ok(Self {
            client: Client::open(connection_info.into())?,
            connection: OnceCell::new(),
            prefix: prefix.into(),
            next_token: AtomicI64::new(0),
            handlers: DashMap::new(),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, RedisQueueError> {
        let manager = self
            .connection
            .get_or_try_init(|| async { self.client.get_connection_manager().await })
            .await?;
        Ok(manager.clone())
    }

    /// Durable FIFO insert: stores `request` at the current `tail + 1` and
    /// advances `tail`.
    #[instrument(skip(self, body, identifiers))]
    pub async fn append(&self, body: R, identifiers: Vec<Identifier>) -> EntityResult<i64> {
        self.insert_at(body, identifiers, Side::Tail).await.map_err(Into::into)
    }

    /// Moves a request to the front of the queue (for retries): stores it
    /// at `head - 1` and advances `head` backward.
    #[instrument(skip(self, body, identifiers))]
    pub async fn prepend(&self, body: R, identifiers: Vec<Identifier>) -> EntityResult<i64> {
        self.insert_at(body, identifiers, Side::Head).await.map_err(Into::into)
    }

    async fn insert_at(
        &self,
        body: R,
        identifiers: Vec<Identifier>,
        side: Side,
    ) -> Result<i64, RedisQueueError> {
        let mut con = self.connection().await?;
        let counter_key = match side {
            Side::Tail => tail_key(&self.prefix),
            Side::Head => head_key(&self.prefix),
        };
        self.ensure_initialized(&mut con).await?;

        let index: i64 = match side {
            Side::Tail => con.incr(&counter_key, 1).await.map_err(RedisQueueError::from)?,
            Side::Head => con.decr(&counter_key, 1).await.map_err(RedisQueueError::from)?,
        };

        let request = QueuedRequest { id: index, body, identifiers, attempt: 0, not_before_ms: 0 };
        let bytes = bincode::serde::encode_to_vec(&request, bincode::config::standard())?;
        let _: () = con
            .hset(entries_key(&self.prefix), index, bytes)
            .await
            .map_err(RedisQueueError::from)?;
        trace!(index, "queued request");
        Ok(index)
    }

    /// Initializes `head`/`tail` to [`COUNTER_ORIGIN`] the first time this
    /// queue's keys are touched. A no-op on every call after the first.
    async fn ensure_initialized(&self, con: &mut ConnectionManager) -> Result<(), RedisQueueError> {
        let _: bool = con
            .set_nx(head_key(&self.prefix), COUNTER_ORIGIN)
            .await
            .map_err(RedisQueueError::from)?;
        let _: bool = con
            .set_nx(tail_key(&self.prefix), COUNTER_ORIGIN)
            .await
            .map_err(RedisQueueError::from)?;
        Ok(())
    }

    /// Dequeues the front of the queue, if any. A request still serving its
    /// backoff window (see [`Self::reschedule`]) blocks the head of the
    /// line: it isn't removed, and `None` is returned until it's ready,
    /// same as an empty queue.
    #[instrument(skip(self))]
    pub async fn next_request(&self) -> EntityResult<Option<QueuedRequest<R>>> {
        self.next_request_inner().await.map_err(Into::into)
    }

    async fn next_request_inner(&self) -> Result<Option<QueuedRequest<R>>, RedisQueueError> {
        let mut con = self.connection().await?;
        self.ensure_initialized(&mut con).await?;

        let head: i64 = con.get(head_key(&self.prefix)).await.map_err(RedisQueueError::from)?;
        let tail: i64 = con.get(tail_key(&self.prefix)).await.map_err(RedisQueueError::from)?;
        let front = head + 1;
        if front > tail {
            return Ok(None);
        }

        let bytes: Option<Vec<u8>> = con
            .hget(entries_key(&self.prefix), front)
            .await
            .map_err(RedisQueueError::from)?;
        let Some(bytes) = bytes else {
            // Racing dequeue already consumed this slot; advance past it.
            let _: i64 = con.incr(head_key(&self.prefix), 1).await.map_err(RedisQueueError::from)?;
            return Ok(None);
        };

        let (peeked, _): (QueuedRequest<R>, _) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard())?;
        if peeked.not_before_ms > now_ms() {
            return Ok(None);
        }

        let _: () = con
            .hdel(entries_key(&self.prefix), front)
            .await
            .map_err(RedisQueueError::from)?;
        let _: i64 = con.incr(head_key(&self.prefix), 1).await.map_err(RedisQueueError::from)?;

        Ok(Some(peeked))
    }

    /// Removes every currently-queued request matching `predicate`,
    /// compacting the remaining entries' indices inward so the occupied
    /// range stays contiguous. Returns the number removed.
    #[instrument(skip(self, predicate))]
    pub async fn remove_requests<F>(&self, predicate: F) -> EntityResult<usize>
    where
        F: Fn(&QueuedRequest<R>) -> bool + Send,
    {
        self.remove_requests_inner(predicate).await.map_err(Into::into)
    }

    async fn remove_requests_inner<F>(&self, predicate: F) -> Result<usize, RedisQueueError>
    where
        F: Fn(&QueuedRequest<R>) -> bool + Send,
    {
        let mut con = self.connection().await?;
        self.ensure_initialized(&mut con).await?;

        let head: i64 = con.get(head_key(&self.prefix)).await.map_err(RedisQueueError::from)?;
        let tail: i64 = con.get(tail_key(&self.prefix)).await.map_err(RedisQueueError::from)?;
        if head >= tail {
            return Ok(0);
        }

        let mut kept = Vec::new();
        let mut removed = 0usize;
        for index in (head + 1)..=tail {
            let bytes: Option<Vec<u8>> = con
                .hget(entries_key(&self.prefix), index)
                .await
                .map_err(RedisQueueError::from)?;
            let Some(bytes) = bytes else { continue };
            let (request, _): (QueuedRequest<R>, _) =
                bincode::serde::decode_from_slice(&bytes, bincode::config::standard())?;
            if predicate(&request) {
                removed += 1;
            } else {
                kept.push(request);
            }
        }

        if removed == 0 {
            return Ok(0);
        }

        let old_tail = tail;
        let _: () = con.del(entries_key(&self.prefix)).await.map_err(RedisQueueError::from)?;
        let mut cursor = head;
        for mut request in kept {
            cursor += 1;
            request.id = cursor;
            let bytes = bincode::serde::encode_to_vec(&request, bincode::config::standard())?;
            let _: () = con
                .hset(entries_key(&self.prefix), cursor, bytes)
                .await
                .map_err(RedisQueueError::from)?;
        }
        let _: () = con.set(tail_key(&self.prefix), cursor).await.map_err(RedisQueueError::from)?;
        trace!(removed, old_tail, new_tail = cursor, "compacted request queue");
        Ok(removed)
    }

    /// Re-enqueues `request` after a transient send failure: bumps its
    /// attempt counter, sets a capped-exponential backoff deadline, and
    /// writes it back in at `id`'s slot. `id` must still be occupied (the
    /// caller dequeued it via [`Self::next_request`] and hasn't called
    /// [`Self::remove_requests`] on it) — rescheduling a request whose slot
    /// was removed in the meantime silently does nothing.
    ///
    /// Returns the attempt count the request now carries, so the caller can
    /// compare it against its own retry ceiling (see
    /// [`crate::queue::MAX_ATTEMPTS`]).
    #[instrument(skip(self, request))]
    pub async fn reschedule(&self, request: QueuedRequest<R>) -> EntityResult<u32> {
        self.reschedule_inner(request).await.map_err(Into::into)
    }

    async fn reschedule_inner(&self, mut request: QueuedRequest<R>) -> Result<u32, RedisQueueError> {
        request.attempt += 1;
        request.not_before_ms = now_ms() + backoff_for_attempt(request.attempt).as_millis() as i64;
        let attempt = request.attempt;

        let mut con = self.connection().await?;
        let bytes = bincode::serde::encode_to_vec(&request, bincode::config::standard())?;
        let _: () = con
            .hset(entries_key(&self.prefix), request.id, bytes)
            .await
            .map_err(RedisQueueError::from)?;
        trace!(id = request.id, attempt, "rescheduled request after transient failure");
        Ok(attempt)
    }

    /// Registers a response handler, invoked for every dequeued request's
    /// terminal result once [`RedisRequestQueue::complete`] reports it.
    pub fn register<F>(&self, handler: F) -> Token
    where
        F: Fn(&QueuedRequest<R>, &QueuedOutcome) + Send + Sync + 'static,
    {
        let token = Token(self.next_token.fetch_add(1, Ordering::Relaxed) as u64);
        self.handlers.insert(token, Arc::new(handler));
        token
    }

    /// Removes a previously registered handler. A no-op if `token` is
    /// already unregistered.
    pub fn unregister(&self, token: Token) {
        self.handlers.remove(&token);
    }

    /// Invokes every registered handler with a dequeued request's terminal
    /// result. Called by whatever processed the request — the queue itself
    /// has no notion of how a request is executed.
    pub fn complete(&self, request: &QueuedRequest<R>, outcome: QueuedOutcome) {
        for handler in self.handlers.iter() {
            handler.value()(request, &outcome);
        }
    }
}

enum Side {
    Head,
    Tail,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_unregister_drops_handler() {
        let queue: RedisRequestQueue<Vec<u8>> =
            RedisRequestQueue::new("redis://127.0.0.1/", "test:queue").expect("valid url");
        let fired = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let fired_clone = fired.clone();
        let token = queue.register(move |_req, _outcome| {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(queue.handlers.len(), 1);

        queue.unregister(token);
        assert_eq!(queue.handlers.len(), 0);
    }

    #[test]
    fn complete_invokes_every_registered_handler() {
        let queue: RedisRequestQueue<Vec<u8>> =
            RedisRequestQueue::new("redis://127.0.0.1/", "test:queue").expect("valid url");
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            queue.register(move |_req, _outcome| {
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }

        let request =
            QueuedRequest { id: 0, body: Vec::<u8>::new(), identifiers: Vec::new(), attempt: 0, not_before_ms: 0 };
        queue.complete(&request, QueuedOutcome::Aborted);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn distinct_registrations_get_distinct_tokens() {
        let queue: RedisRequestQueue<Vec<u8>> =
            RedisRequestQueue::new("redis://127.0.0.1/", "test:queue").expect("valid url");
        let a = queue.register(|_, _| {});
        let b = queue.register(|_, _| {});
        assert_ne!(a, b);
    }

    #[test]
    fn backoff_doubles_per_attempt_until_the_cap() {
        assert_eq!(backoff_for_attempt(0), BASE_BACKOFF);
        assert_eq!(backoff_for_attempt(1), BASE_BACKOFF * 2);
        assert_eq!(backoff_for_attempt(2), BASE_BACKOFF * 4);
        assert_eq!(backoff_for_attempt(20), MAX_BACKOFF);
    }
}
