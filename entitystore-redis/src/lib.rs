#![warn(missing_docs)]
//! Durable, Redis-backed request queue for the entity store stack (spec
//! §4.10): the disk persistence layer for the remote store's in-flight and
//! retried HTTP requests.

pub mod error;
pub mod queue;

pub use error::RedisQueueError;
pub use queue::{MAX_ATTEMPTS, QueuedOutcome, QueuedRequest, RedisRequestQueue, Token, backoff_for_attempt};
