//! Error types for the Redis-backed request queue.

use redis::RedisError;

/// Error type for [`crate::queue::RedisRequestQueue`] operations.
#[derive(Debug, thiserror::Error)]
pub enum RedisQueueError {
    /// An error from the underlying Redis client: connection failures,
    /// protocol errors, or command execution errors.
    #[error("redis request queue error: {0}")]
    Redis(#[from] RedisError),

    /// A queued request or its result failed to encode for storage.
    #[error("failed to encode queued request: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    /// A queued request failed to decode after being read back from Redis.
    #[error("failed to decode queued request: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

impl From<RedisQueueError> for entitystore_core::EntityStoreError {
    fn from(error: RedisQueueError) -> Self {
        entitystore_core::EntityStoreError::Engine(Box::new(error))
    }
}
