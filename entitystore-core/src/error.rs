//! The error taxonomy shared by every store layer.

use thiserror::Error;

/// Errors a [`crate::Entity`] store operation can fail with.
///
/// Every layer in the stack (`entitystore`, `entitystore-backend`,
/// `entitystore-feoxdb`, `entitystore-remote`) returns `Result<_, EntityStoreError>`
/// so errors compose across layers without per-crate wrapper types.
#[derive(Debug, Error)]
pub enum EntityStoreError {
    /// `get` was called with a query that doesn't identify a single record,
    /// or referenced an identifier that cannot exist. Not recoverable.
    #[error("identifier not found")]
    IdentifierNotFound,

    /// A remote-bound request referenced an identifier still `OutOfSync`.
    /// Recoverable: retry once the identifier has been pushed.
    #[error("identifier not synced with remote")]
    IdentifierNotSynced,

    /// The supplied `ReadContext`/`WriteContext` is invalid for this store
    /// (e.g. a disk store asked to honor `remote(..)`).
    #[error("invalid context for this store")]
    InvalidContext,

    /// The store cannot honor the query's requirements (non-deterministic
    /// order request against a store with no sort capability, etc).
    #[error("operation not supported by this store")]
    NotSupported,

    /// The remote responded but the payload was empty where data was expected.
    #[error("empty response from remote")]
    EmptyResponse,

    /// The remote payload didn't contain an entity for the requested identifier.
    #[error("identifier not found in response payload")]
    NotFoundInPayload,

    /// A non-2xx response kept its status/body for the caller to inspect.
    #[error("remote API error: status {status}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body, if any.
        payload: Option<String>,
    },

    /// The in-flight request was cancelled (caller dropped, or queue pruning).
    #[error("network request cancelled")]
    NetworkCancelled,

    /// Response payload failed to deserialize.
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The underlying storage engine reported an error (disk I/O, connection).
    #[error("storage engine error: {0}")]
    Engine(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The engine is in a state that makes this operation impossible
    /// (e.g. migration runner invoked before load completed).
    #[error("invalid engine state: {0}")]
    InvalidEngineState(String),

    /// A queue wait was cancelled before the task ran.
    #[error("task queue wait cancelled")]
    QueueCancelled,

    /// A queued task did not complete within its attached timeout.
    #[error("task timed out")]
    TimeoutElapsed,
}

impl EntityStoreError {
    /// `true` for errors recoverable by the caller retrying.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EntityStoreError::IdentifierNotSynced
                | EntityStoreError::EmptyResponse
                | EntityStoreError::NotFoundInPayload
                | EntityStoreError::NetworkCancelled
                | EntityStoreError::QueueCancelled
                | EntityStoreError::TimeoutElapsed
        )
    }
}

/// Convenience alias used throughout the workspace.
pub type EntityResult<T> = Result<T, EntityStoreError>;
