#![warn(missing_docs)]
//! Remote (HTTP) storage layer for the entity store stack: translates
//! Storage API calls into requests sent through a [`Transport`], with
//! response caching, in-flight request coalescing, and a durable request
//! queue underneath for retries and offline replay.

pub mod remote_store;
pub mod request;
pub mod response;
pub mod transport;

pub use remote_store::{MutationKind, PendingWrite, RemoteStore, RemoteStoreBuilder};
pub use request::{EndpointBinding, QueryValue, RequestConfig, RequestMethod};
pub use response::{decode_json_array, shareable_error};
pub use transport::{ReqwestTransport, Transport, TransportResponse};
