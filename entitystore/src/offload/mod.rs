//! Offload manager for background task execution.
//!
//! Used to schedule remote response decoding off the request path: a
//! [`RemoteStore`](../../entitystore_remote/struct.RemoteStore.html) hands a
//! fetched response to an [`OffloadManager`] rather than decoding it inline,
//! so a slow decode doesn't hold up the caller that issued the request.
//!
//! # Example
//!
//! ```ignore
//! use entitystore::offload::{OffloadManager, OffloadConfig};
//!
//! let config = OffloadConfig::default();
//! let manager = OffloadManager::new(config);
//!
//! manager.spawn("decode", async {
//!     // decode the remote response here
//! });
//! ```

mod manager;
mod policy;

pub use manager::{OffloadHandle, OffloadKey, OffloadManager};
pub use policy::{OffloadConfig, OffloadConfigBuilder, TimeoutPolicy};
pub use smol_str::SmolStr;
