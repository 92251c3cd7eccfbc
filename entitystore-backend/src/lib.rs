#![warn(missing_docs)]
//! The Storage API contract and the composition layers built on it: the
//! table-format [`DiskStore`], the two-tier [`CacheStore`](composition::CacheStore),
//! and the mirrored-disk [`RecoverableStore`](composition::recoverable::RecoverableStore).

pub mod composition;
pub mod disk;
pub(crate) mod metrics;
pub mod store;

pub use composition::CacheStore;
pub use composition::recoverable::RecoverableStore;
pub use disk::{DiskStore, Engine, Migration, MigrationRunner, MigrationVersion};
pub use store::{DeleteStatus, ReadContext, Store, WriteContext};
