#![warn(missing_docs)]
//! Core types shared across the entity store stack: identifiers, the
//! [`Entity`] trait, the query language, the dual-hash identifier index, the
//! unified error taxonomy, store labels, and the background-offload trait.

pub mod dual_hash;
pub mod entity;
pub mod error;
pub mod identifier;
pub mod label;
pub mod offload;
pub mod query;

pub use dual_hash::{DualHashDictionary, DualHashIndex, OrderedDualHashDictionary};
pub use entity::Entity;
pub use error::{EntityResult, EntityStoreError};
pub use identifier::{Identifier, SyncState};
pub use label::StoreLabel;
pub use offload::Offload;
pub use query::{CompareOp, Filter, OrderClause, PaginationMeta, Query, QueryResult, QueryResultMeta, Value};
