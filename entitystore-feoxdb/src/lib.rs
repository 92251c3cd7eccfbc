#![warn(missing_docs)]
//! Embedded key-value [`Engine`](entitystore_backend::disk::Engine)
//! implementation for the entity store stack, backed by FeOxDB.

mod engine;
mod error;

pub use engine::{FeOxEngine, FeOxEngineBuilder};
pub use error::FeOxEngineError;
