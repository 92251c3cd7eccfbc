//! The [`Entity`] trait: an immutable domain value keyed by an [`Identifier`].

use crate::Identifier;

/// A domain value with a stable identifier.
///
/// Entities are immutable value snapshots — updates to the record produce a
/// new `Self`, never mutate one in place. `merging` reconciles two snapshots
/// of the same identifier seen by different writers (e.g. a locally-written
/// value racing a server response).
///
/// # Merge contract
///
/// `merging` must be associative and idempotent for entities that share an
/// identifier: `a.merging(a.clone()) == a` and
/// `a.merging(b).merging(c) == a.merging(b.merging(c))`. Implementations
/// typically take the union of populated fields, preferring the newer
/// snapshot's non-default values.
pub trait Entity: Clone + Send + Sync + 'static {
    /// The entity's stable identifier.
    fn identifier(&self) -> &Identifier;

    /// Reconciles this snapshot with another snapshot of the same identifier.
    ///
    /// Callers must only invoke this with an `other` whose
    /// `identifier()` refers to the same logical record (same slot in a
    /// `DualHashDictionary`); implementations are not required to check this.
    fn merging(self, other: Self) -> Self;

    /// Whether `incoming` should overwrite `self` during a non-identifier-merge
    /// write (see the Storage API merge policy).
    ///
    /// Default: always overwrite. Entities with a revision/timestamp field
    /// should override this to reject stale writes.
    fn should_overwrite(&self, _incoming: &Self) -> bool {
        true
    }

    /// Resolves a named property to a query-comparable value, for
    /// [`crate::query::Filter`] evaluation against in-memory results.
    ///
    /// Entities that only ever get looked up by identifier can leave this at
    /// its default (`None` for every name) — the identifier-predicate
    /// expansion is evaluated directly against [`Entity::identifier`] by
    /// stores that hold entities in a [`crate::DualHashDictionary`], without
    /// going through `property` at all. Override this to support filtering
    /// or sorting by a domain property.
    fn property(&self, _name: &str) -> Option<crate::query::Value> {
        None
    }
}

/// A minimal `Entity` fixture shared across the workspace's test suites.
/// Gated behind the `test-helpers` feature rather than `cfg(test)` so
/// downstream crates' own tests can depend on it too.
#[cfg(feature = "test-helpers")]
pub mod test_support {
    use super::*;
    use crate::SyncState;

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    pub struct Widget {
        pub id: Identifier,
        pub name: String,
        pub revision: u32,
        pub sync_state: SyncState,
    }

    impl Widget {
        pub fn new(id: Identifier, name: impl Into<String>) -> Self {
            Self {
                id,
                name: name.into(),
                revision: 0,
                sync_state: SyncState::OutOfSync,
            }
        }
    }

    impl Entity for Widget {
        fn identifier(&self) -> &Identifier {
            &self.id
        }

        fn merging(self, other: Self) -> Self {
            if other.revision >= self.revision { other } else { self }
        }

        fn should_overwrite(&self, incoming: &Self) -> bool {
            incoming.revision >= self.revision
        }

        fn property(&self, name: &str) -> Option<crate::query::Value> {
            match name {
                "name" => Some(crate::query::Value::Str(self.name.clone())),
                "revision" => Some(crate::query::Value::Int(self.revision as i64)),
                _ => None,
            }
        }
    }
}
