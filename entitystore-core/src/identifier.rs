//! Dual-valued entity identifiers.
//!
//! An [`Identifier`] names an entity by up to two independent components: a
//! value assigned by the server (`remote`) and a value minted on the client
//! before the server has ever seen the record (`local`). At least one of the
//! two must be present at all times — an identifier with neither is
//! meaningless and `Identifier::new` rejects it.

use smol_str::SmolStr;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Where an entity currently stands with respect to the remote server.
///
/// Transitions only move forward: `OutOfSync -> Pending -> Synced`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub enum SyncState {
    /// Never pushed to the server.
    #[default]
    OutOfSync,
    /// Enqueued for remote creation, awaiting a server-assigned identifier.
    Pending,
    /// Confirmed by the server.
    Synced,
}

impl SyncState {
    /// Whether a request referencing this state is safe to send to the server.
    ///
    /// Only `OutOfSync` blocks a request — see `EntityStoreError::IdentifierNotSynced`.
    pub fn is_synced_or_pending(&self) -> bool {
        !matches!(self, SyncState::OutOfSync)
    }
}

/// A dual (remote?, local?) identifier with a type tag.
///
/// # Invariant
///
/// At least one of `remote` or `local` is always `Some`. `Identifier::new`
/// and `Identifier::try_new` are the only constructors and both enforce it.
///
/// # Example
/// ```
/// use entitystore_core::Identifier;
///
/// let id = Identifier::from_local("widget", "L1");
/// assert!(id.remote().is_none());
/// assert_eq!(id.local(), Some("L1"));
///
/// let upgraded = id.upgrade_remote(42);
/// assert_eq!(upgraded.remote(), Some(42));
/// assert_eq!(upgraded.local(), Some("L1"));
/// ```
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Identifier {
    remote: Option<i64>,
    local: Option<SmolStr>,
    type_tag: SmolStr,
}

impl Identifier {
    /// Builds an identifier from optional remote/local components.
    ///
    /// # Panics
    ///
    /// Panics if both `remote` and `local` are `None`. Prefer
    /// [`Identifier::try_new`] at boundaries where the caller can't
    /// statically guarantee a component is present.
    pub fn new(type_tag: impl Into<SmolStr>, remote: Option<i64>, local: Option<impl Into<SmolStr>>) -> Self {
        Self::try_new(type_tag, remote, local).expect("Identifier requires a remote or local component")
    }

    /// Fallible constructor: `None` if both components are absent.
    pub fn try_new(
        type_tag: impl Into<SmolStr>,
        remote: Option<i64>,
        local: Option<impl Into<SmolStr>>,
    ) -> Option<Self> {
        let local = local.map(Into::into);
        if remote.is_none() && local.is_none() {
            return None;
        }
        Some(Self {
            remote,
            local,
            type_tag: type_tag.into(),
        })
    }

    /// Convenience constructor for a purely remote identifier.
    pub fn from_remote(type_tag: impl Into<SmolStr>, remote: i64) -> Self {
        Self {
            remote: Some(remote),
            local: None,
            type_tag: type_tag.into(),
        }
    }

    /// Convenience constructor for a purely local (not-yet-synced) identifier.
    pub fn from_local(type_tag: impl Into<SmolStr>, local: impl Into<SmolStr>) -> Self {
        Self {
            remote: None,
            local: Some(local.into()),
            type_tag: type_tag.into(),
        }
    }

    /// The server-assigned component, if known.
    pub fn remote(&self) -> Option<i64> {
        self.remote
    }

    /// The client-minted component, if any.
    pub fn local(&self) -> Option<&str> {
        self.local.as_deref()
    }

    /// The identifier type tag distinguishing entity kinds sharing a numeric space.
    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    /// Returns a copy of this identifier with the remote component learned.
    ///
    /// Used when a dual-hash lookup discovers the missing component (see
    /// `DualHashIndex`'s upgrade-in-place rule).
    pub fn upgrade_remote(&self, remote: i64) -> Self {
        Self {
            remote: Some(remote),
            local: self.local.clone(),
            type_tag: self.type_tag.clone(),
        }
    }

    /// Returns a copy of this identifier with the local component learned.
    pub fn upgrade_local(&self, local: impl Into<SmolStr>) -> Self {
        Self {
            remote: self.remote,
            local: Some(local.into()),
            type_tag: self.type_tag.clone(),
        }
    }

    /// Whether this identifier carries both components.
    pub fn is_full(&self) -> bool {
        self.remote.is_some() && self.local.is_some()
    }
}

// Equality/Hash compare every component as-is — two identifiers are the same
// key form only when type tag, remote, and local all agree. Lookup-by-any-
// present-component ("fuzzy" matching) is `DualHashIndex`'s job, not this type's.
impl PartialEq for Identifier {
    fn eq(&self, other: &Self) -> bool {
        self.type_tag == other.type_tag && self.remote == other.remote && self.local == other.local
    }
}
impl Eq for Identifier {}

impl Hash for Identifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_tag.hash(state);
        self.remote.hash(state);
        self.local.hash(state);
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.type_tag)?;
        match (self.remote, &self.local) {
            (Some(r), Some(l)) => write!(f, "r{r}/l{l}"),
            (Some(r), None) => write!(f, "r{r}"),
            (None, Some(l)) => write!(f, "l{l}"),
            (None, None) => unreachable!("Identifier invariant: at least one component present"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_new_rejects_empty_identifier() {
        assert!(Identifier::try_new::<_, &str>("widget", None, None).is_none());
    }

    #[test]
    fn upgrade_remote_keeps_local() {
        let id = Identifier::from_local("widget", "L1");
        let upgraded = id.upgrade_remote(7);
        assert_eq!(upgraded.remote(), Some(7));
        assert_eq!(upgraded.local(), Some("L1"));
        assert!(upgraded.is_full());
    }

    #[test]
    fn sync_state_out_of_sync_blocks_requests() {
        assert!(!SyncState::OutOfSync.is_synced_or_pending());
        assert!(SyncState::Pending.is_synced_or_pending());
        assert!(SyncState::Synced.is_synced_or_pending());
    }

    #[test]
    fn display_formats_available_components() {
        assert_eq!(Identifier::from_remote("widget", 42).to_string(), "widget:r42");
        assert_eq!(Identifier::from_local("widget", "L1").to_string(), "widget:lL1");
    }
}
