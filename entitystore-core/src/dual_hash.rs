//! Dual-hash identifier index: correlates locally-minted and remotely-assigned
//! identifiers for the same logical entity.

use crate::Identifier;
use smol_str::SmolStr;
use std::collections::HashMap;

struct Slot<V> {
    identifier: Identifier,
    value: V,
    /// Monotonic write sequence, used to decide the collision survivor.
    written_at: u64,
}

/// Three-table identifier index: `byRemote`, `byLocal`, and a `slots` table
/// holding the actual `(identifier, value)` pairs, so a record reachable by
/// either key component resolves to the same slot.
///
/// # Collision rule
///
/// Inserting an identifier that shares its remote component with one slot and
/// its local component with a *different* slot merges both into a single
/// slot. The surviving value is whichever of the two was written most
/// recently; the other slot is freed.
pub struct DualHashIndex<V> {
    slots: Vec<Option<Slot<V>>>,
    by_remote: HashMap<(SmolStr, i64), usize>,
    by_local: HashMap<(SmolStr, SmolStr), usize>,
    free: Vec<usize>,
    sequence: u64,
}

impl<V> Default for DualHashIndex<V> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            by_remote: HashMap::new(),
            by_local: HashMap::new(),
            free: Vec::new(),
            sequence: 0,
        }
    }
}

impl<V> DualHashIndex<V> {
    /// Empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Whether the index holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    fn slot_for(&self, id: &Identifier) -> Option<usize> {
        if let Some(remote) = id.remote() {
            if let Some(&slot) = self.by_remote.get(&(SmolStr::new(id.type_tag()), remote)) {
                return Some(slot);
            }
        }
        if let Some(local) = id.local() {
            if let Some(&slot) = self.by_local.get(&(SmolStr::new(id.type_tag()), SmolStr::new(local))) {
                return Some(slot);
            }
        }
        None
    }

    fn index_slot(&mut self, slot: usize) {
        let identifier = self.slots[slot].as_ref().expect("indexed slot is occupied").identifier.clone();
        if let Some(remote) = identifier.remote() {
            self.by_remote.insert((SmolStr::new(identifier.type_tag()), remote), slot);
        }
        if let Some(local) = identifier.local() {
            self.by_local.insert((SmolStr::new(identifier.type_tag()), SmolStr::new(local)), slot);
        }
    }

    fn unindex_slot(&mut self, slot: usize) {
        if let Some(entry) = &self.slots[slot] {
            if let Some(remote) = entry.identifier.remote() {
                self.by_remote.remove(&(SmolStr::new(entry.identifier.type_tag()), remote));
            }
            if let Some(local) = entry.identifier.local() {
                self.by_local.remove(&(SmolStr::new(entry.identifier.type_tag()), SmolStr::new(local)));
            }
        }
    }

    fn allocate(&mut self, identifier: Identifier, value: V) -> usize {
        let written_at = self.next_sequence();
        let entry = Slot { identifier, value, written_at };
        if let Some(slot) = self.free.pop() {
            self.slots[slot] = Some(entry);
            slot
        } else {
            self.slots.push(Some(entry));
            self.slots.len() - 1
        }
    }

    /// Inserts or upgrades an entry for `identifier`, returning the value
    /// that was displaced (either an outright replacement, or the losing
    /// side of a collision merge).
    pub fn insert(&mut self, identifier: Identifier, value: V) -> Option<V> {
        let remote_slot = identifier
            .remote()
            .and_then(|r| self.by_remote.get(&(SmolStr::new(identifier.type_tag()), r)).copied());
        let local_slot = identifier
            .local()
            .and_then(|l| self.by_local.get(&(SmolStr::new(identifier.type_tag()), SmolStr::new(l))).copied());

        match (remote_slot, local_slot) {
            (Some(a), Some(b)) if a != b => {
                // Two previously-separate slots now correlate. Keep whichever
                // was written more recently, free the other.
                self.unindex_slot(a);
                self.unindex_slot(b);
                let entry_a = self.slots[a].take().expect("remote slot occupied");
                let entry_b = self.slots[b].take().expect("local slot occupied");
                self.free.push(a);
                self.free.push(b);
                let written_at = self.next_sequence();
                let slot = self.allocate(identifier, value);
                self.slots[slot].as_mut().unwrap().written_at = written_at;
                self.index_slot(slot);
                if entry_a.written_at >= entry_b.written_at {
                    Some(entry_b.value)
                } else {
                    Some(entry_a.value)
                }
            }
            (Some(slot), _) | (_, Some(slot)) => {
                self.unindex_slot(slot);
                let written_at = self.next_sequence();
                let previous = self.slots[slot].replace(Slot { identifier: identifier.clone(), value, written_at });
                self.index_slot(slot);
                previous.map(|p| p.value)
            }
            (None, None) => {
                self.allocate(identifier, value);
                let slot = self.slots.len() - 1;
                self.index_slot(slot);
                None
            }
        }
    }

    /// Looks up a value by any component of `identifier` present.
    pub fn get(&self, identifier: &Identifier) -> Option<&V> {
        self.slot_for(identifier).and_then(|s| self.slots[s].as_ref()).map(|e| &e.value)
    }

    /// The fully-reconciled identifier currently stored for `identifier`,
    /// which may carry a component `identifier` itself lacks.
    pub fn resolved_identifier(&self, identifier: &Identifier) -> Option<&Identifier> {
        self.slot_for(identifier).and_then(|s| self.slots[s].as_ref()).map(|e| &e.identifier)
    }

    /// Removes the entry matching `identifier`, freeing its slot.
    pub fn remove(&mut self, identifier: &Identifier) -> Option<V> {
        let slot = self.slot_for(identifier)?;
        self.unindex_slot(slot);
        self.free.push(slot);
        self.slots[slot].take().map(|e| e.value)
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.by_remote.clear();
        self.by_local.clear();
        self.free.clear();
    }

    /// Iterates live entries in slot order (stable insertion order, modulo
    /// slot reuse after removal).
    pub fn iter(&self) -> impl Iterator<Item = (&Identifier, &V)> {
        self.slots.iter().filter_map(|s| s.as_ref()).map(|e| (&e.identifier, &e.value))
    }
}

/// A plain identifier-keyed dictionary: unordered `get`/`set`/`remove` over a
/// [`DualHashIndex`], matching the `Storage API`'s identifier-addressed
/// operations.
#[derive(Default)]
pub struct DualHashDictionary<V> {
    index: DualHashIndex<V>,
}

impl<V> DualHashDictionary<V> {
    /// Empty dictionary.
    pub fn new() -> Self {
        Self { index: DualHashIndex::new() }
    }

    /// Inserts or upgrades `value` under `identifier`.
    pub fn set(&mut self, identifier: Identifier, value: V) -> Option<V> {
        self.index.insert(identifier, value)
    }

    /// Looks up a value by identifier.
    pub fn get(&self, identifier: &Identifier) -> Option<&V> {
        self.index.get(identifier)
    }

    /// Removes a value by identifier.
    pub fn remove(&mut self, identifier: &Identifier) -> Option<V> {
        self.index.remove(identifier)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the dictionary is empty.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.index.clear()
    }

    /// Unordered iteration over every entry.
    pub fn iter(&self) -> impl Iterator<Item = (&Identifier, &V)> {
        self.index.iter()
    }
}

/// A [`DualHashDictionary`] that additionally preserves a deterministic
/// iteration order (insertion order), used where `search` must return results
/// in a stable sequence — e.g. `InMemoryStore`'s fallback ordering when a
/// query names no explicit sort.
#[derive(Default)]
pub struct OrderedDualHashDictionary<V> {
    index: DualHashIndex<V>,
    order: Vec<Identifier>,
}

impl<V> OrderedDualHashDictionary<V> {
    /// Empty dictionary.
    pub fn new() -> Self {
        Self { index: DualHashIndex::new(), order: Vec::new() }
    }

    /// Inserts or upgrades `value` under `identifier`. The written slot
    /// always moves to the back (most recent position), whether this is a
    /// first insertion, a plain replace, or the surviving side of a
    /// collision merge. A collision merge can leave more than one stale
    /// alias for the merged slot in `order` (one per identifier form it was
    /// previously reachable under); those are all collapsed into the single
    /// entry pushed here.
    pub fn set(&mut self, identifier: Identifier, value: V) -> Option<V> {
        let previous = self.index.insert(identifier.clone(), value);
        let canonical = self.index.resolved_identifier(&identifier).cloned().unwrap_or(identifier);
        self.order.retain(|id| self.index.resolved_identifier(id) != Some(&canonical));
        self.order.push(canonical);
        previous
    }

    /// Looks up a value by identifier.
    pub fn get(&self, identifier: &Identifier) -> Option<&V> {
        self.index.get(identifier)
    }

    /// Removes a value by identifier, dropping it from the order vector too.
    pub fn remove(&mut self, identifier: &Identifier) -> Option<V> {
        let removed = self.index.remove(identifier)?;
        self.order.retain(|id| self.index.get(id).is_some());
        Some(removed)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the dictionary is empty.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.index.clear();
        self.order.clear();
    }

    /// Iterates entries in insertion order.
    pub fn iter_ordered(&self) -> impl Iterator<Item = (&Identifier, &V)> {
        self.order.iter().filter_map(move |id| self.index.get(id).map(|v| (id, v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_get_by_either_component() {
        let mut index = DualHashIndex::new();
        let id = Identifier::new("widget", Some(1), Some("L1"));
        index.insert(id.clone(), "value");

        assert_eq!(index.get(&Identifier::from_remote("widget", 1)), Some(&"value"));
        assert_eq!(index.get(&Identifier::from_local("widget", "L1")), Some(&"value"));
    }

    #[test]
    fn colliding_identifiers_merge_into_one_slot() {
        let mut index = DualHashIndex::new();
        index.insert(Identifier::from_local("widget", "L1"), "local-only");
        index.insert(Identifier::from_remote("widget", 9), "remote-only");

        // Now a write correlates both components into one record.
        let merged = Identifier::new("widget", Some(9), Some("L1"));
        index.insert(merged.clone(), "merged");

        assert_eq!(index.len(), 1);
        assert_eq!(index.get(&merged), Some(&"merged"));
        assert_eq!(index.get(&Identifier::from_local("widget", "L1")), Some(&"merged"));
        assert_eq!(index.get(&Identifier::from_remote("widget", 9)), Some(&"merged"));
    }

    #[test]
    fn collision_merge_returns_the_losing_side() {
        let mut index = DualHashIndex::new();
        index.insert(Identifier::from_local("widget", "L1"), "local-only");
        index.insert(Identifier::from_remote("widget", 9), "remote-only");

        let merged = Identifier::new("widget", Some(9), Some("L1"));
        let displaced = index.insert(merged, "merged");
        assert!(displaced == Some("local-only") || displaced == Some("remote-only"));
    }

    #[test]
    fn remove_frees_both_keys() {
        let mut index = DualHashIndex::new();
        let id = Identifier::new("widget", Some(1), Some("L1"));
        index.insert(id.clone(), "value");
        assert_eq!(index.remove(&id), Some("value"));
        assert!(index.get(&Identifier::from_remote("widget", 1)).is_none());
        assert!(index.get(&Identifier::from_local("widget", "L1")).is_none());
        assert!(index.is_empty());
    }

    #[test]
    fn freed_slots_are_reused() {
        let mut index = DualHashIndex::new();
        index.insert(Identifier::from_remote("widget", 1), "a");
        index.remove(&Identifier::from_remote("widget", 1));
        index.insert(Identifier::from_remote("widget", 2), "b");
        assert_eq!(index.len(), 1);
        assert_eq!(index.get(&Identifier::from_remote("widget", 2)), Some(&"b"));
    }

    #[test]
    fn ordered_dictionary_preserves_insertion_order() {
        let mut dict = OrderedDualHashDictionary::new();
        dict.set(Identifier::from_remote("widget", 3), "c");
        dict.set(Identifier::from_remote("widget", 1), "a");
        dict.set(Identifier::from_remote("widget", 2), "b");

        let values: Vec<_> = dict.iter_ordered().map(|(_, v)| *v).collect();
        assert_eq!(values, vec!["c", "a", "b"]);
    }

    #[test]
    fn ordered_dictionary_moves_rewritten_slot_to_back() {
        let mut dict = OrderedDualHashDictionary::new();
        dict.set(Identifier::from_remote("widget", 1), "a");
        dict.set(Identifier::from_remote("widget", 2), "b");
        dict.set(Identifier::from_remote("widget", 1), "a-rewritten");

        let values: Vec<_> = dict.iter_ordered().map(|(_, v)| *v).collect();
        assert_eq!(values, vec!["b", "a-rewritten"]);
    }

    #[test]
    fn ordered_dictionary_collision_merge_collapses_to_one_slot_at_the_back() {
        let mut dict = OrderedDualHashDictionary::new();
        dict.set(Identifier::from_local("widget", "L1"), "first");
        dict.set(Identifier::from_remote("widget", 9), "second");
        dict.set(Identifier::new("widget", Some(9), Some("L1")), "merged");

        assert_eq!(dict.len(), 1);
        let values: Vec<_> = dict.iter_ordered().map(|(_, v)| *v).collect();
        assert_eq!(values, vec!["merged"]);
    }
}
