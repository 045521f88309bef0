//! Indexed-set primitives backing uniform random selection over dynamic
//! populations.
//!
//! The simulation engine needs to pick a uniformly random member of a set
//! whose contents change on every event (live cells of a species, border
//! cells of a species). `IndexedSet` keeps its members in a dense vector
//! with a side map from member to slot, so insertion, removal, and access
//! by slot are all O(1); the caller draws a slot index from its own RNG,
//! keeping this crate deterministic and randomness-free.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;
use thiserror::Error;

/// Errors emitted by indexed-set operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndexError {
    /// A dense slot outside `0..len` was requested.
    #[error("slot {slot} out of bounds for set of {len} members")]
    SlotOutOfBounds { slot: usize, len: usize },
}

/// Dense set with O(1) insert, O(1) swap-remove, and O(1) slot access.
///
/// Members are stored in insertion order until a removal swaps the last
/// member into the vacated slot; the order is therefore arbitrary but
/// fully determined by the operation sequence, which keeps seeded runs
/// reproducible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedSet<T>
where
    T: Copy + Eq + Hash,
{
    members: Vec<T>,
    slots: HashMap<T, usize>,
}

impl<T> Default for IndexedSet<T>
where
    T: Copy + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> IndexedSet<T>
where
    T: Copy + Eq + Hash,
{
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            members: Vec::new(),
            slots: HashMap::new(),
        }
    }

    /// Create a set with reserved capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            members: Vec::with_capacity(capacity),
            slots: HashMap::with_capacity(capacity),
        }
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns true when the set has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Returns true if `member` is present.
    #[must_use]
    pub fn contains(&self, member: &T) -> bool {
        self.slots.contains_key(member)
    }

    /// Insert `member`, returning false if it was already present.
    pub fn insert(&mut self, member: T) -> bool {
        if self.slots.contains_key(&member) {
            return false;
        }
        self.slots.insert(member, self.members.len());
        self.members.push(member);
        self.debug_assert_coherent();
        true
    }

    /// Remove `member` by swapping the last member into its slot.
    ///
    /// Returns false if `member` was not present.
    pub fn remove(&mut self, member: &T) -> bool {
        let Some(slot) = self.slots.remove(member) else {
            return false;
        };
        let last = self.members.pop().expect("slot map held a member");
        if slot < self.members.len() {
            self.members[slot] = last;
            self.slots.insert(last, slot);
        } else {
            debug_assert!(last == *member);
        }
        self.debug_assert_coherent();
        true
    }

    /// Access the member stored at dense `slot`.
    pub fn get(&self, slot: usize) -> Result<T, IndexError> {
        self.members
            .get(slot)
            .copied()
            .ok_or(IndexError::SlotOutOfBounds {
                slot,
                len: self.members.len(),
            })
    }

    /// Iterate members in dense-slot order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.members.iter()
    }

    /// Borrow the dense member slice.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.members
    }

    /// Remove all members, retaining capacity.
    pub fn clear(&mut self) {
        self.members.clear();
        self.slots.clear();
    }

    #[inline]
    fn debug_assert_coherent(&self) {
        debug_assert_eq!(self.members.len(), self.slots.len());
    }
}

impl<T> FromIterator<T> for IndexedSet<T>
where
    T: Copy + Eq + Hash,
{
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = Self::new();
        for member in iter {
            set.insert(member);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_is_idempotent() {
        let mut set = IndexedSet::new();
        assert!(set.insert(7u64));
        assert!(!set.insert(7u64));
        assert_eq!(set.len(), 1);
        assert!(set.contains(&7));
    }

    #[test]
    fn remove_swaps_last_member_into_slot() {
        let mut set: IndexedSet<u64> = (0..4).collect();
        assert!(set.remove(&1));
        assert_eq!(set.len(), 3);
        assert!(!set.contains(&1));
        // 3 was the last member and now occupies slot 1
        assert_eq!(set.get(1), Ok(3));
        assert!(set.remove(&3));
        assert!(!set.remove(&3));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn slot_access_is_bounds_checked() {
        let mut set = IndexedSet::new();
        set.insert((4u32, 2u32));
        assert_eq!(set.get(0), Ok((4, 2)));
        assert_eq!(set.get(1), Err(IndexError::SlotOutOfBounds { slot: 1, len: 1 }));
    }

    #[test]
    fn removing_the_only_member_empties_the_set() {
        let mut set = IndexedSet::new();
        set.insert(9i32);
        assert!(set.remove(&9));
        assert!(set.is_empty());
        assert_eq!(set.get(0), Err(IndexError::SlotOutOfBounds { slot: 0, len: 0 }));
    }

    #[test]
    fn iteration_covers_every_member_once() {
        let mut set: IndexedSet<u64> = (0..16).collect();
        for victim in [3u64, 0, 15, 8] {
            set.remove(&victim);
        }
        let mut seen: Vec<u64> = set.iter().copied().collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2, 4, 5, 6, 7, 9, 10, 11, 12, 13, 14]);
    }
}
