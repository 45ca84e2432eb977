//! Growable bit set for loop membership and handler candidates.

use std::fmt;

use bitvec::vec::BitVec;

/// Growable set of small integers.
///
/// Inserting past the current length grows the set; queries past it read as
/// absent.
#[derive(Clone, Default)]
pub struct BitSet {
    bits: BitVec,
}

impl BitSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a set containing only `index`.
    #[must_use]
    pub fn singleton(index: usize) -> Self {
        let mut set = Self::new();
        set.insert(index);
        set
    }

    pub fn insert(&mut self, index: usize) {
        if index >= self.bits.len() {
            self.bits.resize(index + 1, false);
        }
        self.bits.set(index, true);
    }

    pub fn remove(&mut self, index: usize) {
        if index < self.bits.len() {
            self.bits.set(index, false);
        }
    }

    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        self.bits.get(index).is_some_and(|bit| *bit)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bits.not_any()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bits.count_ones()
    }

    pub fn clear(&mut self) {
        self.bits.clear();
    }

    /// Set members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.iter_ones()
    }

    /// Highest member, if any.
    #[must_use]
    pub fn last(&self) -> Option<usize> {
        self.bits.last_one()
    }

    /// Add every member of `other`.
    pub fn union_with(&mut self, other: &Self) {
        for index in other.iter() {
            self.insert(index);
        }
    }

    /// Members of `self` that are not in `other`.
    #[must_use]
    pub fn difference(&self, other: &Self) -> Self {
        let mut result = Self::new();
        for index in self.iter().filter(|&index| !other.contains(index)) {
            result.insert(index);
        }
        result
    }

    /// Check if every member of `self` is in `other`.
    #[must_use]
    pub fn is_subset(&self, other: &Self) -> bool {
        self.iter().all(|index| other.contains(index))
    }
}

impl PartialEq for BitSet {
    fn eq(&self, other: &Self) -> bool {
        self.is_subset(other) && other.is_subset(self)
    }
}

impl Eq for BitSet {}

impl fmt::Debug for BitSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<usize> for BitSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut set = Self::new();
        for index in iter {
            set.insert(index);
        }
        set
    }
}
