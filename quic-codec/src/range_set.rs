use std::{cmp, ops::Range};

use tinyvec::TinyVec;

/// A set of u64 values stored as sorted, disjoint, non-adjacent half-open ranges
///
/// This is the shape of acknowledgement information: packet numbers mostly arrive in
/// consecutive runs, so a handful of ranges usually describes everything, and the first two
/// are stored inline.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RangeSet(TinyVec<[Range<u64>; INLINE_CAPACITY]>);

const INLINE_CAPACITY: usize = 2;

impl RangeSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Ranges in ascending order
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = Range<u64>> + ExactSizeIterator + '_ {
        self.0.iter().cloned()
    }

    /// Every individual value in ascending order
    pub fn elts(&self) -> impl Iterator<Item = u64> + '_ {
        self.iter().flatten()
    }

    /// Number of disjoint ranges
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set contains no values
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `x` is in the set
    pub fn contains(&self, x: u64) -> bool {
        let idx = self.0.partition_point(|r| r.end <= x);
        self.0.get(idx).is_some_and(|r| r.start <= x)
    }

    /// Add a single value, returning whether it was absent
    pub fn insert_one(&mut self, x: u64) -> bool {
        self.insert(x..x + 1)
    }

    /// Add all values in `x`, merging with any range it overlaps or touches
    ///
    /// Returns whether the set changed.
    pub fn insert(&mut self, x: Range<u64>) -> bool {
        if x.is_empty() {
            return false;
        }

        // Ranges in `lo..hi` overlap or are adjacent to `x`
        let lo = self.0.partition_point(|r| r.end < x.start);
        let hi = self.0.partition_point(|r| r.start <= x.end);
        if lo == hi {
            self.0.insert(lo, x);
            return true;
        }

        let first = &self.0[lo];
        if hi - lo == 1 && first.start <= x.start && x.end <= first.end {
            return false;
        }

        let merged = cmp::min(first.start, x.start)..cmp::max(self.0[hi - 1].end, x.end);
        self.0[lo] = merged;
        self.0.drain(lo + 1..hi).for_each(drop);
        true
    }

    /// Remove all values in `x`, splitting a range if `x` falls inside it
    ///
    /// Returns whether the set changed.
    pub fn remove(&mut self, x: Range<u64>) -> bool {
        if x.is_empty() {
            return false;
        }

        // Ranges in `lo..hi` share at least one value with `x`
        let lo = self.0.partition_point(|r| r.end <= x.start);
        let hi = self.0.partition_point(|r| r.start < x.end);
        if lo == hi {
            return false;
        }

        let left = self.0[lo].start..x.start;
        let right = x.end..self.0[hi - 1].end;
        self.0.drain(lo..hi).for_each(drop);
        if !right.is_empty() {
            self.0.insert(lo, right);
        }
        if !left.is_empty() {
            self.0.insert(lo, left);
        }
        true
    }

    /// Remove every value that is also in `other`
    pub fn subtract(&mut self, other: &Self) {
        for range in other.iter() {
            self.remove(range);
        }
    }

    /// Remove and return the lowest range
    pub fn pop_min(&mut self) -> Option<Range<u64>> {
        if self.0.is_empty() {
            return None;
        }
        Some(self.0.remove(0))
    }

    /// Smallest value in the set
    pub fn min(&self) -> Option<u64> {
        self.0.first().map(|x| x.start)
    }

    /// Largest value in the set
    pub fn max(&self) -> Option<u64> {
        self.0.last().map(|x| x.end - 1)
    }
}

impl FromIterator<Range<u64>> for RangeSet {
    fn from_iter<T: IntoIterator<Item = Range<u64>>>(iter: T) -> Self {
        let mut set = Self::new();
        for range in iter {
            set.insert(range);
        }
        set
    }
}

impl<'a> IntoIterator for &'a RangeSet {
    type Item = Range<u64>;
    type IntoIter = std::iter::Cloned<std::slice::Iter<'a, Range<u64>>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter().cloned()
    }
}
