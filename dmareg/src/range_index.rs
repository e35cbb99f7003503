//! Ordered index of registered ranges
//!
//! Entries are keyed by base address. The index never holds two
//! intersecting intervals, so for any query `[start, end)` the only entry
//! that can intersect it is the one with the greatest base below `end`.
//! Every search is therefore a single `O(log n)` descent.

use std::collections::BTreeMap;
use std::ops::Bound;

use crate::entry::RangeEntry;

/// Outcome of a range search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeLookup<'a> {
    /// The query lies entirely inside this entry
    Contained(&'a RangeEntry),
    /// The query intersects this entry but is not inside it
    Straddles(&'a RangeEntry),
    /// The query touches no entry
    Vacant,
}

/// Non-overlapping ranges ordered by base address
#[derive(Debug, Default)]
pub struct RangeIndex {
    entries: BTreeMap<u64, RangeEntry>,
}

impl RangeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// The entry with the greatest base strictly below `end`
    fn last_below(&self, end: u64) -> Option<&RangeEntry> {
        self.entries
            .range((Bound::Unbounded, Bound::Excluded(end)))
            .next_back()
            .map(|(_, entry)| entry)
    }

    /// Classify `[start, end)` against the registered ranges
    ///
    /// `start < end` must hold.
    pub fn search(&self, start: u64, end: u64) -> RangeLookup<'_> {
        debug_assert!(start < end);

        match self.last_below(end) {
            Some(entry) if entry.covers(start, end) => RangeLookup::Contained(entry),
            Some(entry) if entry.intersects(start, end) => RangeLookup::Straddles(entry),
            _ => RangeLookup::Vacant,
        }
    }

    /// Any entry sharing a byte with `[start, end)`
    pub fn find_intersecting(&self, start: u64, end: u64) -> Option<&RangeEntry> {
        match self.search(start, end) {
            RangeLookup::Contained(entry) | RangeLookup::Straddles(entry) => Some(entry),
            RangeLookup::Vacant => None,
        }
    }

    /// The entry whose interval contains `addr`
    pub fn find_containing(&self, addr: u64) -> Option<&RangeEntry> {
        self.entries
            .range(..=addr)
            .next_back()
            .map(|(_, entry)| entry)
            .filter(|entry| entry.contains(addr))
    }

    pub fn get(&self, base: u64) -> Option<&RangeEntry> {
        self.entries.get(&base)
    }

    pub fn get_mut(&mut self, base: u64) -> Option<&mut RangeEntry> {
        self.entries.get_mut(&base)
    }

    /// Link a new entry
    ///
    /// The caller has already checked the interval against
    /// [`find_intersecting`](Self::find_intersecting).
    pub fn insert(&mut self, entry: RangeEntry) {
        debug_assert!(self.find_intersecting(entry.base, entry.end()).is_none());
        self.entries.insert(entry.base, entry);
    }

    /// Unlink the entry starting at `base`
    pub fn remove(&mut self, base: u64) -> Option<RangeEntry> {
        self.entries.remove(&base)
    }

    /// Entries in address order
    pub fn iter(&self) -> impl Iterator<Item = &RangeEntry> {
        self.entries.values()
    }

    /// Unlink everything, returning how many entries were dropped
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }
}
