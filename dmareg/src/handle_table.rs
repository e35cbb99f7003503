//! Handle lookup table
//!
//! Maps each registered handle to the base address of its entry in the
//! [`RangeIndex`](crate::range_index::RangeIndex). The range index owns the
//! entries; this table is the second way in.

use std::collections::HashMap;

use crate::entry::HandleId;
use crate::error::{RegistryError, Result};

#[derive(Debug, Default)]
pub struct HandleTable {
    bases: HashMap<HandleId, u64>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Base address registered for `handle`
    pub fn get(&self, handle: HandleId) -> Option<u64> {
        self.bases.get(&handle).copied()
    }

    /// Make room for one more handle
    ///
    /// Called before either index is touched so that a failed allocation
    /// leaves the context unchanged.
    pub fn reserve_one(&mut self) -> Result<()> {
        self.bases
            .try_reserve(1)
            .map_err(|e| RegistryError::OutOfMemory(format!("handle table: {}", e)))
    }

    pub fn insert(&mut self, handle: HandleId, base: u64) {
        let previous = self.bases.insert(handle, base);
        debug_assert!(previous.is_none(), "{} registered twice", handle);
    }

    pub fn remove(&mut self, handle: HandleId) -> Option<u64> {
        self.bases.remove(&handle)
    }

    pub fn clear(&mut self) {
        self.bases.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_lookup_remove() {
        let mut table = HandleTable::new();
        table.reserve_one().unwrap();
        table.insert(HandleId(5), 0x4000);

        assert_eq!(table.get(HandleId(5)), Some(0x4000));
        assert_eq!(table.get(HandleId(6)), None);

        assert_eq!(table.remove(HandleId(5)), Some(0x4000));
        assert_eq!(table.remove(HandleId(5)), None);
        table.clear();
        assert_eq!(table.get(HandleId(5)), None);
    }
}
