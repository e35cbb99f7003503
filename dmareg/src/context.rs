//! Per-address-space registry context
//!
//! One context holds every range registered by one process. Both indices
//! live behind a single lock, and each operation performs its lookup,
//! refcount update and index edits inside one critical section.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, trace};

use crate::entry::{checked_end, AddressSpaceId, HandleId, RangeEntry, RangeInfo};
use crate::error::{RegistryError, Result};
use crate::handle_table::HandleTable;
use crate::range_index::{RangeIndex, RangeLookup};

/// The two indices into the context's entries
#[derive(Debug, Default)]
struct RangeTables {
    ranges: RangeIndex,
    handles: HandleTable,
}

impl RangeTables {
    /// Drop one registration of the entry at `base`, unlinking it from both
    /// indices when it was the last one. Returns true if the entry is gone.
    fn put(&mut self, base: u64) -> bool {
        let Some(entry) = self.ranges.get_mut(base) else {
            return false;
        };
        if !entry.put() {
            return false;
        }

        if let Some(entry) = self.ranges.remove(base) {
            self.handles.remove(entry.handle);
        }
        true
    }
}

/// Registry state scoped to one process address space
#[derive(Debug)]
pub struct AddressSpaceContext {
    identity: AddressSpaceId,
    /// Opens of this context; only changed while the registry lock is held
    refcount: AtomicU32,
    max_ranges: usize,
    tables: RwLock<RangeTables>,
}

impl AddressSpaceContext {
    /// Create an empty context holding one reference
    ///
    /// `max_ranges` of 0 means unlimited.
    pub(crate) fn new(identity: AddressSpaceId, max_ranges: usize) -> Self {
        Self {
            identity,
            refcount: AtomicU32::new(1),
            max_ranges,
            tables: RwLock::new(RangeTables::default()),
        }
    }

    pub fn identity(&self) -> AddressSpaceId {
        self.identity
    }

    /// Current number of opens
    pub fn refcount(&self) -> u32 {
        self.refcount.load(Ordering::Acquire)
    }

    pub(crate) fn get(&self) {
        self.refcount.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one open; true when it was the last
    pub(crate) fn put(&self) -> bool {
        self.refcount.fetch_sub(1, Ordering::AcqRel) == 1
    }

    fn read(&self) -> RwLockReadGuard<'_, RangeTables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RangeTables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `[base, base + size)` as backed by `handle`
    ///
    /// Re-adding a handle with the identical range takes another reference
    /// on the existing entry. Re-adding it with any other range, or adding
    /// a range that intersects another handle's range, is rejected.
    pub fn add(&self, handle: HandleId, base: u64, size: u64) -> Result<()> {
        let end = checked_end(base, size).ok_or_else(|| {
            RegistryError::InvalidArgument(format!(
                "range {:#x}+{:#x} is empty or overflows",
                base, size
            ))
        })?;

        let mut tables = self.write();

        let existing = match tables.handles.get(handle) {
            Some(start) => tables.ranges.get_mut(start),
            None => None,
        };
        if let Some(entry) = existing {
            if !entry.matches(base, size) {
                return Err(RegistryError::InvalidArgument(format!(
                    "{} already registered as [{:#x}, {:#x})",
                    handle,
                    entry.base,
                    entry.end()
                )));
            }
            entry.get();
            trace!("{}: {} re-registered, refcount {}", self.identity, handle, entry.refcount);
            return Ok(());
        }

        if let Some(other) = tables.ranges.find_intersecting(base, end) {
            return Err(RegistryError::InvalidArgument(format!(
                "[{:#x}, {:#x}) overlaps {}",
                base,
                end,
                other.info()
            )));
        }

        if self.max_ranges != 0 && tables.ranges.len() >= self.max_ranges {
            return Err(RegistryError::OutOfMemory(format!(
                "{} already holds {} ranges",
                self.identity, self.max_ranges
            )));
        }
        tables.handles.reserve_one()?;

        tables.handles.insert(handle, base);
        tables.ranges.insert(RangeEntry::new(handle, base, size));

        debug!("{}: registered {} [{:#x}, {:#x})", self.identity, handle, base, end);
        Ok(())
    }

    /// Drop one registration of the range containing `addr`
    pub fn remove_by_addr(&self, addr: u64) -> Result<()> {
        let mut tables = self.write();

        let (base, handle) = tables
            .ranges
            .find_containing(addr)
            .map(|entry| (entry.base, entry.handle))
            .ok_or_else(|| {
                RegistryError::NotFound(format!("no range contains {:#x}", addr))
            })?;

        if tables.put(base) {
            debug!("{}: unregistered {} at {:#x}", self.identity, handle, base);
        }
        Ok(())
    }

    /// Drop one registration of `handle`
    pub fn remove_by_fd(&self, handle: HandleId) -> Result<()> {
        let mut tables = self.write();

        let base = tables
            .handles
            .get(handle)
            .ok_or_else(|| RegistryError::NotFound(format!("{} is not registered", handle)))?;

        if tables.put(base) {
            debug!("{}: unregistered {} at {:#x}", self.identity, handle, base);
        }
        Ok(())
    }

    /// Resolve `[addr, addr + len)` to the registered range covering it
    ///
    /// `Conflict` carries the straddled entry when the query range crosses a
    /// registered boundary.
    pub fn query(&self, addr: u64, len: u64) -> Result<RangeInfo> {
        let end = checked_end(addr, len).ok_or_else(|| {
            RegistryError::InvalidArgument(format!(
                "range {:#x}+{:#x} is empty or overflows",
                addr, len
            ))
        })?;

        let tables = self.read();
        match tables.ranges.search(addr, end) {
            RangeLookup::Contained(entry) => Ok(entry.info()),
            RangeLookup::Straddles(entry) => Err(RegistryError::Conflict(entry.info())),
            RangeLookup::Vacant => Err(RegistryError::NotFound(format!(
                "no range intersects [{:#x}, {:#x})",
                addr, end
            ))),
        }
    }

    /// Snapshot of the entry registered for `handle`
    pub fn entry(&self, handle: HandleId) -> Option<RangeEntry> {
        let tables = self.read();
        let base = tables.handles.get(handle)?;
        tables.ranges.get(base).cloned()
    }

    /// Snapshot of all live entries in address order
    pub fn snapshot(&self) -> Vec<RangeEntry> {
        self.read().ranges.iter().cloned().collect()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.read().ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Free every entry regardless of its refcount
    ///
    /// Called once the context is unreachable from the registry.
    pub(crate) fn destroy(&self) -> usize {
        let mut tables = self.write();
        tables.handles.clear();
        tables.ranges.clear()
    }
}
