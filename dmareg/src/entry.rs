//! Registered buffer ranges
//!
//! A range entry binds one `[base, base + size)` interval of a process's
//! virtual address space to the handle of the exported buffer backing it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of an exported buffer (a dma-buf style file descriptor)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandleId(pub u32);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd {}", self.0)
    }
}

/// Identity of one process address space
///
/// Stable for the lifetime of the process. The daemon derives it from the
/// peer credentials of the connecting process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AddressSpaceId(pub u64);

impl AddressSpaceId {
    const PID_BITS: u32 = 22;

    /// Identity of a running process
    ///
    /// Linux pids stay below `2^22`; the start time fills the upper bits so
    /// that a recycled pid yields a different identity.
    pub fn from_process(pid: u32, start_time: u64) -> Self {
        let pid = u64::from(pid) & ((1 << Self::PID_BITS) - 1);
        Self((start_time << Self::PID_BITS) | pid)
    }

    pub fn pid(&self) -> u32 {
        (self.0 & ((1 << Self::PID_BITS) - 1)) as u32
    }

    pub fn start_time(&self) -> u64 {
        self.0 >> Self::PID_BITS
    }
}

impl fmt::Display for AddressSpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.start_time() {
            0 => write!(f, "as:{}", self.pid()),
            start => write!(f, "as:{}@{}", self.pid(), start),
        }
    }
}

/// The resolvable part of an entry: where it lives and which handle backs it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeInfo {
    pub base: u64,
    pub size: u64,
    pub handle: HandleId,
}

impl RangeInfo {
    /// Exclusive end address, saturating for a range decoded off the wire
    pub fn end(&self) -> u64 {
        self.base.saturating_add(self.size)
    }
}

impl fmt::Display for RangeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{:#x}, {:#x})", self.handle, self.base, self.end())
    }
}

/// A registered range with its registration count
///
/// Re-registering the identical `(handle, base, size)` bumps `refcount`
/// instead of inserting a second entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeEntry {
    pub base: u64,
    pub size: u64,
    pub handle: HandleId,
    pub refcount: u32,
}

impl RangeEntry {
    /// Create an entry holding one registration
    pub(crate) fn new(handle: HandleId, base: u64, size: u64) -> Self {
        Self {
            base,
            size,
            handle,
            refcount: 1,
        }
    }

    pub fn end(&self) -> u64 {
        self.base.saturating_add(self.size)
    }

    pub fn info(&self) -> RangeInfo {
        RangeInfo {
            base: self.base,
            size: self.size,
            handle: self.handle,
        }
    }

    /// Does the entry describe exactly this registration?
    pub fn matches(&self, base: u64, size: u64) -> bool {
        self.base == base && self.size == size
    }

    /// Is `addr` inside the entry?
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr < self.end()
    }

    /// Is `[start, end)` entirely inside the entry?
    pub fn covers(&self, start: u64, end: u64) -> bool {
        start >= self.base && end <= self.end()
    }

    /// Does `[start, end)` share at least one byte with the entry?
    pub fn intersects(&self, start: u64, end: u64) -> bool {
        start < self.end() && end > self.base
    }

    /// Take another registration
    pub(crate) fn get(&mut self) {
        self.refcount = self.refcount.saturating_add(1);
    }

    /// Drop one registration; true when the last one is gone
    pub(crate) fn put(&mut self) -> bool {
        self.refcount = self.refcount.saturating_sub(1);
        self.refcount == 0
    }
}

/// Validate a `(start, len)` pair and return the exclusive end
///
/// `None` for an empty range or one whose end does not fit in 64 bits.
pub(crate) fn checked_end(start: u64, len: u64) -> Option<u64> {
    if len == 0 {
        return None;
    }
    start.checked_add(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_geometry() {
        let entry = RangeEntry::new(HandleId(7), 100, 50);
        assert_eq!(entry.end(), 150);
        assert!(entry.contains(100));
        assert!(entry.contains(149));
        assert!(!entry.contains(150));
        assert!(entry.covers(110, 130));
        assert!(!entry.covers(140, 160));
        assert!(entry.intersects(140, 160));
        assert!(!entry.intersects(150, 160));
        assert!(!entry.intersects(90, 100));
    }

    #[test]
    fn test_entry_refcount() {
        let mut entry = RangeEntry::new(HandleId(1), 0x1000, 0x1000);
        assert_eq!(entry.refcount, 1);
        entry.get();
        assert!(!entry.put());
        assert!(entry.put());
    }

    #[test]
    fn test_checked_end() {
        assert_eq!(checked_end(100, 50), Some(150));
        assert_eq!(checked_end(100, 0), None);
        assert_eq!(checked_end(u64::MAX - 10, 10), Some(u64::MAX));
        assert_eq!(checked_end(u64::MAX - 10, 11), None);
    }

    #[test]
    fn test_range_info_display() {
        let info = RangeEntry::new(HandleId(3), 0x1000, 0x100).info();
        assert_eq!(info.to_string(), "fd 3 [0x1000, 0x1100)");

        // Fields of a decoded response are unchecked
        let bogus: RangeInfo =
            serde_json::from_str(r#"{"base":18446744073709551615,"size":2,"handle":1}"#).unwrap();
        assert_eq!(bogus.end(), u64::MAX);
        assert_eq!(bogus.to_string(), "fd 1 [0xffffffffffffffff, 0xffffffffffffffff)");
    }

    #[test]
    fn test_address_space_id_from_process() {
        let id = AddressSpaceId::from_process(4321, 987_654);
        assert_eq!(id.pid(), 4321);
        assert_eq!(id.start_time(), 987_654);
        assert_eq!(id.to_string(), "as:4321@987654");

        // Same pid, different process
        assert_ne!(id, AddressSpaceId::from_process(4321, 987_655));
        assert_eq!(AddressSpaceId(7).to_string(), "as:7");
    }
}
