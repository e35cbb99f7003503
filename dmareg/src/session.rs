//! Registry sessions
//!
//! A session is one logical connection from a process: opening it acquires
//! the process's context, closing (or dropping) it releases that context.

use std::sync::Arc;

use crate::context::AddressSpaceContext;
use crate::entry::{AddressSpaceId, HandleId, RangeEntry, RangeInfo};
use crate::error::Result;
use crate::registry::Registry;

/// Open reference to one address-space context
#[derive(Debug)]
pub struct Session {
    registry: Arc<Registry>,
    context: Arc<AddressSpaceContext>,
    closed: bool,
}

impl Session {
    /// Open a session for `identity`
    pub fn open(registry: &Arc<Registry>, identity: AddressSpaceId) -> Result<Self> {
        let context = registry.acquire(identity)?;
        Ok(Self {
            registry: Arc::clone(registry),
            context,
            closed: false,
        })
    }

    fn context(&self) -> &AddressSpaceContext {
        &self.context
    }

    pub fn identity(&self) -> AddressSpaceId {
        self.context().identity()
    }

    pub fn add(&self, handle: HandleId, base: u64, size: u64) -> Result<()> {
        self.context().add(handle, base, size)
    }

    pub fn remove_by_addr(&self, addr: u64) -> Result<()> {
        self.context().remove_by_addr(addr)
    }

    pub fn remove_by_fd(&self, handle: HandleId) -> Result<()> {
        self.context().remove_by_fd(handle)
    }

    pub fn query(&self, addr: u64, len: u64) -> Result<RangeInfo> {
        self.context().query(addr, len)
    }

    pub fn ranges(&self) -> Vec<RangeEntry> {
        self.context().snapshot()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Close the session; true if this destroyed the context
    pub fn close(mut self) -> bool {
        self.release()
    }

    fn release(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        self.registry.release(Arc::clone(&self.context))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sessions_share_context() {
        let registry = Arc::new(Registry::new());
        let first = Session::open(&registry, AddressSpaceId(42)).unwrap();
        let second = Session::open(&registry, AddressSpaceId(42)).unwrap();

        first.add(HandleId(1), 0x1000, 0x1000).unwrap();
        assert_eq!(second.query(0x1000, 0x10).unwrap().handle, HandleId(1));

        assert!(!first.close());
        assert_eq!(second.ranges().len(), 1);
        assert!(second.close());
        assert_eq!(registry.context_count(), 0);
    }

    #[test]
    fn test_drop_releases() {
        let registry = Arc::new(Registry::new());
        {
            let session = Session::open(&registry, AddressSpaceId(3)).unwrap();
            session.add(HandleId(9), 0, 4096).unwrap();
            assert_eq!(session.identity(), AddressSpaceId(3));
        }
        assert_eq!(registry.context_count(), 0);
        assert!(registry.lookup(AddressSpaceId(3)).is_none());
    }
}
