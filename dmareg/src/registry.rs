//! Process-wide table of address-space contexts
//!
//! The registry lock only guards lookups, inserts and removals in the
//! context table. Work on a context's ranges happens under that context's
//! own lock, after the registry lock has been dropped, so unrelated
//! address spaces never contend.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use crate::context::AddressSpaceContext;
use crate::entry::{checked_end, AddressSpaceId, RangeInfo};
use crate::error::{RegistryError, Result};

/// Resource limits, 0 meaning unlimited
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryLimits {
    pub max_contexts: usize,
    pub max_ranges_per_context: usize,
}

/// Registry statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    /// Live contexts
    pub contexts: usize,
    /// Live ranges across all contexts
    pub ranges: usize,
    /// Sum of all context refcounts
    pub context_refs: u64,
}

type ContextTable = HashMap<AddressSpaceId, Arc<AddressSpaceContext>>;

/// Registry of address-space contexts
#[derive(Debug, Default)]
pub struct Registry {
    contexts: Mutex<ContextTable>,
    limits: RegistryLimits,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: RegistryLimits) -> Self {
        Self {
            contexts: Mutex::new(HashMap::new()),
            limits,
        }
    }

    fn table(&self) -> MutexGuard<'_, ContextTable> {
        self.contexts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the context for `identity`, creating it on first use
    ///
    /// Every successful call must be paired with one [`release`](Self::release).
    pub fn acquire(&self, identity: AddressSpaceId) -> Result<Arc<AddressSpaceContext>> {
        let mut table = self.table();

        if let Some(context) = table.get(&identity) {
            context.get();
            debug!("{}: opened, refcount {}", identity, context.refcount());
            return Ok(Arc::clone(context));
        }

        if self.limits.max_contexts != 0 && table.len() >= self.limits.max_contexts {
            return Err(RegistryError::OutOfMemory(format!(
                "registry already holds {} contexts",
                self.limits.max_contexts
            )));
        }
        table
            .try_reserve(1)
            .map_err(|e| RegistryError::OutOfMemory(format!("context table: {}", e)))?;

        let context = Arc::new(AddressSpaceContext::new(
            identity,
            self.limits.max_ranges_per_context,
        ));
        table.insert(identity, Arc::clone(&context));

        info!("{}: context created", identity);
        Ok(context)
    }

    /// Look up an existing context without creating one, taking a reference
    fn acquire_existing(&self, identity: AddressSpaceId) -> Option<Arc<AddressSpaceContext>> {
        let table = self.table();
        let context = table.get(&identity)?;
        context.get();
        Some(Arc::clone(context))
    }

    /// Drop one reference to `context`
    ///
    /// The last release unlinks the context and frees all of its entries.
    /// Returns true if the context was destroyed.
    pub fn release(&self, context: Arc<AddressSpaceContext>) -> bool {
        let identity = context.identity();
        {
            let mut table = self.table();

            let linked = table
                .get(&identity)
                .is_some_and(|live| Arc::ptr_eq(live, &context));
            if !linked {
                warn!("{}: release of a context that is no longer registered", identity);
                return false;
            }

            if !context.put() {
                debug!("{}: closed, refcount {}", identity, context.refcount());
                return false;
            }
            table.remove(&identity);
        }

        let freed = context.destroy();
        info!("{}: context destroyed, {} ranges freed", identity, freed);
        true
    }

    /// Resolve a range in the address space of `identity`
    ///
    /// Never creates a context; an address space that registered nothing
    /// has nothing to resolve.
    pub fn query(&self, identity: AddressSpaceId, addr: u64, len: u64) -> Result<RangeInfo> {
        if checked_end(addr, len).is_none() {
            return Err(RegistryError::InvalidArgument(format!(
                "range {:#x}+{:#x} is empty or overflows",
                addr, len
            )));
        }

        let context = self.acquire_existing(identity).ok_or_else(|| {
            RegistryError::NotFound(format!("{} has no registered ranges", identity))
        })?;
        let result = context.query(addr, len);
        self.release(context);
        result
    }

    /// The live context for `identity`, if any, without taking a reference
    ///
    /// The result holds no open, so it must never be handed to `release`.
    #[cfg(test)]
    pub(crate) fn lookup(&self, identity: AddressSpaceId) -> Option<Arc<AddressSpaceContext>> {
        self.table().get(&identity).cloned()
    }

    pub fn context_count(&self) -> usize {
        self.table().len()
    }

    pub fn stats(&self) -> RegistryStats {
        let contexts: Vec<Arc<AddressSpaceContext>> = self.table().values().cloned().collect();

        RegistryStats {
            contexts: contexts.len(),
            ranges: contexts.iter().map(|c| c.len()).sum(),
            context_refs: contexts.iter().map(|c| u64::from(c.refcount())).sum(),
        }
    }

    /// Destroy every remaining context
    ///
    /// Used at shutdown; under correct usage the registry is already empty.
    /// Returns how many contexts were still live.
    pub fn drain(&self) -> usize {
        let drained: Vec<Arc<AddressSpaceContext>> = {
            let mut table = self.table();
            table.drain().map(|(_, context)| context).collect()
        };

        for context in &drained {
            let freed = context.destroy();
            warn!(
                "{}: still open at shutdown (refcount {}), {} ranges freed",
                context.identity(),
                context.refcount(),
                freed
            );
        }
        drained.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::HandleId;

    #[test]
    fn test_acquire_creates_then_shares() {
        let registry = Registry::new();
        let a = registry.acquire(AddressSpaceId(1)).unwrap();
        let b = registry.acquire(AddressSpaceId(1)).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.refcount(), 2);
        assert_eq!(registry.context_count(), 1);

        // Peeking at the table takes no open
        let peeked = registry.lookup(AddressSpaceId(1)).unwrap();
        assert!(Arc::ptr_eq(&peeked, &a));
        assert_eq!(a.refcount(), 2);

        assert!(!registry.release(a));
        assert!(registry.release(b));
        assert_eq!(registry.context_count(), 0);
    }

    #[test]
    fn test_teardown_yields_fresh_context() {
        let registry = Registry::new();
        let ctx = registry.acquire(AddressSpaceId(9)).unwrap();
        ctx.add(HandleId(1), 0x1000, 0x1000).unwrap();

        let stale = Arc::clone(&ctx);
        assert!(registry.release(ctx));
        assert!(stale.is_empty());
        assert!(registry.lookup(AddressSpaceId(9)).is_none());

        let fresh = registry.acquire(AddressSpaceId(9)).unwrap();
        assert!(fresh.is_empty());
        assert_eq!(fresh.refcount(), 1);
        assert!(!Arc::ptr_eq(&fresh, &stale));

        // A stale handle on the destroyed context must not touch the new one
        assert!(!registry.release(stale));
        assert_eq!(fresh.refcount(), 1);
        registry.release(fresh);
    }

    #[test]
    fn test_context_isolation() {
        let registry = Registry::new();
        let a = registry.acquire(AddressSpaceId(1)).unwrap();
        let b = registry.acquire(AddressSpaceId(2)).unwrap();

        a.add(HandleId(3), 100, 50).unwrap();
        b.add(HandleId(4), 100, 50).unwrap();

        a.remove_by_addr(120).unwrap();
        assert!(a.is_empty());
        assert_eq!(b.query(120, 10).unwrap().handle, HandleId(4));

        registry.release(a);
        assert_eq!(
            registry.query(AddressSpaceId(2), 100, 50).unwrap().handle,
            HandleId(4)
        );
        registry.release(b);
    }

    #[test]
    fn test_query_by_identity() {
        let registry = Registry::new();

        assert!(matches!(
            registry.query(AddressSpaceId(5), 0, 10),
            Err(RegistryError::NotFound(_))
        ));
        assert!(matches!(
            registry.query(AddressSpaceId(5), 0, 0),
            Err(RegistryError::InvalidArgument(_))
        ));
        // Querying must not create a context
        assert_eq!(registry.context_count(), 0);

        let ctx = registry.acquire(AddressSpaceId(5)).unwrap();
        ctx.add(HandleId(7), 100, 50).unwrap();
        assert_eq!(registry.query(AddressSpaceId(5), 110, 20).unwrap().base, 100);
        assert_eq!(ctx.refcount(), 1);
        registry.release(ctx);
    }

    #[test]
    fn test_context_limit() {
        let registry = Registry::with_limits(RegistryLimits {
            max_contexts: 1,
            max_ranges_per_context: 0,
        });
        let a = registry.acquire(AddressSpaceId(1)).unwrap();
        assert!(matches!(
            registry.acquire(AddressSpaceId(2)),
            Err(RegistryError::OutOfMemory(_))
        ));
        // Existing contexts can still be opened
        let again = registry.acquire(AddressSpaceId(1)).unwrap();
        registry.release(again);
        registry.release(a);
    }

    #[test]
    fn test_stats_and_drain() {
        let registry = Registry::new();
        let a = registry.acquire(AddressSpaceId(1)).unwrap();
        let _a2 = registry.acquire(AddressSpaceId(1)).unwrap();
        let b = registry.acquire(AddressSpaceId(2)).unwrap();
        a.add(HandleId(1), 0, 10).unwrap();
        b.add(HandleId(1), 0, 10).unwrap();
        b.add(HandleId(2), 10, 10).unwrap();

        let stats = registry.stats();
        assert_eq!(stats.contexts, 2);
        assert_eq!(stats.ranges, 3);
        assert_eq!(stats.context_refs, 3);

        assert_eq!(registry.drain(), 2);
        assert_eq!(registry.context_count(), 0);
        assert!(a.is_empty() && b.is_empty());
    }
}
