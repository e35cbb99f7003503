//! dmareg - Nyx Buffer Range Registry
//!
//! Lets a buffer producer (a GPU memory allocator) register the address
//! ranges of buffers it exported as shareable handles, and lets a consumer
//! (an RDMA driver) resolve any address range back to the handle and exact
//! range backing it:
//! - Registrations scoped per process address space
//! - Non-overlapping ranges, refcounted re-registration
//! - `O(log n)` containment queries
//! - Unix socket daemon and client

pub mod client;
pub mod config;
pub mod context;
pub mod entry;
pub mod error;
pub mod handle_table;
pub mod ipc;
pub mod range_index;
pub mod registry;
pub mod session;
pub mod state;

pub use context::AddressSpaceContext;
pub use entry::{AddressSpaceId, HandleId, RangeEntry, RangeInfo};
pub use error::{ErrorCode, RegistryError, Result};
pub use registry::{Registry, RegistryLimits, RegistryStats};
pub use session::Session;
