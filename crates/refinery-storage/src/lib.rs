//! Storage backends implementing the `refinery-traits` capabilities.

pub mod memory;
pub mod redb_cache;

pub use memory::{
    in_memory_analytical_store, InMemoryAuditStore, InMemoryBarStore, InMemoryCurveStore,
    InMemoryHotCache, InMemoryReferenceStore, InMemoryServedStore, InMemoryTickStore,
};
pub use redb_cache::RedbHotCache;
