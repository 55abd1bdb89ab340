//! Capability traits binding the pipeline workers to their external
//! dependencies: the event bus, the analytical store, the reference store,
//! and the hot cache.

pub mod bus;
pub mod cache;
pub mod config;
pub mod error;
pub mod reference_store;
pub mod storage;

pub use bus::{DeadLetterSink, EventConsumer, EventEnvelope, EventId, EventProducer};
pub use cache::HotCache;
pub use config::{ConfigChange, ConfigSource, WorkerConfig};
pub use error::TraitError;
pub use reference_store::ReferenceStore;
pub use storage::{AnalyticalStore, AuditEntry, AuditStore, BarStore, CurveStore, ServedStore, TickStore};
