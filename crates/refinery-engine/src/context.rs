//! A single context type shared by every worker, replacing what would
//! otherwise be a different ad hoc bundle of dependencies per stage.
//!
//! Each worker previously reached for its own mix of store handles — one
//! accidentally constructed with a cache the others didn't know about —
//! which is exactly the drift this type forecloses: every worker is handed
//! the same `WorkerContext`, built once at startup, and pulls only the
//! pieces it needs from it.

use std::sync::Arc;

use refinery_traits::config::WorkerConfig;
use refinery_traits::{AnalyticalStore, HotCache, ReferenceStore};

use crate::runtime::{GracefulShutdown, MetricsCollector};

/// Opaque token threaded through logs for one in-flight unit of work, so a
/// single tick's path through normalize -> enrich -> aggregate -> project
/// can be grepped out of mixed logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationToken(String);

impl CorrelationToken {
    /// Derives a token from a stable identity tuple rather than randomness,
    /// so retries and re-processing reuse the same token.
    pub fn from_identity(parts: &[&str]) -> Self {
        Self(parts.join(":"))
    }

    /// Returns the token as a string slice for use in `tracing` fields.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shared dependency bundle handed to every worker.
pub struct WorkerContext {
    /// This worker's validated configuration.
    pub config: WorkerConfig,
    /// Durable tables: silver ticks, bars, curves, served views, audit log.
    pub store: AnalyticalStore,
    /// Shared hot cache for enrichment lookups and served-projection reads.
    pub cache: Arc<dyn HotCache>,
    /// Reference data (instrument metadata, taxonomy).
    pub reference: Arc<dyn ReferenceStore>,
    /// Rolling counters and latency samples backing `/metrics`.
    pub metrics: Arc<MetricsCollector>,
    /// Coordinated shutdown signal shared by all workers in the process.
    pub shutdown: Arc<GracefulShutdown>,
}

impl WorkerContext {
    /// Assembles a context from its parts, validating the configuration.
    /// Per the configuration design, an invalid configuration is a fatal
    /// startup error rather than something workers discover at runtime.
    pub fn new(
        config: WorkerConfig,
        store: AnalyticalStore,
        cache: Arc<dyn HotCache>,
        reference: Arc<dyn ReferenceStore>,
        shutdown: Arc<GracefulShutdown>,
    ) -> Result<Self, refinery_traits::TraitError> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            cache,
            reference,
            metrics: Arc::new(MetricsCollector::new(4_096)),
            shutdown,
        })
    }
}
