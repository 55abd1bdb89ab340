//! The four pipeline workers — Normalizer, Enricher, Aggregator, Projector —
//! and the shared streaming runtime (health, circuit breaking, retry,
//! rate limiting, graceful shutdown, metrics, scheduling) they run on.

pub mod aggregator;
pub mod context;
pub mod enricher;
pub mod error;
pub mod normalizer;
pub mod projector;
pub mod runtime;
pub mod scheduler;
pub mod streaming;

pub use aggregator::{Aggregator, FoldOutcome, TickResult};
pub use context::{CorrelationToken, WorkerContext};
pub use enricher::{refresh_shared_cache, Enricher, TaxonomyClassifier};
pub use error::{ErrorDisposition, PipelineError};
pub use normalizer::{JsonVenueParser, NormalizeOutcome, Normalizer, RawEvent, ValidationBounds, VenueParser};
pub use projector::{reconcile_sample, DriftRepair, Projector};
pub use runtime::{
    retry_with_backoff, CircuitBreaker, CircuitBreakerConfig, GracefulShutdown, HealthCheck,
    HealthStatus, MetricsCollector, MetricsSnapshot, OperationGuard, RateLimiter, ServiceStatus,
};
pub use scheduler::IntervalScheduler;
pub use streaming::{DeadLetterEntry, InMemoryDeadLetterSink, StreamConsumer, StreamProducer, Topic};
