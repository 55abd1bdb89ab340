//! Enumerated worker configuration surface.
//!
//! Every recognized option is named explicitly; unknown keys in a
//! deserialized document are rejected rather than silently ignored
//! (`#[serde(deny_unknown_fields)]` on each section).

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::TraitError;

/// Analytical-flush batching options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchConfig {
    /// Max records per analytical flush.
    pub max_size: usize,
    /// Time-based flush trigger, in milliseconds.
    pub max_interval_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_size: 500,
            max_interval_ms: 1_000,
        }
    }
}

/// Consumer polling options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConsumerConfig {
    /// Minimum fetch size, in bytes.
    pub fetch_min_bytes: usize,
    /// Per-poll record cap.
    pub max_poll_records: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            fetch_min_bytes: 1,
            max_poll_records: 500,
        }
    }
}

/// In-place retry and DLQ escalation options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// In-place retries before DLQ escalation.
    pub max_attempts: u32,
    /// Exponential backoff base, in milliseconds.
    pub backoff_base_ms: u64,
    /// Exponential backoff cap, in milliseconds.
    pub backoff_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base_ms: 100,
            backoff_max_ms: 10_000,
        }
    }
}

impl RetryConfig {
    /// Computes the delay for a given attempt number using exponential backoff.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.backoff_base_ms as f64 * 2f64.powi(attempt as i32);
        let capped = base.min(self.backoff_max_ms as f64);
        Duration::from_millis(capped as u64)
    }

    fn validate(&self) -> Result<(), TraitError> {
        if self.backoff_base_ms > self.backoff_max_ms {
            return Err(TraitError::InvalidInput(
                "retry.backoff.base_ms must not exceed retry.backoff.max_ms".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(TraitError::InvalidInput(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Bar-windowing and watermark options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WindowConfig {
    /// Enabled bar intervals, in canonical form (e.g. `["1m", "5m"]`).
    pub intervals: Vec<String>,
    /// Watermark lag, in milliseconds.
    pub max_out_of_order_ms: i64,
    /// Bar-recompute horizon for late ticks, in milliseconds.
    pub late_lookback_ms: i64,
    /// Additional grace period after watermark passes window end, in milliseconds.
    pub grace_ms: i64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            intervals: vec!["1m".to_string(), "5m".to_string()],
            max_out_of_order_ms: 5_000,
            late_lookback_ms: 5 * 60 * 1000,
            grace_ms: 2_000,
        }
    }
}

impl WindowConfig {
    fn validate(&self) -> Result<(), TraitError> {
        if self.intervals.is_empty() {
            return Err(TraitError::InvalidInput(
                "window.intervals must not be empty".to_string(),
            ));
        }
        for raw in &self.intervals {
            refinery_core::Interval::parse(raw)
                .map_err(|e| TraitError::InvalidInput(format!("window.intervals: {}", e)))?;
        }
        Ok(())
    }
}

/// Enrichment cache tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Process-local LRU capacity.
    pub local_capacity: usize,
    /// Process-local LRU entry TTL, in milliseconds.
    pub local_ttl_ms: u64,
    /// Shared cache entry TTL, in milliseconds.
    pub shared_ttl_ms: u64,
    /// Negative-cache entry TTL, in milliseconds.
    pub negative_ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            local_capacity: 10_000,
            local_ttl_ms: 30_000,
            shared_ttl_ms: 5 * 60 * 1000,
            negative_ttl_ms: 30_000,
        }
    }
}

/// Served-projection cache options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectionConfig {
    /// Served cache TTL, in milliseconds.
    pub ttl_ms: u64,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self { ttl_ms: 60_000 }
    }
}

/// Reconciliation sweep options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconcileConfig {
    /// Sweep interval, in milliseconds.
    pub interval_ms: u64,
    /// Fraction of projection keys sampled per sweep, in `(0, 1]`.
    pub sample_rate: f64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            sample_rate: 0.05,
        }
    }
}

impl ReconcileConfig {
    fn validate(&self) -> Result<(), TraitError> {
        if !(self.sample_rate > 0.0 && self.sample_rate <= 1.0) {
            return Err(TraitError::InvalidInput(
                "reconcile.sample_rate must be in (0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

/// Full configuration object for one worker, enumerating every recognized
/// option from the external interfaces surface. Invalid configurations are
/// fatal at startup (see [`WorkerConfig::validate`]).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    /// Name of the worker this config applies to (`normalizer`, `enricher`, ...).
    pub worker_name: String,
    /// Analytical-flush batching.
    pub batch: BatchConfig,
    /// Consumer polling.
    pub consumer: ConsumerConfig,
    /// In-place retry and DLQ escalation.
    pub retry: RetryConfig,
    /// Bar-windowing and watermark.
    pub window: WindowConfig,
    /// Enrichment cache tiers.
    pub cache: CacheConfig,
    /// Served-projection cache.
    pub projection: ProjectionConfig,
    /// Reconciliation sweep.
    pub reconcile: ReconcileConfig,
}

impl WorkerConfig {
    /// Builds a config for the named worker with every section at its default.
    pub fn named(worker_name: impl Into<String>) -> Self {
        Self {
            worker_name: worker_name.into(),
            ..Default::default()
        }
    }

    /// A preset tuned for minimal end-to-end latency: small batches, frequent
    /// flushes, tight reconciliation cadence.
    pub fn low_latency(worker_name: impl Into<String>) -> Self {
        let mut cfg = Self::named(worker_name);
        cfg.batch.max_size = 50;
        cfg.batch.max_interval_ms = 100;
        cfg.projection.ttl_ms = 10_000;
        cfg.reconcile.interval_ms = 5_000;
        cfg
    }

    /// A preset tuned for maximum sustained throughput: large batches, longer
    /// flush intervals, relaxed reconciliation cadence.
    pub fn high_throughput(worker_name: impl Into<String>) -> Self {
        let mut cfg = Self::named(worker_name);
        cfg.batch.max_size = 5_000;
        cfg.batch.max_interval_ms = 5_000;
        cfg.consumer.max_poll_records = 5_000;
        cfg.reconcile.interval_ms = 120_000;
        cfg
    }

    /// Validates every section, returning the first invariant violation found.
    /// Per the error-handling design, configuration/invariant violations are
    /// fatal at startup — callers should refuse to construct a worker on `Err`.
    pub fn validate(&self) -> Result<(), TraitError> {
        if self.worker_name.is_empty() {
            return Err(TraitError::InvalidInput(
                "worker_name must not be empty".to_string(),
            ));
        }
        self.retry.validate()?;
        self.window.validate()?;
        self.reconcile.validate()?;
        Ok(())
    }
}

/// A single configuration change notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigChange {
    /// Dotted key that changed (e.g. `"reconcile.sample_rate"`).
    pub key: String,
    /// Previous value, JSON-encoded.
    pub previous_value: Option<String>,
    /// New value, JSON-encoded.
    pub new_value: Option<String>,
}

/// Source of truth for a worker's configuration, with a subscription channel
/// for the handful of settings safe to change without a restart.
#[async_trait::async_trait]
pub trait ConfigSource: Send + Sync {
    /// Returns the current configuration.
    async fn get(&self) -> Result<WorkerConfig, TraitError>;

    /// Subscribes to live configuration changes.
    async fn subscribe(&self) -> Result<tokio::sync::broadcast::Receiver<ConfigChange>, TraitError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(WorkerConfig::named("normalizer").validate().is_ok());
    }

    #[test]
    fn backwards_backoff_window_is_rejected() {
        let mut cfg = WorkerConfig::named("enricher");
        cfg.retry.backoff_base_ms = 1000;
        cfg.retry.backoff_max_ms = 100;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn empty_interval_set_is_rejected() {
        let mut cfg = WorkerConfig::named("aggregator");
        cfg.window.intervals.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn presets_still_validate() {
        assert!(WorkerConfig::low_latency("projector").validate().is_ok());
        assert!(WorkerConfig::high_throughput("aggregator").validate().is_ok());
    }
}
