//! Shared runtime building blocks used by every worker: health aggregation,
//! a circuit breaker and retry helper around dependency calls, a token-bucket
//! rate limiter, and graceful shutdown coordination.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::time::sleep;

use refinery_traits::config::RetryConfig;

// =============================================================================
// HEALTH
// =============================================================================

/// Aggregate health state of a worker or one of its dependencies.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum HealthStatus {
    /// Fully operational.
    Healthy,
    /// Operational but with a degraded dependency.
    Degraded,
    /// Not operational.
    Unhealthy,
    /// Not yet checked.
    Unknown,
}

impl HealthStatus {
    /// True for `Healthy` or `Degraded` — i.e. safe to keep serving traffic.
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }
}

/// Health of one named dependency.
#[derive(Debug, Clone)]
pub struct ServiceStatus {
    /// Dependency name (e.g. `"analytical_store"`).
    pub name: String,
    /// Current status.
    pub status: HealthStatus,
    /// Optional detail, populated on degraded/unhealthy.
    pub message: Option<String>,
}

impl ServiceStatus {
    /// Builds a healthy status for `name`.
    pub fn healthy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            message: None,
        }
    }

    /// Builds an unhealthy status for `name` with a detail message.
    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
        }
    }
}

/// Aggregated health of a worker: `/health/live` checks `is_live`, while
/// `/health/ready` checks `is_ready` (all dependencies healthy and the last
/// offset commit is within bound).
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// Overall status.
    pub status: HealthStatus,
    /// Per-dependency statuses that fed the aggregate.
    pub components: Vec<ServiceStatus>,
}

impl HealthCheck {
    /// Aggregates component statuses: all healthy -> Healthy; any unhealthy ->
    /// Unhealthy; otherwise Degraded. No components -> Unknown.
    pub fn from_components(components: Vec<ServiceStatus>) -> Self {
        let status = if components.is_empty() {
            HealthStatus::Unknown
        } else if components.iter().any(|c| c.status == HealthStatus::Unhealthy) {
            HealthStatus::Unhealthy
        } else if components.iter().all(|c| c.status == HealthStatus::Healthy) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };
        Self { status, components }
    }

    /// Liveness: the process itself is responsive (never reports Unknown).
    pub fn is_live(&self) -> bool {
        !matches!(self.status, HealthStatus::Unhealthy)
    }

    /// Readiness: dependencies are operational.
    pub fn is_ready(&self) -> bool {
        self.status.is_operational()
    }
}

// =============================================================================
// CIRCUIT BREAKER
// =============================================================================

/// Circuit breaker state machine.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Tuning for a [`CircuitBreaker`].
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening.
    pub failure_threshold: u64,
    /// Consecutive half-open successes before closing again.
    pub success_threshold: u64,
    /// How long to stay open before probing with a half-open call.
    pub timeout: Duration,
    /// Human-readable name, used in error messages.
    pub name: String,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(30),
            name: "dependency".to_string(),
        }
    }
}

/// Protects a downstream dependency call from cascading failure.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: RwLock<CircuitState>,
    failure_count: AtomicU64,
    success_count: AtomicU64,
    last_failure_time: RwLock<Option<Instant>>,
}

impl CircuitBreaker {
    /// Builds a circuit breaker with the given configuration.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            last_failure_time: RwLock::new(None),
        }
    }

    fn state(&self) -> CircuitState {
        let current = *self.state.read();
        if current == CircuitState::Open {
            let elapsed = self
                .last_failure_time
                .read()
                .map(|t| t.elapsed())
                .unwrap_or_default();
            if elapsed >= self.config.timeout {
                *self.state.write() = CircuitState::HalfOpen;
                return CircuitState::HalfOpen;
            }
        }
        current
    }

    fn on_success(&self) {
        match self.state() {
            CircuitState::HalfOpen => {
                let successes = self.success_count.fetch_add(1, Ordering::SeqCst) + 1;
                if successes >= self.config.success_threshold {
                    *self.state.write() = CircuitState::Closed;
                    self.failure_count.store(0, Ordering::SeqCst);
                    self.success_count.store(0, Ordering::SeqCst);
                }
            }
            _ => {
                self.failure_count.store(0, Ordering::SeqCst);
            }
        }
    }

    fn on_failure(&self) {
        *self.last_failure_time.write() = Some(Instant::now());
        match self.state() {
            CircuitState::HalfOpen => {
                *self.state.write() = CircuitState::Open;
                self.success_count.store(0, Ordering::SeqCst);
            }
            CircuitState::Closed => {
                let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.config.failure_threshold {
                    *self.state.write() = CircuitState::Open;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Runs `f` if the circuit is not open, recording the outcome.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if self.state() == CircuitState::Open {
            tracing::warn!(circuit = %self.config.name, "circuit open, short-circuiting call");
        }
        match f().await {
            Ok(v) => {
                self.on_success();
                Ok(v)
            }
            Err(e) => {
                self.on_failure();
                Err(e)
            }
        }
    }

    /// True if the breaker is currently closed (fully operational).
    pub fn is_closed(&self) -> bool {
        self.state() == CircuitState::Closed
    }
}

// =============================================================================
// RETRY HELPER
// =============================================================================

/// Runs `f` with exponential backoff up to `config.max_attempts`, per the
/// shared retry helper parameterized by `{max_attempts, backoff, classify}`.
pub async fn retry_with_backoff<F, Fut, T, E>(config: &RetryConfig, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Debug,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                attempt += 1;
                if attempt >= config.max_attempts {
                    tracing::warn!(attempt, error = ?e, "retry attempts exhausted");
                    return Err(e);
                }
                let delay = config.delay_for_attempt(attempt);
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying after delay");
                sleep(delay).await;
            }
        }
    }
}

// =============================================================================
// RATE LIMITER
// =============================================================================

/// Token-bucket rate limiter.
pub struct RateLimiter {
    capacity: f64,
    refill_rate: f64,
    tokens: Mutex<f64>,
    last_refill: Mutex<Instant>,
}

impl RateLimiter {
    /// Creates a limiter sustaining `requests_per_second` with bursts up to `burst_size`.
    pub fn new(requests_per_second: f64, burst_size: u64) -> Self {
        Self {
            capacity: burst_size as f64,
            refill_rate: requests_per_second,
            tokens: Mutex::new(burst_size as f64),
            last_refill: Mutex::new(Instant::now()),
        }
    }

    fn refill(&self) {
        let mut tokens = self.tokens.lock();
        let mut last_refill = self.last_refill.lock();
        let elapsed = last_refill.elapsed();
        *tokens = (*tokens + elapsed.as_secs_f64() * self.refill_rate).min(self.capacity);
        *last_refill = Instant::now();
    }

    /// Attempts to take one token without blocking.
    pub fn try_acquire(&self) -> bool {
        self.refill();
        let mut tokens = self.tokens.lock();
        if *tokens >= 1.0 {
            *tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

// =============================================================================
// GRACEFUL SHUTDOWN
// =============================================================================

/// Coordinates draining in-flight work before a worker stops.
pub struct GracefulShutdown {
    shutdown_initiated: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
    active_operations: AtomicU64,
    timeout: Duration,
}

impl GracefulShutdown {
    /// Creates a coordinator with the given drain timeout.
    pub fn new(timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            shutdown_initiated: AtomicBool::new(false),
            shutdown_tx,
            active_operations: AtomicU64::new(0),
            timeout,
        }
    }

    /// True once [`GracefulShutdown::shutdown`] has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_initiated.load(Ordering::SeqCst)
    }

    /// Signals shutdown to all subscribers, idempotently.
    pub fn shutdown(&self) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let _ = self.shutdown_tx.send(());
        }
    }

    /// Subscribes to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Registers one in-flight operation; returns `None` once shutdown has begun.
    pub fn register_operation(&self) -> Option<OperationGuard<'_>> {
        if self.is_shutting_down() {
            None
        } else {
            self.active_operations.fetch_add(1, Ordering::SeqCst);
            Some(OperationGuard { shutdown: self })
        }
    }

    /// Waits for in-flight operations to finish, or the drain timeout to elapse.
    pub async fn wait_for_completion(&self) {
        let start = Instant::now();
        while self.active_operations.load(Ordering::SeqCst) > 0 {
            if start.elapsed() >= self.timeout {
                tracing::warn!(
                    active = self.active_operations.load(Ordering::SeqCst),
                    "shutdown drain timeout reached"
                );
                break;
            }
            sleep(Duration::from_millis(50)).await;
        }
    }
}

/// RAII guard decrementing the active-operation count on drop.
pub struct OperationGuard<'a> {
    shutdown: &'a GracefulShutdown,
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        self.shutdown.active_operations.fetch_sub(1, Ordering::SeqCst);
    }
}

// =============================================================================
// METRICS COLLECTOR
// =============================================================================

/// Rolling-window latency/error collector feeding the `/metrics` surface.
pub struct MetricsCollector {
    processed: AtomicU64,
    failed: AtomicU64,
    dlq: AtomicU64,
    latencies_us: Mutex<VecDeque<u64>>,
    max_samples: usize,
}

impl MetricsCollector {
    /// Creates a collector retaining up to `max_samples` latency observations.
    pub fn new(max_samples: usize) -> Self {
        Self {
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            dlq: AtomicU64::new(0),
            latencies_us: Mutex::new(VecDeque::with_capacity(max_samples)),
            max_samples,
        }
    }

    /// Records one successfully processed message and its latency.
    pub fn record_processed(&self, latency: Duration) {
        self.processed.fetch_add(1, Ordering::SeqCst);
        let mut samples = self.latencies_us.lock();
        if samples.len() >= self.max_samples {
            samples.pop_front();
        }
        samples.push_back(latency.as_micros() as u64);
    }

    /// Records one failed (but not DLQ'd) message.
    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    /// Records one message escalated to the dead-letter topic.
    pub fn record_dlq(&self) {
        self.dlq.fetch_add(1, Ordering::SeqCst);
    }

    /// Snapshots current counters, including the p50/p99 over retained samples.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut samples: Vec<u64> = self.latencies_us.lock().iter().copied().collect();
        samples.sort_unstable();
        let p50 = percentile(&samples, 0.50);
        let p99 = percentile(&samples, 0.99);
        MetricsSnapshot {
            processed: self.processed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            dlq: self.dlq.load(Ordering::SeqCst),
            p50_latency_us: p50,
            p99_latency_us: p99,
        }
    }
}

fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = ((sorted.len() - 1) as f64 * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Point-in-time snapshot of [`MetricsCollector`] state.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    /// Messages processed successfully.
    pub processed: u64,
    /// Messages that failed but were retried rather than DLQ'd.
    pub failed: u64,
    /// Messages escalated to the dead-letter topic.
    pub dlq: u64,
    /// Median processing latency, in microseconds.
    pub p50_latency_us: u64,
    /// 99th-percentile processing latency, in microseconds.
    pub p99_latency_us: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_check_aggregates_worst_component() {
        let hc = HealthCheck::from_components(vec![
            ServiceStatus::healthy("bus"),
            ServiceStatus::unhealthy("store", "timeout"),
        ]);
        assert_eq!(hc.status, HealthStatus::Unhealthy);
        assert!(!hc.is_ready());
    }

    #[test]
    fn health_check_empty_components_is_unknown() {
        let hc = HealthCheck::from_components(vec![]);
        assert_eq!(hc.status, HealthStatus::Unknown);
    }

    #[tokio::test]
    async fn circuit_breaker_opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            ..Default::default()
        });
        for _ in 0..2 {
            let _: Result<(), &str> = breaker.call(|| async { Err("boom") }).await;
        }
        assert!(!breaker.is_closed());
    }

    #[tokio::test]
    async fn retry_helper_gives_up_after_max_attempts() {
        let config = RetryConfig {
            max_attempts: 3,
            backoff_base_ms: 1,
            backoff_max_ms: 2,
        };
        let mut calls = 0;
        let result: Result<(), &str> = retry_with_backoff(&config, || {
            calls += 1;
            async { Err("fail") }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[test]
    fn rate_limiter_exhausts_burst() {
        let limiter = RateLimiter::new(1.0, 2);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test]
    async fn graceful_shutdown_waits_for_operations() {
        let shutdown = GracefulShutdown::new(Duration::from_millis(200));
        let guard = shutdown.register_operation().unwrap();
        shutdown.shutdown();
        assert!(shutdown.register_operation().is_none());
        drop(guard);
        shutdown.wait_for_completion().await;
    }
}
