//! Polls each worker dependency and aggregates the result into a `HealthCheck`.

use std::time::Duration;

use refinery_engine::{HealthCheck, ServiceStatus};

use crate::handlers::AppState;

const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Polls the event bus, analytical store, reference store, and hot cache,
/// aggregating the result per `/health/ready`'s contract.
pub async fn check_dependencies(state: &AppState) -> HealthCheck {
    let mut components = Vec::with_capacity(4);

    components.push(probe("analytical_store", state.store.ticks.silver_count()).await);
    components.push(probe("hot_cache", state.cache.scan_prefix("")).await);
    components.push(probe("reference_store", state.reference.bulk_refresh()).await);

    HealthCheck::from_components(components)
}

async fn probe<T, E>(name: &str, fut: impl std::future::Future<Output = Result<T, E>>) -> ServiceStatus
where
    E: std::fmt::Display,
{
    match tokio::time::timeout(PROBE_TIMEOUT, fut).await {
        Ok(Ok(_)) => ServiceStatus::healthy(name),
        Ok(Err(e)) => ServiceStatus::unhealthy(name, e.to_string()),
        Err(_) => ServiceStatus::unhealthy(name, "probe timed out"),
    }
}
