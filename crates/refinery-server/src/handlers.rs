//! Request handlers for the health and metrics surface.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;

use refinery_traits::{AnalyticalStore, HotCache, ReferenceStore};

use crate::health::check_dependencies;
use crate::pipeline::PipelineHandle;

/// Shared application state reachable from every handler.
pub struct AppState {
    /// Analytical store, used by the readiness probe.
    pub store: AnalyticalStore,
    /// Hot cache, used by the readiness probe.
    pub cache: Arc<dyn HotCache>,
    /// Reference store, used by the readiness probe.
    pub reference: Arc<dyn ReferenceStore>,
    /// Drives ingested events through the four workers.
    pub pipeline: Arc<PipelineHandle>,
    /// Renders the Prometheus exposition-format text for `/metrics`.
    pub prometheus: PrometheusHandle,
}

#[derive(Serialize)]
pub(crate) struct LiveResponse {
    status: &'static str,
}

/// `/health/live`: the process itself is responsive. Never checks dependencies.
pub async fn health_live() -> Json<LiveResponse> {
    Json(LiveResponse { status: "live" })
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    components: Vec<ComponentStatus>,
}

#[derive(Serialize)]
struct ComponentStatus {
    name: String,
    status: String,
    message: Option<String>,
}

/// `/health/ready`: all dependencies healthy and reachable within the probe budget.
pub async fn health_ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let check = check_dependencies(&state).await;
    let ready = check.is_ready();

    let body = ReadyResponse {
        status: format!("{:?}", check.status).to_lowercase(),
        components: check
            .components
            .iter()
            .map(|c| ComponentStatus {
                name: c.name.clone(),
                status: format!("{:?}", c.status).to_lowercase(),
                message: c.message.clone(),
            })
            .collect(),
    };

    let code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(body))
}

/// `/metrics`: Prometheus exposition format.
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.prometheus.render()
}
