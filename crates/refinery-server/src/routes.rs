//! Route definitions for the health and metrics surface.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;

use crate::handlers::{self, AppState};

/// Builds the router: `/health/live`, `/health/ready`, and `/metrics`.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health/live", get(handlers::health_live))
        .route("/health/ready", get(handlers::health_ready))
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
}
