// src/server.rs
// Handlers only read instrument state; nothing here triggers a fetch.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::exporter::Lifecycle;
use crate::metrics::{self, ExporterMetrics};

#[derive(Clone)]
pub struct AppState {
    pub metrics: Arc<ExporterMetrics>,
    pub lifecycle: Lifecycle,
    pub collector_active: bool,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct HealthStatus {
    pub status: &'static str,
    pub collector: &'static str,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(scrape))
        .route("/health", get(health))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /metrics
async fn scrape(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(body) => ([(header::CONTENT_TYPE, metrics::content_type())], body).into_response(),
        Err(e) => {
            tracing::error!("rendering metrics failed: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// GET /health
async fn health(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: if state.lifecycle.state().is_stopping() { "shutting_down" } else { "healthy" },
        collector: if state.collector_active { "active" } else { "inactive" },
    })
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}
