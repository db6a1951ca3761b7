use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::sync::Arc;

use voxmail_shared::{HealthCheck, HealthResponse, HealthStatus};

use crate::AppState;

/// Liveness plus a store round trip.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Response {
    let store = match state.engine.ping() {
        Ok(()) => HealthCheck {
            name: "store".to_string(),
            status: HealthStatus::Healthy,
            message: None,
        },
        Err(e) => {
            tracing::error!(error = %e, "health check: store unreachable");
            HealthCheck {
                name: "store".to_string(),
                status: HealthStatus::Unhealthy,
                message: Some("store unreachable".to_string()),
            }
        }
    };

    let response = HealthResponse::healthy("voxmail-account", env!("CARGO_PKG_VERSION"))
        .with_checks(vec![store]);

    let status = match response.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status, Json(response)).into_response()
}

/// Returns Prometheus metrics.
pub async fn metrics(State(state): State<Arc<AppState>>) -> String {
    state
        .metrics_handle
        .as_ref()
        .map(|h| h.render())
        .unwrap_or_default()
}
