pub mod client;
pub mod clock;
pub mod config;
pub mod engine;
pub mod models;
pub mod routes;
pub mod schema;
pub mod services;
pub mod store;
pub mod transport;

use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::cors::{AllowHeaders, AllowMethods, CorsLayer};
use tower_http::trace::TraceLayer;

use voxmail_shared::middleware::metrics_middleware;

use engine::AccountEngine;

pub struct AppState {
    pub engine: AccountEngine,
    pub metrics_handle: Option<PrometheusHandle>,
}

pub fn cors_layer(origin: &str) -> anyhow::Result<CorsLayer> {
    let origin: HeaderValue = origin.parse()?;
    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(AllowMethods::list([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::OPTIONS,
        ]))
        .allow_headers(AllowHeaders::list([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
        ]))
        .allow_credentials(true))
}

pub fn router(state: Arc<AppState>, cors: CorsLayer) -> Router {
    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/metrics", get(routes::health::metrics))
        .route("/otp", post(routes::otp::request_otp))
        .route("/otp/verify", post(routes::otp::verify_otp))
        .route("/login", post(routes::login::login))
        .route("/me", get(routes::me::me))
        .route(
            "/connection",
            get(routes::connection::connection_status).put(routes::connection::record_connection),
        )
        .route(
            "/emails",
            get(routes::emails::email_history).post(routes::emails::send_email),
        )
        .route(
            "/messages",
            get(routes::messages::list_messages).post(routes::messages::append_message),
        )
        .layer(axum::middleware::from_fn(metrics_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
