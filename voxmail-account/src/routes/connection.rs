use axum::extract::State;
use axum::Json;
use std::sync::Arc;

use voxmail_shared::errors::AppResult;
use voxmail_shared::middleware::BearerToken;
use voxmail_shared::types::ApiResponse;

use crate::models::ConnectionGrant;
use crate::services::ConnectionStatus;
use crate::AppState;

pub async fn connection_status(
    BearerToken(token): BearerToken,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<ConnectionStatus>>> {
    Ok(Json(ApiResponse::ok(state.engine.connection_status(&token)?)))
}

/// Called by the consent broker once the provider handed back a grant.
pub async fn record_connection(
    BearerToken(token): BearerToken,
    State(state): State<Arc<AppState>>,
    Json(grant): Json<ConnectionGrant>,
) -> AppResult<Json<ApiResponse<ConnectionStatus>>> {
    let status = state.engine.record_connection(&token, &grant)?;
    Ok(Json(ApiResponse::ok_with_message(status, "mail account connected")))
}
