use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;

use voxmail_shared::errors::AppResult;
use voxmail_shared::types::ApiResponse;

use crate::engine::SessionGrant;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> AppResult<Json<ApiResponse<SessionGrant>>> {
    let grant = state.engine.login_with_password(&req.email, &req.password)?;
    Ok(Json(ApiResponse::ok(grant)))
}
