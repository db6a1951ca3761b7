use axum::extract::State;
use axum::Json;
use std::sync::Arc;

use voxmail_shared::errors::AppResult;
use voxmail_shared::middleware::BearerToken;
use voxmail_shared::types::ApiResponse;

use crate::engine::Profile;
use crate::AppState;

pub async fn me(
    BearerToken(token): BearerToken,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<Profile>>> {
    Ok(Json(ApiResponse::ok(state.engine.profile(&token)?)))
}
