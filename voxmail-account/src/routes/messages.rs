use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;

use voxmail_shared::errors::AppResult;
use voxmail_shared::middleware::BearerToken;
use voxmail_shared::types::{ApiResponse, PaginationParams};

use crate::models::{Message, MessageRole};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct AppendMessageRequest {
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub analysis: Option<serde_json::Value>,
}

pub async fn list_messages(
    BearerToken(token): BearerToken,
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> AppResult<Json<ApiResponse<Vec<Message>>>> {
    Ok(Json(ApiResponse::ok(state.engine.messages(&token, params)?)))
}

pub async fn append_message(
    BearerToken(token): BearerToken,
    State(state): State<Arc<AppState>>,
    Json(req): Json<AppendMessageRequest>,
) -> AppResult<Json<ApiResponse<Message>>> {
    let message = state
        .engine
        .append_message(&token, req.role, &req.content, req.analysis)?;
    Ok(Json(ApiResponse::ok(message)))
}
