use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;

use voxmail_shared::errors::AppResult;
use voxmail_shared::middleware::BearerToken;
use voxmail_shared::types::ApiResponse;

use crate::models::EmailHistoryRecord;
use crate::services::SendOutcome;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SendEmailRequest {
    #[serde(alias = "speechText")]
    pub transcript: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u64>,
}

pub async fn send_email(
    BearerToken(token): BearerToken,
    State(state): State<Arc<AppState>>,
    Json(req): Json<SendEmailRequest>,
) -> AppResult<Json<ApiResponse<SendOutcome>>> {
    let outcome = state.engine.send_email(&token, &req.transcript).await?;
    let message = if outcome.low_balance {
        format!("email sent, only {} credits left", outcome.credits_remaining)
    } else {
        "email sent".to_string()
    };
    Ok(Json(ApiResponse::ok_with_message(outcome, message)))
}

pub async fn email_history(
    BearerToken(token): BearerToken,
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<ApiResponse<Vec<EmailHistoryRecord>>>> {
    Ok(Json(ApiResponse::ok(state.engine.email_history(&token, query.limit)?)))
}
