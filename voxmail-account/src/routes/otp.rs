use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use voxmail_shared::errors::{AppError, AppResult, ErrorCode};
use voxmail_shared::types::auth::SignIntent;
use voxmail_shared::types::ApiResponse;

use crate::engine::{OtpIssued, OtpVerification, SessionGrant};
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct OtpRequest {
    #[validate(email(message = "invalid email format"))]
    pub email: String,
    pub intent: SignIntent,
}

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyOtpRequest {
    #[validate(email(message = "invalid email format"))]
    pub email: String,
    #[validate(length(equal = 6, message = "code must be 6 digits"))]
    pub code: String,
    pub intent: SignIntent,
    #[validate(length(min = 1, max = 100, message = "name must be 1 to 100 characters"))]
    pub name: Option<String>,
    pub password: Option<String>,
}

pub async fn request_otp(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OtpRequest>,
) -> AppResult<Json<ApiResponse<OtpIssued>>> {
    req.validate()
        .map_err(|e| AppError::new(ErrorCode::ValidationError, e.to_string()))?;

    let issued = state.engine.request_otp(&req.email, req.intent).await?;
    Ok(Json(ApiResponse::ok(issued)))
}

pub async fn verify_otp(
    State(state): State<Arc<AppState>>,
    Json(req): Json<VerifyOtpRequest>,
) -> AppResult<Json<ApiResponse<SessionGrant>>> {
    req.validate()
        .map_err(|e| AppError::new(ErrorCode::ValidationError, e.to_string()))?;

    let grant = state.engine.verify_otp(&OtpVerification {
        email: req.email,
        code: req.code,
        intent: req.intent,
        name: req.name,
        password: req.password,
    })?;
    Ok(Json(ApiResponse::ok(grant)))
}
