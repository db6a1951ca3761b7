//! Caller-side view of the account service.
//!
//! [`ConnectionCache`] and [`CreditView`] live in one caller context (a UI
//! session, a worker) and are never shared, so they need no locking. The
//! service stays the source of truth; both only save round trips.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;

use voxmail_shared::errors::{AppError, AppResult, ErrorCode};
use voxmail_shared::types::ApiResponse;

use crate::engine::AccountEngine;
use crate::services::ledger::LOW_BALANCE_THRESHOLD;
use crate::services::ConnectionStatus;

/// Anything that can answer "when does this user's mail grant expire".
#[async_trait]
pub trait ExpiryResolver: Send + Sync {
    /// `NotFound` when the user has never connected a mail account.
    async fn resolve_expiry(&self, token: &str) -> AppResult<DateTime<Utc>>;
}

#[async_trait]
impl ExpiryResolver for AccountEngine {
    async fn resolve_expiry(&self, token: &str) -> AppResult<DateTime<Utc>> {
        self.connection_expiry(token)
    }
}

/// Remembers the last known grant expiry so repeated probes skip the service
/// until that instant passes.
#[derive(Debug, Default)]
pub struct ConnectionCache {
    expires_at: Option<DateTime<Utc>>,
}

impl ConnectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cached_expiry(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub async fn is_connected<R>(&mut self, resolver: &R, token: &str, now: DateTime<Utc>) -> AppResult<bool>
    where
        R: ExpiryResolver + ?Sized,
    {
        if let Some(exp) = self.expires_at {
            if now < exp {
                return Ok(true);
            }
        }

        match resolver.resolve_expiry(token).await {
            Ok(exp) => {
                self.expires_at = Some(exp);
                Ok(now < exp)
            }
            Err(e) if e.error_code() == ErrorCode::NotFound => {
                self.expires_at = None;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

/// Displayed credit balance. A send lowers it at once; the next read from
/// the service replaces whatever was guessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditView {
    balance: i32,
    optimistic: bool,
}

impl CreditView {
    pub fn new(confirmed: i32) -> Self {
        Self { balance: confirmed, optimistic: false }
    }

    pub fn balance(&self) -> i32 {
        self.balance
    }

    pub fn is_optimistic(&self) -> bool {
        self.optimistic
    }

    pub fn can_send(&self) -> bool {
        self.balance > 0
    }

    pub fn low_balance(&self) -> bool {
        self.balance <= LOW_BALANCE_THRESHOLD
    }

    pub fn record_send(&mut self) {
        self.balance = (self.balance - 1).max(0);
        self.optimistic = true;
    }

    pub fn reconcile(&mut self, authoritative: i32) {
        if self.optimistic && self.balance != authoritative {
            tracing::debug!(shown = self.balance, actual = authoritative, "credit view corrected");
        }
        self.balance = authoritative;
        self.optimistic = false;
    }
}

/// HTTP client for a remote account service.
#[derive(Clone)]
pub struct AccountClient {
    http: Client,
    base_url: String,
}

impl AccountClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn get<T: DeserializeOwned + serde::Serialize>(&self, path: &str, token: &str) -> AppResult<T> {
        let response = self
            .http
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "account service unreachable");
                AppError::new(ErrorCode::ProviderError, "account service unreachable")
            })?;

        match response.status() {
            s if s.is_success() => {}
            StatusCode::UNAUTHORIZED => return Err(AppError::session_invalid()),
            StatusCode::NOT_FOUND => return Err(AppError::not_found("not found")),
            s => {
                tracing::warn!(status = %s, path, "account service error");
                return Err(AppError::new(ErrorCode::ProviderError, "account service error"));
            }
        }

        let body: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| AppError::internal(format!("malformed account service response: {e}")))?;
        Ok(body.data)
    }

    pub async fn connection_status(&self, token: &str) -> AppResult<ConnectionStatus> {
        self.get("/connection", token).await
    }

    /// Authoritative balance, for [`CreditView::reconcile`].
    pub async fn balance(&self, token: &str) -> AppResult<i32> {
        let profile: serde_json::Value = self.get("/me", token).await?;
        profile["user"]["credits"]
            .as_i64()
            .and_then(|c| i32::try_from(c).ok())
            .ok_or_else(|| AppError::internal("profile without a credit balance"))
    }
}

#[async_trait]
impl ExpiryResolver for AccountClient {
    async fn resolve_expiry(&self, token: &str) -> AppResult<DateTime<Utc>> {
        self.connection_status(token)
            .await?
            .expires_at
            .ok_or_else(|| AppError::not_found("no mail connection"))
    }
}
