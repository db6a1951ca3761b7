use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use voxmail_shared::errors::{AppError, AppResult};

use crate::clock::Clock;
use crate::models::{ConnectionGrant, OAuthConnection};
use crate::store::AccountStore;

/// Answer of the connection probe. `expires_at` is the real instant so a
/// client can cache it; `connected` is only a convenience.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ConnectionStatus {
    pub fn at(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        Self {
            connected: expires_at.is_some_and(|exp| now < exp),
            expires_at,
        }
    }
}

/// Authoritative record of each user's mail-provider grant.
#[derive(Clone)]
pub struct ConnectionRegistry {
    store: Arc<dyn AccountStore>,
    clock: Arc<dyn Clock>,
}

impl ConnectionRegistry {
    pub fn new(store: Arc<dyn AccountStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn expiry(&self, user_id: Uuid) -> AppResult<DateTime<Utc>> {
        self.store
            .find_connection(user_id)?
            .map(|c| c.expires_at)
            .ok_or_else(|| AppError::not_found("no mail connection"))
    }

    pub fn status(&self, user_id: Uuid) -> AppResult<ConnectionStatus> {
        let expires_at = self.store.find_connection(user_id)?.map(|c| c.expires_at);
        Ok(ConnectionStatus::at(expires_at, self.clock.now()))
    }

    pub fn connection(&self, user_id: Uuid) -> AppResult<Option<OAuthConnection>> {
        self.store.find_connection(user_id)
    }

    /// Stores the grant handed back after provider consent, replacing any
    /// earlier one for the same user.
    pub fn record(&self, user_id: Uuid, grant: &ConnectionGrant) -> AppResult<OAuthConnection> {
        if grant.access_token.is_empty() || grant.refresh_token.is_empty() {
            return Err(AppError::Validation("grant is missing a token".into()));
        }
        let connection = self.store.upsert_connection(user_id, grant, self.clock.now())?;
        tracing::info!(
            user_id = %user_id,
            expires_at = %connection.expires_at,
            scopes = connection.scopes.len(),
            "mail connection recorded"
        );
        Ok(connection)
    }
}
