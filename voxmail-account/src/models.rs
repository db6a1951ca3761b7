use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use voxmail_shared::errors::AppError;

use crate::schema::{email_history, messages, oauth_connections, users};

/// Upper bound of a credit balance and the grant given to every new user.
pub const MAX_CREDITS: i32 = 10;

// --- Users ---

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub credits: i32,
    #[serde(skip_serializing)]
    pub otp_code: Option<String>,
    #[serde(skip_serializing)]
    pub otp_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Fully provisioned accounts carry a password; OTP-only ones do not.
    pub fn has_credential(&self) -> bool {
        self.password_hash.is_some()
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub password_hash: Option<String>,
    pub credits: i32,
    pub otp_code: Option<String>,
    pub otp_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NewUser {
    pub fn bare(email: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            email: email.to_string(),
            name: None,
            password_hash: None,
            credits: MAX_CREDITS,
            otp_code: None,
            otp_expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Fields a provisioning upsert may overwrite. `None` leaves the column as is.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = users)]
pub struct UserChanges {
    pub name: Option<String>,
    pub password_hash: Option<String>,
    pub updated_at: DateTime<Utc>,
}

// --- OAuth connections ---

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[diesel(table_name = oauth_connections)]
pub struct OAuthConnection {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(skip_serializing)]
    pub access_token: String,
    #[serde(skip_serializing)]
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub scopes: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// Grant handed over by the consent broker after the provider redirect.
#[derive(Debug, Clone, Deserialize, AsChangeset)]
#[diesel(table_name = oauth_connections)]
pub struct ConnectionGrant {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = oauth_connections)]
pub struct NewOAuthConnection {
    pub id: Uuid,
    pub user_id: Uuid,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub scopes: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

// --- Messages ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    #[serde(alias = "bot")]
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(MessageRole::User),
            "assistant" | "bot" => Ok(MessageRole::Assistant),
            _ => Err(format!("unknown message role: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub seq: i64,
    pub user_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub analysis: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Queryable)]
pub struct MessageRow {
    pub id: Uuid,
    pub seq: i64,
    pub user_id: Uuid,
    pub role: String,
    pub content: String,
    pub analysis: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for Message {
    type Error = AppError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let role = row.role.parse::<MessageRole>().map_err(AppError::internal)?;
        Ok(Self {
            id: row.id,
            seq: row.seq,
            user_id: row.user_id,
            role,
            content: row.content,
            analysis: row.analysis,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = messages)]
pub struct NewMessage {
    pub id: Uuid,
    pub user_id: Uuid,
    pub role: String,
    pub content: String,
    pub analysis: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

// --- Email history ---

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Serialize)]
#[diesel(table_name = email_history)]
pub struct EmailHistoryRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub receiver_email: String,
    pub receiver_name: String,
    pub email_type: String,
    pub status: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = email_history)]
pub struct NewEmailHistory {
    pub id: Uuid,
    pub user_id: Uuid,
    pub receiver_email: String,
    pub receiver_name: String,
    pub email_type: String,
    pub status: String,
    pub sent_at: DateTime<Utc>,
}
