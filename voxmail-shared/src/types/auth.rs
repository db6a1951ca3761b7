use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which sign flow an OTP request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignIntent {
    Login,
    Signup,
}

impl std::fmt::Display for SignIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignIntent::Login => write!(f, "login"),
            SignIntent::Signup => write!(f, "signup"),
        }
    }
}

impl std::str::FromStr for SignIntent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "login" => Ok(SignIntent::Login),
            "signup" => Ok(SignIntent::Signup),
            _ => Err(format!("unknown sign intent: {s}")),
        }
    }
}

/// Claim set carried by a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub email: String,
    #[serde(rename = "userId")]
    pub user_id: Uuid,
    pub iat: i64,
    pub exp: i64,
}

impl SessionClaims {
    pub fn new(user_id: Uuid, email: impl Into<String>, issued_at: DateTime<Utc>, ttl: Duration) -> Self {
        let iat = issued_at.timestamp();
        Self {
            email: email.into(),
            user_id,
            iat,
            exp: iat + ttl.num_seconds(),
        }
    }

    /// A token is dead from its expiry second onwards.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.exp
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionToken {
    pub token: String,
    pub token_type: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl SessionToken {
    pub fn new(token: String, claims: &SessionClaims) -> Self {
        Self {
            token,
            token_type: "Bearer".to_string(),
            expires_at: claims.expires_at(),
        }
    }
}
