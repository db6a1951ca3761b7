//! Token-gated facade over the account services.
//!
//! Every operation that touches user data takes the raw session token and
//! resolves it to a user before doing anything else.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use voxmail_shared::clients::email::EmailClient;
use voxmail_shared::errors::{AppError, AppResult, ErrorCode};
use voxmail_shared::types::auth::{SessionClaims, SessionToken, SignIntent};
use voxmail_shared::types::PaginationParams;

use crate::clock::Clock;
use crate::models::{ConnectionGrant, EmailHistoryRecord, Message, MessageRole, User};
use crate::services::identity::{hash_password, validate_password};
use crate::services::ledger::{DEFAULT_HISTORY_LIMIT, LOW_BALANCE_THRESHOLD};
use crate::services::{
    ConnectionRegistry, ConnectionStatus, ConversationPager, CreditLedger, IdentityStore,
    OtpManager, SendOutcome, SessionIssuer,
};
use crate::store::AccountStore;
use crate::transport::MailTransport;

/// How an issued passcode reaches the user.
#[derive(Clone)]
pub enum OtpDelivery {
    /// Returned in the issuance response. Development only.
    Echo,
    Email(EmailClient),
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub session_secret: String,
    pub previous_session_secret: Option<String>,
    pub session_ttl: Duration,
    pub otp_ttl: Duration,
}

#[derive(Debug, Serialize)]
pub struct OtpIssued {
    pub message: String,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtpVerification {
    pub email: String,
    pub code: String,
    pub intent: SignIntent,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionGrant {
    #[serde(flatten)]
    pub session: SessionToken,
    pub user: User,
}

#[derive(Debug, Serialize)]
pub struct Profile {
    pub user: User,
    pub low_balance: bool,
    pub connection: ConnectionStatus,
    pub recent_emails: Vec<EmailHistoryRecord>,
}

#[derive(Clone)]
pub struct AccountEngine {
    identity: IdentityStore,
    otp: OtpManager,
    sessions: SessionIssuer,
    ledger: CreditLedger,
    pager: ConversationPager,
    connections: ConnectionRegistry,
    transport: Arc<dyn MailTransport>,
    delivery: OtpDelivery,
    store: Arc<dyn AccountStore>,
}

impl AccountEngine {
    pub fn new(
        store: Arc<dyn AccountStore>,
        clock: Arc<dyn Clock>,
        settings: &EngineSettings,
        transport: Arc<dyn MailTransport>,
        delivery: OtpDelivery,
    ) -> Self {
        Self {
            identity: IdentityStore::new(store.clone(), clock.clone()),
            otp: OtpManager::new(store.clone(), clock.clone(), settings.otp_ttl),
            sessions: SessionIssuer::new(
                &settings.session_secret,
                settings.previous_session_secret.as_deref(),
                settings.session_ttl,
                clock.clone(),
            ),
            ledger: CreditLedger::new(store.clone(), clock.clone()),
            pager: ConversationPager::new(store.clone(), clock.clone()),
            connections: ConnectionRegistry::new(store.clone(), clock),
            transport,
            delivery,
            store,
        }
    }

    pub fn ping(&self) -> AppResult<()> {
        self.store.ping()
    }

    // --- Sign-in ---

    /// Starts a sign flow. Login needs an existing account; signup refuses an
    /// email that already has a password.
    pub async fn request_otp(&self, email: &str, intent: SignIntent) -> AppResult<OtpIssued> {
        self.check_intent(email, intent)?;

        let challenge = self.otp.issue(email)?;
        let code = match &self.delivery {
            OtpDelivery::Echo => Some(challenge.code),
            OtpDelivery::Email(client) => {
                client
                    .send_otp_code(email, &challenge.code, self.otp.ttl().num_minutes())
                    .await
                    .map_err(|e| {
                        tracing::error!(error = %e, "otp delivery failed");
                        AppError::new(ErrorCode::ProviderError, "could not deliver the code")
                    })?;
                None
            }
        };

        Ok(OtpIssued {
            message: "OTP sent successfully".to_string(),
            expires_at: challenge.expires_at,
            code,
        })
    }

    pub fn verify_otp(&self, req: &OtpVerification) -> AppResult<SessionGrant> {
        self.check_intent(&req.email, req.intent)?;

        // Check the password before consuming the code so a weak one does
        // not burn it.
        let credential_hash = match (req.intent, req.password.as_deref()) {
            (SignIntent::Signup, Some(password)) => {
                validate_password(password)?;
                Some(hash_password(password)?)
            }
            _ => None,
        };

        let mut user = self.otp.verify(&req.email, &req.code)?;

        if req.intent == SignIntent::Signup && (req.name.is_some() || credential_hash.is_some()) {
            user = self.identity.create(&req.email, req.name.as_deref(), credential_hash)?;
        }

        let (session, _) = self.sessions.issue(&user)?;
        tracing::info!(user_id = %user.id, intent = %req.intent, "signed in with otp");
        Ok(SessionGrant { session, user })
    }

    pub fn login_with_password(&self, email: &str, password: &str) -> AppResult<SessionGrant> {
        let user = self.identity.verify_credential(email, password).map_err(|e| {
            if e.error_code() == ErrorCode::AccountNotFound {
                AppError::new(ErrorCode::InvalidCredentials, "invalid email or password")
            } else {
                e
            }
        })?;
        let (session, _) = self.sessions.issue(&user)?;
        tracing::info!(user_id = %user.id, "signed in with password");
        Ok(SessionGrant { session, user })
    }

    fn check_intent(&self, email: &str, intent: SignIntent) -> AppResult<()> {
        let existing = self.identity.lookup(email)?;
        match (intent, existing) {
            (SignIntent::Login, None) => Err(AppError::new(
                ErrorCode::AccountNotFound,
                "no account found, sign up first",
            )),
            (SignIntent::Signup, Some(user)) if user.has_credential() => Err(AppError::new(
                ErrorCode::AccountExists,
                "account already exists, log in instead",
            )),
            _ => Ok(()),
        }
    }

    // --- Token-gated ---

    /// Resolves a session token to its user. A token for a user that no
    /// longer exists is as invalid as a forged one.
    pub fn authenticate(&self, token: &str) -> AppResult<(SessionClaims, User)> {
        let claims = self.sessions.verify(token)?;
        match self.identity.find_by_id(claims.user_id) {
            Ok(user) => Ok((claims, user)),
            Err(e) if e.error_code() == ErrorCode::AccountNotFound => {
                tracing::debug!(user_id = %claims.user_id, "session for unknown user");
                Err(AppError::session_invalid())
            }
            Err(e) => Err(e),
        }
    }

    pub fn profile(&self, token: &str) -> AppResult<Profile> {
        let (_, user) = self.authenticate(token)?;
        let connection = self.connections.status(user.id)?;
        let recent_emails = self.ledger.history(user.id, DEFAULT_HISTORY_LIMIT)?;
        Ok(Profile {
            low_balance: user.credits <= LOW_BALANCE_THRESHOLD,
            user,
            connection,
            recent_emails,
        })
    }

    pub fn connection_expiry(&self, token: &str) -> AppResult<DateTime<Utc>> {
        let (_, user) = self.authenticate(token)?;
        self.connections.expiry(user.id)
    }

    pub fn connection_status(&self, token: &str) -> AppResult<ConnectionStatus> {
        let (_, user) = self.authenticate(token)?;
        self.connections.status(user.id)
    }

    pub fn record_connection(&self, token: &str, grant: &ConnectionGrant) -> AppResult<ConnectionStatus> {
        let (_, user) = self.authenticate(token)?;
        let connection = self.connections.record(user.id, grant)?;
        Ok(ConnectionStatus::at(Some(connection.expires_at), self.connections.now()))
    }

    /// The billable action. Credits are checked before the provider is
    /// contacted and taken only once it confirmed the send.
    pub async fn send_email(&self, token: &str, transcript: &str) -> AppResult<SendOutcome> {
        let (_, user) = self.authenticate(token)?;
        if transcript.trim().is_empty() {
            return Err(AppError::Validation("transcript is empty".into()));
        }

        let (balance, low_balance) = self.ledger.check_and_reserve(user.id)?.into_result()?;
        if low_balance {
            tracing::info!(user_id = %user.id, balance, "sending on a low balance");
        }

        if self.connections.connection(user.id)?.is_none() {
            return Err(AppError::new(ErrorCode::ProviderError, "mail provider not connected"));
        }

        let delivered = self.transport.send(token, transcript).await.map_err(|e| {
            tracing::warn!(user_id = %user.id, error = %e, "send failed, no credit taken");
            AppError::new(ErrorCode::ProviderError, "mail provider rejected the send")
        })?;

        Ok(self.ledger.settle(user.id, balance, delivered))
    }

    pub fn messages(&self, token: &str, params: PaginationParams) -> AppResult<Vec<Message>> {
        let (_, user) = self.authenticate(token)?;
        self.pager.page(user.id, params)
    }

    pub fn append_message(
        &self,
        token: &str,
        role: MessageRole,
        content: &str,
        analysis: Option<serde_json::Value>,
    ) -> AppResult<Message> {
        let (_, user) = self.authenticate(token)?;
        self.pager.append(user.id, role, content, analysis)
    }

    pub fn email_history(&self, token: &str, limit: Option<u64>) -> AppResult<Vec<EmailHistoryRecord>> {
        let (_, user) = self.authenticate(token)?;
        self.ledger.history(user.id, limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
    }
}
