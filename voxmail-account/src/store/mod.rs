//! Persistence seam for the account engine.
//!
//! Every method is one self-contained store operation: it checks a connection
//! out (or takes the in-memory lock), runs, and releases it before returning.
//! Operations that must be race-free (OTP issue and consume, credit
//! decrement, connection upsert) are single conditional statements, so
//! callers never need to hold a transaction across an `.await`.

mod memory;
mod pg;

pub use memory::MemoryStore;
pub use pg::PgStore;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use voxmail_shared::errors::AppResult;

use crate::models::{
    ConnectionGrant, EmailHistoryRecord, Message, NewEmailHistory, NewMessage, NewUser,
    OAuthConnection, User, UserChanges,
};

pub trait AccountStore: Send + Sync {
    fn find_user_by_email(&self, email: &str) -> AppResult<Option<User>>;

    fn find_user_by_id(&self, id: Uuid) -> AppResult<Option<User>>;

    /// Inserts `new`, or when the email already exists applies only the
    /// populated fields of `changes`. Credits, creation time and any pending
    /// OTP challenge of an existing user are left alone.
    fn upsert_user(&self, new: NewUser, changes: UserChanges) -> AppResult<User>;

    /// Attaches a challenge to the user with this email, creating a bare user
    /// if none exists. Replaces any earlier challenge.
    fn store_otp(
        &self,
        email: &str,
        code: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<User>;

    /// Clears the challenge if and only if `code` matches and it has not
    /// expired at `now`. Returns the user when this call consumed it.
    fn consume_otp(&self, email: &str, code: &str, now: DateTime<Utc>) -> AppResult<Option<User>>;

    /// Takes one credit. `Some(balance)` after a successful decrement, `None`
    /// when the balance was already zero. Unknown users are `NotFound`.
    fn decrement_credits(&self, user_id: Uuid) -> AppResult<Option<i32>>;

    fn upsert_connection(
        &self,
        user_id: Uuid,
        grant: &ConnectionGrant,
        now: DateTime<Utc>,
    ) -> AppResult<OAuthConnection>;

    fn find_connection(&self, user_id: Uuid) -> AppResult<Option<OAuthConnection>>;

    fn insert_message(&self, new: NewMessage) -> AppResult<Message>;

    /// Newest first by `(created_at, seq)`.
    fn messages_newest_first(&self, user_id: Uuid, offset: u64, limit: u64) -> AppResult<Vec<Message>>;

    fn insert_email_history(&self, new: NewEmailHistory) -> AppResult<EmailHistoryRecord>;

    /// Newest first by `sent_at`.
    fn email_history(&self, user_id: Uuid, limit: u64) -> AppResult<Vec<EmailHistoryRecord>>;

    fn ping(&self) -> AppResult<()>;
}
