use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, PooledConnection};
use diesel::upsert::excluded;
use uuid::Uuid;

use voxmail_shared::clients::db::DbPool;
use voxmail_shared::errors::{AppError, AppResult};

use crate::models::{
    ConnectionGrant, EmailHistoryRecord, Message, MessageRow, NewEmailHistory, NewMessage,
    NewOAuthConnection, NewUser, OAuthConnection, User, UserChanges,
};
use crate::schema::{email_history, messages, oauth_connections, users};

use super::AccountStore;

type PgPooled = PooledConnection<ConnectionManager<PgConnection>>;

/// Postgres-backed store; one pooled connection per operation.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> AppResult<PgPooled> {
        self.pool.get().map_err(|e| {
            tracing::error!(error = %e, "database pool unavailable");
            AppError::internal("internal server error")
        })
    }
}

impl AccountStore for PgStore {
    fn find_user_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let mut conn = self.conn()?;
        let user = users::table
            .filter(users::email.eq(email))
            .first::<User>(&mut conn)
            .optional()?;
        Ok(user)
    }

    fn find_user_by_id(&self, id: Uuid) -> AppResult<Option<User>> {
        let mut conn = self.conn()?;
        let user = users::table.find(id).first::<User>(&mut conn).optional()?;
        Ok(user)
    }

    fn upsert_user(&self, new: NewUser, changes: UserChanges) -> AppResult<User> {
        let mut conn = self.conn()?;
        let user = diesel::insert_into(users::table)
            .values(&new)
            .on_conflict(users::email)
            .do_update()
            .set(&changes)
            .get_result::<User>(&mut conn)?;
        Ok(user)
    }

    fn store_otp(
        &self,
        email: &str,
        code: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<User> {
        let mut conn = self.conn()?;
        let new = NewUser {
            otp_code: Some(code.to_string()),
            otp_expires_at: Some(expires_at),
            ..NewUser::bare(email, now)
        };
        let user = diesel::insert_into(users::table)
            .values(&new)
            .on_conflict(users::email)
            .do_update()
            .set((
                users::otp_code.eq(excluded(users::otp_code)),
                users::otp_expires_at.eq(excluded(users::otp_expires_at)),
                users::updated_at.eq(now),
            ))
            .get_result::<User>(&mut conn)?;
        Ok(user)
    }

    fn consume_otp(&self, email: &str, code: &str, now: DateTime<Utc>) -> AppResult<Option<User>> {
        let mut conn = self.conn()?;
        let pending = users::table
            .filter(users::email.eq(email))
            .filter(users::otp_code.eq(code))
            .filter(users::otp_expires_at.gt(now));
        let user = diesel::update(pending)
            .set((
                users::otp_code.eq(None::<String>),
                users::otp_expires_at.eq(None::<DateTime<Utc>>),
                users::updated_at.eq(now),
            ))
            .get_result::<User>(&mut conn)
            .optional()?;
        Ok(user)
    }

    fn decrement_credits(&self, user_id: Uuid) -> AppResult<Option<i32>> {
        let mut conn = self.conn()?;
        let balance = diesel::update(
            users::table
                .filter(users::id.eq(user_id))
                .filter(users::credits.gt(0)),
        )
        .set(users::credits.eq(users::credits - 1))
        .returning(users::credits)
        .get_result::<i32>(&mut conn)
        .optional()?;

        if balance.is_some() {
            return Ok(balance);
        }

        let exists = users::table
            .find(user_id)
            .select(users::id)
            .first::<Uuid>(&mut conn)
            .optional()?
            .is_some();
        if exists {
            Ok(None)
        } else {
            Err(AppError::not_found("user not found"))
        }
    }

    fn upsert_connection(
        &self,
        user_id: Uuid,
        grant: &ConnectionGrant,
        now: DateTime<Utc>,
    ) -> AppResult<OAuthConnection> {
        let mut conn = self.conn()?;
        let new = NewOAuthConnection {
            id: Uuid::now_v7(),
            user_id,
            access_token: grant.access_token.clone(),
            refresh_token: grant.refresh_token.clone(),
            expires_at: grant.expires_at,
            scopes: grant.scopes.clone(),
            updated_at: now,
        };
        let connection = diesel::insert_into(oauth_connections::table)
            .values(&new)
            .on_conflict(oauth_connections::user_id)
            .do_update()
            .set((grant, oauth_connections::updated_at.eq(now)))
            .get_result::<OAuthConnection>(&mut conn)?;
        Ok(connection)
    }

    fn find_connection(&self, user_id: Uuid) -> AppResult<Option<OAuthConnection>> {
        let mut conn = self.conn()?;
        let connection = oauth_connections::table
            .filter(oauth_connections::user_id.eq(user_id))
            .first::<OAuthConnection>(&mut conn)
            .optional()?;
        Ok(connection)
    }

    fn insert_message(&self, new: NewMessage) -> AppResult<Message> {
        let mut conn = self.conn()?;
        let row = diesel::insert_into(messages::table)
            .values(&new)
            .get_result::<MessageRow>(&mut conn)?;
        Message::try_from(row)
    }

    fn messages_newest_first(&self, user_id: Uuid, offset: u64, limit: u64) -> AppResult<Vec<Message>> {
        let offset = i64::try_from(offset)
            .map_err(|_| AppError::Validation("page is past the end of the history".into()))?;
        let mut conn = self.conn()?;
        let rows = messages::table
            .filter(messages::user_id.eq(user_id))
            .order((messages::created_at.desc(), messages::seq.desc()))
            .offset(offset)
            .limit(limit as i64)
            .load::<MessageRow>(&mut conn)?;
        rows.into_iter().map(Message::try_from).collect()
    }

    fn insert_email_history(&self, new: NewEmailHistory) -> AppResult<EmailHistoryRecord> {
        let mut conn = self.conn()?;
        let record = diesel::insert_into(email_history::table)
            .values(&new)
            .get_result::<EmailHistoryRecord>(&mut conn)?;
        Ok(record)
    }

    fn email_history(&self, user_id: Uuid, limit: u64) -> AppResult<Vec<EmailHistoryRecord>> {
        let mut conn = self.conn()?;
        let records = email_history::table
            .filter(email_history::user_id.eq(user_id))
            .order(email_history::sent_at.desc())
            .limit(limit as i64)
            .load::<EmailHistoryRecord>(&mut conn)?;
        Ok(records)
    }

    fn ping(&self) -> AppResult<()> {
        let mut conn = self.conn()?;
        diesel::sql_query("SELECT 1").execute(&mut conn)?;
        Ok(())
    }
}
