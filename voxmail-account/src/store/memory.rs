use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use voxmail_shared::errors::{AppError, AppResult};

use crate::models::{
    ConnectionGrant, EmailHistoryRecord, Message, NewEmailHistory, NewMessage, NewUser,
    OAuthConnection, User, UserChanges,
};

use super::AccountStore;

/// In-process store for development and tests.
///
/// A single lock guards all tables, so each trait method is atomic in the
/// same way a single SQL statement is against Postgres. Nothing survives a
/// restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    users: HashMap<Uuid, User>,
    user_ids_by_email: HashMap<String, Uuid>,
    connections: HashMap<Uuid, OAuthConnection>,
    messages: HashMap<Uuid, Vec<Message>>,
    email_history: HashMap<Uuid, Vec<EmailHistoryRecord>>,
    next_seq: i64,
}

impl MemoryState {
    fn user_by_email_mut(&mut self, email: &str) -> Option<&mut User> {
        let id = *self.user_ids_by_email.get(email)?;
        self.users.get_mut(&id)
    }

    fn insert_user(&mut self, new: NewUser) -> User {
        let user = User {
            id: new.id,
            email: new.email,
            name: new.name,
            password_hash: new.password_hash,
            credits: new.credits,
            otp_code: new.otp_code,
            otp_expires_at: new.otp_expires_at,
            created_at: new.created_at,
            updated_at: new.updated_at,
        };
        self.user_ids_by_email.insert(user.email.clone(), user.id);
        self.users.insert(user.id, user.clone());
        user
    }

    fn require_user(&self, user_id: Uuid) -> AppResult<()> {
        if self.users.contains_key(&user_id) {
            Ok(())
        } else {
            Err(AppError::not_found("user not found"))
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> AppResult<RwLockReadGuard<'_, MemoryState>> {
        self.state
            .read()
            .map_err(|_| AppError::internal("memory store lock poisoned"))
    }

    fn write(&self) -> AppResult<RwLockWriteGuard<'_, MemoryState>> {
        self.state
            .write()
            .map_err(|_| AppError::internal("memory store lock poisoned"))
    }
}

impl AccountStore for MemoryStore {
    fn find_user_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let state = self.read()?;
        Ok(state
            .user_ids_by_email
            .get(email)
            .and_then(|id| state.users.get(id))
            .cloned())
    }

    fn find_user_by_id(&self, id: Uuid) -> AppResult<Option<User>> {
        Ok(self.read()?.users.get(&id).cloned())
    }

    fn upsert_user(&self, new: NewUser, changes: UserChanges) -> AppResult<User> {
        let mut state = self.write()?;
        if let Some(user) = state.user_by_email_mut(&new.email) {
            if let Some(name) = changes.name {
                user.name = Some(name);
            }
            if let Some(hash) = changes.password_hash {
                user.password_hash = Some(hash);
            }
            user.updated_at = changes.updated_at;
            return Ok(user.clone());
        }
        Ok(state.insert_user(new))
    }

    fn store_otp(
        &self,
        email: &str,
        code: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<User> {
        let mut state = self.write()?;
        if let Some(user) = state.user_by_email_mut(email) {
            user.otp_code = Some(code.to_string());
            user.otp_expires_at = Some(expires_at);
            user.updated_at = now;
            return Ok(user.clone());
        }
        let new = NewUser {
            otp_code: Some(code.to_string()),
            otp_expires_at: Some(expires_at),
            ..NewUser::bare(email, now)
        };
        Ok(state.insert_user(new))
    }

    fn consume_otp(&self, email: &str, code: &str, now: DateTime<Utc>) -> AppResult<Option<User>> {
        let mut state = self.write()?;
        let Some(user) = state.user_by_email_mut(email) else {
            return Ok(None);
        };
        let matches = match (&user.otp_code, user.otp_expires_at) {
            (Some(stored), Some(expires_at)) => stored == code && now < expires_at,
            _ => false,
        };
        if !matches {
            return Ok(None);
        }
        user.otp_code = None;
        user.otp_expires_at = None;
        user.updated_at = now;
        Ok(Some(user.clone()))
    }

    fn decrement_credits(&self, user_id: Uuid) -> AppResult<Option<i32>> {
        let mut state = self.write()?;
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| AppError::not_found("user not found"))?;
        if user.credits <= 0 {
            return Ok(None);
        }
        user.credits -= 1;
        Ok(Some(user.credits))
    }

    fn upsert_connection(
        &self,
        user_id: Uuid,
        grant: &ConnectionGrant,
        now: DateTime<Utc>,
    ) -> AppResult<OAuthConnection> {
        let mut state = self.write()?;
        state.require_user(user_id)?;
        let connection = state
            .connections
            .entry(user_id)
            .and_modify(|c| {
                c.access_token = grant.access_token.clone();
                c.refresh_token = grant.refresh_token.clone();
                c.expires_at = grant.expires_at;
                c.scopes = grant.scopes.clone();
                c.updated_at = now;
            })
            .or_insert_with(|| OAuthConnection {
                id: Uuid::now_v7(),
                user_id,
                access_token: grant.access_token.clone(),
                refresh_token: grant.refresh_token.clone(),
                expires_at: grant.expires_at,
                scopes: grant.scopes.clone(),
                updated_at: now,
            });
        Ok(connection.clone())
    }

    fn find_connection(&self, user_id: Uuid) -> AppResult<Option<OAuthConnection>> {
        Ok(self.read()?.connections.get(&user_id).cloned())
    }

    fn insert_message(&self, new: NewMessage) -> AppResult<Message> {
        let mut state = self.write()?;
        state.require_user(new.user_id)?;
        let role = new.role.parse().map_err(AppError::internal)?;
        state.next_seq += 1;
        let message = Message {
            id: new.id,
            seq: state.next_seq,
            user_id: new.user_id,
            role,
            content: new.content,
            analysis: new.analysis,
            created_at: new.created_at,
        };
        state
            .messages
            .entry(new.user_id)
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    fn messages_newest_first(&self, user_id: Uuid, offset: u64, limit: u64) -> AppResult<Vec<Message>> {
        let state = self.read()?;
        let mut log: Vec<&Message> = state
            .messages
            .get(&user_id)
            .map(|m| m.iter().collect())
            .unwrap_or_default();
        log.sort_by(|a, b| (b.created_at, b.seq).cmp(&(a.created_at, a.seq)));
        Ok(log
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    fn insert_email_history(&self, new: NewEmailHistory) -> AppResult<EmailHistoryRecord> {
        let mut state = self.write()?;
        state.require_user(new.user_id)?;
        let record = EmailHistoryRecord {
            id: new.id,
            user_id: new.user_id,
            receiver_email: new.receiver_email,
            receiver_name: new.receiver_name,
            email_type: new.email_type,
            status: new.status,
            sent_at: new.sent_at,
        };
        state
            .email_history
            .entry(record.user_id)
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    fn email_history(&self, user_id: Uuid, limit: u64) -> AppResult<Vec<EmailHistoryRecord>> {
        let state = self.read()?;
        let mut records: Vec<EmailHistoryRecord> =
            state.email_history.get(&user_id).cloned().unwrap_or_default();
        records.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));
        records.truncate(limit as usize);
        Ok(records)
    }

    fn ping(&self) -> AppResult<()> {
        self.read().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MAX_CREDITS;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_767_225_600, 0).unwrap()
    }

    #[test]
    fn upsert_preserves_credits_and_creation_time() {
        let store = MemoryStore::new();
        let first = store
            .store_otp("a@x.com", "123456", now() + Duration::minutes(5), now())
            .unwrap();
        store.decrement_credits(first.id).unwrap();

        let later = now() + Duration::hours(1);
        let user = store
            .upsert_user(
                NewUser::bare("a@x.com", later),
                UserChanges {
                    name: Some("Ada".into()),
                    password_hash: None,
                    updated_at: later,
                },
            )
            .unwrap();

        assert_eq!(user.id, first.id);
        assert_eq!(user.credits, MAX_CREDITS - 1);
        assert_eq!(user.created_at, now());
        assert_eq!(user.updated_at, later);
        assert_eq!(user.name.as_deref(), Some("Ada"));
        assert!(user.otp_code.is_some());
    }

    #[test]
    fn consume_is_single_use() {
        let store = MemoryStore::new();
        store
            .store_otp("a@x.com", "123456", now() + Duration::minutes(5), now())
            .unwrap();

        assert!(store.consume_otp("a@x.com", "123456", now()).unwrap().is_some());
        assert!(store.consume_otp("a@x.com", "123456", now()).unwrap().is_none());
    }

    #[test]
    fn decrement_saturates_at_zero() {
        let store = MemoryStore::new();
        let user = store.upsert_user(
            NewUser::bare("a@x.com", now()),
            UserChanges { name: None, password_hash: None, updated_at: now() },
        )
        .unwrap();

        for expected in (0..MAX_CREDITS).rev() {
            assert_eq!(store.decrement_credits(user.id).unwrap(), Some(expected));
        }
        assert_eq!(store.decrement_credits(user.id).unwrap(), None);
        assert_eq!(store.find_user_by_id(user.id).unwrap().unwrap().credits, 0);
    }

    #[test]
    fn decrement_for_unknown_user_is_not_found() {
        let store = MemoryStore::new();
        assert!(store.decrement_credits(Uuid::new_v4()).is_err());
    }

    #[test]
    fn parallel_decrements_stop_at_zero() {
        let store = MemoryStore::new();
        let user = store
            .store_otp("a@x.com", "123456", now() + Duration::minutes(5), now())
            .unwrap();

        let taken: Vec<Option<i32>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..32)
                .map(|_| s.spawn(|| store.decrement_credits(user.id).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let mut balances: Vec<i32> = taken.iter().flatten().copied().collect();
        balances.sort_unstable();
        assert_eq!(balances, (0..MAX_CREDITS).collect::<Vec<_>>());
        assert_eq!(taken.iter().filter(|b| b.is_none()).count(), 32 - MAX_CREDITS as usize);
        assert_eq!(store.find_user_by_id(user.id).unwrap().unwrap().credits, 0);
    }

    #[test]
    fn connection_upsert_overwrites_in_place() {
        let store = MemoryStore::new();
        let user = store
            .store_otp("a@x.com", "123456", now() + Duration::minutes(5), now())
            .unwrap();
        let grant = ConnectionGrant {
            access_token: "at-1".into(),
            refresh_token: "rt-1".into(),
            expires_at: now() + Duration::hours(1),
            scopes: vec!["gmail.send".into()],
        };
        let first = store.upsert_connection(user.id, &grant, now()).unwrap();

        let regrant = ConnectionGrant {
            access_token: "at-2".into(),
            expires_at: now() + Duration::hours(2),
            ..grant
        };
        let second = store.upsert_connection(user.id, &regrant, now()).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.access_token, "at-2");
        assert_eq!(second.expires_at, now() + Duration::hours(2));
    }
}
