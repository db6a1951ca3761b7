use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use std::sync::Arc;
use uuid::Uuid;

use voxmail_shared::errors::{AppError, AppResult, ErrorCode};

use crate::clock::Clock;
use crate::models::{NewUser, User, UserChanges};
use crate::store::AccountStore;

pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AppError::internal(format!("password hashing failed: {e}")))
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, AppError> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| AppError::internal(format!("invalid password hash: {e}")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

pub fn validate_password(password: &str) -> Result<(), AppError> {
    if password.len() < 8 {
        return Err(AppError::new(ErrorCode::PasswordTooWeak, "password must be at least 8 characters"));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(AppError::new(ErrorCode::PasswordTooWeak, "password must contain at least one number"));
    }
    if !password.chars().any(|c| c.is_ascii_alphabetic()) {
        return Err(AppError::new(ErrorCode::PasswordTooWeak, "password must contain at least one letter"));
    }
    Ok(())
}

fn account_not_found() -> AppError {
    AppError::new(ErrorCode::AccountNotFound, "no account found, sign up first")
}

/// Users keyed by email. Emails are compared exactly as stored.
#[derive(Clone)]
pub struct IdentityStore {
    store: Arc<dyn AccountStore>,
    clock: Arc<dyn Clock>,
}

impl IdentityStore {
    pub fn new(store: Arc<dyn AccountStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn find_by_email(&self, email: &str) -> AppResult<User> {
        self.store
            .find_user_by_email(email)?
            .ok_or_else(account_not_found)
    }

    pub fn lookup(&self, email: &str) -> AppResult<Option<User>> {
        self.store.find_user_by_email(email)
    }

    pub fn find_by_id(&self, id: Uuid) -> AppResult<User> {
        self.store.find_user_by_id(id)?.ok_or_else(account_not_found)
    }

    /// Creates the user or, if the email is taken, updates only the supplied
    /// fields. A first creation grants the default credit balance.
    pub fn create(
        &self,
        email: &str,
        name: Option<&str>,
        credential_hash: Option<String>,
    ) -> AppResult<User> {
        let now = self.clock.now();
        let new = NewUser {
            name: name.map(str::to_string),
            password_hash: credential_hash.clone(),
            ..NewUser::bare(email, now)
        };
        let changes = UserChanges {
            name: name.map(str::to_string),
            password_hash: credential_hash,
            updated_at: now,
        };
        let user = self.store.upsert_user(new, changes)?;
        tracing::info!(user_id = %user.id, credits = user.credits, "user provisioned");
        Ok(user)
    }

    /// Password check. Unknown email, passwordless account and wrong password
    /// are indistinguishable to the caller.
    pub fn verify_credential(&self, email: &str, plain: &str) -> AppResult<User> {
        let user = self.find_by_email(email)?;
        let Some(hash) = user.password_hash.as_deref() else {
            tracing::debug!(user_id = %user.id, "password login for passwordless account");
            return Err(account_not_found());
        };
        if !verify_password(plain, hash)? {
            tracing::debug!(user_id = %user.id, "password mismatch");
            return Err(account_not_found());
        }
        Ok(user)
    }
}
