use metrics::counter;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use voxmail_shared::errors::{AppError, AppResult, ErrorCode};

use crate::clock::Clock;
use crate::models::{EmailHistoryRecord, NewEmailHistory};
use crate::store::AccountStore;

/// At or below this balance a send still goes through but carries a warning.
pub const LOW_BALANCE_THRESHOLD: i32 = 5;

pub const DEFAULT_HISTORY_LIMIT: u64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditCheck {
    Allowed { balance: i32, low_balance: bool },
    Denied(DenialReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    NoCredits,
}

impl CreditCheck {
    /// Turns a denial into the caller-facing quota error.
    pub fn into_result(self) -> AppResult<(i32, bool)> {
        match self {
            CreditCheck::Allowed { balance, low_balance } => Ok((balance, low_balance)),
            CreditCheck::Denied(DenialReason::NoCredits) => {
                Err(AppError::new(ErrorCode::NoCredits, "no credits remaining"))
            }
        }
    }
}

/// What a completed send hands back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct SendOutcome {
    pub credits_remaining: i32,
    pub low_balance: bool,
    pub record: EmailHistoryRecord,
}

/// Delivery facts reported by the mail relay for one send.
#[derive(Debug, Clone)]
pub struct DeliveredEmail {
    pub receiver_email: String,
    pub receiver_name: String,
    pub email_type: String,
}

/// Per-user credit balance and the history of billed sends.
///
/// A send is checked before any external work and committed only after the
/// provider confirmed it. The decrement saturates at zero inside the store.
#[derive(Clone)]
pub struct CreditLedger {
    store: Arc<dyn AccountStore>,
    clock: Arc<dyn Clock>,
}

impl CreditLedger {
    pub fn new(store: Arc<dyn AccountStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn balance(&self, user_id: Uuid) -> AppResult<i32> {
        self.store
            .find_user_by_id(user_id)?
            .map(|u| u.credits)
            .ok_or_else(|| AppError::not_found("user not found"))
    }

    pub fn check_and_reserve(&self, user_id: Uuid) -> AppResult<CreditCheck> {
        let balance = self.balance(user_id)?;
        if balance <= 0 {
            tracing::info!(user_id = %user_id, "send refused, no credits");
            return Ok(CreditCheck::Denied(DenialReason::NoCredits));
        }
        Ok(CreditCheck::Allowed {
            balance,
            low_balance: balance <= LOW_BALANCE_THRESHOLD,
        })
    }

    /// Takes one credit and returns the balance left. A zero balance stays
    /// zero.
    pub fn commit(&self, user_id: Uuid) -> AppResult<i32> {
        match self.store.decrement_credits(user_id)? {
            Some(balance) => {
                counter!("credits_committed_total").increment(1);
                tracing::info!(user_id = %user_id, balance, "credit committed");
                Ok(balance)
            }
            None => {
                // Two sends passed the check on the last credit. The second
                // one went out unbilled and needs reconciling.
                counter!("credits_unbacked_sends_total").increment(1);
                tracing::error!(user_id = %user_id, "unbacked send, balance already empty at commit");
                Ok(0)
            }
        }
    }

    /// Commits the credit for a confirmed send and records it in the history.
    ///
    /// The mail has already left, so a store failure here is logged for
    /// reconciliation and the caller still gets a success built from what is
    /// known.
    pub fn settle(&self, user_id: Uuid, balance_before: i32, delivered: DeliveredEmail) -> SendOutcome {
        let credits_remaining = match self.commit(user_id) {
            Ok(balance) => balance,
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "credit commit failed after a delivered send");
                (balance_before - 1).max(0)
            }
        };

        let new = NewEmailHistory {
            id: Uuid::now_v7(),
            user_id,
            receiver_email: delivered.receiver_email,
            receiver_name: delivered.receiver_name,
            email_type: delivered.email_type,
            status: "sent".to_string(),
            sent_at: self.clock.now(),
        };
        let record = match self.store.insert_email_history(new.clone()) {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "email history insert failed after a delivered send");
                EmailHistoryRecord {
                    id: new.id,
                    user_id: new.user_id,
                    receiver_email: new.receiver_email,
                    receiver_name: new.receiver_name,
                    email_type: new.email_type,
                    status: new.status,
                    sent_at: new.sent_at,
                }
            }
        };

        counter!("emails_sent_total").increment(1);

        SendOutcome {
            credits_remaining,
            low_balance: credits_remaining <= LOW_BALANCE_THRESHOLD,
            record,
        }
    }

    pub fn history(&self, user_id: Uuid, limit: u64) -> AppResult<Vec<EmailHistoryRecord>> {
        self.store.email_history(user_id, limit.clamp(1, 100))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{NewUser, UserChanges, MAX_CREDITS};
    use crate::store::MemoryStore;

    fn ledger_with_user() -> (CreditLedger, Arc<MemoryStore>, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::at_epoch());
        let now = clock.now();
        let user = store
            .upsert_user(
                NewUser::bare("a@x.com", now),
                UserChanges { name: None, password_hash: None, updated_at: now },
            )
            .unwrap();
        (CreditLedger::new(store.clone(), clock), store, user.id)
    }

    fn delivered() -> DeliveredEmail {
        DeliveredEmail {
            receiver_email: "bob@y.com".into(),
            receiver_name: "Bob".into(),
            email_type: "general".into(),
        }
    }

    #[test]
    fn fresh_user_is_allowed_without_warning() {
        let (ledger, _, user_id) = ledger_with_user();
        assert_eq!(
            ledger.check_and_reserve(user_id).unwrap(),
            CreditCheck::Allowed { balance: MAX_CREDITS, low_balance: false }
        );
    }

    #[test]
    fn warning_starts_at_threshold() {
        let (ledger, _, user_id) = ledger_with_user();
        for _ in 0..(MAX_CREDITS - LOW_BALANCE_THRESHOLD - 1) {
            ledger.commit(user_id).unwrap();
        }
        assert_eq!(
            ledger.check_and_reserve(user_id).unwrap(),
            CreditCheck::Allowed { balance: LOW_BALANCE_THRESHOLD + 1, low_balance: false }
        );

        ledger.commit(user_id).unwrap();
        assert_eq!(
            ledger.check_and_reserve(user_id).unwrap(),
            CreditCheck::Allowed { balance: LOW_BALANCE_THRESHOLD, low_balance: true }
        );
    }

    #[test]
    fn empty_balance_is_denied_and_commit_saturates() {
        let (ledger, _, user_id) = ledger_with_user();
        for _ in 0..MAX_CREDITS {
            ledger.commit(user_id).unwrap();
        }
        assert_eq!(
            ledger.check_and_reserve(user_id).unwrap(),
            CreditCheck::Denied(DenialReason::NoCredits)
        );
        assert_eq!(ledger.commit(user_id).unwrap(), 0);
        assert_eq!(ledger.balance(user_id).unwrap(), 0);

        let err = ledger.check_and_reserve(user_id).unwrap().into_result().unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::NoCredits);
    }

    #[test]
    fn settle_commits_and_records_once() {
        let (ledger, store, user_id) = ledger_with_user();
        let outcome = ledger.settle(user_id, MAX_CREDITS, delivered());

        assert_eq!(outcome.credits_remaining, MAX_CREDITS - 1);
        assert!(!outcome.low_balance);
        assert_eq!(outcome.record.status, "sent");
        assert_eq!(store.email_history(user_id, 50).unwrap(), vec![outcome.record]);
    }

    #[test]
    fn racing_sends_on_the_last_credit_never_go_negative() {
        let (ledger, store, user_id) = ledger_with_user();
        for _ in 0..(MAX_CREDITS - 1) {
            ledger.commit(user_id).unwrap();
        }

        // Both passed the check at balance 1 before either committed.
        let first = ledger.settle(user_id, 1, delivered());
        let second = ledger.settle(user_id, 1, delivered());

        assert_eq!(first.credits_remaining, 0);
        assert_eq!(second.credits_remaining, 0);
        assert_eq!(ledger.balance(user_id).unwrap(), 0);
        assert_eq!(store.email_history(user_id, 50).unwrap().len(), 2);
    }

    #[test]
    fn settle_for_a_vanished_user_still_reports_success() {
        let (ledger, _, _) = ledger_with_user();
        let outcome = ledger.settle(Uuid::now_v7(), 1, delivered());
        assert_eq!(outcome.credits_remaining, 0);
        assert!(outcome.low_balance);
    }

    #[test]
    fn unknown_user_check_is_not_found() {
        let (ledger, _, _) = ledger_with_user();
        let err = ledger.check_and_reserve(Uuid::now_v7()).unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::NotFound);
    }
}
