use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;

use voxmail_shared::errors::{AppError, AppResult, ErrorCode};

use crate::clock::Clock;
use crate::models::User;
use crate::store::AccountStore;

pub const OTP_DIGITS: usize = 6;

pub fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    format!("{:06}", rng.gen_range(0..1_000_000))
}

fn is_well_formed(code: &str) -> bool {
    code.len() == OTP_DIGITS && code.bytes().all(|b| b.is_ascii_digit())
}

#[derive(Debug, Clone, Serialize)]
pub struct OtpChallenge {
    #[serde(skip_serializing)]
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

/// Issues and consumes one-time passcodes held on the user row.
///
/// At most one challenge is pending per email. Issuing replaces the previous
/// one; a successful verify clears it, so a code works exactly once.
#[derive(Clone)]
pub struct OtpManager {
    store: Arc<dyn AccountStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl OtpManager {
    pub fn new(store: Arc<dyn AccountStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Generates a fresh code for `email`, provisioning a bare user when the
    /// email is new.
    pub fn issue(&self, email: &str) -> AppResult<OtpChallenge> {
        let now = self.clock.now();
        let code = generate_code();
        let expires_at = now + self.ttl;
        let user = self.store.store_otp(email, &code, expires_at, now)?;

        counter!("otp_issued_total").increment(1);
        tracing::info!(user_id = %user.id, expires_at = %expires_at, "otp challenge issued");

        Ok(OtpChallenge { code, expires_at })
    }

    /// Accepts `code` only if it matches the pending challenge and the
    /// challenge has not expired. Every rejection looks the same.
    pub fn verify(&self, email: &str, code: &str) -> AppResult<User> {
        let rejected = || AppError::new(ErrorCode::InvalidCredentials, "invalid or expired code");

        if !is_well_formed(code) {
            counter!("otp_verifications_total", "outcome" => "rejected").increment(1);
            return Err(rejected());
        }

        match self.store.consume_otp(email, code, self.clock.now())? {
            Some(user) => {
                counter!("otp_verifications_total", "outcome" => "accepted").increment(1);
                tracing::info!(user_id = %user.id, "otp challenge consumed");
                Ok(user)
            }
            None => {
                counter!("otp_verifications_total", "outcome" => "rejected").increment(1);
                tracing::debug!("otp verification rejected");
                Err(rejected())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;

    fn manager() -> (OtpManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_epoch());
        let otp = OtpManager::new(Arc::new(MemoryStore::new()), clock.clone(), Duration::minutes(5));
        (otp, clock)
    }

    #[test]
    fn codes_are_six_zero_padded_digits() {
        for _ in 0..200 {
            let code = generate_code();
            assert!(is_well_formed(&code), "bad code {code}");
        }
    }

    #[test]
    fn issued_code_expires_after_ttl() {
        let (otp, clock) = manager();
        let challenge = otp.issue("a@x.com").unwrap();
        assert_eq!(challenge.expires_at, clock.now() + Duration::minutes(5));
    }

    #[test]
    fn wrong_code_is_rejected_and_right_code_still_works() {
        let (otp, _) = manager();
        let challenge = otp.issue("a@x.com").unwrap();
        let wrong = if challenge.code == "000000" { "000001" } else { "000000" };

        let err = otp.verify("a@x.com", wrong).unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::InvalidCredentials);

        let user = otp.verify("a@x.com", &challenge.code).unwrap();
        assert_eq!(user.email, "a@x.com");
        assert!(user.otp_code.is_none());
    }

    #[test]
    fn code_works_exactly_once() {
        let (otp, _) = manager();
        let challenge = otp.issue("a@x.com").unwrap();

        assert!(otp.verify("a@x.com", &challenge.code).is_ok());
        assert!(otp.verify("a@x.com", &challenge.code).is_err());
    }

    #[test]
    fn concurrent_verifies_of_one_code_have_a_single_winner() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let (otp, _) = manager();
        let challenge = otp.issue("a@x.com").unwrap();
        let wins = AtomicUsize::new(0);

        std::thread::scope(|s| {
            for _ in 0..16 {
                s.spawn(|| {
                    if otp.verify("a@x.com", &challenge.code).is_ok() {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(wins.into_inner(), 1);
    }

    #[test]
    fn code_is_dead_at_the_expiry_instant() {
        let (otp, clock) = manager();
        let challenge = otp.issue("a@x.com").unwrap();

        clock.set(challenge.expires_at);
        assert!(otp.verify("a@x.com", &challenge.code).is_err());
    }

    #[test]
    fn code_is_live_just_before_expiry() {
        let (otp, clock) = manager();
        let challenge = otp.issue("a@x.com").unwrap();

        clock.set(challenge.expires_at - Duration::seconds(1));
        assert!(otp.verify("a@x.com", &challenge.code).is_ok());
    }

    #[test]
    fn reissue_replaces_the_previous_code() {
        let (otp, _) = manager();
        let first = otp.issue("a@x.com").unwrap();
        let mut second = otp.issue("a@x.com").unwrap();
        while second.code == first.code {
            second = otp.issue("a@x.com").unwrap();
        }

        assert!(otp.verify("a@x.com", &first.code).is_err());
        assert!(otp.verify("a@x.com", &second.code).is_ok());
    }

    #[test]
    fn malformed_codes_never_reach_the_store() {
        let (otp, _) = manager();
        otp.issue("a@x.com").unwrap();

        for code in ["", "12345", "1234567", "12a456", " 12345"] {
            assert!(otp.verify("a@x.com", code).is_err());
        }
    }

    #[test]
    fn unknown_email_is_rejected() {
        let (otp, _) = manager();
        assert!(otp.verify("nobody@x.com", "123456").is_err());
    }
}
