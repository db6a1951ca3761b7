use chrono::Duration;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use std::sync::Arc;

use voxmail_shared::errors::{AppError, AppResult};
use voxmail_shared::middleware::token_fingerprint;
use voxmail_shared::types::auth::{SessionClaims, SessionToken};

use crate::clock::Clock;
use crate::models::User;

/// Mints and checks HS256 session tokens.
///
/// Verification never tells the caller why a token was refused. Expiry is
/// judged against the injected clock rather than the library's wall clock,
/// and a previous secret may be configured so tokens survive a rotation.
#[derive(Clone)]
pub struct SessionIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    previous: Option<DecodingKey>,
    validation: Validation,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl SessionIssuer {
    pub fn new(secret: &str, previous_secret: Option<&str>, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            previous: previous_secret
                .filter(|s| !s.is_empty())
                .map(|s| DecodingKey::from_secret(s.as_bytes())),
            validation,
            ttl,
            clock,
        }
    }

    pub fn mint(&self, claims: &SessionClaims) -> AppResult<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| AppError::internal(format!("JWT encoding failed: {e}")))
    }

    /// Mints a token for `user` valid from now for the configured window.
    pub fn issue(&self, user: &User) -> AppResult<(SessionToken, SessionClaims)> {
        let claims = SessionClaims::new(user.id, user.email.clone(), self.clock.now(), self.ttl);
        let token = self.mint(&claims)?;
        Ok((SessionToken::new(token, &claims), claims))
    }

    pub fn verify(&self, token: &str) -> AppResult<SessionClaims> {
        let claims = match self.decode_any(token) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::debug!(token = %token_fingerprint(token), cause = %e, "session token rejected");
                return Err(AppError::session_invalid());
            }
        };

        if claims.is_expired_at(self.clock.now()) {
            tracing::debug!(
                token = %token_fingerprint(token),
                user_id = %claims.user_id,
                exp = claims.exp,
                "session token expired"
            );
            return Err(AppError::session_invalid());
        }

        Ok(claims)
    }

    fn decode_any(&self, token: &str) -> Result<SessionClaims, jsonwebtoken::errors::Error> {
        match decode::<SessionClaims>(token, &self.decoding, &self.validation) {
            Ok(data) => Ok(data.claims),
            Err(e) if matches!(e.kind(), ErrorKind::InvalidSignature) => match &self.previous {
                Some(previous) => {
                    let data = decode::<SessionClaims>(token, previous, &self.validation)?;
                    tracing::debug!(user_id = %data.claims.user_id, "session token signed with previous secret");
                    Ok(data.claims)
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use voxmail_shared::errors::ErrorCode;
    use uuid::Uuid;

    const SECRET: &str = "test-secret";

    fn issuer(clock: Arc<ManualClock>) -> SessionIssuer {
        SessionIssuer::new(SECRET, None, Duration::hours(100), clock)
    }

    fn claims_at(clock: &ManualClock) -> SessionClaims {
        SessionClaims::new(Uuid::now_v7(), "a@x.com", clock.now(), Duration::hours(100))
    }

    fn assert_invalid(result: AppResult<SessionClaims>) {
        let err = result.unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::SessionInvalid);
        assert_eq!(err.to_string(), "invalid or expired session");
    }

    #[test]
    fn minted_token_verifies_to_the_same_claims() {
        let clock = Arc::new(ManualClock::at_epoch());
        let issuer = issuer(clock.clone());
        let claims = claims_at(&clock);

        let token = issuer.mint(&claims).unwrap();
        assert_eq!(issuer.verify(&token).unwrap(), claims);
    }

    #[test]
    fn token_dies_at_expiry() {
        let clock = Arc::new(ManualClock::at_epoch());
        let issuer = issuer(clock.clone());
        let token = issuer.mint(&claims_at(&clock)).unwrap();

        clock.advance(Duration::hours(100) - Duration::seconds(1));
        assert!(issuer.verify(&token).is_ok());

        clock.advance(Duration::seconds(1));
        assert_invalid(issuer.verify(&token));
    }

    #[test]
    fn tampered_signature_is_invalid() {
        let clock = Arc::new(ManualClock::at_epoch());
        let issuer = issuer(clock.clone());
        let token = issuer.mint(&claims_at(&clock)).unwrap();

        let sig_start = token.rfind('.').unwrap() + 1;
        let mut bytes = token.into_bytes();
        bytes[sig_start] = if bytes[sig_start] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(bytes).unwrap();

        assert_invalid(issuer.verify(&tampered));
    }

    #[test]
    fn foreign_secret_is_invalid() {
        let clock = Arc::new(ManualClock::at_epoch());
        let other = SessionIssuer::new("someone-else", None, Duration::hours(100), clock.clone());
        let token = other.mint(&claims_at(&clock)).unwrap();

        assert_invalid(issuer(clock).verify(&token));
    }

    #[test]
    fn previous_secret_still_verifies_after_rotation() {
        let clock = Arc::new(ManualClock::at_epoch());
        let old = SessionIssuer::new("old-secret", None, Duration::hours(100), clock.clone());
        let claims = claims_at(&clock);
        let token = old.mint(&claims).unwrap();

        let rotated = SessionIssuer::new(SECRET, Some("old-secret"), Duration::hours(100), clock.clone());
        assert_eq!(rotated.verify(&token).unwrap(), claims);

        let fresh = rotated.mint(&claims).unwrap();
        assert_invalid(old.verify(&fresh));
    }

    #[test]
    fn missing_claim_is_invalid() {
        let clock = Arc::new(ManualClock::at_epoch());
        let now = clock.now().timestamp();
        let partial = serde_json::json!({ "email": "a@x.com", "iat": now, "exp": now + 3600 });
        let token = encode(
            &Header::new(Algorithm::HS256),
            &partial,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        assert_invalid(issuer(clock).verify(&token));
    }

    #[test]
    fn garbage_is_invalid() {
        let clock = Arc::new(ManualClock::at_epoch());
        let issuer = issuer(clock);
        assert_invalid(issuer.verify(""));
        assert_invalid(issuer.verify("not.a.token"));
    }

    #[test]
    fn issue_uses_configured_window() {
        let clock = Arc::new(ManualClock::at_epoch());
        let issuer = issuer(clock.clone());
        let user = crate::models::User {
            id: Uuid::now_v7(),
            email: "a@x.com".into(),
            name: None,
            password_hash: None,
            credits: 10,
            otp_code: None,
            otp_expires_at: None,
            created_at: clock.now(),
            updated_at: clock.now(),
        };

        let (token, claims) = issuer.issue(&user).unwrap();
        assert_eq!(token.token_type, "Bearer");
        assert_eq!(token.expires_at, Some(clock.now() + Duration::hours(100)));
        assert_eq!(claims.user_id, user.id);
    }
}
