//! Session tokens from the account service.
//!
//! Accounts are authenticated elsewhere; this service only verifies the
//! HS256 session JWT it is handed and reads the account id from `sub`.

use jwt_simple::prelude::*;

use crate::error::{AppError, Result};

/// Issuer expected in every session token.
pub const SESSION_ISSUER: &str = "accounts";

#[derive(Clone)]
pub struct SessionVerifier {
    key: HS256Key,
}

impl std::fmt::Debug for SessionVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionVerifier").finish_non_exhaustive()
    }
}

impl SessionVerifier {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: HS256Key::from_bytes(secret),
        }
    }

    /// Verify a session token and return the account id it was issued for.
    pub fn verify(&self, token: &str) -> Result<String> {
        let options = VerificationOptions {
            allowed_issuers: Some(HashSet::from_strings(&[SESSION_ISSUER])),
            ..Default::default()
        };

        let claims = self
            .key
            .verify_token::<NoCustomClaims>(token, Some(options))
            .map_err(|e| {
                tracing::debug!("Session token rejected: {}", e);
                AppError::Unauthorized
            })?;

        claims
            .subject
            .filter(|s| !s.is_empty())
            .ok_or(AppError::Unauthorized)
    }

    /// Issue a session token. Used for dev seeding and tests; production
    /// tokens come from the account service.
    pub fn issue(&self, account_id: &str, valid_for_secs: u64) -> Result<String> {
        let claims = Claims::create(Duration::from_secs(valid_for_secs))
            .with_issuer(SESSION_ISSUER)
            .with_subject(account_id);

        self.key
            .authenticate(claims)
            .map_err(|e| AppError::Internal(format!("Failed to sign session token: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_verifies_to_account() {
        let sessions = SessionVerifier::new(b"session-secret-for-tests-only-32b");
        let token = sessions.issue("acct-1", 60).unwrap();
        assert_eq!(sessions.verify(&token).unwrap(), "acct-1");
    }

    #[test]
    fn token_from_other_secret_is_rejected() {
        let issuer = SessionVerifier::new(b"one-secret-one-secret-one-secret");
        let verifier = SessionVerifier::new(b"two-secret-two-secret-two-secret");
        let token = issuer.issue("acct-1", 60).unwrap();
        assert!(matches!(verifier.verify(&token), Err(AppError::Unauthorized)));
    }
}
