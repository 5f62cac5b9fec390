//! Authentication and authorization logic.
//!
//! Password policy, session tokens, refresh-token storage, lockout,
//! and the credential / admin services built on them.

pub mod admin;
pub mod audit;
pub mod credentials;
pub mod jwt;
pub mod password;
pub mod rate_limit;
pub mod refresh;
pub mod session;
pub mod totp;

use thiserror::Error;

use crate::cache::CacheError;
use crate::repository::RepositoryError;

pub use jwt::{TokenCodec, TokenError};
pub use password::{PasswordPolicy, PasswordPolicyError};

/// Authentication errors.
///
/// `Display` strings are safe to show to callers; wrapped backend detail is
/// only reachable through `Debug`.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account is deactivated")]
    AccountDeactivated,

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("Weak password: {0}")]
    WeakPassword(#[from] PasswordPolicyError),

    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("Missing bearer token")]
    MissingToken,

    #[error("Invalid or expired refresh token")]
    RefreshTokenInvalid,

    #[error("Too many attempts; retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Multi-factor authentication required")]
    MfaRequired,

    #[error("Invalid multi-factor code")]
    MfaInvalid,

    #[error("Admin setup is disabled")]
    SetupDisabled,

    #[error("Invalid setup token")]
    SetupTokenInvalid,

    #[error("Invalid or expired OAuth state")]
    OAuthStateInvalid,

    #[error("OAuth provider error: {0}")]
    OAuthProvider(String),

    #[error("Email is not authorized")]
    EmailNotAuthorized,

    #[error("Redirect target is not allowed")]
    RedirectNotAllowed,

    #[error("Insufficient permissions")]
    Forbidden,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Stable machine-readable code for response bodies and redirect fragments.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::AccountDeactivated => "account_deactivated",
            AuthError::AlreadyExists(_) => "already_exists",
            AuthError::WeakPassword(_) => "weak_password",
            AuthError::Token(TokenError::Expired) => "token_expired",
            AuthError::Token(_) => "token_invalid",
            AuthError::MissingToken => "missing_token",
            AuthError::RefreshTokenInvalid => "refresh_token_invalid",
            AuthError::RateLimited { .. } => "rate_limited",
            AuthError::MfaRequired => "mfa_required",
            AuthError::MfaInvalid => "mfa_invalid",
            AuthError::SetupDisabled => "setup_disabled",
            AuthError::SetupTokenInvalid => "setup_token_invalid",
            AuthError::OAuthStateInvalid => "oauth_state_invalid",
            AuthError::OAuthProvider(_) => "oauth_provider_error",
            AuthError::EmailNotAuthorized => "email_not_authorized",
            AuthError::RedirectNotAllowed => "redirect_not_allowed",
            AuthError::Forbidden => "forbidden",
            AuthError::Validation(_) => "validation_error",
            AuthError::Repository(_) | AuthError::Cache(_) | AuthError::Internal(_) => {
                "internal_error"
            }
        }
    }

    /// Whether the failure came from an expired (but otherwise valid) access token.
    pub fn is_token_expired(&self) -> bool {
        matches!(self, AuthError::Token(TokenError::Expired))
    }

    /// Failures that count against the caller in the brute-force limiter.
    pub fn counts_as_failed_attempt(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidCredentials
                | AuthError::MfaInvalid
                | AuthError::SetupTokenInvalid
                | AuthError::Token(_)
                | AuthError::MissingToken
                | AuthError::RefreshTokenInvalid
        )
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_is_distinguished_from_invalid() {
        assert!(AuthError::Token(TokenError::Expired).is_token_expired());
        assert!(!AuthError::Token(TokenError::SignatureMismatch).is_token_expired());
    }

    #[test]
    fn codes_separate_expired_from_invalid_tokens() {
        assert_eq!(AuthError::Token(TokenError::Expired).code(), "token_expired");
        assert_eq!(AuthError::Token(TokenError::SignatureMismatch).code(), "token_invalid");
        assert_eq!(AuthError::Internal("db down".into()).code(), "internal_error");
    }

    #[test]
    fn backend_failures_do_not_count_as_attempts() {
        assert!(AuthError::InvalidCredentials.counts_as_failed_attempt());
        assert!(!AuthError::Internal("boom".into()).counts_as_failed_attempt());
        assert!(
            !AuthError::Repository(RepositoryError::Backend("down".into()))
                .counts_as_failed_attempt()
        );
    }
}
