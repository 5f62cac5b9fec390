//! Password hashing via bcrypt, plus strength rules.

use std::sync::{Arc, OnceLock};

use thiserror::Error;

use super::AuthError;

/// Default bcrypt cost factor.
pub const BCRYPT_COST: u32 = 10;

/// Minimum password length in characters.
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// bcrypt only reads the first 72 bytes; longer input is rejected, not truncated.
pub const MAX_PASSWORD_BYTES: usize = 72;

/// Why a password was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PasswordPolicyError {
    #[error("password must be at least {min} characters")]
    TooShort { min: usize },

    #[error("password must not exceed {max} bytes")]
    TooLong { max: usize },

    #[error("password must contain {missing}")]
    TooWeak { missing: &'static str },
}

/// Check length and character-class rules.
pub fn validate_strength(password: &str) -> Result<(), PasswordPolicyError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(PasswordPolicyError::TooShort {
            min: MIN_PASSWORD_LENGTH,
        });
    }
    if password.len() > MAX_PASSWORD_BYTES {
        return Err(PasswordPolicyError::TooLong {
            max: MAX_PASSWORD_BYTES,
        });
    }

    let mut upper = false;
    let mut lower = false;
    let mut digit = false;
    let mut special = false;
    for c in password.chars() {
        if c.is_uppercase() {
            upper = true;
        } else if c.is_lowercase() {
            lower = true;
        } else if c.is_numeric() {
            digit = true;
        } else if !c.is_alphanumeric() && !c.is_whitespace() {
            special = true;
        }
    }

    let missing = if !upper {
        Some("an uppercase letter")
    } else if !lower {
        Some("a lowercase letter")
    } else if !digit {
        Some("a digit")
    } else if !special {
        Some("a special character")
    } else {
        None
    };

    match missing {
        Some(missing) => Err(PasswordPolicyError::TooWeak { missing }),
        None => Ok(()),
    }
}

/// Hash a password with bcrypt after checking strength.
pub fn hash_password_with_cost(password: &str, cost: u32) -> Result<String, AuthError> {
    validate_strength(password)?;
    bcrypt::hash(password, cost).map_err(|e| AuthError::Internal(format!("bcrypt hash: {e}")))
}

/// Hash a password with bcrypt (cost 10).
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    hash_password_with_cost(password, BCRYPT_COST)
}

/// Verify a password against a bcrypt hash.
///
/// Mismatch and an unreadable hash produce the same error.
pub fn verify_password(password: &str, hash: &str) -> Result<(), AuthError> {
    match bcrypt::verify(password, hash) {
        Ok(true) => Ok(()),
        Ok(false) | Err(_) => Err(AuthError::InvalidCredentials),
    }
}

/// Cost-configurable hasher used by the services.
///
/// The async methods run bcrypt on the blocking pool so request tasks never
/// hold a runtime thread (or a lock) while hashing.
#[derive(Debug)]
pub struct PasswordPolicy {
    cost: u32,
    dummy_hash: Arc<OnceLock<String>>,
}

impl PasswordPolicy {
    pub fn new(cost: u32) -> Self {
        Self {
            cost: cost.clamp(4, 31),
            dummy_hash: Arc::new(OnceLock::new()),
        }
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    pub async fn hash(&self, password: &str) -> Result<String, AuthError> {
        validate_strength(password)?;
        let password = password.to_string();
        let cost = self.cost;
        tokio::task::spawn_blocking(move || hash_password_with_cost(&password, cost))
            .await
            .map_err(|e| AuthError::Internal(format!("hash task: {e}")))?
    }

    pub async fn verify(&self, password: &str, hash: &str) -> Result<(), AuthError> {
        let password = password.to_string();
        let hash = hash.to_string();
        tokio::task::spawn_blocking(move || verify_password(&password, &hash))
            .await
            .map_err(|e| AuthError::Internal(format!("verify task: {e}")))?
    }

    /// Burn one verification against a throwaway hash so unknown accounts
    /// take as long to reject as wrong passwords. The throwaway hash is built
    /// lazily on the blocking pool as well.
    pub async fn verify_dummy(&self, password: &str) {
        let cost = self.cost;
        let dummy = Arc::clone(&self.dummy_hash);
        let password = password.to_string();
        let _ = tokio::task::spawn_blocking(move || {
            let hash = dummy.get_or_init(|| bcrypt::hash("dummy-Passw0rd!", cost).unwrap_or_default());
            verify_password(&password, hash)
        })
        .await;
    }
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self::new(BCRYPT_COST)
    }
}
