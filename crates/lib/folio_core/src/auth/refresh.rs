//! Opaque refresh tokens held in the cache.
//!
//! Tokens are stored under the SHA-256 of their value, never in clear. A
//! per-user index lists the live digests so every session of a user can be
//! revoked at once.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use super::AuthError;
use crate::cache::{Cache, CacheError};
use crate::crypto::{random_token, sha256_hex};
use crate::models::auth::Identity;
use crate::retry::RetryPolicy;

/// Refresh tokens carry 32 bytes of entropy.
pub const REFRESH_TOKEN_BYTES: usize = 32;

const TOKEN_PREFIX: &str = "refresh_token:";
const USER_INDEX_PREFIX: &str = "user_sessions:";

/// Generate a new URL-safe refresh token.
pub fn generate_refresh_token() -> String {
    random_token(REFRESH_TOKEN_BYTES)
}

fn token_key(token: &str) -> String {
    format!("{TOKEN_PREFIX}{}", sha256_hex(token))
}

fn index_key(user_id: Uuid) -> String {
    format!("{USER_INDEX_PREFIX}{user_id}")
}

/// Maps refresh tokens to the identity they were issued for.
#[derive(Clone)]
pub struct RefreshTokenStore {
    cache: Arc<dyn Cache>,
    retry: RetryPolicy,
}

impl RefreshTokenStore {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self {
            cache,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Upsert `token → identity` with `ttl`, and add it to the user's index.
    pub async fn store(
        &self,
        token: &str,
        identity: &Identity,
        ttl: Duration,
    ) -> Result<(), AuthError> {
        let value = serde_json::to_value(identity)
            .map_err(|e| AuthError::Internal(format!("refresh record: {e}")))?;
        let key = token_key(token);
        self.cache.set(&key, value, ttl).await?;

        let index = index_key(identity.user_id);
        let mut digests = Vec::new();
        for digest in self.indexed(&index).await.unwrap_or_default() {
            if digest != key && matches!(self.cache.get(&digest).await, Ok(Some(_))) {
                digests.push(digest);
            }
        }
        digests.push(key);
        self.cache.set(&index, Value::from(digests), ttl).await?;
        Ok(())
    }

    /// Resolve a token to its identity.
    ///
    /// Misses, expired entries, undecodable values and cache outages all come
    /// back as [`AuthError::RefreshTokenInvalid`].
    pub async fn resolve(&self, token: &str) -> Result<Identity, AuthError> {
        let key = token_key(token);
        let found = self
            .retry
            .run("refresh_resolve", || self.cache.get(&key))
            .await;
        match found {
            Ok(Some(value)) => serde_json::from_value(value).map_err(|e| {
                warn!(error = %e, "undecodable refresh record");
                AuthError::RefreshTokenInvalid
            }),
            Ok(None) => Err(AuthError::RefreshTokenInvalid),
            Err(e) => {
                warn!(error = %e, "refresh resolve failed");
                Err(AuthError::RefreshTokenInvalid)
            }
        }
    }

    /// Atomically remove a token and return its identity.
    ///
    /// Of several concurrent callers presenting the same token, at most one
    /// gets the identity back; the rest see [`AuthError::RefreshTokenInvalid`].
    /// Not retried, since a failed `take` may already have removed the entry.
    pub async fn consume(&self, token: &str) -> Result<Identity, AuthError> {
        match self.cache.take(&token_key(token)).await {
            Ok(Some(value)) => serde_json::from_value(value).map_err(|e| {
                warn!(error = %e, "undecodable refresh record");
                AuthError::RefreshTokenInvalid
            }),
            Ok(None) => Err(AuthError::RefreshTokenInvalid),
            Err(e) => {
                warn!(error = %e, "refresh consume failed");
                Err(AuthError::RefreshTokenInvalid)
            }
        }
    }

    /// Delete one token. Unknown tokens are a no-op.
    pub async fn revoke(&self, token: &str) -> Result<(), AuthError> {
        self.cache.delete(&token_key(token)).await?;
        Ok(())
    }

    /// Delete every indexed token of `user_id`. Returns how many were listed.
    pub async fn revoke_all(&self, user_id: Uuid) -> Result<usize, AuthError> {
        let index = index_key(user_id);
        let Some(digests) = self.cache.take(&index).await? else {
            return Ok(0);
        };
        let digests = decode_index(digests).unwrap_or_default();
        for key in &digests {
            self.cache.delete(key).await?;
        }
        debug!(user_id = %user_id, revoked = digests.len(), "revoked all refresh tokens");
        Ok(digests.len())
    }

    async fn indexed(&self, index: &str) -> Result<Vec<String>, CacheError> {
        match self.cache.get(index).await? {
            Some(v) => decode_index(v),
            None => Ok(Vec::new()),
        }
    }
}

fn decode_index(value: Value) -> Result<Vec<String>, CacheError> {
    serde_json::from_value(value).map_err(|e| CacheError::Decode(e.to_string()))
}
