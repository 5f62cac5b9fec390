//! Pending OAuth flows, kept in the cache between initiate and callback.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::auth::AuthError;
use crate::cache::Cache;
use crate::models::oauth::OAuthState;

/// Pending flows expire after five minutes.
pub const STATE_TTL: Duration = Duration::from_secs(5 * 60);

const STATE_PREFIX: &str = "oauth_state:";

#[derive(Clone)]
pub struct OAuthStateStore {
    cache: Arc<dyn Cache>,
    ttl: Duration,
}

impl OAuthStateStore {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self {
            cache,
            ttl: STATE_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub async fn save(&self, state: &OAuthState) -> Result<(), AuthError> {
        let value =
            serde_json::to_value(state).map_err(|e| AuthError::Internal(format!("oauth state: {e}")))?;
        self.cache
            .set(&format!("{STATE_PREFIX}{}", state.state), value, self.ttl)
            .await?;
        Ok(())
    }

    /// Remove and return the flow for `state`. A second call with the same
    /// value, an expired flow, or a cache failure all yield
    /// [`AuthError::OAuthStateInvalid`].
    pub async fn consume(&self, state: &str) -> Result<OAuthState, AuthError> {
        let taken = self.cache.take(&format!("{STATE_PREFIX}{state}")).await;
        match taken {
            Ok(Some(value)) => {
                serde_json::from_value(value).map_err(|_| AuthError::OAuthStateInvalid)
            }
            Ok(None) => {
                warn!(target: "audit", "unknown, expired or replayed OAuth state");
                Err(AuthError::OAuthStateInvalid)
            }
            Err(e) => {
                warn!(error = %e, "oauth state lookup failed");
                Err(AuthError::OAuthStateInvalid)
            }
        }
    }
}
