//! Token pair issuance: a signed access token plus a stored refresh token.

use std::sync::Arc;

use super::AuthError;
use super::jwt::TokenCodec;
use super::refresh::{RefreshTokenStore, generate_refresh_token};
use crate::models::auth::{Identity, TokenClaims, TokenPair};

pub const TOKEN_TYPE: &str = "Bearer";

/// Couples the stateless codec with the refresh-token store.
#[derive(Clone)]
pub struct SessionIssuer {
    codec: Arc<TokenCodec>,
    refresh: RefreshTokenStore,
}

impl SessionIssuer {
    pub fn new(codec: Arc<TokenCodec>, refresh: RefreshTokenStore) -> Self {
        Self { codec, refresh }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn refresh_store(&self) -> &RefreshTokenStore {
        &self.refresh
    }

    /// Sign an access token and persist a fresh refresh token for `identity`.
    pub async fn issue_pair(&self, identity: &Identity) -> Result<TokenPair, AuthError> {
        let access_token = self.codec.issue_access_token(identity)?;
        let refresh_token = generate_refresh_token();
        self.refresh
            .store(&refresh_token, identity, self.codec.refresh_ttl())
            .await?;
        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_in: self.codec.access_ttl_secs(),
            token_type: TOKEN_TYPE.to_string(),
        })
    }

    pub fn verify(&self, access_token: &str) -> Result<TokenClaims, AuthError> {
        Ok(self.codec.verify(access_token)?)
    }
}
