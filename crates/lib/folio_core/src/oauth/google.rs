//! Google (OpenID Connect) adapter.

use async_trait::async_trait;
use serde::Deserialize;

use super::provider::{Endpoints, OAuthClient, OAuthProvider, provider_error};
use crate::auth::AuthError;
use crate::config::OAuthProviderConfig;
use crate::models::oauth::{AuthorizationRequest, ProviderKind, ProviderTokens, ProviderUserInfo};

const AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";
const REVOKE_URL: &str = "https://oauth2.googleapis.com/revoke";

pub const DEFAULT_SCOPES: [&str; 3] = ["openid", "email", "profile"];

#[derive(Debug, Deserialize)]
struct GoogleUser {
    sub: String,
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
    name: Option<String>,
    picture: Option<String>,
}

impl TryFrom<GoogleUser> for ProviderUserInfo {
    type Error = AuthError;

    fn try_from(u: GoogleUser) -> Result<Self, Self::Error> {
        let email = u
            .email
            .ok_or_else(|| provider_error(ProviderKind::Google, "user info", "no email scope granted"))?;
        Ok(ProviderUserInfo {
            provider_user_id: u.sub,
            email,
            email_verified: u.email_verified,
            name: u.name,
            picture: u.picture,
        })
    }
}

pub struct GoogleProvider {
    client: OAuthClient,
}

impl GoogleProvider {
    pub fn new(config: OAuthProviderConfig) -> Result<Self, AuthError> {
        let endpoints = Endpoints {
            authorize: AUTHORIZE_URL.into(),
            token: TOKEN_URL.into(),
            user_info: USERINFO_URL.into(),
            revoke: Some(REVOKE_URL.into()),
        };
        Ok(Self {
            client: OAuthClient::new(config, endpoints, true)?,
        })
    }
}

#[async_trait]
impl OAuthProvider for GoogleProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    fn authorization_url(&self, state: &str, nonce: &str) -> Result<AuthorizationRequest, AuthError> {
        // Offline access so a refresh token comes back; consent forces it on re-login.
        self.client.authorization_url(
            state,
            nonce,
            &[("access_type", "offline"), ("prompt", "consent")],
        )
    }

    async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: Option<&str>,
    ) -> Result<ProviderTokens, AuthError> {
        self.client.exchange_code(code, pkce_verifier).await
    }

    async fn user_info(&self, access_token: &str) -> Result<ProviderUserInfo, AuthError> {
        let user: GoogleUser = self
            .client
            .get_json(&self.client.endpoints.user_info, access_token)
            .await?;
        user.try_into()
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<ProviderTokens, AuthError> {
        self.client.refresh(refresh_token).await
    }

    async fn revoke_token(&self, token: &str) -> Result<(), AuthError> {
        self.client.revoke(token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::provider::test_config::provider_config;

    #[test]
    fn userinfo_maps_verified_email() {
        let user: GoogleUser = serde_json::from_str(
            r#"{"sub":"1099","email":"root@folio.dev","email_verified":true,
                "name":"Root","picture":"https://lh3.example/p.png"}"#,
        )
        .unwrap();
        let info = ProviderUserInfo::try_from(user).unwrap();
        assert_eq!(info.provider_user_id, "1099");
        assert!(info.email_verified);
        assert_eq!(info.name.as_deref(), Some("Root"));
    }

    #[test]
    fn userinfo_without_email_is_an_error() {
        let user: GoogleUser = serde_json::from_str(r#"{"sub":"1"}"#).unwrap();
        assert!(ProviderUserInfo::try_from(user).is_err());
    }

    #[test]
    fn consent_url_requests_offline_access_with_pkce() {
        let provider = GoogleProvider::new(provider_config(ProviderKind::Google)).unwrap();
        let req = provider.authorization_url("s", "n").unwrap();
        assert!(req.url.starts_with(AUTHORIZE_URL));
        assert!(req.url.contains("access_type=offline"));
        assert!(req.pkce_verifier.is_some());
    }
}
