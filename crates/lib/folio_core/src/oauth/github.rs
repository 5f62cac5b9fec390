//! GitHub adapter.
//!
//! GitHub is plain OAuth2: no ID token, no PKCE, and `/user` only exposes a
//! public email. The verified primary address comes from `/user/emails`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::provider::{Endpoints, OAuthClient, OAuthProvider, provider_error};
use crate::auth::AuthError;
use crate::config::OAuthProviderConfig;
use crate::models::oauth::{AuthorizationRequest, ProviderKind, ProviderTokens, ProviderUserInfo};

const AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";
const TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const USER_URL: &str = "https://api.github.com/user";
const EMAILS_URL: &str = "https://api.github.com/user/emails";
const API_BASE: &str = "https://api.github.com";

pub const DEFAULT_SCOPES: [&str; 2] = ["read:user", "user:email"];

#[derive(Debug, Deserialize)]
struct GitHubUser {
    id: u64,
    login: String,
    name: Option<String>,
    avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

fn to_user_info(user: GitHubUser, emails: &[GitHubEmail]) -> Result<ProviderUserInfo, AuthError> {
    let primary = emails
        .iter()
        .find(|e| e.primary)
        .ok_or_else(|| provider_error(ProviderKind::GitHub, "user info", "no primary email"))?;
    Ok(ProviderUserInfo {
        provider_user_id: user.id.to_string(),
        email: primary.email.clone(),
        email_verified: primary.verified,
        name: user.name.or(Some(user.login)),
        picture: user.avatar_url,
    })
}

pub struct GitHubProvider {
    client: OAuthClient,
}

impl GitHubProvider {
    pub fn new(config: OAuthProviderConfig) -> Result<Self, AuthError> {
        let endpoints = Endpoints {
            authorize: AUTHORIZE_URL.into(),
            token: TOKEN_URL.into(),
            user_info: USER_URL.into(),
            revoke: None,
        };
        Ok(Self {
            client: OAuthClient::new(config, endpoints, false)?,
        })
    }
}

#[async_trait]
impl OAuthProvider for GitHubProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::GitHub
    }

    fn authorization_url(&self, state: &str, nonce: &str) -> Result<AuthorizationRequest, AuthError> {
        self.client
            .authorization_url(state, nonce, &[("allow_signup", "false")])
    }

    async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: Option<&str>,
    ) -> Result<ProviderTokens, AuthError> {
        self.client.exchange_code(code, pkce_verifier).await
    }

    async fn user_info(&self, access_token: &str) -> Result<ProviderUserInfo, AuthError> {
        let user: GitHubUser = self.client.get_json(USER_URL, access_token).await?;
        let emails: Vec<GitHubEmail> = self.client.get_json(EMAILS_URL, access_token).await?;
        to_user_info(user, &emails)
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<ProviderTokens, AuthError> {
        // Only GitHub Apps with expiring tokens issue refresh tokens.
        self.client.refresh(refresh_token).await
    }

    /// `DELETE /applications/{client_id}/token`, authenticated as the app.
    async fn revoke_token(&self, token: &str) -> Result<(), AuthError> {
        let config = &self.client.config;
        let resp = self
            .client
            .http
            .delete(format!("{API_BASE}/applications/{}/token", config.client_id))
            .basic_auth(&config.client_id, Some(&config.client_secret))
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .json(&json!({ "access_token": token }))
            .send()
            .await
            .map_err(|e| provider_error(ProviderKind::GitHub, "revoke", e))?;
        if !resp.status().is_success() {
            return Err(provider_error(
                ProviderKind::GitHub,
                "revoke",
                format!("HTTP {}", resp.status()),
            ));
        }
        Ok(())
    }
}
