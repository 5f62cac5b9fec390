//! Provider abstraction and the authorization-code plumbing the adapters share.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use super::pkce::{compute_code_challenge, generate_code_verifier};
use crate::auth::AuthError;
use crate::config::OAuthProviderConfig;
use crate::models::oauth::{AuthorizationRequest, ProviderKind, ProviderTokens, ProviderUserInfo};

/// Upper bound for every call to a provider.
pub const PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

const USER_AGENT: &str = concat!("folio-auth/", env!("CARGO_PKG_VERSION"));

/// One identity provider.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Consent URL plus the PKCE verifier to keep for the exchange.
    fn authorization_url(&self, state: &str, nonce: &str) -> Result<AuthorizationRequest, AuthError>;

    async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: Option<&str>,
    ) -> Result<ProviderTokens, AuthError>;

    async fn user_info(&self, access_token: &str) -> Result<ProviderUserInfo, AuthError>;

    async fn refresh_token(&self, refresh_token: &str) -> Result<ProviderTokens, AuthError>;

    /// Best effort where the provider has no revocation endpoint.
    async fn revoke_token(&self, token: &str) -> Result<(), AuthError>;
}

/// Fixed endpoints of a provider.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub authorize: String,
    pub token: String,
    pub user_info: String,
    pub revoke: Option<String>,
}

/// Registration plus endpoints plus an HTTP client.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    pub(crate) config: OAuthProviderConfig,
    pub(crate) endpoints: Endpoints,
    pub(crate) http: reqwest::Client,
    use_pkce: bool,
}

pub(crate) fn provider_error(kind: ProviderKind, what: &str, detail: impl std::fmt::Display) -> AuthError {
    AuthError::OAuthProvider(format!("{kind} {what}: {detail}"))
}

impl OAuthClient {
    pub fn new(
        config: OAuthProviderConfig,
        endpoints: Endpoints,
        use_pkce: bool,
    ) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(PROVIDER_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| AuthError::Internal(format!("http client: {e}")))?;
        Ok(Self {
            config,
            endpoints,
            http,
            use_pkce,
        })
    }

    pub fn kind(&self) -> ProviderKind {
        self.config.kind
    }

    /// Build the consent URL. `extra` is appended after the standard parameters.
    pub fn authorization_url(
        &self,
        state: &str,
        nonce: &str,
        extra: &[(&str, &str)],
    ) -> Result<AuthorizationRequest, AuthError> {
        let mut url = Url::parse(&self.endpoints.authorize)
            .map_err(|e| provider_error(self.kind(), "authorize url", e))?;
        let verifier = self.use_pkce.then(generate_code_verifier);
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.config.client_id)
                .append_pair("redirect_uri", &self.config.redirect_url)
                .append_pair("scope", &self.config.scopes.join(" "))
                .append_pair("state", state)
                .append_pair("nonce", nonce);
            if let Some(verifier) = &verifier {
                query
                    .append_pair("code_challenge", &compute_code_challenge(verifier))
                    .append_pair("code_challenge_method", "S256");
            }
            for (k, v) in extra {
                query.append_pair(k, v);
            }
        }
        Ok(AuthorizationRequest {
            url: url.into(),
            pkce_verifier: verifier,
        })
    }

    pub async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: Option<&str>,
    ) -> Result<ProviderTokens, AuthError> {
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("redirect_uri", self.config.redirect_url.as_str()),
        ];
        if let Some(verifier) = pkce_verifier {
            params.push(("code_verifier", verifier));
        }
        self.token_request(&params, "code exchange").await
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<ProviderTokens, AuthError> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];
        self.token_request(&params, "token refresh").await
    }

    async fn token_request(
        &self,
        params: &[(&str, &str)],
        what: &str,
    ) -> Result<ProviderTokens, AuthError> {
        let resp = self
            .http
            .post(&self.endpoints.token)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(params)
            .send()
            .await
            .map_err(|e| provider_error(self.kind(), what, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            debug!(provider = %self.kind(), %status, body = %body, "token endpoint rejected request");
            return Err(provider_error(self.kind(), what, format!("HTTP {status}")));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| provider_error(self.kind(), what, e))?;
        // GitHub reports failures as 200 with an `error` field.
        if let Some(err) = body.get("error").and_then(|v| v.as_str()) {
            return Err(provider_error(self.kind(), what, err));
        }
        serde_json::from_value(body).map_err(|e| provider_error(self.kind(), what, e))
    }

    /// GET a JSON document with a bearer token.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        access_token: &str,
    ) -> Result<T, AuthError> {
        let resp = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| provider_error(self.kind(), "user info", e))?;
        if !resp.status().is_success() {
            return Err(provider_error(
                self.kind(),
                "user info",
                format!("HTTP {}", resp.status()),
            ));
        }
        resp.json::<T>()
            .await
            .map_err(|e| provider_error(self.kind(), "user info", e))
    }

    /// RFC 7009 revocation by form post. No-op without an endpoint.
    pub async fn revoke(&self, token: &str) -> Result<(), AuthError> {
        let Some(endpoint) = &self.endpoints.revoke else {
            debug!(provider = %self.kind(), "provider has no revocation endpoint");
            return Ok(());
        };
        let resp = self
            .http
            .post(endpoint)
            .form(&[("token", token)])
            .send()
            .await
            .map_err(|e| provider_error(self.kind(), "revoke", e))?;
        if !resp.status().is_success() {
            return Err(provider_error(
                self.kind(),
                "revoke",
                format!("HTTP {}", resp.status()),
            ));
        }
        Ok(())
    }
}
