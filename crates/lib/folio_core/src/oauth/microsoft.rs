//! Microsoft identity platform (Entra ID) adapter.

use async_trait::async_trait;
use serde::Deserialize;

use super::provider::{Endpoints, OAuthClient, OAuthProvider, provider_error};
use crate::auth::AuthError;
use crate::config::OAuthProviderConfig;
use crate::models::oauth::{AuthorizationRequest, ProviderKind, ProviderTokens, ProviderUserInfo};

const LOGIN_BASE: &str = "https://login.microsoftonline.com";
const GRAPH_ME_URL: &str = "https://graph.microsoft.com/v1.0/me";
const DEFAULT_TENANT: &str = "common";

pub const DEFAULT_SCOPES: [&str; 5] = ["openid", "email", "profile", "offline_access", "User.Read"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphUser {
    id: String,
    display_name: Option<String>,
    mail: Option<String>,
    user_principal_name: Option<String>,
}

/// `mail` is directory-managed and treated as verified. A bare user
/// principal name is not.
fn to_user_info(user: GraphUser) -> Result<ProviderUserInfo, AuthError> {
    let (email, email_verified) = match (user.mail, user.user_principal_name) {
        (Some(mail), _) => (mail, true),
        (None, Some(upn)) if upn.contains('@') => (upn, false),
        _ => {
            return Err(provider_error(
                ProviderKind::Microsoft,
                "user info",
                "account has no email",
            ));
        }
    };
    Ok(ProviderUserInfo {
        provider_user_id: user.id,
        email,
        email_verified,
        name: user.display_name,
        picture: None,
    })
}

pub struct MicrosoftProvider {
    client: OAuthClient,
}

impl MicrosoftProvider {
    pub fn new(config: OAuthProviderConfig) -> Result<Self, AuthError> {
        let tenant = config
            .tenant
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_TENANT.to_string());
        let endpoints = Endpoints {
            authorize: format!("{LOGIN_BASE}/{tenant}/oauth2/v2.0/authorize"),
            token: format!("{LOGIN_BASE}/{tenant}/oauth2/v2.0/token"),
            user_info: GRAPH_ME_URL.into(),
            revoke: None,
        };
        Ok(Self {
            client: OAuthClient::new(config, endpoints, true)?,
        })
    }
}

#[async_trait]
impl OAuthProvider for MicrosoftProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Microsoft
    }

    fn authorization_url(&self, state: &str, nonce: &str) -> Result<AuthorizationRequest, AuthError> {
        self.client
            .authorization_url(state, nonce, &[("response_mode", "query")])
    }

    async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: Option<&str>,
    ) -> Result<ProviderTokens, AuthError> {
        self.client.exchange_code(code, pkce_verifier).await
    }

    async fn user_info(&self, access_token: &str) -> Result<ProviderUserInfo, AuthError> {
        let user: GraphUser = self
            .client
            .get_json(&self.client.endpoints.user_info, access_token)
            .await?;
        to_user_info(user)
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<ProviderTokens, AuthError> {
        self.client.refresh(refresh_token).await
    }

    /// The platform has no token revocation endpoint.
    async fn revoke_token(&self, token: &str) -> Result<(), AuthError> {
        self.client.revoke(token).await
    }
}
