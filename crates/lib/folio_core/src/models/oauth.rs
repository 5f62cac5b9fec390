//! OAuth2 federation models.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Supported identity providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Google,
    GitHub,
    Microsoft,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::Google,
        ProviderKind::GitHub,
        ProviderKind::Microsoft,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Google => "google",
            ProviderKind::GitHub => "github",
            ProviderKind::Microsoft => "microsoft",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "google" => Ok(ProviderKind::Google),
            "github" => Ok(ProviderKind::GitHub),
            "microsoft" => Ok(ProviderKind::Microsoft),
            other => Err(format!("unsupported OAuth provider: {other}")),
        }
    }
}

/// Pending OAuth state stored between initiate and callback. Consumed once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthState {
    pub state: String,
    pub nonce: String,
    pub pkce_verifier: Option<String>,
    pub provider: ProviderKind,
    /// Validated post-login redirect target.
    pub redirect_to: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
}

/// Authorization URL plus the PKCE verifier that must be kept for the exchange.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub pkce_verifier: Option<String>,
}

/// Tokens returned by a provider's token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderTokens {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Normalized user profile fetched from a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderUserInfo {
    pub provider_user_id: String,
    pub email: String,
    pub email_verified: bool,
    pub name: Option<String>,
    pub picture: Option<String>,
}

/// Provider tokens persisted (encrypted) per (user, provider).
#[derive(Debug, Clone)]
pub struct OAuthTokenRecord {
    pub user_id: Uuid,
    pub provider: ProviderKind,
    pub access_token_enc: String,
    pub refresh_token_enc: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scope: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_kind_parses_case_insensitively() {
        assert_eq!("GitHub".parse::<ProviderKind>().unwrap(), ProviderKind::GitHub);
        assert_eq!("google".parse::<ProviderKind>().unwrap(), ProviderKind::Google);
        assert!("gitlab".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn provider_tokens_accept_minimal_response() {
        let tokens: ProviderTokens =
            serde_json::from_str(r#"{"access_token":"gho_abc","token_type":"bearer"}"#).unwrap();
        assert_eq!(tokens.access_token, "gho_abc");
        assert!(tokens.refresh_token.is_none());
    }
}
