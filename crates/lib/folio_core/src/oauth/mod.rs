//! OAuth2 federated sign-in for admins.
//!
//! Provider adapters share [`provider::OAuthClient`] for the authorization
//! code plumbing; [`flow::OAuthFlow`] ties them to state storage, redirect
//! validation and local user provisioning.

pub mod flow;
pub mod github;
pub mod google;
pub mod microsoft;
pub mod pkce;
pub mod provider;
pub mod redirect;
pub mod state;

use std::sync::Arc;

pub use flow::{CallbackParams, OAuthFlow, OAuthLogin, OAuthStart};
pub use provider::OAuthProvider;
pub use redirect::RedirectPolicy;
pub use state::OAuthStateStore;

use crate::auth::AuthError;
use crate::config::OAuthConfig;
use crate::models::oauth::ProviderKind;

/// Scopes requested when a registration does not name any.
pub fn default_scopes(kind: ProviderKind) -> Vec<String> {
    let scopes: &[&str] = match kind {
        ProviderKind::Google => &google::DEFAULT_SCOPES,
        ProviderKind::GitHub => &github::DEFAULT_SCOPES,
        ProviderKind::Microsoft => &microsoft::DEFAULT_SCOPES,
    };
    scopes.iter().map(|s| s.to_string()).collect()
}

/// Instantiate an adapter for every configured provider.
pub fn build_providers(config: &OAuthConfig) -> Result<Vec<Arc<dyn OAuthProvider>>, AuthError> {
    let mut providers: Vec<Arc<dyn OAuthProvider>> = Vec::new();
    for registration in &config.providers {
        let mut registration = registration.clone();
        if registration.scopes.is_empty() {
            registration.scopes = default_scopes(registration.kind);
        }
        let provider: Arc<dyn OAuthProvider> = match registration.kind {
            ProviderKind::Google => Arc::new(google::GoogleProvider::new(registration)?),
            ProviderKind::GitHub => Arc::new(github::GitHubProvider::new(registration)?),
            ProviderKind::Microsoft => Arc::new(microsoft::MicrosoftProvider::new(registration)?),
        };
        providers.push(provider);
    }
    Ok(providers)
}
