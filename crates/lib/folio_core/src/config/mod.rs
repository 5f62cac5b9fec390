//! Auth configuration types and startup validation.
//!
//! Values are assembled by `folio_api::config::ApiConfig::from_env`; this
//! module only owns the shapes and the fail-fast checks.

use std::time::Duration;

use thiserror::Error;

use crate::models::oauth::ProviderKind;

/// Secrets shorter than this are refused in production.
pub const MIN_PRODUCTION_SECRET_LEN: usize = 32;

/// Configuration errors. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid setting {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Token signing settings.
#[derive(Clone, Debug)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub access_ttl_secs: i64,
    pub refresh_ttl_secs: i64,
}

/// One brute-force limiter instance.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    /// Failures that trip the block.
    pub max_attempts: u32,
    /// A failure older than this restarts the count.
    pub window: Duration,
    /// How long a tripped key stays blocked.
    pub block_duration: Duration,
    /// Period of the background sweep.
    pub sweep_interval: Duration,
}

impl RateLimitConfig {
    /// General per-IP limiter applied to protected routes.
    pub fn general() -> Self {
        Self {
            max_attempts: 10,
            window: Duration::from_secs(15 * 60),
            block_duration: Duration::from_secs(15 * 60),
            sweep_interval: Duration::from_secs(10 * 60),
        }
    }

    /// Stricter limiter for login, MFA and setup endpoints.
    pub fn auth() -> Self {
        Self {
            max_attempts: 5,
            window: Duration::from_secs(15 * 60),
            block_duration: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(10 * 60),
        }
    }
}

/// Admin allow-list and bootstrap settings.
#[derive(Clone, Debug, Default)]
pub struct AdminConfig {
    pub allowed_emails: Vec<String>,
    pub allowed_domains: Vec<String>,
    /// Pre-shared bootstrap token for the first admin account.
    pub setup_token: Option<String>,
    pub totp_issuer: String,
}

/// One OAuth2 provider registration.
#[derive(Clone, Debug)]
pub struct OAuthProviderConfig {
    pub kind: ProviderKind,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
    pub scopes: Vec<String>,
    /// Azure tenant for Microsoft; ignored elsewhere.
    pub tenant: Option<String>,
}

/// OAuth2 federation settings.
#[derive(Clone, Debug, Default)]
pub struct OAuthConfig {
    pub providers: Vec<OAuthProviderConfig>,
    /// Origins allowed as absolute post-login redirect targets.
    pub allowed_redirect_origins: Vec<String>,
    /// Origin that relative redirect targets resolve against.
    pub frontend_url: String,
}

/// Everything the auth services need.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub production: bool,
    pub jwt: JwtConfig,
    pub encryption_key: String,
    pub bcrypt_cost: u32,
    pub admin: AdminConfig,
    pub oauth: OAuthConfig,
    pub rate_limit: RateLimitConfig,
    pub auth_rate_limit: RateLimitConfig,
}

impl AuthConfig {
    /// Startup checks. Any error here must stop the process.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt.secret.is_empty() {
            return Err(ConfigError::Missing("JWT_SECRET"));
        }
        if self.jwt.issuer.trim().is_empty() {
            return Err(ConfigError::Missing("JWT_ISSUER"));
        }
        if self.jwt.audience.trim().is_empty() {
            return Err(ConfigError::Missing("JWT_AUDIENCE"));
        }
        if self.encryption_key.is_empty() {
            return Err(ConfigError::Missing("ENCRYPTION_KEY"));
        }
        if self.production {
            if self.jwt.secret.len() < MIN_PRODUCTION_SECRET_LEN {
                return Err(ConfigError::Invalid {
                    name: "JWT_SECRET",
                    reason: format!("must be at least {MIN_PRODUCTION_SECRET_LEN} bytes"),
                });
            }
            if self.encryption_key.len() < MIN_PRODUCTION_SECRET_LEN {
                return Err(ConfigError::Invalid {
                    name: "ENCRYPTION_KEY",
                    reason: format!("must be at least {MIN_PRODUCTION_SECRET_LEN} bytes"),
                });
            }
        }
        for limiter in [&self.rate_limit, &self.auth_rate_limit] {
            if limiter.max_attempts == 0 {
                return Err(ConfigError::Invalid {
                    name: "RATE_LIMIT_MAX_ATTEMPTS",
                    reason: "must be greater than zero".into(),
                });
            }
        }
        for provider in &self.oauth.providers {
            if provider.client_secret.is_empty() {
                return Err(ConfigError::Invalid {
                    name: "OAUTH_CLIENT_SECRET",
                    reason: format!("{} has a client id but no secret", provider.kind),
                });
            }
            if url::Url::parse(&provider.redirect_url).is_err() {
                return Err(ConfigError::Invalid {
                    name: "OAUTH_REDIRECT_URL",
                    reason: format!("{} redirect URL is not absolute", provider.kind),
                });
            }
        }
        for origin in &self.oauth.allowed_redirect_origins {
            if url::Url::parse(origin).is_err() {
                return Err(ConfigError::Invalid {
                    name: "OAUTH_ALLOWED_REDIRECT_ORIGINS",
                    reason: format!("not a URL: {origin}"),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AuthConfig {
        AuthConfig {
            production: false,
            jwt: JwtConfig {
                secret: "dev".into(),
                issuer: "folio-auth".into(),
                audience: "folio".into(),
                access_ttl_secs: 900,
                refresh_ttl_secs: 604_800,
            },
            encryption_key: "dev-key".into(),
            bcrypt_cost: 4,
            admin: AdminConfig::default(),
            oauth: OAuthConfig::default(),
            rate_limit: RateLimitConfig::general(),
            auth_rate_limit: RateLimitConfig::auth(),
        }
    }

    #[test]
    fn development_accepts_short_secrets() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn production_rejects_short_secrets() {
        let mut cfg = config();
        cfg.production = true;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid { name: "JWT_SECRET", .. })
        ));
        cfg.jwt.secret = "x".repeat(32);
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid { name: "ENCRYPTION_KEY", .. })
        ));
        cfg.encryption_key = "y".repeat(32);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn missing_secret_is_fatal() {
        let mut cfg = config();
        cfg.jwt.secret.clear();
        assert!(matches!(cfg.validate(), Err(ConfigError::Missing("JWT_SECRET"))));
    }

    #[test]
    fn provider_without_secret_is_rejected() {
        let mut cfg = config();
        cfg.oauth.providers.push(OAuthProviderConfig {
            kind: ProviderKind::GitHub,
            client_id: "id".into(),
            client_secret: String::new(),
            redirect_url: "https://api.example.com/cb".into(),
            scopes: vec![],
            tenant: None,
        });
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn auth_limiter_is_stricter_than_general() {
        let general = RateLimitConfig::general();
        let auth = RateLimitConfig::auth();
        assert!(auth.max_attempts < general.max_attempts);
        assert!(auth.block_duration > general.block_duration);
    }
}
