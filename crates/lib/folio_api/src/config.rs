//! API server configuration.

use std::str::FromStr;
use std::time::Duration;

use folio_core::config::{
    AdminConfig, AuthConfig, ConfigError, JwtConfig, OAuthConfig, OAuthProviderConfig,
    RateLimitConfig,
};
use folio_core::models::oauth::ProviderKind;

const DEV_JWT_SECRET: &str = "folio-development-jwt-secret-change-me";
const DEV_ENCRYPTION_KEY: &str = "folio-development-encryption-key-change-me";

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Address to bind the HTTP listener (e.g. "127.0.0.1:8080").
    pub bind_addr: String,
    /// Everything the auth services need.
    pub auth: AuthConfig,
    /// Paths that bypass the bearer-token middleware.
    pub public_paths: Vec<String>,
    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`.
    pub trust_proxy_headers: bool,
    /// Origins allowed by CORS. Empty means any.
    pub cors_origins: Vec<String>,
    /// Upper bound for handling one request.
    pub request_timeout: Duration,
    /// Mark cookies `Secure`.
    pub secure_cookies: bool,
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn list(name: &str) -> Vec<String> {
    var(name)
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn parsed<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn rate_limit(
    [attempts, window, block]: [&'static str; 3],
    defaults: RateLimitConfig,
) -> Result<RateLimitConfig, ConfigError> {
    Ok(RateLimitConfig {
        max_attempts: parsed(attempts, defaults.max_attempts)?,
        window: Duration::from_secs(parsed(window, defaults.window.as_secs())?),
        block_duration: Duration::from_secs(parsed(block, defaults.block_duration.as_secs())?),
        sweep_interval: defaults.sweep_interval,
    })
}

fn provider(kind: ProviderKind) -> Option<OAuthProviderConfig> {
    let prefix = format!("OAUTH_{}", kind.as_str().to_ascii_uppercase());
    let client_id = var(&format!("{prefix}_CLIENT_ID"))?;
    Some(OAuthProviderConfig {
        kind,
        client_id,
        client_secret: var(&format!("{prefix}_CLIENT_SECRET")).unwrap_or_default(),
        redirect_url: var(&format!("{prefix}_REDIRECT_URL")).unwrap_or_else(|| {
            format!("http://localhost:8080/auth/admin/oauth/callback/{kind}")
        }),
        scopes: var(&format!("{prefix}_SCOPES"))
            .map(|s| {
                s.split([',', ' '])
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        tenant: var(&format!("{prefix}_TENANT")),
    })
}

impl ApiConfig {
    /// Reads configuration from environment variables with development defaults.
    ///
    /// | Variable                         | Default                      |
    /// |----------------------------------|------------------------------|
    /// | `FOLIO_ENV`                      | `development`                |
    /// | `BIND_ADDR`                      | `127.0.0.1:8080`             |
    /// | `JWT_SECRET`                     | dev-only fallback            |
    /// | `JWT_ISSUER` / `JWT_AUDIENCE`    | `folio-auth` / `folio`       |
    /// | `ACCESS_TOKEN_TTL_SECS`          | `900`                        |
    /// | `REFRESH_TOKEN_TTL_SECS`         | `604800`                     |
    /// | `ENCRYPTION_KEY`                 | dev-only fallback            |
    /// | `BCRYPT_COST`                    | `10`                         |
    /// | `ADMIN_ALLOWED_EMAILS` / `_DOMAINS` | empty                     |
    /// | `ADMIN_SETUP_TOKEN`              | unset                        |
    /// | `OAUTH_<PROVIDER>_*`             | provider disabled            |
    /// | `OAUTH_ALLOWED_REDIRECT_ORIGINS` | empty                        |
    /// | `OAUTH_FRONTEND_URL`             | `http://localhost:3000`      |
    /// | `PUBLIC_PATHS`                   | empty                        |
    /// | `TRUST_PROXY_HEADERS`            | `false`                      |
    /// | `CORS_ALLOWED_ORIGINS`           | empty (any)                  |
    /// | `REQUEST_TIMEOUT_SECS`           | `30`                         |
    ///
    /// Production (`FOLIO_ENV=production`) requires `JWT_SECRET` and
    /// `ENCRYPTION_KEY` instead of falling back.
    pub fn from_env() -> Result<Self, ConfigError> {
        let production = var("FOLIO_ENV").is_some_and(|v| v.eq_ignore_ascii_case("production"));

        let secret_or_dev = |name: &'static str, dev: &str| match var(name) {
            Some(v) => Ok(v),
            None if production => Err(ConfigError::Missing(name)),
            None => {
                tracing::warn!(setting = name, "using development fallback secret");
                Ok(dev.to_string())
            }
        };

        let auth = AuthConfig {
            production,
            jwt: JwtConfig {
                secret: secret_or_dev("JWT_SECRET", DEV_JWT_SECRET)?,
                issuer: var("JWT_ISSUER").unwrap_or_else(|| "folio-auth".into()),
                audience: var("JWT_AUDIENCE").unwrap_or_else(|| "folio".into()),
                access_ttl_secs: parsed("ACCESS_TOKEN_TTL_SECS", 900)?,
                refresh_ttl_secs: parsed("REFRESH_TOKEN_TTL_SECS", 604_800)?,
            },
            encryption_key: secret_or_dev("ENCRYPTION_KEY", DEV_ENCRYPTION_KEY)?,
            bcrypt_cost: parsed("BCRYPT_COST", folio_core::auth::password::BCRYPT_COST)?,
            admin: AdminConfig {
                allowed_emails: list("ADMIN_ALLOWED_EMAILS"),
                allowed_domains: list("ADMIN_ALLOWED_DOMAINS"),
                setup_token: var("ADMIN_SETUP_TOKEN"),
                totp_issuer: var("TOTP_ISSUER").unwrap_or_else(|| "Folio".into()),
            },
            oauth: OAuthConfig {
                providers: ProviderKind::ALL.into_iter().filter_map(provider).collect(),
                allowed_redirect_origins: list("OAUTH_ALLOWED_REDIRECT_ORIGINS"),
                frontend_url: var("OAUTH_FRONTEND_URL")
                    .unwrap_or_else(|| "http://localhost:3000".into()),
            },
            rate_limit: rate_limit(
                [
                    "RATE_LIMIT_MAX_ATTEMPTS",
                    "RATE_LIMIT_WINDOW_SECS",
                    "RATE_LIMIT_BLOCK_SECS",
                ],
                RateLimitConfig::general(),
            )?,
            auth_rate_limit: rate_limit(
                [
                    "AUTH_RATE_LIMIT_MAX_ATTEMPTS",
                    "AUTH_RATE_LIMIT_WINDOW_SECS",
                    "AUTH_RATE_LIMIT_BLOCK_SECS",
                ],
                RateLimitConfig::auth(),
            )?,
        };

        let config = Self {
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| "127.0.0.1:8080".into()),
            auth,
            public_paths: list("PUBLIC_PATHS"),
            trust_proxy_headers: parsed("TRUST_PROXY_HEADERS", false)?,
            cors_origins: list("CORS_ALLOWED_ORIGINS"),
            request_timeout: Duration::from_secs(parsed("REQUEST_TIMEOUT_SECS", 30)?),
            secure_cookies: production,
        };
        config.validate()?;
        Ok(config)
    }

    /// Startup checks on top of [`AuthConfig::validate`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.auth.validate()?;
        if url::Url::parse(&self.auth.oauth.frontend_url).is_err() {
            return Err(ConfigError::Invalid {
                name: "OAUTH_FRONTEND_URL",
                reason: "not an absolute URL".into(),
            });
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                name: "REQUEST_TIMEOUT_SECS",
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }

    /// Development configuration with fixed secrets, used by tests.
    pub fn for_tests() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".into(),
            auth: AuthConfig {
                production: false,
                jwt: JwtConfig {
                    secret: "test-secret-that-is-at-least-32-bytes".into(),
                    issuer: "folio-auth".into(),
                    audience: "folio".into(),
                    access_ttl_secs: 900,
                    refresh_ttl_secs: 604_800,
                },
                encryption_key: "test-encryption-key".into(),
                bcrypt_cost: 4,
                admin: AdminConfig {
                    allowed_emails: vec!["owner@example.com".into()],
                    allowed_domains: vec!["@folio.dev".into()],
                    setup_token: Some("test-setup-token".into()),
                    totp_issuer: "Folio".into(),
                },
                oauth: OAuthConfig {
                    providers: Vec::new(),
                    allowed_redirect_origins: Vec::new(),
                    frontend_url: "http://localhost:3000".into(),
                },
                rate_limit: RateLimitConfig::general(),
                auth_rate_limit: RateLimitConfig::auth(),
            },
            public_paths: Vec::new(),
            trust_proxy_headers: true,
            cors_origins: Vec::new(),
            request_timeout: Duration::from_secs(30),
            secure_cookies: false,
        }
    }
}
