//! Post-login redirect validation.

use url::Url;

use crate::auth::AuthError;

const DEFAULT_PATH: &str = "/admin";

/// Accepts same-origin relative paths and absolute URLs on allow-listed
/// origins. Everything else is [`AuthError::RedirectNotAllowed`].
#[derive(Debug, Clone)]
pub struct RedirectPolicy {
    frontend: Url,
    allowed_origins: Vec<url::Origin>,
}

impl RedirectPolicy {
    pub fn new<I, S>(frontend_url: &str, allowed_origins: I) -> Result<Self, AuthError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let frontend = Url::parse(frontend_url)
            .map_err(|e| AuthError::Internal(format!("frontend url: {e}")))?;
        let mut origins = vec![frontend.origin()];
        for raw in allowed_origins {
            let raw = raw.as_ref().trim();
            if raw.is_empty() {
                continue;
            }
            let parsed =
                Url::parse(raw).map_err(|e| AuthError::Internal(format!("redirect origin {raw}: {e}")))?;
            origins.push(parsed.origin());
        }
        Ok(Self {
            frontend,
            allowed_origins: origins,
        })
    }

    pub fn frontend(&self) -> &Url {
        &self.frontend
    }

    /// Resolve `target` to an absolute URL the flow may bounce to.
    pub fn validate(&self, target: Option<&str>) -> Result<Url, AuthError> {
        let target = target.map(str::trim).filter(|t| !t.is_empty()).unwrap_or(DEFAULT_PATH);
        if target.chars().any(|c| c.is_control() || c == '\\') {
            return Err(AuthError::RedirectNotAllowed);
        }

        let resolved = if target.starts_with('/') {
            // Scheme-relative `//host` would leave the origin.
            if target.starts_with("//") {
                return Err(AuthError::RedirectNotAllowed);
            }
            self.frontend
                .join(target)
                .map_err(|_| AuthError::RedirectNotAllowed)?
        } else {
            Url::parse(target).map_err(|_| AuthError::RedirectNotAllowed)?
        };

        if !matches!(resolved.scheme(), "http" | "https") {
            return Err(AuthError::RedirectNotAllowed);
        }
        if !self.allowed_origins.contains(&resolved.origin()) {
            return Err(AuthError::RedirectNotAllowed);
        }
        Ok(resolved)
    }
}
