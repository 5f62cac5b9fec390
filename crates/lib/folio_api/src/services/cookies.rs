//! Cookie binding an OAuth flow to the browser that started it.

use axum_extra::extract::cookie::{Cookie, SameSite};
use time::Duration;

/// Cookie name for the OAuth flow session id.
pub const OAUTH_SESSION_COOKIE: &str = "folio_oauth_session";

/// Scoped to the OAuth routes. `Lax` so it survives the top-level redirect
/// back from the provider.
pub fn oauth_session_cookie(session_id: &str, max_age_secs: i64, secure: bool) -> Cookie<'static> {
    Cookie::build((OAUTH_SESSION_COOKIE.to_string(), session_id.to_string()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/auth/admin/oauth".to_string())
        .max_age(Duration::seconds(max_age_secs))
        .build()
}

/// Expired cookie, sent once the callback has run.
pub fn clear_oauth_session_cookie(secure: bool) -> Cookie<'static> {
    Cookie::build((OAUTH_SESSION_COOKIE.to_string(), String::new()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/auth/admin/oauth".to_string())
        .max_age(Duration::ZERO)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_cookie_is_http_only_and_scoped() {
        let cookie = oauth_session_cookie("sid", 300, true);
        assert_eq!(cookie.value(), "sid");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.path(), Some("/auth/admin/oauth"));
        assert_eq!(cookie.max_age(), Some(Duration::seconds(300)));
    }

    #[test]
    fn clearing_cookie_expires_immediately() {
        let cookie = clear_oauth_session_cookie(false);
        assert_eq!(cookie.value(), "");
        assert_eq!(cookie.max_age(), Some(Duration::ZERO));
    }
}
