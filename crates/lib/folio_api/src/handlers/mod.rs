//! Request handlers.

pub mod admin;
pub mod auth;
pub mod health;
pub mod oauth;

use std::future::Future;
use std::net::IpAddr;

use folio_core::auth::AuthError;
use folio_core::auth::rate_limit::auth_key;

use crate::AppState;
use crate::error::AppResult;

/// Run an authentication step behind the strict per-IP limiter.
///
/// A blocked client is refused before `op` runs, so even correct credentials
/// get 429 until the block elapses. Credential failures count against the
/// client; success clears its record.
pub(crate) async fn limited<T, F>(state: &AppState, ip: IpAddr, op: F) -> AppResult<T>
where
    F: Future<Output = Result<T, AuthError>>,
{
    limited_until(state, ip, op, |_| true).await
}

/// Like [`limited`], but the client's record is only cleared when
/// `authenticated` holds for the result. Intermediate steps such as a
/// password accepted pending MFA leave earlier failures in place.
pub(crate) async fn limited_until<T, F, P>(
    state: &AppState,
    ip: IpAddr,
    op: F,
    authenticated: P,
) -> AppResult<T>
where
    F: Future<Output = Result<T, AuthError>>,
    P: FnOnce(&T) -> bool,
{
    let key = auth_key(ip);
    state.auth_rate_limiter.check(&key).await?;
    match op.await {
        Ok(value) => {
            if authenticated(&value) {
                state.auth_rate_limiter.reset(&key).await;
            }
            Ok(value)
        }
        Err(e) => {
            if e.counts_as_failed_attempt() {
                state.auth_rate_limiter.record_failure(&key).await;
            }
            Err(e.into())
        }
    }
}
