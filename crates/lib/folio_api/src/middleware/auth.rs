//! Authentication middleware: bearer token extraction, JWT verification,
//! per-client lockout and role gates.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::extract::{ConnectInfo, FromRequestParts, OptionalFromRequestParts, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::{HeaderMap, Method};
use axum::middleware::Next;
use axum::response::Response;
use folio_core::auth::AuthError;
use folio_core::models::auth::{Role, TokenClaims};
use tracing::debug;
use uuid::Uuid;

use crate::AppState;
use crate::error::AppError;

/// Verified identity stored in request extensions.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub TokenClaims);

impl AuthenticatedUser {
    pub fn user_id(&self) -> Result<Uuid, AppError> {
        self.0
            .user_id()
            .ok_or_else(|| AppError::unauthorized("token_invalid", "Invalid token"))
    }

    pub fn role(&self) -> Role {
        self.0.role
    }
}

impl<S: Send + Sync> FromRequestParts<S> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or_else(|| AuthError::MissingToken.into())
    }
}

impl<S: Send + Sync> OptionalFromRequestParts<S> for AuthenticatedUser {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        Ok(parts.extensions.get::<AuthenticatedUser>().cloned())
    }
}

/// Client address. Proxy headers are honored only when trusted.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy_headers: bool) -> IpAddr {
    if trust_proxy_headers {
        let forwarded: Option<IpAddr> = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse().ok());
        let real = || {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<IpAddr>().ok())
        };
        if let Some(ip) = forwarded.or_else(real) {
            return ip;
        }
    }
    peer.map(|p| p.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// Client address as an extractor.
#[derive(Debug, Clone, Copy)]
pub struct ClientIp(pub IpAddr);

impl FromRequestParts<AppState> for ClientIp {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0);
        Ok(ClientIp(client_ip(
            &parts.headers,
            peer,
            state.config.trust_proxy_headers,
        )))
    }
}

pub(crate) fn request_ip(state: &AppState, request: &Request) -> IpAddr {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0);
    client_ip(request.headers(), peer, state.config.trust_proxy_headers)
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::MissingToken)?;
    let (scheme, token) = header.split_once(' ').ok_or(AuthError::MissingToken)?;
    if !scheme.eq_ignore_ascii_case("bearer") || token.trim().is_empty() {
        return Err(AuthError::MissingToken);
    }
    Ok(token.trim())
}

fn is_public(state: &AppState, request: &Request) -> bool {
    request.method() == Method::OPTIONS
        || state
            .config
            .public_paths
            .iter()
            .any(|p| p == request.uri().path())
}

/// Require a valid access token.
///
/// Blocked clients get 429 before the token is looked at. A bad or missing
/// token counts as a failure for the client address; a good one clears it.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if is_public(&state, &request) {
        return Ok(next.run(request).await);
    }

    let key = request_ip(&state, &request).to_string();
    state.rate_limiter.check(&key).await?;

    let verified = bearer_token(request.headers())
        .and_then(|token| state.credentials.sessions().verify(token));
    let claims = match verified {
        Ok(claims) => claims,
        Err(e) => {
            debug!(ip = %key, error = %e, "rejected bearer token");
            state.rate_limiter.record_failure(&key).await;
            return Err(e.into());
        }
    };

    state.rate_limiter.reset(&key).await;
    request.extensions_mut().insert(AuthenticatedUser(claims));
    Ok(next.run(request).await)
}

/// Attach the identity when a valid token is present; never reject.
pub async fn optional_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    if let Ok(claims) =
        bearer_token(request.headers()).and_then(|token| state.credentials.sessions().verify(token))
    {
        request.extensions_mut().insert(AuthenticatedUser(claims));
    }
    next.run(request).await
}

/// Reject with 403 unless the authenticated role is one of `roles`.
///
/// Layer inside [`require_auth`]:
/// `from_fn_with_state(&[Role::Admin][..], require_roles)`.
pub async fn require_roles(
    State(roles): State<&'static [Role]>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    check_roles(&request, roles)?;
    Ok(next.run(request).await)
}

/// [`require_roles`] for admins only.
pub async fn require_admin(request: Request, next: Next) -> Result<Response, AppError> {
    check_roles(&request, &[Role::Admin])?;
    Ok(next.run(request).await)
}

fn check_roles(request: &Request, roles: &[Role]) -> Result<(), AppError> {
    if request.method() == Method::OPTIONS {
        return Ok(());
    }
    let user = request
        .extensions()
        .get::<AuthenticatedUser>()
        .ok_or(AuthError::MissingToken)?;
    if !roles.contains(&user.role()) {
        debug!(sub = %user.0.sub, role = %user.role(), "role gate rejected request");
        return Err(AuthError::Forbidden.into());
    }
    Ok(())
}
