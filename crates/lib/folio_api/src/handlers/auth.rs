//! Account and session request handlers.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use folio_core::auth::credentials::Registration;

use super::limited;
use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::{AuthenticatedUser, ClientIp};
use crate::models::{
    ChangePasswordRequest, LoginRequest, LogoutRequest, LogoutResponse, RefreshRequest,
    RegisterRequest, StatusResponse, TokenResponse, UserResponse, ValidateResponse,
};

/// `POST /auth/register`: create an account. Does not log in.
pub async fn register_handler(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<UserResponse>)> {
    let user = state
        .credentials
        .register(Registration {
            email: body.email,
            username: body.username,
            password: body.password,
            full_name: body.full_name,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(UserResponse::from(&user))))
}

/// `POST /auth/login`: email or username plus password.
pub async fn login_handler(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(body): Json<LoginRequest>,
) -> AppResult<Json<TokenResponse>> {
    let session = limited(
        &state,
        ip,
        state.credentials.login(&body.identifier, &body.password),
    )
    .await?;
    Ok(Json(session.into()))
}

/// `POST /auth/refresh`: exchange a refresh token for a new pair.
pub async fn refresh_handler(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(body): Json<RefreshRequest>,
) -> AppResult<Json<TokenResponse>> {
    let pair = limited(&state, ip, state.credentials.refresh(&body.refresh_token)).await?;
    Ok(Json(pair.into()))
}

/// `POST /auth/logout`: revoke the given refresh token, or with `all` and a
/// valid access token every session of the caller.
pub async fn logout_handler(
    State(state): State<AppState>,
    user: Option<AuthenticatedUser>,
    Json(body): Json<LogoutRequest>,
) -> AppResult<Json<LogoutResponse>> {
    if body.all {
        let user = user.ok_or_else(|| {
            AppError::unauthorized("missing_token", "Sign in to end every session")
        })?;
        let revoked = state.credentials.logout_all(user.user_id()?).await?;
        return Ok(Json(LogoutResponse { revoked }));
    }
    let token = body
        .refresh_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Validation("refreshToken is required".into()))?;
    state.credentials.logout(&token).await?;
    Ok(Json(LogoutResponse { revoked: 1 }))
}

/// `GET /auth/validate`: echo the verified claims.
pub async fn validate_handler(user: AuthenticatedUser) -> Json<ValidateResponse> {
    Json(ValidateResponse::from(&user.0))
}

/// `GET /auth/profile`
pub async fn profile_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<UserResponse>> {
    let profile = state.credentials.profile(user.user_id()?).await?;
    Ok(Json(UserResponse::from(&profile)))
}

/// `PUT /auth/password`: change password; signs out every other session.
pub async fn change_password_handler(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    user: AuthenticatedUser,
    Json(body): Json<ChangePasswordRequest>,
) -> AppResult<Json<StatusResponse>> {
    let user_id = user.user_id()?;
    limited(
        &state,
        ip,
        state
            .credentials
            .change_password(user_id, &body.current_password, &body.new_password),
    )
    .await?;
    Ok(Json(StatusResponse::ok()))
}
