//! Admin login, MFA and first-admin setup handlers.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use folio_core::auth::admin::AdminLoginOutcome;
use folio_core::models::auth::Role;
use tracing::info;
use uuid::Uuid;

use super::{limited, limited_until};
use crate::AppState;
use crate::error::AppResult;
use crate::middleware::auth::{AuthenticatedUser, ClientIp};
use crate::models::{
    AdminLoginRequest, AdminLoginResponse, CompleteSetupRequest, MfaCodeRequest,
    MfaEnrollmentResponse, MfaVerifyRequest, PasswordConfirmRequest, SetupRequest,
    SetupRequestResponse, SetupStatusResponse, StatusResponse, TokenResponse, UserResponse,
};

/// `POST /admin/login`: password step; may answer with an MFA challenge.
pub async fn admin_login_handler(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(body): Json<AdminLoginRequest>,
) -> AppResult<Json<AdminLoginResponse>> {
    let outcome = limited_until(
        &state,
        ip,
        state.admin.login(&body.email, &body.password),
        |outcome| matches!(outcome, AdminLoginOutcome::Authenticated(_)),
    )
    .await?;
    Ok(Json(match outcome {
        AdminLoginOutcome::Authenticated(session) => {
            AdminLoginResponse::Authenticated(session.into())
        }
        AdminLoginOutcome::MfaRequired {
            mfa_token,
            expires_in,
        } => AdminLoginResponse::MfaRequired {
            mfa_required: true,
            mfa_token,
            expires_in,
        },
    }))
}

/// `POST /admin/mfa/verify`: second factor, TOTP or backup code.
pub async fn mfa_verify_handler(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(body): Json<MfaVerifyRequest>,
) -> AppResult<Json<TokenResponse>> {
    let session = limited(
        &state,
        ip,
        state
            .admin
            .verify_mfa_and_login(&body.mfa_token, &body.code, body.is_backup_code),
    )
    .await?;
    Ok(Json(session.into()))
}

/// `GET /admin/setup/status`
pub async fn setup_status_handler(
    State(state): State<AppState>,
    user: Option<AuthenticatedUser>,
) -> AppResult<Json<SetupStatusResponse>> {
    let status = state.admin.setup_status().await?;
    let is_admin = user.is_some_and(|u| u.role() == Role::Admin);
    Ok(Json(SetupStatusResponse::new(status, is_admin)))
}

/// `POST /admin/setup/request`: issue a one-time token to an allow-listed email.
pub async fn setup_request_handler(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(body): Json<SetupRequest>,
) -> AppResult<Json<SetupRequestResponse>> {
    let ttl = limited_until(&state, ip, state.admin.request_setup(&body.email), |_| false).await?;
    Ok(Json(SetupRequestResponse {
        sent: true,
        expires_in: ttl.as_secs(),
    }))
}

/// `POST /admin/setup/complete`: create the first admin account.
pub async fn setup_complete_handler(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(body): Json<CompleteSetupRequest>,
) -> AppResult<(StatusCode, Json<UserResponse>)> {
    let user = limited(
        &state,
        ip,
        state.admin.complete_setup(
            &body.email,
            &body.password,
            &body.confirm_password,
            &body.setup_token,
        ),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(UserResponse::from(&user))))
}

/// `POST /admin/mfa/enroll`: secret, otpauth URI and backup codes, shown once.
pub async fn mfa_enroll_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<MfaEnrollmentResponse>> {
    let enrollment = state.admin.begin_mfa_enrollment(user.user_id()?).await?;
    Ok(Json(enrollment.into()))
}

/// `POST /admin/mfa/confirm`: first valid code turns MFA on.
pub async fn mfa_confirm_handler(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    user: AuthenticatedUser,
    Json(body): Json<MfaCodeRequest>,
) -> AppResult<Json<StatusResponse>> {
    let user_id = user.user_id()?;
    limited(
        &state,
        ip,
        state.admin.confirm_mfa_enrollment(user_id, &body.code),
    )
    .await?;
    Ok(Json(StatusResponse::ok()))
}

/// `POST /admin/mfa/disable`: requires the current password.
pub async fn mfa_disable_handler(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    user: AuthenticatedUser,
    Json(body): Json<PasswordConfirmRequest>,
) -> AppResult<Json<StatusResponse>> {
    let user_id = user.user_id()?;
    limited(&state, ip, state.admin.disable_mfa(user_id, &body.password)).await?;
    Ok(Json(StatusResponse::ok()))
}

/// `POST /admin/users/{id}/deactivate`: disable an account and end its sessions.
pub async fn deactivate_user_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<StatusResponse>> {
    state.credentials.deactivate(id).await?;
    info!(target: "audit", admin = %user.0.sub, user_id = %id, "user deactivated");
    Ok(Json(StatusResponse::ok()))
}
