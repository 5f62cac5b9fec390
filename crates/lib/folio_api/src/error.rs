//! Application error types.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use folio_core::auth::AuthError;
use thiserror::Error;
use tracing::error;

use crate::models::ErrorResponse;

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level errors with HTTP status mapping.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// 401 with a stable machine code.
    #[error("Unauthorized: {message}")]
    Unauthorized { code: &'static str, message: String },

    #[error("Forbidden: {message}")]
    Forbidden { code: &'static str, message: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Too many requests")]
    RateLimited { retry_after_secs: u64 },

    #[error("Bad gateway: {0}")]
    BadGateway(String),

    #[error("Internal server error")]
    Internal(String),
}

impl AppError {
    pub fn unauthorized(code: &'static str, message: impl Into<String>) -> Self {
        AppError::Unauthorized {
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Validation(m) => (StatusCode::BAD_REQUEST, "validation_error", m.clone()),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m.clone()),
            AppError::Unauthorized { code, message } => {
                (StatusCode::UNAUTHORIZED, *code, message.clone())
            }
            AppError::Forbidden { code, message } => (StatusCode::FORBIDDEN, *code, message.clone()),
            AppError::Conflict(m) => (StatusCode::CONFLICT, "already_exists", m.clone()),
            AppError::RateLimited { retry_after_secs } => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                format!("Too many attempts; retry in {retry_after_secs}s"),
            ),
            AppError::BadGateway(m) => (StatusCode::BAD_GATEWAY, "oauth_provider_error", m.clone()),
            AppError::Internal(detail) => {
                error!(detail = %detail, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error".to_string(),
                )
            }
        };
        let body = Json(ErrorResponse {
            error: code.to_string(),
            message,
        });
        let mut response = (status, body).into_response();
        if let AppError::RateLimited { retry_after_secs } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        let code = e.code();
        match e {
            AuthError::InvalidCredentials
            | AuthError::AccountDeactivated
            | AuthError::Token(_)
            | AuthError::MissingToken
            | AuthError::RefreshTokenInvalid
            | AuthError::MfaRequired
            | AuthError::MfaInvalid
            | AuthError::SetupTokenInvalid
            | AuthError::OAuthStateInvalid => {
                // Token detail stays in logs; callers only see the category.
                let message = match &e {
                    AuthError::Token(_) if code == "token_expired" => "Token expired".to_string(),
                    AuthError::Token(_) => "Invalid token".to_string(),
                    other => other.to_string(),
                };
                AppError::Unauthorized { code, message }
            }
            AuthError::EmailNotAuthorized
            | AuthError::Forbidden
            | AuthError::SetupDisabled
            | AuthError::RedirectNotAllowed => AppError::Forbidden {
                code,
                message: e.to_string(),
            },
            AuthError::AlreadyExists(_) => AppError::Conflict(e.to_string()),
            AuthError::WeakPassword(_) | AuthError::Validation(_) => {
                AppError::Validation(e.to_string())
            }
            AuthError::RateLimited { retry_after_secs } => {
                AppError::RateLimited { retry_after_secs }
            }
            AuthError::OAuthProvider(detail) => {
                tracing::warn!(detail = %detail, "oauth provider failure");
                AppError::BadGateway("OAuth provider error".into())
            }
            AuthError::Repository(_) | AuthError::Cache(_) | AuthError::Internal(_) => {
                AppError::Internal(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::auth::TokenError;
    use folio_core::repository::RepositoryError;

    #[test]
    fn rate_limited_carries_retry_after() {
        let resp = AppError::from(AuthError::RateLimited {
            retry_after_secs: 1800,
        })
        .into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers()[RETRY_AFTER], "1800");
    }

    #[test]
    fn statuses_follow_the_taxonomy() {
        let cases = [
            (AuthError::InvalidCredentials, StatusCode::UNAUTHORIZED),
            (AuthError::Token(TokenError::Expired), StatusCode::UNAUTHORIZED),
            (AuthError::EmailNotAuthorized, StatusCode::FORBIDDEN),
            (AuthError::AlreadyExists("email".into()), StatusCode::CONFLICT),
            (AuthError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (
                AuthError::Repository(RepositoryError::Backend("pg down".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn backend_detail_is_not_echoed() {
        let err = AppError::from(AuthError::Repository(RepositoryError::Backend(
            "password authentication failed for user postgres".into(),
        )));
        let AppError::Internal(detail) = &err else {
            panic!("expected internal error");
        };
        assert!(detail.contains("postgres"));
        assert_eq!(err.to_string(), "Internal server error");
    }
}
