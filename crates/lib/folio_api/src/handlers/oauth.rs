//! OAuth2 admin sign-in handlers.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::cookie::CookieJar;
use folio_core::auth::AuthError;
use folio_core::models::oauth::ProviderKind;
use folio_core::oauth::CallbackParams;
use folio_core::oauth::state::STATE_TTL;
use tracing::warn;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthenticatedUser;
use crate::models::{
    OAuthCallbackQuery, OAuthInitiateQuery, OAuthProvidersResponse, StatusResponse,
};
use crate::services::cookies::{
    OAUTH_SESSION_COOKIE, clear_oauth_session_cookie, oauth_session_cookie,
};

fn provider_kind(raw: &str) -> Result<ProviderKind, AppError> {
    raw.parse::<ProviderKind>().map_err(AppError::NotFound)
}

/// `GET /auth/admin/oauth/providers`
pub async fn providers_handler(State(state): State<AppState>) -> Json<OAuthProvidersResponse> {
    Json(OAuthProvidersResponse {
        providers: state
            .oauth
            .providers()
            .into_iter()
            .map(|k| k.as_str().to_string())
            .collect(),
    })
}

/// `GET /auth/admin/oauth/{provider}`: bind the flow to this browser and
/// send it to the provider consent page.
pub async fn initiate_handler(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<OAuthInitiateQuery>,
    jar: CookieJar,
) -> AppResult<(CookieJar, Redirect)> {
    let kind = provider_kind(&provider)?;
    let start = state
        .oauth
        .initiate(kind, query.redirect_to.as_deref())
        .await?;
    let cookie = oauth_session_cookie(
        &start.session_id,
        STATE_TTL.as_secs() as i64,
        state.config.secure_cookies,
    );
    Ok((
        jar.add(cookie),
        Redirect::to(start.authorization_url.as_str()),
    ))
}

/// `GET /auth/admin/oauth/callback/{provider}`
///
/// Always answers with a redirect to the frontend: tokens in the fragment on
/// success, `error=<code>` on the login page otherwise.
pub async fn callback_handler(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<OAuthCallbackQuery>,
    jar: CookieJar,
) -> Response {
    let session_id = jar.get(OAUTH_SESSION_COOKIE).map(|c| c.value().to_string());
    let jar = jar.add(clear_oauth_session_cookie(state.config.secure_cookies));

    let params = CallbackParams {
        code: query.code,
        state: query.state,
        error: query.error,
        error_description: query.error_description,
    };
    let result = match provider.parse::<ProviderKind>() {
        Ok(kind) => state.oauth.callback(kind, params, session_id.as_deref()).await,
        Err(e) => Err(AuthError::OAuthProvider(e)),
    };

    let target = match result {
        Ok(login) => login.redirect_url(),
        Err(e) => {
            warn!(provider = %provider, error = %e, "oauth callback failed");
            state.oauth.error_redirect(&e)
        }
    };
    (jar, Redirect::to(&target)).into_response()
}

/// `DELETE /auth/admin/oauth/{provider}/link`: revoke and forget stored tokens.
pub async fn unlink_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(provider): Path<String>,
) -> AppResult<StatusCode> {
    let kind = provider_kind(&provider)?;
    if state.oauth.unlink(user.user_id()?, kind).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("{kind} is not linked")))
    }
}

/// `POST /auth/admin/oauth/{provider}/refresh`: refresh stored provider tokens.
pub async fn refresh_provider_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(provider): Path<String>,
) -> AppResult<Json<StatusResponse>> {
    let kind = provider_kind(&provider)?;
    state
        .oauth
        .refresh_provider_tokens(user.user_id()?, kind)
        .await?;
    Ok(Json(StatusResponse::ok()))
}
