//! # folio_api
//!
//! HTTP surface of the Folio auth service: routes, middleware and the
//! mapping from domain errors to JSON responses.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderValue, Method, header};
use axum::routing::{delete, get, post, put};
use folio_core::auth::AuthError;
use folio_core::auth::admin::{AdminAllowList, AdminAuthService};
use folio_core::auth::audit::Auditor;
use folio_core::auth::credentials::CredentialService;
use folio_core::auth::jwt::TokenCodec;
use folio_core::auth::password::PasswordPolicy;
use folio_core::auth::rate_limit::RateLimiter;
use folio_core::auth::refresh::RefreshTokenStore;
use folio_core::auth::session::SessionIssuer;
use folio_core::cache::Cache;
use folio_core::crypto::SecretBox;
use folio_core::oauth::{OAuthFlow, OAuthProvider, OAuthStateStore, RedirectPolicy, build_providers};
use folio_core::repository::{AuditLog, OAuthTokenRepository, UserRepository};
use sqlx::PgPool;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ApiConfig;
use crate::handlers::{admin, auth, health, oauth};
use crate::middleware::auth::{optional_auth, require_admin, require_auth};

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ApiConfig>,
    pub credentials: Arc<CredentialService>,
    pub admin: Arc<AdminAuthService>,
    pub oauth: Arc<OAuthFlow>,
    /// Per-IP limiter for bearer-token failures on protected routes.
    pub rate_limiter: Arc<RateLimiter>,
    /// Stricter per-IP limiter for login, MFA and setup.
    pub auth_rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    /// Wire the services over `store` and `cache`, with the OAuth providers
    /// named in the configuration.
    pub fn build<S>(config: ApiConfig, store: Arc<S>, cache: Arc<dyn Cache>) -> Result<Self, AuthError>
    where
        S: UserRepository + OAuthTokenRepository + AuditLog + 'static,
    {
        let providers = build_providers(&config.auth.oauth)?;
        Self::build_with_providers(config, store, cache, providers)
    }

    /// Like [`build`](Self::build) with explicit providers.
    pub fn build_with_providers<S>(
        config: ApiConfig,
        store: Arc<S>,
        cache: Arc<dyn Cache>,
        providers: Vec<Arc<dyn OAuthProvider>>,
    ) -> Result<Self, AuthError>
    where
        S: UserRepository + OAuthTokenRepository + AuditLog + 'static,
    {
        let auth = &config.auth;
        let codec = Arc::new(TokenCodec::from_config(&auth.jwt));
        let sessions = SessionIssuer::new(codec, RefreshTokenStore::new(cache.clone()));
        let credentials = Arc::new(CredentialService::new(
            store.clone(),
            Arc::new(PasswordPolicy::new(auth.bcrypt_cost)),
            sessions,
            Auditor::new(store.clone()),
        ));
        let secrets = SecretBox::new(&auth.encryption_key);

        let admin = AdminAuthService::new(
            credentials.clone(),
            &auth.admin,
            secrets.clone(),
            cache.clone(),
        );
        let allow_list = AdminAllowList::from_config(&auth.admin);
        if allow_list.is_empty() {
            warn!("admin allow-list is empty, admin sign-in is disabled");
        }

        let redirects = RedirectPolicy::new(
            &auth.oauth.frontend_url,
            &auth.oauth.allowed_redirect_origins,
        )?;
        let mut flow = OAuthFlow::new(
            credentials.clone(),
            allow_list,
            store,
            secrets,
            OAuthStateStore::new(cache),
            redirects,
        );
        for provider in providers {
            flow = flow.with_provider(provider);
        }
        info!(providers = ?flow.providers(), "oauth providers configured");

        Ok(Self {
            rate_limiter: Arc::new(RateLimiter::new("general", auth.rate_limit.clone())),
            auth_rate_limiter: Arc::new(RateLimiter::new("auth", auth.auth_rate_limit.clone())),
            credentials,
            admin: Arc::new(admin),
            oauth: Arc::new(flow),
            config: Arc::new(config),
        })
    }
}

/// Run embedded database migrations.
///
/// Delegates to `folio_core::migrate::migrate()` which owns the migration files.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    folio_core::migrate::migrate(pool).await
}

fn cors(config: &ApiConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .expose_headers([header::RETRY_AFTER]);
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer
            .allow_origin(AllowOrigin::list(origins))
            .allow_credentials(true)
    }
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/health", get(health::health_handler))
        .route("/auth/register", post(auth::register_handler))
        .route("/auth/login", post(auth::login_handler))
        .route("/auth/refresh", post(auth::refresh_handler))
        .route("/admin/login", post(admin::admin_login_handler))
        .route("/admin/mfa/verify", post(admin::mfa_verify_handler))
        .route("/admin/setup/request", post(admin::setup_request_handler))
        .route("/admin/setup/complete", post(admin::setup_complete_handler))
        .route("/auth/admin/oauth/providers", get(oauth::providers_handler))
        .route("/auth/admin/oauth/{provider}", get(oauth::initiate_handler))
        .route(
            "/auth/admin/oauth/callback/{provider}",
            get(oauth::callback_handler),
        );

    // Identity is attached when present but not required.
    let optional = Router::new()
        .route("/auth/logout", post(auth::logout_handler))
        .route("/admin/setup/status", get(admin::setup_status_handler))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            optional_auth,
        ));

    let protected = Router::new()
        .route("/auth/validate", get(auth::validate_handler))
        .route("/auth/profile", get(auth::profile_handler))
        .route("/auth/password", put(auth::change_password_handler))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_auth,
        ));

    // Last layer added runs first: authenticate, then check the role.
    let admin_only = Router::new()
        .route("/admin/mfa/enroll", post(admin::mfa_enroll_handler))
        .route("/admin/mfa/confirm", post(admin::mfa_confirm_handler))
        .route("/admin/mfa/disable", post(admin::mfa_disable_handler))
        .route(
            "/admin/users/{id}/deactivate",
            post(admin::deactivate_user_handler),
        )
        .route(
            "/auth/admin/oauth/{provider}/link",
            delete(oauth::unlink_handler),
        )
        .route(
            "/auth/admin/oauth/{provider}/refresh",
            post(oauth::refresh_provider_handler),
        )
        .route_layer(axum::middleware::from_fn(require_admin))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_auth,
        ));

    Router::new()
        .merge(public)
        .merge(optional)
        .merge(protected)
        .merge(admin_only)
        .layer(TimeoutLayer::new(state.config.request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(cors(&state.config))
        .with_state(state)
}
