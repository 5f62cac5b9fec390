//! Integration tests: build the router over the in-memory backends and drive
//! it with `oneshot`.

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use folio_api::{AppState, config::ApiConfig};
use folio_core::auth::AuthError;
use folio_core::cache::MemoryCache;
use folio_core::models::oauth::{AuthorizationRequest, ProviderKind, ProviderTokens, ProviderUserInfo};
use folio_core::oauth::OAuthProvider;
use folio_core::repository::memory::MemoryStore;
use serde_json::{Value, json};
use totp_rs::{Algorithm, Secret, TOTP};
use tower::ServiceExt;

const PASSWORD: &str = "Correct-Horse-9";

fn app_with(providers: Vec<Arc<dyn OAuthProvider>>) -> Router {
    let state = AppState::build_with_providers(
        ApiConfig::for_tests(),
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryCache::new()),
        providers,
    )
    .expect("app state");
    folio_api::router(state)
}

fn app() -> Router {
    app_with(Vec::new())
}

async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.expect("request")
}

fn post_json(uri: &str, ip: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", ip)
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_with_token(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

async fn json_body(resp: Response) -> Value {
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("parse JSON")
}

fn location(resp: &Response) -> String {
    resp.headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .expect("location header")
        .to_string()
}

async fn register(app: &Router, email: &str, username: &str) {
    let resp = send(
        app,
        post_json(
            "/auth/register",
            "10.0.0.1",
            json!({ "email": email, "username": username, "password": PASSWORD }),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
}

async fn login(app: &Router, identifier: &str) -> Value {
    let resp = send(
        app,
        post_json(
            "/auth/login",
            "10.0.0.1",
            json!({ "identifier": identifier, "password": PASSWORD }),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    json_body(resp).await
}

async fn setup_first_admin(app: &Router) {
    let resp = send(
        app,
        post_json(
            "/admin/setup/complete",
            "10.0.0.2",
            json!({
                "email": "owner@example.com",
                "password": PASSWORD,
                "confirmPassword": PASSWORD,
                "setupToken": "test-setup-token",
            }),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn health_reports_version() {
    let resp = send(&app(), Request::builder().uri("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let json = json_body(resp).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].as_str().is_some_and(|v| !v.is_empty()));
}

#[tokio::test]
async fn register_login_and_read_profile() {
    let app = app();
    register(&app, "reader@example.com", "reader").await;

    let tokens = login(&app, "reader").await;
    assert_eq!(tokens["tokenType"], "Bearer");
    assert_eq!(tokens["expiresIn"], 900);
    assert_eq!(tokens["user"]["email"], "reader@example.com");
    assert!(tokens["user"].get("passwordHash").is_none());

    let access = tokens["accessToken"].as_str().unwrap();
    let resp = send(&app, get_with_token("/auth/profile", access)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["username"], "reader");

    let resp = send(&app, get_with_token("/auth/validate", access)).await;
    let claims = json_body(resp).await;
    assert_eq!(claims["valid"], true);
    assert_eq!(claims["role"], "user");
}

#[tokio::test]
async fn duplicate_registration_conflicts() {
    let app = app();
    register(&app, "dup@example.com", "dup").await;
    let resp = send(
        &app,
        post_json(
            "/auth/register",
            "10.0.0.1",
            json!({ "email": "DUP@example.com", "username": "dup2", "password": PASSWORD }),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn protected_route_requires_token() {
    let app = app();
    let resp = send(&app, Request::builder().uri("/auth/profile").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(resp).await["error"], "missing_token");

    let resp = send(&app, get_with_token("/auth/profile", "not-a-jwt")).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(resp).await["error"], "token_invalid");
}

#[tokio::test]
async fn repeated_login_failures_block_the_client() {
    let app = app();
    register(&app, "victim@example.com", "victim").await;

    let attempt = |password: &str| {
        post_json(
            "/auth/login",
            "10.0.0.5",
            json!({ "identifier": "victim@example.com", "password": password }),
        )
    };
    for _ in 0..5 {
        let resp = send(&app, attempt("wrong-password")).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    let resp = send(&app, attempt(PASSWORD)).await;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = resp
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .expect("retry-after");
    assert!(retry_after > 0);

    // Other clients are unaffected.
    let resp = send(
        &app,
        post_json(
            "/auth/login",
            "10.0.0.6",
            json!({ "identifier": "victim@example.com", "password": PASSWORD }),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn refresh_rotates_and_logout_revokes() {
    let app = app();
    register(&app, "rot@example.com", "rot").await;
    let tokens = login(&app, "rot@example.com").await;
    let first = tokens["refreshToken"].as_str().unwrap().to_string();

    let resp = send(
        &app,
        post_json("/auth/refresh", "10.0.0.1", json!({ "refreshToken": first })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let second = json_body(resp).await["refreshToken"].as_str().unwrap().to_string();
    assert_ne!(first, second);

    let resp = send(
        &app,
        post_json("/auth/refresh", "10.0.0.1", json!({ "refreshToken": first })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(resp).await["error"], "refresh_token_invalid");

    let resp = send(
        &app,
        post_json("/auth/logout", "10.0.0.1", json!({ "refreshToken": second })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = send(
        &app,
        post_json("/auth/refresh", "10.0.0.1", json!({ "refreshToken": second })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_login_rejects_emails_outside_allow_list() {
    let app = app();
    register(&app, "intruder@example.org", "intruder").await;
    let resp = send(
        &app,
        post_json(
            "/admin/login",
            "10.0.0.3",
            json!({ "email": "intruder@example.org", "password": PASSWORD }),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(resp).await["error"], "email_not_authorized");
}

#[tokio::test]
async fn first_admin_setup_then_admin_login() {
    let app = app();

    let resp = send(&app, Request::builder().uri("/admin/setup/status").body(Body::empty()).unwrap()).await;
    let status = json_body(resp).await;
    assert_eq!(status["needsSetup"], true);
    assert_eq!(status["setupEnabled"], true);
    assert_eq!(status["isAdmin"], false);

    setup_first_admin(&app).await;

    let resp = send(
        &app,
        post_json(
            "/admin/login",
            "10.0.0.2",
            json!({ "email": "owner@example.com", "password": PASSWORD }),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let tokens = json_body(resp).await;
    assert_eq!(tokens["user"]["role"], "admin");
    let access = tokens["accessToken"].as_str().unwrap();

    let resp = send(&app, get_with_token("/admin/setup/status", access)).await;
    let status = json_body(resp).await;
    assert_eq!(status["needsSetup"], false);
    assert_eq!(status["isAdmin"], true);

    // A second setup is refused once an admin exists.
    let resp = send(
        &app,
        post_json(
            "/admin/setup/complete",
            "10.0.0.2",
            json!({
                "email": "second@folio.dev",
                "password": PASSWORD,
                "confirmPassword": PASSWORD,
                "setupToken": "test-setup-token",
            }),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_routes_reject_plain_users() {
    let app = app();
    register(&app, "plain@example.com", "plain").await;
    let tokens = login(&app, "plain").await;
    let access = tokens["accessToken"].as_str().unwrap();

    let request = Request::builder()
        .method("POST")
        .uri("/admin/mfa/enroll")
        .header(header::AUTHORIZATION, format!("Bearer {access}"))
        .body(Body::empty())
        .unwrap();
    let resp = send(&app, request).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(resp).await["error"], "forbidden");

    let request = Request::builder()
        .method("POST")
        .uri("/admin/mfa/enroll")
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&app, request).await.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_can_start_mfa_enrollment() {
    let app = app();
    setup_first_admin(&app).await;
    let tokens = login(&app, "owner@example.com").await;
    let access = tokens["accessToken"].as_str().unwrap();

    let request = Request::builder()
        .method("POST")
        .uri("/admin/mfa/enroll")
        .header(header::AUTHORIZATION, format!("Bearer {access}"))
        .body(Body::empty())
        .unwrap();
    let resp = send(&app, request).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let enrollment = json_body(resp).await;
    assert!(enrollment["otpauthUri"].as_str().unwrap().starts_with("otpauth://totp/"));
    assert_eq!(enrollment["backupCodes"].as_array().unwrap().len(), 10);
}

fn current_totp(secret_b32: &str) -> String {
    let bytes = Secret::Encoded(secret_b32.to_string()).to_bytes().unwrap();
    TOTP::new(Algorithm::SHA1, 6, 1, 30, bytes, None, "owner".into())
        .unwrap()
        .generate_current()
        .unwrap()
}

#[tokio::test]
async fn password_step_does_not_clear_wrong_mfa_codes() {
    let app = app();
    setup_first_admin(&app).await;
    let tokens = login(&app, "owner@example.com").await;
    let access = tokens["accessToken"].as_str().unwrap();

    let mut enroll = post_json("/admin/mfa/enroll", "10.0.0.3", json!({}));
    enroll
        .headers_mut()
        .insert(header::AUTHORIZATION, format!("Bearer {access}").parse().unwrap());
    let resp = send(&app, enroll).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let secret = json_body(resp).await["secret"].as_str().unwrap().to_string();

    let mut confirm = post_json(
        "/admin/mfa/confirm",
        "10.0.0.3",
        json!({ "code": current_totp(&secret) }),
    );
    confirm
        .headers_mut()
        .insert(header::AUTHORIZATION, format!("Bearer {access}").parse().unwrap());
    assert_eq!(send(&app, confirm).await.status(), StatusCode::OK);

    let ip = "10.9.9.9";
    let mut statuses = Vec::new();
    'rounds: for _ in 0..5 {
        let resp = send(
            &app,
            post_json(
                "/admin/login",
                ip,
                json!({ "email": "owner@example.com", "password": PASSWORD }),
            ),
        )
        .await;
        if resp.status() == StatusCode::TOO_MANY_REQUESTS {
            statuses.push(resp.status());
            break;
        }
        assert_eq!(resp.status(), StatusCode::OK);
        let challenge = json_body(resp).await;
        assert_eq!(challenge["mfaRequired"], true);
        let mfa_token = challenge["mfaToken"].as_str().unwrap().to_string();

        for _ in 0..4 {
            let resp = send(
                &app,
                post_json(
                    "/admin/mfa/verify",
                    ip,
                    json!({ "mfaToken": mfa_token, "code": "abcdef" }),
                ),
            )
            .await;
            statuses.push(resp.status());
            if resp.status() == StatusCode::TOO_MANY_REQUESTS {
                break 'rounds;
            }
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        }
    }

    assert_eq!(statuses.last(), Some(&StatusCode::TOO_MANY_REQUESTS));
    let wrong = statuses
        .iter()
        .filter(|s| **s == StatusCode::UNAUTHORIZED)
        .count();
    assert_eq!(wrong, 5);

    // Even the correct code is refused while the block lasts.
    let resp = send(
        &app,
        post_json(
            "/admin/mfa/verify",
            ip,
            json!({ "mfaToken": "irrelevant", "code": current_totp(&secret) }),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
}

struct FakeProvider;

#[async_trait]
impl OAuthProvider for FakeProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::GitHub
    }

    fn authorization_url(&self, state: &str, _nonce: &str) -> Result<AuthorizationRequest, AuthError> {
        Ok(AuthorizationRequest {
            url: format!("https://idp.example/authorize?state={state}"),
            pkce_verifier: None,
        })
    }

    async fn exchange_code(
        &self,
        _code: &str,
        _pkce_verifier: Option<&str>,
    ) -> Result<ProviderTokens, AuthError> {
        Ok(ProviderTokens {
            access_token: "provider-access".into(),
            token_type: Some("bearer".into()),
            expires_in: None,
            refresh_token: None,
            id_token: None,
            scope: None,
        })
    }

    async fn user_info(&self, _access_token: &str) -> Result<ProviderUserInfo, AuthError> {
        Ok(ProviderUserInfo {
            provider_user_id: "gh-7".into(),
            email: "owner@example.com".into(),
            email_verified: true,
            name: Some("Owner".into()),
            picture: None,
        })
    }

    async fn refresh_token(&self, _refresh_token: &str) -> Result<ProviderTokens, AuthError> {
        Err(AuthError::OAuthProvider("no refresh".into()))
    }

    async fn revoke_token(&self, _token: &str) -> Result<(), AuthError> {
        Ok(())
    }
}

#[tokio::test]
async fn oauth_flow_redirects_with_tokens_in_fragment() {
    let app = app_with(vec![Arc::new(FakeProvider)]);

    let resp = send(
        &app,
        Request::builder().uri("/auth/admin/oauth/providers").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(json_body(resp).await["providers"], json!(["github"]));

    let resp = send(
        &app,
        Request::builder().uri("/auth/admin/oauth/github").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    let consent = url::Url::parse(&location(&resp)).unwrap();
    let state = consent
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .expect("state param");
    let cookie = resp
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .expect("session cookie")
        .to_string();
    assert!(cookie.starts_with("folio_oauth_session="));

    let callback = Request::builder()
        .uri(format!("/auth/admin/oauth/callback/github?code=abc&state={state}"))
        .header(header::COOKIE, &cookie)
        .body(Body::empty())
        .unwrap();
    let resp = send(&app, callback).await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    let target = location(&resp);
    assert!(target.starts_with("http://localhost:3000"));
    assert!(target.contains("#access_token="));

    // The state is single use.
    let replay = Request::builder()
        .uri(format!("/auth/admin/oauth/callback/github?code=abc&state={state}"))
        .header(header::COOKIE, &cookie)
        .body(Body::empty())
        .unwrap();
    let resp = send(&app, replay).await;
    assert_eq!(
        location(&resp),
        "http://localhost:3000/admin/login#error=oauth_state_invalid"
    );
}

#[tokio::test]
async fn oauth_callback_without_browser_binding_fails() {
    let app = app_with(vec![Arc::new(FakeProvider)]);
    let resp = send(
        &app,
        Request::builder().uri("/auth/admin/oauth/github").body(Body::empty()).unwrap(),
    )
    .await;
    let consent = url::Url::parse(&location(&resp)).unwrap();
    let state = consent
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .unwrap();

    let resp = send(
        &app,
        Request::builder()
            .uri(format!("/auth/admin/oauth/callback/github?code=abc&state={state}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert!(location(&resp).ends_with("#error=oauth_state_invalid"));
}

#[tokio::test]
async fn unconfigured_oauth_provider_is_bad_gateway() {
    let resp = send(
        &app(),
        Request::builder().uri("/auth/admin/oauth/google").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

    let resp = send(
        &app(),
        Request::builder().uri("/auth/admin/oauth/myspace").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
