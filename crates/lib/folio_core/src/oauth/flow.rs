//! Authorization-code flow for admin sign-in through an external provider.
//!
//! `initiate` stores a pending [`OAuthState`] and hands back the consent URL;
//! `callback` consumes it exactly once, resolves the provider identity to a
//! local user and opens a session.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tracing::{info, warn};
use url::Url;
use url::form_urlencoded;
use uuid::Uuid;

use super::pkce::{generate_nonce, generate_state};
use super::provider::OAuthProvider;
use super::redirect::RedirectPolicy;
use super::state::OAuthStateStore;
use crate::auth::AuthError;
use crate::auth::admin::AdminAllowList;
use crate::auth::credentials::{CredentialService, normalize_email};
use crate::crypto::{SecretBox, random_token, secrets_match};
use crate::models::auth::{AuthEvent, AuthEventKind, Role, Session, User};
use crate::models::oauth::{
    OAuthState, OAuthTokenRecord, ProviderKind, ProviderTokens, ProviderUserInfo,
};
use crate::repository::{OAuthTokenRepository, RepositoryError};

const SESSION_ID_BYTES: usize = 24;
const LOGIN_PATH: &str = "/admin/login";

/// What the browser needs to start the flow.
#[derive(Debug, Clone)]
pub struct OAuthStart {
    pub authorization_url: String,
    pub state: String,
    /// Bind to the browser (cookie) and present again on callback.
    pub session_id: String,
}

/// Query parameters the provider sends back.
#[derive(Debug, Clone, Default)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// A completed sign-in and where to send the browser.
#[derive(Debug, Clone)]
pub struct OAuthLogin {
    pub session: Session,
    pub redirect_to: Url,
}

impl OAuthLogin {
    /// Redirect target with the tokens in the fragment, never the query.
    pub fn redirect_url(&self) -> String {
        let tokens = &self.session.tokens;
        let fragment = form_urlencoded::Serializer::new(String::new())
            .append_pair("access_token", &tokens.access_token)
            .append_pair("refresh_token", &tokens.refresh_token)
            .append_pair("token_type", &tokens.token_type)
            .append_pair("expires_in", &tokens.expires_in.to_string())
            .finish();
        let mut url = self.redirect_to.clone();
        url.set_fragment(Some(&fragment));
        url.into()
    }
}

pub struct OAuthFlow {
    providers: HashMap<ProviderKind, Arc<dyn OAuthProvider>>,
    states: OAuthStateStore,
    redirects: RedirectPolicy,
    credentials: Arc<CredentialService>,
    allow_list: AdminAllowList,
    tokens: Arc<dyn OAuthTokenRepository>,
    secrets: SecretBox,
}

impl OAuthFlow {
    pub fn new(
        credentials: Arc<CredentialService>,
        allow_list: AdminAllowList,
        tokens: Arc<dyn OAuthTokenRepository>,
        secrets: SecretBox,
        states: OAuthStateStore,
        redirects: RedirectPolicy,
    ) -> Self {
        Self {
            providers: HashMap::new(),
            states,
            redirects,
            credentials,
            allow_list,
            tokens,
            secrets,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn OAuthProvider>) -> Self {
        self.providers.insert(provider.kind(), provider);
        self
    }

    /// Configured providers in a stable order.
    pub fn providers(&self) -> Vec<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .filter(|k| self.providers.contains_key(k))
            .collect()
    }

    pub fn redirects(&self) -> &RedirectPolicy {
        &self.redirects
    }

    fn provider(&self, kind: ProviderKind) -> Result<&Arc<dyn OAuthProvider>, AuthError> {
        self.providers
            .get(&kind)
            .ok_or_else(|| AuthError::OAuthProvider(format!("{kind} is not configured")))
    }

    /// Store a pending flow and build the provider consent URL.
    pub async fn initiate(
        &self,
        kind: ProviderKind,
        redirect_to: Option<&str>,
    ) -> Result<OAuthStart, AuthError> {
        let provider = self.provider(kind)?;
        let redirect_to = self.redirects.validate(redirect_to)?;

        let state = generate_state();
        let nonce = generate_nonce();
        let session_id = random_token(SESSION_ID_BYTES);
        let request = provider.authorization_url(&state, &nonce)?;

        self.states
            .save(&OAuthState {
                state: state.clone(),
                nonce,
                pkce_verifier: request.pkce_verifier,
                provider: kind,
                redirect_to: redirect_to.into(),
                session_id: session_id.clone(),
                created_at: Utc::now(),
            })
            .await?;

        info!(provider = %kind, "oauth flow started");
        Ok(OAuthStart {
            authorization_url: request.url,
            state,
            session_id,
        })
    }

    /// Finish the flow started by [`initiate`](Self::initiate).
    ///
    /// `session_id` is the value bound to the browser at initiate time.
    pub async fn callback(
        &self,
        kind: ProviderKind,
        params: CallbackParams,
        session_id: Option<&str>,
    ) -> Result<OAuthLogin, AuthError> {
        if let Some(error) = params.error {
            let detail = params.error_description.unwrap_or_default();
            warn!(target: "audit", provider = %kind, error = %error, "provider returned an error");
            return Err(AuthError::OAuthProvider(format!("{kind}: {error} {detail}").trim_end().to_string()));
        }
        let state = params
            .state
            .filter(|s| !s.is_empty())
            .ok_or(AuthError::OAuthStateInvalid)?;
        let pending = self.states.consume(&state).await?;

        if pending.provider != kind {
            warn!(target: "audit", expected = %pending.provider, got = %kind, "oauth provider mismatch");
            return Err(AuthError::OAuthStateInvalid);
        }
        if !session_id.is_some_and(|sid| secrets_match(sid, &pending.session_id)) {
            warn!(target: "audit", provider = %kind, "oauth callback from a different browser session");
            return Err(AuthError::OAuthStateInvalid);
        }
        let code = params
            .code
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AuthError::OAuthProvider(format!("{kind}: missing authorization code")))?;
        let redirect_to = Url::parse(&pending.redirect_to)
            .map_err(|e| AuthError::Internal(format!("stored redirect: {e}")))?;

        let provider = self.provider(kind)?;
        let tokens = provider
            .exchange_code(&code, pending.pkce_verifier.as_deref())
            .await?;
        let info = provider.user_info(&tokens.access_token).await?;

        let user = match self.provision(kind, &info).await {
            Ok(user) => user,
            Err(e) => {
                self.credentials
                    .auditor()
                    .record(
                        AuthEvent::new(None, AuthEventKind::OAuthLogin, false)
                            .with_detail(format!("{kind}: {}", e.code())),
                    )
                    .await;
                return Err(e);
            }
        };
        self.store_tokens(user.id, kind, &tokens).await?;

        let session = self
            .credentials
            .open_session(user, AuthEventKind::OAuthLogin)
            .await?;
        Ok(OAuthLogin {
            session,
            redirect_to,
        })
    }

    /// Find or create the local user for a provider identity.
    ///
    /// Only verified, allow-listed emails get through. Existing users keep
    /// their role; new users are created as admins.
    async fn provision(&self, kind: ProviderKind, info: &ProviderUserInfo) -> Result<User, AuthError> {
        let email = normalize_email(&info.email).map_err(|_| AuthError::EmailNotAuthorized)?;
        if !info.email_verified {
            warn!(target: "audit", provider = %kind, email = %email, "provider email not verified");
            return Err(AuthError::EmailNotAuthorized);
        }
        if !self.allow_list.is_allowed(&email) {
            warn!(target: "audit", provider = %kind, email = %email, "oauth email outside allow-list");
            return Err(AuthError::EmailNotAuthorized);
        }

        let users = self.credentials.users();
        match users.find_by_email(&email).await {
            Ok(mut user) => {
                if let Some(name) = info.name.as_deref().filter(|n| !n.trim().is_empty()) {
                    user.full_name = Some(name.trim().to_string());
                }
                if info.picture.is_some() {
                    user.avatar_url = info.picture.clone();
                }
                user.oauth_provider = Some(kind.as_str().to_string());
                user.oauth_provider_id = Some(info.provider_user_id.clone());
                user.is_verified = true;
                user.touch();
                users.save(&user).await?;
                Ok(user)
            }
            Err(RepositoryError::Inactive) => Err(AuthError::AccountDeactivated),
            Err(RepositoryError::NotFound) => {
                let username = self.credentials.free_username(&email).await?;
                let mut user = User::new(&email, &username, Role::Admin);
                user.is_verified = true;
                user.full_name = info.name.clone();
                user.avatar_url = info.picture.clone();
                user.oauth_provider = Some(kind.as_str().to_string());
                user.oauth_provider_id = Some(info.provider_user_id.clone());
                users.create(&user).await.map_err(|e| match e {
                    RepositoryError::Conflict(_) => AuthError::AlreadyExists("email".into()),
                    other => other.into(),
                })?;
                info!(target: "audit", user_id = %user.id, provider = %kind, "admin provisioned through oauth");
                Ok(user)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn store_tokens(
        &self,
        user_id: Uuid,
        kind: ProviderKind,
        tokens: &ProviderTokens,
    ) -> Result<(), AuthError> {
        let now = Utc::now();
        let record = OAuthTokenRecord {
            user_id,
            provider: kind,
            access_token_enc: self.secrets.encrypt(&tokens.access_token)?,
            refresh_token_enc: tokens
                .refresh_token
                .as_deref()
                .map(|t| self.secrets.encrypt(t))
                .transpose()?,
            expires_at: tokens
                .expires_in
                .filter(|s| *s > 0)
                .and_then(ChronoDuration::try_seconds)
                .map(|d| now + d),
            scope: tokens.scope.clone(),
            updated_at: now,
        };
        self.tokens.upsert(&record).await?;
        Ok(())
    }

    /// Refresh the stored provider tokens of `user_id`.
    pub async fn refresh_provider_tokens(
        &self,
        user_id: Uuid,
        kind: ProviderKind,
    ) -> Result<(), AuthError> {
        let provider = self.provider(kind)?;
        let record = self
            .tokens
            .find(user_id, kind)
            .await?
            .ok_or_else(|| AuthError::OAuthProvider(format!("{kind}: account not linked")))?;
        let refresh_token = record
            .refresh_token_enc
            .as_deref()
            .map(|enc| self.secrets.decrypt(enc))
            .transpose()?
            .ok_or_else(|| AuthError::OAuthProvider(format!("{kind}: no refresh token stored")))?;

        let tokens = provider.refresh_token(&refresh_token).await?;
        self.store_tokens(user_id, kind, &tokens).await
    }

    /// Revoke the stored provider token and forget it. Provider-side
    /// revocation failures are logged, the local record is removed regardless.
    pub async fn unlink(&self, user_id: Uuid, kind: ProviderKind) -> Result<bool, AuthError> {
        let provider = self.provider(kind)?;
        let Some(record) = self.tokens.find(user_id, kind).await? else {
            return Ok(false);
        };
        let token = match &record.refresh_token_enc {
            Some(enc) => self.secrets.decrypt(enc)?,
            None => self.secrets.decrypt(&record.access_token_enc)?,
        };
        if let Err(e) = provider.revoke_token(&token).await {
            warn!(provider = %kind, error = %e, "provider token revocation failed");
        }
        let removed = self.tokens.delete(user_id, kind).await?;
        info!(user_id = %user_id, provider = %kind, "oauth provider unlinked");
        Ok(removed)
    }

    /// Frontend login page carrying `error=<code>` in the fragment.
    pub fn error_redirect(&self, err: &AuthError) -> String {
        let mut url = self
            .redirects
            .frontend()
            .join(LOGIN_PATH)
            .unwrap_or_else(|_| self.redirects.frontend().clone());
        let fragment = form_urlencoded::Serializer::new(String::new())
            .append_pair("error", err.code())
            .finish();
        url.set_fragment(Some(&fragment));
        url.into()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::*;
    use crate::auth::credentials::Registration;
    use crate::auth::test_support::{Fixture, admin_config};
    use crate::models::oauth::AuthorizationRequest;
    use crate::repository::UserRepository;

    struct FakeProvider {
        kind: ProviderKind,
        info: Mutex<ProviderUserInfo>,
        exchanged: Mutex<Vec<(String, Option<String>)>>,
        revoked: AtomicUsize,
    }

    impl FakeProvider {
        fn new(kind: ProviderKind, email: &str) -> Arc<Self> {
            Arc::new(Self {
                kind,
                info: Mutex::new(ProviderUserInfo {
                    provider_user_id: "ext-42".into(),
                    email: email.into(),
                    email_verified: true,
                    name: Some("Ada Owner".into()),
                    picture: Some("https://img.example/ada.png".into()),
                }),
                exchanged: Mutex::new(Vec::new()),
                revoked: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl OAuthProvider for FakeProvider {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        fn authorization_url(&self, state: &str, _nonce: &str) -> Result<AuthorizationRequest, AuthError> {
            Ok(AuthorizationRequest {
                url: format!("https://idp.example/authorize?state={state}"),
                pkce_verifier: Some("verifier".into()),
            })
        }

        async fn exchange_code(
            &self,
            code: &str,
            pkce_verifier: Option<&str>,
        ) -> Result<ProviderTokens, AuthError> {
            self.exchanged
                .lock()
                .await
                .push((code.to_string(), pkce_verifier.map(str::to_string)));
            Ok(ProviderTokens {
                access_token: "provider-access".into(),
                token_type: Some("Bearer".into()),
                expires_in: Some(3600),
                refresh_token: Some("provider-refresh".into()),
                id_token: None,
                scope: Some("openid email".into()),
            })
        }

        async fn user_info(&self, _access_token: &str) -> Result<ProviderUserInfo, AuthError> {
            Ok(self.info.lock().await.clone())
        }

        async fn refresh_token(&self, refresh_token: &str) -> Result<ProviderTokens, AuthError> {
            assert_eq!(refresh_token, "provider-refresh");
            Ok(ProviderTokens {
                access_token: "provider-access-2".into(),
                token_type: None,
                expires_in: Some(3600),
                refresh_token: None,
                id_token: None,
                scope: None,
            })
        }

        async fn revoke_token(&self, _token: &str) -> Result<(), AuthError> {
            self.revoked.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn secrets() -> SecretBox {
        SecretBox::new("oauth-test-key")
    }

    fn flow(fx: &Fixture, providers: &[Arc<FakeProvider>]) -> OAuthFlow {
        let mut flow = OAuthFlow::new(
            fx.credentials.clone(),
            AdminAllowList::from_config(&admin_config()),
            fx.store.clone(),
            secrets(),
            OAuthStateStore::new(fx.cache.clone()),
            RedirectPolicy::new("http://localhost:3000", ["https://admin.folio.dev"]).unwrap(),
        );
        for p in providers {
            flow = flow.with_provider(p.clone());
        }
        flow
    }

    fn params(start: &OAuthStart) -> CallbackParams {
        CallbackParams {
            code: Some("auth-code".into()),
            state: Some(start.state.clone()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn first_login_provisions_a_verified_admin() {
        let fx = Fixture::new();
        let google = FakeProvider::new(ProviderKind::Google, "Ada@Folio.dev");
        let flow = flow(&fx, &[google.clone()]);

        let start = flow
            .initiate(ProviderKind::Google, Some("/admin/posts"))
            .await
            .unwrap();
        assert!(start.authorization_url.contains(&start.state));

        let login = flow
            .callback(ProviderKind::Google, params(&start), Some(&start.session_id))
            .await
            .unwrap();
        let user = &login.session.user;
        assert_eq!(user.email, "ada@folio.dev");
        assert_eq!(user.role, Role::Admin);
        assert!(user.is_verified);
        assert_eq!(user.oauth_provider.as_deref(), Some("google"));
        assert_eq!(
            google.exchanged.lock().await.as_slice(),
            &[("auth-code".to_string(), Some("verifier".to_string()))]
        );

        let record = fx
            .store
            .find(user.id, ProviderKind::Google)
            .await
            .unwrap()
            .unwrap();
        assert_ne!(record.access_token_enc, "provider-access");
        assert_eq!(secrets().decrypt(&record.access_token_enc).unwrap(), "provider-access");

        let url = Url::parse(&login.redirect_url()).unwrap();
        assert_eq!(url.path(), "/admin/posts");
        assert!(url.query().is_none());
        let fragment = url.fragment().unwrap();
        assert!(fragment.contains("access_token="));
        assert!(fragment.contains("token_type=Bearer"));
        let claims = fx
            .codec
            .verify(&login.session.tokens.access_token)
            .unwrap();
        assert_eq!(claims.role, Role::Admin);
    }

    #[tokio::test]
    async fn replayed_state_is_rejected() {
        let fx = Fixture::new();
        let flow = flow(&fx, &[FakeProvider::new(ProviderKind::Google, "owner@example.com")]);
        let start = flow.initiate(ProviderKind::Google, None).await.unwrap();

        flow.callback(ProviderKind::Google, params(&start), Some(&start.session_id))
            .await
            .unwrap();
        assert!(matches!(
            flow.callback(ProviderKind::Google, params(&start), Some(&start.session_id))
                .await,
            Err(AuthError::OAuthStateInvalid)
        ));
    }

    #[tokio::test]
    async fn state_is_bound_to_provider_and_browser() {
        let fx = Fixture::new();
        let flow = flow(
            &fx,
            &[
                FakeProvider::new(ProviderKind::Google, "owner@example.com"),
                FakeProvider::new(ProviderKind::GitHub, "owner@example.com"),
            ],
        );

        let start = flow.initiate(ProviderKind::Google, None).await.unwrap();
        assert!(matches!(
            flow.callback(ProviderKind::GitHub, params(&start), Some(&start.session_id))
                .await,
            Err(AuthError::OAuthStateInvalid)
        ));

        let start = flow.initiate(ProviderKind::Google, None).await.unwrap();
        assert!(matches!(
            flow.callback(ProviderKind::Google, params(&start), Some("someone-else"))
                .await,
            Err(AuthError::OAuthStateInvalid)
        ));
        let start = flow.initiate(ProviderKind::Google, None).await.unwrap();
        assert!(matches!(
            flow.callback(ProviderKind::Google, params(&start), None).await,
            Err(AuthError::OAuthStateInvalid)
        ));
    }

    #[tokio::test]
    async fn provider_error_parameter_short_circuits() {
        let fx = Fixture::new();
        let google = FakeProvider::new(ProviderKind::Google, "owner@example.com");
        let flow = flow(&fx, &[google.clone()]);
        let start = flow.initiate(ProviderKind::Google, None).await.unwrap();

        let err = flow
            .callback(
                ProviderKind::Google,
                CallbackParams {
                    error: Some("access_denied".into()),
                    state: Some(start.state.clone()),
                    ..Default::default()
                },
                Some(&start.session_id),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::OAuthProvider(_)));
        assert!(google.exchanged.lock().await.is_empty());
    }

    #[tokio::test]
    async fn unverified_or_unlisted_email_is_refused() {
        let fx = Fixture::new();
        let google = FakeProvider::new(ProviderKind::Google, "stranger@elsewhere.org");
        let flow = flow(&fx, &[google.clone()]);

        let start = flow.initiate(ProviderKind::Google, None).await.unwrap();
        assert!(matches!(
            flow.callback(ProviderKind::Google, params(&start), Some(&start.session_id))
                .await,
            Err(AuthError::EmailNotAuthorized)
        ));

        {
            let mut info = google.info.lock().await;
            info.email = "owner@example.com".into();
            info.email_verified = false;
        }
        let start = flow.initiate(ProviderKind::Google, None).await.unwrap();
        assert!(matches!(
            flow.callback(ProviderKind::Google, params(&start), Some(&start.session_id))
                .await,
            Err(AuthError::EmailNotAuthorized)
        ));
        assert!(fx.store.find_by_email("owner@example.com").await.is_err());
    }

    #[tokio::test]
    async fn existing_user_is_linked_and_keeps_role() {
        let fx = Fixture::new();
        let existing = fx
            .credentials
            .register(Registration {
                email: "dev@folio.dev".into(),
                username: "devuser".into(),
                password: "Str0ng!Passw0rd".into(),
                full_name: None,
            })
            .await
            .unwrap();
        let flow = flow(&fx, &[FakeProvider::new(ProviderKind::GitHub, "dev@folio.dev")]);

        let start = flow.initiate(ProviderKind::GitHub, None).await.unwrap();
        let login = flow
            .callback(ProviderKind::GitHub, params(&start), Some(&start.session_id))
            .await
            .unwrap();
        assert_eq!(login.session.user.id, existing.id);
        assert_eq!(login.session.user.role, Role::User);
        assert_eq!(login.session.user.full_name.as_deref(), Some("Ada Owner"));
        assert_eq!(login.session.user.oauth_provider_id.as_deref(), Some("ext-42"));
    }

    #[tokio::test]
    async fn off_origin_redirect_is_refused_before_state_is_stored() {
        let fx = Fixture::new();
        let flow = flow(&fx, &[FakeProvider::new(ProviderKind::Google, "owner@example.com")]);
        assert!(matches!(
            flow.initiate(ProviderKind::Google, Some("https://evil.example/")).await,
            Err(AuthError::RedirectNotAllowed)
        ));
        assert!(fx.cache.is_empty());
        assert!(matches!(
            flow.initiate(ProviderKind::Microsoft, None).await,
            Err(AuthError::OAuthProvider(_))
        ));
    }

    #[tokio::test]
    async fn provider_tokens_refresh_and_unlink() {
        let fx = Fixture::new();
        let google = FakeProvider::new(ProviderKind::Google, "owner@example.com");
        let flow = flow(&fx, &[google.clone()]);
        let start = flow.initiate(ProviderKind::Google, None).await.unwrap();
        let uid = flow
            .callback(ProviderKind::Google, params(&start), Some(&start.session_id))
            .await
            .unwrap()
            .session
            .user
            .id;

        flow.refresh_provider_tokens(uid, ProviderKind::Google)
            .await
            .unwrap();
        let record = fx.store.find(uid, ProviderKind::Google).await.unwrap().unwrap();
        assert_eq!(secrets().decrypt(&record.access_token_enc).unwrap(), "provider-access-2");
        assert!(record.refresh_token_enc.is_some());

        assert!(flow.unlink(uid, ProviderKind::Google).await.unwrap());
        assert_eq!(google.revoked.load(Ordering::SeqCst), 1);
        assert!(!flow.unlink(uid, ProviderKind::Google).await.unwrap());
    }

    #[test]
    fn error_redirect_lands_on_login_page() {
        let fx = Fixture::new();
        let flow = flow(&fx, &[]);
        assert_eq!(
            flow.error_redirect(&AuthError::OAuthStateInvalid),
            "http://localhost:3000/admin/login#error=oauth_state_invalid"
        );
    }
}
