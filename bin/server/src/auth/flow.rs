//! The login flow controller.
//!
//! [`AuthServer`] owns everything the login flow shares across requests: the
//! provider, the session store, the administrator registry and the hooks.
//! Its three flow operations map one-to-one onto the login, callback and
//! logout endpoints; the access gate reuses [`AuthServer::begin_login`].

use axum::{
    http::{HeaderMap, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;
use oauth2::CsrfToken;
use rootcause::Report;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use time::Duration as TimeDuration;
use turnstile_access::{
    AdminRegistry, FlowError, FlowPaths, IdentityExtractor, MemorySessionStore, OAuth2Config,
    PendingAuth, Session, SessionIdentity, SessionKeys, SessionStore, StoredToken,
    clear_identity, sanitize_redirect_target,
};
use turnstile_core::{Document, SessionId};

use super::provider::{IdentityProvider, OAuth2Provider, ProviderError, ProviderToken};
use crate::config::SessionConfig;
use crate::error::{SetupError, error_page, flow_status, forbidden_page};

/// Number of random bytes in a login state token.
const STATE_BYTES: u32 = 32;

/// Longest upstream error body echoed into a login failure.
const MAX_ERROR_DETAILS: usize = 512;

/// What the flow needs to know about the inbound request.
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    host: String,
    referer: Option<String>,
    uri: String,
}

impl RequestInfo {
    /// Creates request info from raw values.
    #[must_use]
    pub fn new(host: impl Into<String>, referer: Option<String>, uri: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            referer,
            uri: uri.into(),
        }
    }

    /// Reads host, referer and URI from request parts.
    #[must_use]
    pub fn from_parts(headers: &HeaderMap, uri: &Uri) -> Self {
        let host = headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| uri.authority().map(|a| a.as_str().to_string()))
            .unwrap_or_default();
        let referer = headers
            .get(header::REFERER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let uri = uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());
        Self { host, referer, uri }
    }

    /// Returns the `Host` the request was sent to.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the `Referer` header, if any.
    #[must_use]
    pub fn referer(&self) -> Option<&str> {
        self.referer.as_deref()
    }

    /// Returns the request path and query.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// The raw "where to go next": the referer, or the request itself.
    fn location(&self) -> &str {
        match self.referer.as_deref().map(str::trim) {
            Some(referer) if !referer.is_empty() => referer,
            _ => &self.uri,
        }
    }
}

/// Query parameters of the provider callback.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub state: String,
}

/// Details of a failed login handed to the failure hook.
#[derive(Debug, Clone)]
pub struct LoginFailure {
    pub status: StatusCode,
    pub error: FlowError,
    /// Email of the session's identity before the failure, if any.
    pub email: Option<String>,
    pub request: RequestInfo,
}

/// Called after a successful login.
pub type LoginHook = Arc<dyn Fn(&Session, &RequestInfo) + Send + Sync>;

/// Called before a session's identity is cleared on logout.
pub type LogoutHook = Arc<dyn Fn(&Session, &RequestInfo) + Send + Sync>;

/// Called on a failed login; returning a response replaces the error page.
pub type LoginFailedHook = Arc<dyn Fn(&LoginFailure) -> Option<Response> + Send + Sync>;

/// Produces the response for a non-admin on an admin-only resource.
pub type ForbiddenHandler = Arc<dyn Fn(&RequestInfo) -> Response + Send + Sync>;

/// Redirect with status 302 Found.
fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

fn default_forbidden_handler() -> ForbiddenHandler {
    Arc::new(|_: &RequestInfo| forbidden_page())
}

struct Flow {
    provider: Arc<dyn IdentityProvider>,
    paths: FlowPaths,
}

/// OAuth2 login flow controller and access policy.
pub struct AuthServer {
    flow: Option<Flow>,
    store: Arc<dyn SessionStore>,
    session: SessionConfig,
    admins: AdminRegistry,
    extractor: IdentityExtractor,
    on_login: Option<LoginHook>,
    on_logout: Option<LogoutHook>,
    on_login_failed: Option<LoginFailedHook>,
    forbidden: RwLock<ForbiddenHandler>,
}

impl std::fmt::Debug for AuthServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthServer")
            .field("configured", &self.is_configured())
            .field("paths", &self.paths())
            .field("session", &self.session)
            .field("admins", &self.admins)
            .finish_non_exhaustive()
    }
}

impl AuthServer {
    /// Creates a builder.
    #[must_use]
    pub fn builder() -> AuthServerBuilder {
        AuthServerBuilder::default()
    }

    /// Returns true if OAuth2 is configured. An unconfigured server lets
    /// every request through its gates.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.flow.is_some()
    }

    /// Returns the flow paths, if configured.
    #[must_use]
    pub fn paths(&self) -> Option<&FlowPaths> {
        self.flow.as_ref().map(|flow| &flow.paths)
    }

    /// Returns the session key names.
    #[must_use]
    pub fn keys(&self) -> &SessionKeys {
        &self.session.keys
    }

    /// Returns true if `email` is an administrator.
    ///
    /// Also true when the administrator set is empty or OAuth2 is not
    /// configured.
    #[must_use]
    pub fn is_admin(&self, email: &str) -> bool {
        !self.is_configured() || self.admins.is_admin(email)
    }

    /// Replaces the administrator set. See [`AdminRegistry::set_admins`].
    pub fn set_admins<I, S>(&self, emails: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.admins.set_admins(emails);
    }

    /// Returns the administrator emails in sorted order.
    #[must_use]
    pub fn admins(&self) -> Vec<String> {
        self.admins.admins()
    }

    /// Replaces the forbidden handler; `None` restores the default 403 page.
    pub fn set_forbidden_handler(&self, handler: Option<ForbiddenHandler>) {
        let handler = handler.unwrap_or_else(default_forbidden_handler);
        *self
            .forbidden
            .write()
            .unwrap_or_else(PoisonError::into_inner) = handler;
    }

    /// Responds with the current forbidden handler.
    #[must_use]
    pub fn forbidden(&self, request: &RequestInfo) -> Response {
        let handler = Arc::clone(
            &self
                .forbidden
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        );
        handler(request)
    }

    /// Returns the session named by the request's session cookie.
    #[must_use]
    pub fn session(&self, jar: &CookieJar) -> Option<Session> {
        let cookie = jar.get(&self.session.cookie_name)?;
        let id = SessionId::from_str(cookie.value()).ok()?;
        self.store.get(&id)
    }

    /// Removes expired sessions from the store, returning how many went.
    pub fn cleanup_expired_sessions(&self) -> usize {
        self.store.cleanup_expired()
    }

    /// Returns the request's session, creating one and setting its cookie if
    /// there is none.
    #[must_use]
    pub fn ensure_session(&self, jar: CookieJar) -> (CookieJar, Session) {
        if let Some(session) = self.session(&jar) {
            return (jar, session);
        }
        let session = self.store.create();
        let cookie = Cookie::build((self.session.cookie_name.clone(), session.id().to_string()))
            .path("/")
            .http_only(true)
            .secure(self.session.secure_cookies)
            .same_site(SameSite::Lax)
            .max_age(TimeDuration::minutes(self.session.duration_minutes));
        (jar.add(cookie), session)
    }

    /// Sanitized post-flow target with any trailing flow path removed.
    fn return_target(&self, request: &RequestInfo) -> String {
        let target = sanitize_redirect_target(request.host(), request.location());
        match self.paths() {
            Some(paths) => paths.strip_suffix(&target),
            None => target,
        }
    }

    /// Starts a login: records a fresh state in the session and redirects to
    /// the provider.
    ///
    /// Without a session (or without OAuth2) this redirects straight to the
    /// return target, and no callback can succeed for that attempt.
    #[must_use]
    pub fn begin_login(&self, session: Option<&Session>, request: &RequestInfo) -> Response {
        let location = self.return_target(request);
        let (Some(flow), Some(session)) = (&self.flow, session) else {
            tracing::debug!(location = %location, "login without session, skipping provider");
            return found(&location);
        };

        let state = CsrfToken::new_random_len(STATE_BYTES).secret().clone();
        PendingAuth::new(state.clone(), location).store(session);
        tracing::debug!(session_id = %session.id(), "redirecting to identity provider");
        found(&flow.provider.authorization_url(&state))
    }

    /// Completes a login from the provider callback.
    ///
    /// On success the identity is stored in the session and the browser is
    /// sent back to where the login started. On failure the failure hook may
    /// supply the response; otherwise an error page is served.
    pub async fn complete_login(
        &self,
        session: Option<&Session>,
        request: &RequestInfo,
        query: &CallbackQuery,
    ) -> Response {
        match self.try_complete_login(session, query).await {
            Ok((session, referrer)) => {
                let target = sanitize_redirect_target(request.host(), &referrer);
                tracing::info!(session_id = %session.id(), target = %target, "login completed");
                if let Some(hook) = &self.on_login {
                    hook(session, request);
                }
                found(&target)
            }
            Err(error) => self.login_failed(session, request, error),
        }
    }

    async fn try_complete_login<'s>(
        &self,
        session: Option<&'s Session>,
        query: &CallbackQuery,
    ) -> Result<(&'s Session, String), FlowError> {
        let flow = self.flow.as_ref().ok_or(FlowError::NotConfigured)?;
        let session = session.ok_or(FlowError::MissingSession)?;

        // Cleared before comparing so a state can be presented only once.
        let pending = PendingAuth::take(session)
            .filter(|pending| pending.matches(&query.state))
            .ok_or(FlowError::WrongState)?;

        let token = flow
            .provider
            .exchange_code(&query.code)
            .await
            .map_err(|report| upstream_exchange_failed(&report))?;

        let userinfo = flow
            .provider
            .fetch_userinfo(&token.access_token)
            .await
            .map_err(|report| FlowError::UpstreamUserinfoFailed {
                status: StatusCode::BAD_GATEWAY.as_u16(),
                details: report.to_string(),
            })?;
        if userinfo.status != StatusCode::OK.as_u16() {
            return Err(FlowError::UpstreamUserinfoFailed {
                status: userinfo.status,
                details: String::from_utf8_lossy(&userinfo.body)
                    .chars()
                    .take(MAX_ERROR_DETAILS)
                    .collect(),
            });
        }

        let document =
            Document::from_slice(&userinfo.body).map_err(|e| FlowError::UserinfoDecodeFailed {
                details: e.to_string(),
            })?;
        let email = self.extractor.extract(&document);

        SessionIdentity {
            userinfo: document,
            email,
        }
        .store(session, &self.session.keys, Some(&stored_token(token)));

        Ok((session, pending.referrer))
    }

    fn login_failed(
        &self,
        session: Option<&Session>,
        request: &RequestInfo,
        error: FlowError,
    ) -> Response {
        let status = flow_status(&error);
        tracing::warn!(status = status.as_u16(), error = %error, "login failed");

        let email = session
            .and_then(|s| s.get(&self.session.keys.email))
            .and_then(|v| v.as_str().map(str::to_string));

        // A mismatched state may come from a forged callback; it must not log
        // out an existing identity.
        if let Some(session) = session {
            if error != FlowError::WrongState {
                clear_identity(session, &self.session.keys);
            }
        }

        if let Some(hook) = &self.on_login_failed {
            let failure = LoginFailure {
                status,
                error: error.clone(),
                email,
                request: request.clone(),
            };
            if let Some(response) = hook(&failure) {
                return response;
            }
        }
        error_page(status, &error)
    }

    /// Logs out: runs the logout hook, clears the identity and redirects to
    /// the sanitized referrer.
    #[must_use]
    pub fn logout(&self, session: Option<&Session>, request: &RequestInfo) -> Response {
        let location = self.return_target(request);
        if let Some(session) = session {
            if let Some(hook) = &self.on_logout {
                hook(session, request);
            }
            clear_identity(session, &self.session.keys);
            tracing::info!(session_id = %session.id(), "logged out");
        }
        found(&location)
    }
}

fn upstream_exchange_failed(report: &Report<ProviderError>) -> FlowError {
    tracing::error!(error = %report, "token exchange failed");
    FlowError::UpstreamExchangeFailed {
        details: report.to_string(),
    }
}

fn stored_token(token: ProviderToken) -> StoredToken {
    let now = Utc::now();
    StoredToken {
        access_token: token.access_token,
        token_type: token.token_type,
        refresh_token: token.refresh_token,
        expires_at: token
            .expires_in
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| now + d),
        authenticated_at: now,
    }
}

/// Builder for [`AuthServer`].
pub struct AuthServerBuilder {
    oauth2: Option<OAuth2Config>,
    provider: Option<Arc<dyn IdentityProvider>>,
    store: Option<Arc<dyn SessionStore>>,
    session: SessionConfig,
    http_timeout: Duration,
    extractor: IdentityExtractor,
    on_login: Option<LoginHook>,
    on_logout: Option<LogoutHook>,
    on_login_failed: Option<LoginFailedHook>,
}

impl Default for AuthServerBuilder {
    fn default() -> Self {
        Self {
            oauth2: None,
            provider: None,
            store: None,
            session: SessionConfig::default(),
            http_timeout: Duration::from_secs(30),
            extractor: IdentityExtractor::new(),
            on_login: None,
            on_logout: None,
            on_login_failed: None,
        }
    }
}

impl AuthServerBuilder {
    /// Sets the OAuth2 configuration. Without one the server is unconfigured.
    #[must_use]
    pub fn oauth2(mut self, config: Option<OAuth2Config>) -> Self {
        self.oauth2 = config;
        self
    }

    /// Uses `provider` instead of one built from the OAuth2 configuration.
    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Sets the session store. Defaults to an in-memory store.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the session cookie and key configuration.
    #[must_use]
    pub fn session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    /// Sets the timeout for provider requests.
    #[must_use]
    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Sets the identity extractor.
    #[must_use]
    pub fn extractor(mut self, extractor: IdentityExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    #[must_use]
    pub fn on_login(mut self, hook: LoginHook) -> Self {
        self.on_login = Some(hook);
        self
    }

    #[must_use]
    pub fn on_logout(mut self, hook: LogoutHook) -> Self {
        self.on_logout = Some(hook);
        self
    }

    #[must_use]
    pub fn on_login_failed(mut self, hook: LoginFailedHook) -> Self {
        self.on_login_failed = Some(hook);
        self
    }

    /// Builds the server, validating the OAuth2 configuration if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the provider
    /// client cannot be built.
    pub fn build(self) -> turnstile_core::Result<AuthServer, SetupError> {
        let flow = match self.oauth2 {
            None => None,
            Some(config) => {
                let invalid = |e: turnstile_access::ConfigError| SetupError::InvalidConfig {
                    details: e.to_string(),
                };
                config.validate().map_err(invalid)?;
                let paths = FlowPaths::from_redirect_url(
                    &config.effective_redirect_url().map_err(invalid)?,
                );
                let provider = match self.provider {
                    Some(provider) => provider,
                    None => Arc::new(OAuth2Provider::new(&config, self.http_timeout)?),
                };
                tracing::info!(
                    callback = paths.callback(),
                    login = paths.login(),
                    logout = paths.logout(),
                    "oauth2 configured"
                );
                Some(Flow { provider, paths })
            }
        };
        if flow.is_none() {
            tracing::warn!("oauth2 not configured, all requests pass without authentication");
        }

        Ok(AuthServer {
            flow,
            store: self
                .store
                .unwrap_or_else(|| {
                    Arc::new(MemorySessionStore::with_lifetime(chrono::Duration::minutes(
                        self.session.duration_minutes,
                    )))
                }),
            session: self.session,
            admins: AdminRegistry::new(),
            extractor: self.extractor,
            on_login: self.on_login,
            on_logout: self.on_logout,
            on_login_failed: self.on_login_failed,
            forbidden: RwLock::new(default_forbidden_handler()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::testing::{AUTHORIZE_URL, FakeProvider, builder_with, state_from_location};
    use serde_json::json;
    use std::sync::Mutex;

    fn request(referer: Option<&str>) -> RequestInfo {
        RequestInfo::new("example.com", referer.map(str::to_string), "/oauth2/login")
    }

    fn location(response: &Response) -> &str {
        response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .expect("location header")
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        String::from_utf8(bytes.to_vec()).expect("utf8")
    }

    fn callback(state: &str) -> CallbackQuery {
        CallbackQuery {
            code: "auth-code".to_string(),
            state: state.to_string(),
        }
    }

    /// Runs a login from `referer` through to the callback and returns the
    /// callback response.
    async fn login(server: &AuthServer, session: &Session, referer: &str) -> Response {
        let begin = server.begin_login(Some(session), &request(Some(referer)));
        let state = state_from_location(location(&begin));
        server
            .complete_login(Some(session), &request(None), &callback(&state))
            .await
    }

    #[test]
    fn request_info_prefers_referer() {
        let info = RequestInfo::new("example.com", Some("  ".to_string()), "/here?x=1");
        assert_eq!(info.location(), "/here?x=1");

        let info = RequestInfo::new("example.com", Some("/there".to_string()), "/here");
        assert_eq!(info.location(), "/there");
    }

    #[test]
    fn request_info_from_parts() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, "example.com:8443".parse().expect("header"));
        headers.insert(header::REFERER, "https://example.com/a".parse().expect("header"));
        let uri: Uri = "/oauth2/login?next=1".parse().expect("uri");

        let info = RequestInfo::from_parts(&headers, &uri);
        assert_eq!(info.host(), "example.com:8443");
        assert_eq!(info.referer(), Some("https://example.com/a"));
        assert_eq!(info.uri(), "/oauth2/login?next=1");
    }

    #[test]
    fn begin_login_records_state_and_referrer() {
        let server = builder_with(FakeProvider::with_userinfo(json!({})))
            .build()
            .expect("server");
        let session = Session::new(SessionId::new(), chrono::Duration::hours(1));

        let response = server.begin_login(Some(&session), &request(Some("https://example.com/secure")));
        assert_eq!(response.status(), StatusCode::FOUND);

        let location = location(&response);
        assert!(location.starts_with(AUTHORIZE_URL));
        assert!(location.contains("access_type=offline"));

        let state = state_from_location(location);
        assert!(state.len() >= 32, "state too short: {state}");

        let pending = PendingAuth::peek(&session).expect("pending auth");
        assert_eq!(pending.referrer, "/secure");
        assert!(pending.matches(&state));
    }

    #[test]
    fn begin_login_issues_fresh_state_each_time() {
        let server = builder_with(FakeProvider::with_userinfo(json!({})))
            .build()
            .expect("server");
        let session = Session::new(SessionId::new(), chrono::Duration::hours(1));

        let first = server.begin_login(Some(&session), &request(None));
        let second = server.begin_login(Some(&session), &request(None));
        assert_ne!(
            state_from_location(location(&first)),
            state_from_location(location(&second))
        );
    }

    #[test]
    fn begin_login_strips_flow_paths_from_target() {
        let server = builder_with(FakeProvider::with_userinfo(json!({})))
            .build()
            .expect("server");
        let session = Session::new(SessionId::new(), chrono::Duration::hours(1));

        let _ = server.begin_login(
            Some(&session),
            &request(Some("https://example.com/oauth2/logout")),
        );
        assert_eq!(PendingAuth::peek(&session).expect("pending").referrer, "/");

        // Without a referer the request's own URI is the target.
        let _ = server.begin_login(Some(&session), &request(None));
        assert_eq!(PendingAuth::peek(&session).expect("pending").referrer, "/");
    }

    #[test]
    fn begin_login_rejects_cross_origin_referer() {
        let server = builder_with(FakeProvider::with_userinfo(json!({})))
            .build()
            .expect("server");
        let session = Session::new(SessionId::new(), chrono::Duration::hours(1));

        let _ = server.begin_login(Some(&session), &request(Some("https://evil.com/attack")));
        assert_eq!(PendingAuth::peek(&session).expect("pending").referrer, "/");
    }

    #[test]
    fn begin_login_without_session_redirects_to_target() {
        let server = builder_with(FakeProvider::with_userinfo(json!({})))
            .build()
            .expect("server");

        let response = server.begin_login(None, &request(Some("https://example.com/secure")));
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), "/secure");
    }

    #[tokio::test]
    async fn complete_login_stores_identity_and_returns_to_referrer() {
        let provider = FakeProvider::with_userinfo(json!({
            "name": "Test User",
            "email": " Test.User+Tag@Example.COM "
        }));
        let logins = Arc::new(AtomicLogins::default());
        let sink = Arc::clone(&logins);
        let server = builder_with(Arc::clone(&provider))
            .on_login(Arc::new(move |_: &Session, _: &RequestInfo| sink.record()))
            .build()
            .expect("server");
        let session = Session::new(SessionId::new(), chrono::Duration::hours(1));
        let dirty = session.subscribe();

        let response = login(&server, &session, "https://example.com/secure").await;

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), "/secure");
        assert_eq!(provider.exchanges(), 1);
        assert_eq!(logins.count(), 1);
        assert!(dirty.has_changed().expect("sender alive"));

        let identity = SessionIdentity::load(&session, server.keys()).expect("identity");
        assert_eq!(identity.email.as_deref(), Some("test.user+tag@example.com"));
        assert_eq!(identity.userinfo.get_str("name"), Some("Test User"));

        let token = session.get("oauth2token").expect("token stored");
        assert_eq!(token["access_token"], "token-for-auth-code");
        assert!(PendingAuth::peek(&session).is_none());
    }

    #[tokio::test]
    async fn complete_login_without_email_still_logs_in() {
        let server = builder_with(FakeProvider::with_userinfo(json!({"sub": "123"})))
            .build()
            .expect("server");
        let session = Session::new(SessionId::new(), chrono::Duration::hours(1));

        let response = login(&server, &session, "https://example.com/").await;

        assert_eq!(response.status(), StatusCode::FOUND);
        let identity = SessionIdentity::load(&session, server.keys()).expect("identity");
        assert_eq!(identity.email, None);
        assert_eq!(identity.userinfo.get_str("sub"), Some("123"));
    }

    #[tokio::test]
    async fn replayed_state_is_rejected() {
        let provider = FakeProvider::with_userinfo(json!({"email": "a@example.com"}));
        let server = builder_with(Arc::clone(&provider)).build().expect("server");
        let session = Session::new(SessionId::new(), chrono::Duration::hours(1));

        let begin = server.begin_login(Some(&session), &request(None));
        let state = state_from_location(location(&begin));

        let first = server
            .complete_login(Some(&session), &request(None), &callback(&state))
            .await;
        assert_eq!(first.status(), StatusCode::FOUND);

        let replay = server
            .complete_login(Some(&session), &request(None), &callback(&state))
            .await;
        assert_eq!(replay.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(replay).await.contains("oauth2 wrong state"));
        assert_eq!(provider.exchanges(), 1);

        // The identity from the first login survives the rejected replay.
        let identity = SessionIdentity::load(&session, server.keys()).expect("identity");
        assert_eq!(identity.email.as_deref(), Some("a@example.com"));
    }

    #[tokio::test]
    async fn mismatched_state_consumes_pending_auth() {
        let server = builder_with(FakeProvider::with_userinfo(json!({})))
            .build()
            .expect("server");
        let session = Session::new(SessionId::new(), chrono::Duration::hours(1));

        let begin = server.begin_login(Some(&session), &request(None));
        let state = state_from_location(location(&begin));

        let wrong = server
            .complete_login(Some(&session), &request(None), &callback("forged"))
            .await;
        assert_eq!(wrong.status(), StatusCode::BAD_REQUEST);

        let late = server
            .complete_login(Some(&session), &request(None), &callback(&state))
            .await;
        assert_eq!(late.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn callback_without_pending_auth_is_wrong_state() {
        let server = builder_with(FakeProvider::with_userinfo(json!({})))
            .build()
            .expect("server");
        let session = Session::new(SessionId::new(), chrono::Duration::hours(1));

        let response = server
            .complete_login(Some(&session), &request(None), &callback(""))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn callback_without_session_is_bad_request() {
        let server = builder_with(FakeProvider::with_userinfo(json!({})))
            .build()
            .expect("server");

        let response = server
            .complete_login(None, &request(None), &callback("x"))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response).await.contains("oauth2 missing session"));
    }

    #[tokio::test]
    async fn callback_on_unconfigured_server_is_server_error() {
        let server = AuthServer::builder().build().expect("server");
        let session = Session::new(SessionId::new(), chrono::Duration::hours(1));

        let response = server
            .complete_login(Some(&session), &request(None), &callback("x"))
            .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_text(response).await.contains("oauth2 not configured"));
    }

    #[tokio::test]
    async fn exchange_failure_clears_identity_and_reports_email() {
        let provider = FakeProvider::with_userinfo(json!({"email": "a@example.com"}));
        let seen: Arc<Mutex<Vec<(StatusCode, Option<String>)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let server = builder_with(Arc::clone(&provider))
            .on_login_failed(Arc::new(move |failure: &LoginFailure| -> Option<Response> {
                sink.lock()
                    .expect("lock")
                    .push((failure.status, failure.email.clone()));
                None
            }))
            .build()
            .expect("server");
        let session = Session::new(SessionId::new(), chrono::Duration::hours(1));
        let _ = login(&server, &session, "https://example.com/").await;

        provider.fail_exchange();
        let response = login(&server, &session, "https://example.com/").await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_text(response).await.contains("token exchange failed"));
        assert!(SessionIdentity::load(&session, server.keys()).is_none());
        assert_eq!(
            *seen.lock().expect("lock"),
            vec![(
                StatusCode::INTERNAL_SERVER_ERROR,
                Some("a@example.com".to_string())
            )]
        );
    }

    #[tokio::test]
    async fn userinfo_status_is_propagated() {
        let provider = FakeProvider::with_userinfo(json!({}));
        provider.set_userinfo_response(401, "token expired");
        let server = builder_with(provider).build().expect("server");
        let session = Session::new(SessionId::new(), chrono::Duration::hours(1));

        let response = login(&server, &session, "https://example.com/").await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(body_text(response).await.contains("token expired"));
    }

    #[tokio::test]
    async fn undecodable_userinfo_is_server_error() {
        let provider = FakeProvider::with_userinfo(json!({}));
        provider.set_userinfo_response(200, "[1, 2, 3]");
        let server = builder_with(provider).build().expect("server");
        let session = Session::new(SessionId::new(), chrono::Duration::hours(1));

        let response = login(&server, &session, "https://example.com/").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_text(response).await.contains("userinfo decode failed"));
        assert!(SessionIdentity::load(&session, server.keys()).is_none());
    }

    #[tokio::test]
    async fn failure_hook_can_replace_response() {
        let server = builder_with(FakeProvider::with_userinfo(json!({})))
            .on_login_failed(Arc::new(|failure: &LoginFailure| {
                assert_eq!(failure.error, FlowError::WrongState);
                Some((StatusCode::IM_A_TEAPOT, "custom").into_response())
            }))
            .build()
            .expect("server");
        let session = Session::new(SessionId::new(), chrono::Duration::hours(1));

        let response = server
            .complete_login(Some(&session), &request(None), &callback("nope"))
            .await;
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(body_text(response).await, "custom");
    }

    #[tokio::test]
    async fn logout_runs_hook_before_clearing() {
        let observed = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&observed);
        let server = builder_with(FakeProvider::with_userinfo(json!({"email": "a@example.com"})))
            .on_logout(Arc::new(move |session: &Session, _: &RequestInfo| {
                *sink.lock().expect("lock") = session.get("email");
            }))
            .build()
            .expect("server");
        let session = Session::new(SessionId::new(), chrono::Duration::hours(1));
        let _ = login(&server, &session, "https://example.com/").await;

        let response = server.logout(
            Some(&session),
            &request(Some("https://example.com/page?x=1")),
        );

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), "/page?x=1");
        assert_eq!(*observed.lock().expect("lock"), Some(json!("a@example.com")));
        assert!(SessionIdentity::load(&session, server.keys()).is_none());
        assert!(session.get("oauth2token").is_none());
    }

    #[test]
    fn logout_without_session_still_redirects() {
        let server = builder_with(FakeProvider::with_userinfo(json!({})))
            .build()
            .expect("server");
        let response = server.logout(None, &request(Some("https://evil.com/")));
        assert_eq!(location(&response), "/");
    }

    #[test]
    fn admin_policy() {
        let unconfigured = AuthServer::builder().build().expect("server");
        assert!(!unconfigured.is_configured());
        unconfigured.set_admins(["admin@example.com"]);
        assert!(unconfigured.is_admin("user@example.com"));

        let server = builder_with(FakeProvider::with_userinfo(json!({})))
            .build()
            .expect("server");
        assert!(server.is_configured());
        assert!(server.is_admin("user@example.com"));

        server.set_admins(["Test User <a@B.COM>", "admin@example.com"]);
        assert_eq!(server.admins(), vec!["a@b.com", "admin@example.com"]);
        assert!(server.is_admin("a@b.com"));
        assert!(!server.is_admin("user@example.com"));
    }

    #[tokio::test]
    async fn forbidden_handler_is_replaceable() {
        let server = AuthServer::builder().build().expect("server");
        let info = request(None);
        assert_eq!(server.forbidden(&info).status(), StatusCode::FORBIDDEN);

        server.set_forbidden_handler(Some(Arc::new(|_: &RequestInfo| {
            (StatusCode::NOT_FOUND, "hidden").into_response()
        })));
        assert_eq!(server.forbidden(&info).status(), StatusCode::NOT_FOUND);

        server.set_forbidden_handler(None);
        let response = server.forbidden(&info);
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_text(response).await, crate::error::FORBIDDEN_BODY);
    }

    #[test]
    fn invalid_config_fails_build() {
        let mut config = serde_json::to_value(crate::auth::testing::test_config()).expect("json");
        config["token_url"] = json!("not a url");
        let config: OAuth2Config = serde_json::from_value(config).expect("config");

        let result = AuthServer::builder().oauth2(Some(config)).build();
        assert!(result.is_err());
    }

    #[test]
    fn ensure_session_creates_once() {
        let server = AuthServer::builder().build().expect("server");
        let (jar, session) = server.ensure_session(CookieJar::new());
        let cookie = jar.get("session").expect("cookie set");
        assert_eq!(cookie.value(), session.id().to_string());
        assert_eq!(cookie.http_only(), Some(true));

        let (_, again) = server.ensure_session(jar);
        assert!(again.same_as(&session));
    }

    #[test]
    fn unknown_session_cookie_is_ignored() {
        let store = Arc::new(MemorySessionStore::new());
        let server = AuthServer::builder()
            .store(store.clone())
            .build()
            .expect("server");
        let jar = CookieJar::new().add(Cookie::new("session", SessionId::new().to_string()));
        assert!(server.session(&jar).is_none());

        let created = store.create();
        let jar = CookieJar::new().add(Cookie::new("session", created.id().to_string()));
        assert!(server.session(&jar).is_some_and(|s| s.same_as(&created)));
    }

    #[test]
    fn expired_session_cookie_gets_a_fresh_session() {
        let server = AuthServer::builder()
            .session(SessionConfig {
                duration_minutes: -1,
                ..SessionConfig::default()
            })
            .build()
            .expect("server");
        let (jar, first) = server.ensure_session(CookieJar::new());
        assert!(first.is_expired());
        assert!(server.session(&jar).is_none());

        let (_, second) = server.ensure_session(jar);
        assert!(!second.same_as(&first));
        assert_eq!(server.cleanup_expired_sessions(), 1);
    }

    #[test]
    fn cleanup_reclaims_anonymous_sessions() {
        let store = Arc::new(MemorySessionStore::with_lifetime(chrono::Duration::seconds(-1)));
        let server = AuthServer::builder()
            .store(store.clone())
            .build()
            .expect("server");
        for _ in 0..100 {
            let _ = server.ensure_session(CookieJar::new());
        }
        assert_eq!(store.len(), 100);
        assert_eq!(server.cleanup_expired_sessions(), 100);
        assert!(store.is_empty());
    }

    #[derive(Default)]
    struct AtomicLogins(std::sync::atomic::AtomicUsize);

    impl AtomicLogins {
        fn record(&self) {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }

        fn count(&self) -> usize {
            self.0.load(std::sync::atomic::Ordering::SeqCst)
        }
    }
}
