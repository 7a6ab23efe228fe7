//! Access gate middleware and identity extractor for Axum.
//!
//! Protect routes with [`require_auth`] or [`require_admin`] through
//! `axum::middleware::from_fn_with_state`. Handlers behind either gate can
//! take an [`AuthView`] to read the logged-in identity.

use axum::{
    extract::{FromRef, FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use std::convert::Infallible;
use std::sync::Arc;
use turnstile_access::{Session, has_identity};
use turnstile_core::Document;

use super::flow::{AuthServer, RequestInfo};

/// Read-only view of the request's identity.
///
/// Safe on requests without a session: `email()` is empty, `is_admin()` is
/// false and `data()` is `None`.
#[derive(Clone)]
pub struct AuthView {
    server: Arc<AuthServer>,
    session: Option<Session>,
}

impl AuthView {
    #[must_use]
    pub fn new(server: Arc<AuthServer>, session: Option<Session>) -> Self {
        Self { server, session }
    }

    /// Returns the canonical email, or an empty string.
    #[must_use]
    pub fn email(&self) -> String {
        self.session
            .as_ref()
            .and_then(|s| s.get(&self.server.keys().email))
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default()
    }

    /// Returns true if the session's identity is an administrator.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.session.is_some() && self.server.is_admin(&self.email())
    }

    /// Returns the userinfo document stored at login.
    #[must_use]
    pub fn data(&self) -> Option<Document> {
        self.session
            .as_ref()
            .and_then(|s| s.get(&self.server.keys().identity))
            .and_then(Document::from_value)
    }

    /// Returns the underlying session, if any.
    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }
}

impl std::fmt::Debug for AuthView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthView")
            .field("session", &self.session.as_ref().map(Session::id))
            .finish_non_exhaustive()
    }
}

/// Uses the view left by a gate, or resolves the session cookie directly.
impl<S> FromRequestParts<S> for AuthView
where
    Arc<AuthServer>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(view) = parts.extensions.get::<AuthView>() {
            return Ok(view.clone());
        }
        let server = Arc::<AuthServer>::from_ref(state);
        let jar = CookieJar::from_headers(&parts.headers);
        let session = server.session(&jar);
        Ok(AuthView::new(server, session))
    }
}

/// Requires a logged-in identity before running the wrapped handler.
pub async fn require_auth(
    State(server): State<Arc<AuthServer>>,
    jar: CookieJar,
    request: Request,
    next: Next,
) -> Response {
    gate(server, false, jar, request, next).await
}

/// Requires a logged-in administrator before running the wrapped handler.
pub async fn require_admin(
    State(server): State<Arc<AuthServer>>,
    jar: CookieJar,
    request: Request,
    next: Next,
) -> Response {
    gate(server, true, jar, request, next).await
}

async fn gate(
    server: Arc<AuthServer>,
    admin: bool,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    if !server.is_configured() {
        let session = server.session(&jar);
        request
            .extensions_mut()
            .insert(AuthView::new(server, session));
        return next.run(request).await;
    }

    let (jar, session) = server.ensure_session(jar);
    let info = RequestInfo::from_parts(request.headers(), request.uri());

    if !has_identity(&session, server.keys()) {
        return (jar, server.begin_login(Some(&session), &info)).into_response();
    }

    let view = AuthView::new(Arc::clone(&server), Some(session));
    if admin && !view.is_admin() {
        tracing::info!(email = %view.email(), path = %info.uri(), "admin required");
        return (jar, server.forbidden(&info)).into_response();
    }

    request.extensions_mut().insert(view);
    (jar, next.run(request).await).into_response()
}
