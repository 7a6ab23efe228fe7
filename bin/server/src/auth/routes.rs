//! Authentication routes for login, callback, and logout.

use axum::{
    Router,
    extract::{Query, State, rejection::QueryRejection},
    http::{HeaderMap, Uri},
    response::Response,
    routing::get,
};
use axum_extra::extract::CookieJar;
use std::sync::Arc;

use super::flow::{AuthServer, CallbackQuery, RequestInfo};

/// Builds the router serving the flow paths.
///
/// Each derived path is routed once; when the callback path coincides with
/// the login or logout path, the callback handler serves it. An unconfigured
/// server gets an empty router.
pub fn flow_router(server: Arc<AuthServer>) -> Router {
    let mut router = Router::new();
    if let Some(paths) = server.paths() {
        router = router.route(paths.callback(), get(callback));
        if paths.login() != paths.callback() {
            router = router.route(paths.login(), get(login));
        }
        if paths.logout() != paths.callback() && paths.logout() != paths.login() {
            router = router.route(paths.logout(), get(logout));
        }
    }
    router.with_state(server)
}

/// Starts the login flow by redirecting to the identity provider.
pub async fn login(
    State(server): State<Arc<AuthServer>>,
    jar: CookieJar,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let session = server.session(&jar);
    let info = RequestInfo::from_parts(&headers, &uri);
    server.begin_login(session.as_ref(), &info)
}

/// Handles the callback after the user authenticates with the identity provider.
///
/// An undecodable query carries no usable state, so it is completed with an
/// empty one and fails like any other mismatch.
pub async fn callback(
    State(server): State<Arc<AuthServer>>,
    query: Result<Query<CallbackQuery>, QueryRejection>,
    jar: CookieJar,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let query = match query {
        Ok(Query(query)) => query,
        Err(rejection) => {
            tracing::debug!(error = %rejection, "undecodable callback query");
            CallbackQuery::default()
        }
    };
    let session = server.session(&jar);
    let info = RequestInfo::from_parts(&headers, &uri);
    server.complete_login(session.as_ref(), &info, &query).await
}

/// Logs out by clearing the session's identity.
pub async fn logout(
    State(server): State<Arc<AuthServer>>,
    jar: CookieJar,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let session = server.session(&jar);
    let info = RequestInfo::from_parts(&headers, &uri);
    server.logout(session.as_ref(), &info)
}
