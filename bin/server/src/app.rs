//! Application router.

use axum::{Router, middleware::from_fn_with_state, routing::get};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::auth::{AuthServer, flow_router, require_admin, require_auth};
use crate::pages;

/// Builds the demo application: the flow routes, a gated `/` and an
/// admin-gated `/admin`.
pub fn app(server: Arc<AuthServer>) -> Router {
    let protected = Router::new()
        .route("/", get(pages::home))
        .route_layer(from_fn_with_state(Arc::clone(&server), require_auth));

    let admin = Router::new()
        .route("/admin", get(pages::admin))
        .route_layer(from_fn_with_state(Arc::clone(&server), require_admin));

    Router::new()
        .merge(protected)
        .merge(admin)
        .with_state(Arc::clone(&server))
        .merge(flow_router(server))
        .layer(TraceLayer::new_for_http())
}
