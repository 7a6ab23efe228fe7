//! Server error types and error pages.
//!
//! - `SetupError`: failures while building the auth server, fatal at startup
//! - `error_page`: the default body for a failed login callback
//! - `forbidden_page`: the default 403 body for the admin gate

use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use std::fmt;
use turnstile_access::FlowError;

/// Errors from constructing the auth server.
#[derive(Debug)]
pub enum SetupError {
    /// The OAuth2 configuration is incomplete or malformed.
    InvalidConfig { details: String },
    /// The HTTP client for the provider could not be built.
    HttpClient { details: String },
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig { details } => {
                write!(f, "invalid oauth2 configuration: {}", details)
            }
            Self::HttpClient { details } => {
                write!(f, "failed to build http client: {}", details)
            }
        }
    }
}

impl std::error::Error for SetupError {}

/// Body served by the default forbidden handler.
pub const FORBIDDEN_BODY: &str = "<html><body><h1>403 Forbidden</h1></body></html>";

/// Escapes text for inclusion in HTML element content or attributes.
#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&#34;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Returns the HTTP status a flow error is reported with.
///
/// Upstream statuses that are not valid HTTP codes become 502.
#[must_use]
pub fn flow_status(error: &FlowError) -> StatusCode {
    StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::BAD_GATEWAY)
}

/// Renders the default error page for a failed login.
#[must_use]
pub fn error_page(status: StatusCode, error: &FlowError) -> Response {
    let body = format!(
        "<html><body><h2>{:03} {}</h2><p>{}</p></body></html>",
        status.as_u16(),
        status.canonical_reason().unwrap_or_default(),
        escape_html(&error.to_string()),
    );
    (status, Html(body)).into_response()
}

/// Renders the default 403 page.
#[must_use]
pub fn forbidden_page() -> Response {
    (StatusCode::FORBIDDEN, Html(FORBIDDEN_BODY)).into_response()
}
