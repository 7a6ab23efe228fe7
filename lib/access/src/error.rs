//! Error types for the access crate.
//!
//! - `ConfigError`: construction-time configuration failures
//! - `FlowError`: per-request failures of the login callback

use std::fmt;

/// Errors from validating an OAuth2 configuration.
///
/// These are fatal to startup and never surface per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required field is missing or blank.
    MissingField { field: &'static str },
    /// A URL field does not parse as an absolute URL.
    InvalidUrl {
        field: &'static str,
        reason: String,
    },
    /// No scopes were configured.
    MissingScopes,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField { field } => write!(f, "missing {field}"),
            Self::InvalidUrl { field, reason } => {
                write!(f, "invalid {field}: {reason}")
            }
            Self::MissingScopes => write!(f, "missing scopes"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Errors from completing an OAuth2 login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowError {
    /// The flow was invoked on an instance without OAuth2 configuration.
    NotConfigured,
    /// The request carries no session to hold the login state.
    MissingSession,
    /// The CSRF state is absent, mismatched or already consumed.
    WrongState,
    /// Exchanging the authorization code for a token failed.
    UpstreamExchangeFailed { details: String },
    /// Fetching userinfo failed or returned a non-200 status.
    UpstreamUserinfoFailed { status: u16, details: String },
    /// The userinfo body is not a JSON object.
    UserinfoDecodeFailed { details: String },
}

impl FlowError {
    /// Returns the HTTP status code this error is reported with.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotConfigured
            | Self::UpstreamExchangeFailed { .. }
            | Self::UserinfoDecodeFailed { .. } => 500,
            Self::MissingSession | Self::WrongState => 400,
            Self::UpstreamUserinfoFailed { status, .. } => *status,
        }
    }
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConfigured => write!(f, "oauth2 not configured"),
            Self::MissingSession => write!(f, "oauth2 missing session"),
            Self::WrongState => write!(f, "oauth2 wrong state"),
            Self::UpstreamExchangeFailed { details } => {
                write!(f, "oauth2 token exchange failed: {details}")
            }
            Self::UpstreamUserinfoFailed { status, details } => {
                write!(f, "oauth2 userinfo request failed with status {status}: {details}")
            }
            Self::UserinfoDecodeFailed { details } => {
                write!(f, "oauth2 userinfo decode failed: {details}")
            }
        }
    }
}

impl std::error::Error for FlowError {}
