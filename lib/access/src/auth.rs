//! Login flow state kept in the session.
//!
//! - [`PendingAuth`]: the single-use `{state, referrer}` record of an
//!   in-flight login
//! - [`FlowPaths`]: the login, callback and logout paths derived from the
//!   callback URL
//! - [`StoredToken`]: the provider token retained after a successful login

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use turnstile_core::Document;
use url::Url;

use crate::session::{Session, SessionKeys};

/// Session key of the pending-auth record. Not configurable.
const PENDING_AUTH_KEY: &str = "oauth2pending";

/// State of a login that has been sent to the provider but not yet completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAuth {
    /// Opaque random token echoed back by the provider.
    pub state: String,
    /// Sanitized same-origin path to return to afterwards.
    pub referrer: String,
}

impl PendingAuth {
    /// Creates a pending-auth record.
    #[must_use]
    pub fn new(state: String, referrer: String) -> Self {
        Self { state, referrer }
    }

    /// Stores this record in `session`, replacing any earlier attempt.
    pub fn store(&self, session: &Session) {
        session.set(PENDING_AUTH_KEY, serde_json::to_value(self).ok());
    }

    /// Removes the pending-auth record from `session` and returns it.
    ///
    /// The record is cleared whether or not it decodes, so each issued state
    /// can be presented at most once.
    #[must_use]
    pub fn take(session: &Session) -> Option<Self> {
        session
            .take(PENDING_AUTH_KEY)
            .and_then(|value| serde_json::from_value(value).ok())
    }

    /// Returns the pending-auth record without consuming it.
    #[must_use]
    pub fn peek(session: &Session) -> Option<Self> {
        session
            .get(PENDING_AUTH_KEY)
            .and_then(|value| serde_json::from_value(value).ok())
    }

    /// Returns true if `state` matches the issued token.
    ///
    /// An empty issued token never matches.
    #[must_use]
    pub fn matches(&self, state: &str) -> bool {
        !self.state.is_empty() && self.state == state
    }
}

/// Provider token response retained in the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    pub token_type: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub authenticated_at: DateTime<Utc>,
}

/// Identity stored in a session after a successful login.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionIdentity {
    pub userinfo: Document,
    pub email: Option<String>,
}

impl SessionIdentity {
    /// Reads the identity from `session`, if one is stored.
    #[must_use]
    pub fn load(session: &Session, keys: &SessionKeys) -> Option<Self> {
        let userinfo = session
            .get(&keys.identity)
            .and_then(Document::from_value)?;
        let email = session
            .get(&keys.email)
            .and_then(|v| v.as_str().map(str::to_string));
        Some(Self { userinfo, email })
    }

    /// Writes the identity and token into `session` and marks it dirty.
    ///
    /// An absent email removes any email left by an earlier login.
    pub fn store(&self, session: &Session, keys: &SessionKeys, token: Option<&StoredToken>) {
        session.set(&keys.identity, Some(self.userinfo.clone().into_value()));
        session.set(
            &keys.email,
            self.email.clone().map(serde_json::Value::String),
        );
        session.set(
            &keys.token,
            token.and_then(|t| serde_json::to_value(t).ok()),
        );
        session.mark_dirty();
    }
}

/// Removes identity, email and token from `session` and marks it dirty.
pub fn clear_identity(session: &Session, keys: &SessionKeys) {
    session.set(&keys.identity, None);
    session.set(&keys.email, None);
    session.set(&keys.token, None);
    session.mark_dirty();
}

/// Returns true if `session` holds a logged-in identity.
#[must_use]
pub fn has_identity(session: &Session, keys: &SessionKeys) -> bool {
    session.get(&keys.identity).is_some()
}

/// Paths served by the login flow, derived from the callback URL.
///
/// The callback path comes from the redirect URL. `login` and `logout` sit in
/// the same directory. A path that coincides with another is registered once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowPaths {
    callback: String,
    login: String,
    logout: String,
    handled: BTreeSet<String>,
}

impl FlowPaths {
    /// Derives the flow paths from the (effective) redirect URL.
    #[must_use]
    pub fn from_redirect_url(url: &Url) -> Self {
        let callback = url.path().to_string();
        let dir = match callback.rsplit_once('/') {
            Some((dir, _)) => dir,
            None => "",
        };
        let login = format!("{dir}/login");
        let logout = format!("{dir}/logout");

        let handled = [&callback, &login, &logout]
            .into_iter()
            .cloned()
            .collect();

        Self {
            callback,
            login,
            logout,
            handled,
        }
    }

    #[must_use]
    pub fn callback(&self) -> &str {
        &self.callback
    }

    #[must_use]
    pub fn login(&self) -> &str {
        &self.login
    }

    #[must_use]
    pub fn logout(&self) -> &str {
        &self.logout
    }

    /// Returns the distinct handled paths in sorted order.
    pub fn handled(&self) -> impl Iterator<Item = &str> {
        self.handled.iter().map(String::as_str)
    }

    /// Strips a trailing flow path from `location` so a login started from an
    /// auth endpoint does not return to it.
    ///
    /// Only the first matching path (in sorted order) is stripped. A result
    /// that becomes empty is `"/"`.
    #[must_use]
    pub fn strip_suffix(&self, location: &str) -> String {
        for path in &self.handled {
            if let Some(head) = location.strip_suffix(path.as_str()) {
                if head.is_empty() {
                    return "/".to_string();
                }
                return head.to_string();
            }
        }
        location.to_string()
    }
}
