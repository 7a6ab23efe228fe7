//! Cookie-identified session storage.
//!
//! A [`Session`] is a small key-value bag shared by every request that
//! presents the same session cookie. The access layer reads and writes a few
//! reserved keys in it; the rest belongs to the application. Sessions live in
//! memory only and do not survive a restart.
//!
//! Every session has a fixed lifetime. Stores treat an expired session as
//! absent, and [`SessionStore::cleanup_expired`] reclaims the ones nobody
//! asks for again.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::watch;
use turnstile_core::SessionId;

/// Names of the session keys that carry the logged-in identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionKeys {
    /// Key holding the userinfo document.
    /// Default: "oauth2userinfo"
    #[serde(default = "default_identity_key")]
    pub identity: String,
    /// Key holding the canonical email.
    /// Default: "email"
    #[serde(default = "default_email_key")]
    pub email: String,
    /// Key holding the provider token response.
    /// Default: "oauth2token"
    #[serde(default = "default_token_key")]
    pub token: String,
}

fn default_identity_key() -> String {
    "oauth2userinfo".to_string()
}

fn default_email_key() -> String {
    "email".to_string()
}

fn default_token_key() -> String {
    "oauth2token".to_string()
}

impl Default for SessionKeys {
    fn default() -> Self {
        Self {
            identity: default_identity_key(),
            email: default_email_key(),
            token: default_token_key(),
        }
    }
}

#[derive(Debug)]
struct SessionInner {
    id: SessionId,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    values: Mutex<HashMap<String, Value>>,
    dirty: watch::Sender<u64>,
}

/// Handle to a session's values. Clones share the same underlying session.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Creates an empty session valid for `lifetime`.
    #[must_use]
    pub fn new(id: SessionId, lifetime: Duration) -> Self {
        let (dirty, _) = watch::channel(0);
        let now = Utc::now();
        Self {
            inner: Arc::new(SessionInner {
                id,
                created_at: now,
                expires_at: now + lifetime,
                values: Mutex::new(HashMap::new()),
                dirty,
            }),
        }
    }

    /// Returns the session ID.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    /// Returns when the session was created.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    /// Returns when the session expires.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.inner.expires_at
    }

    /// Returns true if the session has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.inner.expires_at
    }

    fn values(&self) -> MutexGuard<'_, HashMap<String, Value>> {
        self.inner
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a copy of the value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.values().get(key).cloned()
    }

    /// Stores `value` under `key`, or removes the key when `value` is `None`.
    pub fn set(&self, key: &str, value: Option<Value>) {
        let mut values = self.values();
        match value {
            Some(value) => {
                values.insert(key.to_string(), value);
            }
            None => {
                values.remove(key);
            }
        }
    }

    /// Removes and returns the value under `key` in one step.
    ///
    /// Two concurrent callers never both observe the same value.
    pub fn take(&self, key: &str) -> Option<Value> {
        self.values().remove(key)
    }

    /// Signals subscribers that the session's identity changed.
    pub fn mark_dirty(&self) {
        self.inner.dirty.send_modify(|generation| *generation += 1);
    }

    /// Subscribes to dirty notifications; the value is a change counter.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.dirty.subscribe()
    }

    /// Returns true if both handles refer to the same session.
    #[must_use]
    pub fn same_as(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Storage for sessions, looked up by the ID carried in the session cookie.
pub trait SessionStore: Send + Sync {
    /// Returns the session with the given ID, if it exists and has not
    /// expired.
    fn get(&self, id: &SessionId) -> Option<Session>;

    /// Creates and stores a new, empty session.
    fn create(&self) -> Session;

    /// Removes expired sessions, returning how many were removed.
    fn cleanup_expired(&self) -> usize;
}

/// Session lifetime, in minutes, used by [`MemorySessionStore::new`].
pub const DEFAULT_SESSION_LIFETIME_MINUTES: i64 = 12 * 60;

/// In-memory session store.
#[derive(Debug)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
    lifetime: Duration,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::with_lifetime(Duration::minutes(DEFAULT_SESSION_LIFETIME_MINUTES))
    }
}

impl MemorySessionStore {
    /// Creates an empty store with the default session lifetime.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store whose sessions live for `lifetime`.
    #[must_use]
    pub fn with_lifetime(lifetime: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            lifetime,
        }
    }

    /// Returns the number of stored sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true if no sessions are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, id: &SessionId) -> Option<Session> {
        let session = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()?;
        if !session.is_expired() {
            return Some(session);
        }

        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        if sessions.get(id).is_some_and(|s| s.same_as(&session)) {
            sessions.remove(id);
        }
        tracing::debug!(session_id = %id, "dropped expired session");
        None
    }

    fn create(&self) -> Session {
        let session = Session::new(SessionId::new(), self.lifetime);
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session.id(), session.clone());
        tracing::debug!(session_id = %session.id(), "created session");
        session
    }

    fn cleanup_expired(&self) -> usize {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_expired());
        before - sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn session_keys_have_documented_defaults() {
        let keys = SessionKeys::default();
        assert_eq!(keys.identity, "oauth2userinfo");
        assert_eq!(keys.email, "email");
        assert_eq!(keys.token, "oauth2token");
    }

    #[test]
    fn session_keys_deserialize_with_defaults() {
        let keys: SessionKeys = serde_json::from_str(r#"{"email": "user_email"}"#).expect("deserialize");
        assert_eq!(keys.email, "user_email");
        assert_eq!(keys.identity, "oauth2userinfo");
    }

    #[test]
    fn set_get_and_remove() {
        let session = Session::new(SessionId::new(), Duration::hours(1));
        session.set("k", Some(json!("v")));
        assert_eq!(session.get("k"), Some(json!("v")));

        session.set("k", None);
        assert_eq!(session.get("k"), None);
    }

    #[test]
    fn take_consumes_value_once() {
        let session = Session::new(SessionId::new(), Duration::hours(1));
        session.set("once", Some(json!(1)));
        assert_eq!(session.take("once"), Some(json!(1)));
        assert_eq!(session.take("once"), None);
    }

    #[test]
    fn clones_share_values() {
        let session = Session::new(SessionId::new(), Duration::hours(1));
        let other = session.clone();
        other.set("shared", Some(json!(true)));
        assert_eq!(session.get("shared"), Some(json!(true)));
        assert!(session.same_as(&other));
    }

    #[test]
    fn mark_dirty_notifies_subscribers() {
        let session = Session::new(SessionId::new(), Duration::hours(1));
        let mut rx = session.subscribe();
        assert!(!rx.has_changed().expect("sender alive"));

        session.mark_dirty();
        assert!(rx.has_changed().expect("sender alive"));
        assert_eq!(*rx.borrow_and_update(), 1);
    }

    #[test]
    fn store_creates_and_finds_sessions() {
        let store = MemorySessionStore::new();
        assert!(store.is_empty());

        let session = store.create();
        let found = store.get(&session.id()).expect("stored");
        assert!(found.same_as(&session));
        assert_eq!(store.len(), 1);

        assert!(store.get(&SessionId::new()).is_none());
    }

    #[test]
    fn new_session_expires_after_lifetime() {
        let session = Session::new(SessionId::new(), Duration::minutes(30));
        assert!(!session.is_expired());
        assert_eq!(session.expires_at() - session.created_at(), Duration::minutes(30));

        let expired = Session::new(SessionId::new(), Duration::seconds(-1));
        assert!(expired.is_expired());
    }

    #[test]
    fn expired_session_is_absent_and_evicted() {
        let store = MemorySessionStore::with_lifetime(Duration::seconds(-1));
        let session = store.create();
        assert_eq!(store.len(), 1);

        assert!(store.get(&session.id()).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn cleanup_removes_only_expired_sessions() {
        let expired = MemorySessionStore::with_lifetime(Duration::seconds(-1));
        for _ in 0..5 {
            expired.create();
        }
        assert_eq!(expired.cleanup_expired(), 5);
        assert!(expired.is_empty());

        let live = MemorySessionStore::new();
        let session = live.create();
        assert_eq!(live.cleanup_expired(), 0);
        assert!(live.get(&session.id()).is_some());
    }
}
