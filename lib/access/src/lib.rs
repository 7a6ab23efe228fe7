//! OAuth2 login gate building blocks for turnstile.
//!
//! This crate provides:
//! - Provider configuration (`OAuth2Config`, `OAuth2ConfigBuilder`)
//! - Open-redirect-safe target handling (`sanitize_redirect_target`)
//! - Canonical email identities (`IdentityExtractor`, `normalize_email`)
//! - Administrator membership (`AdminRegistry`)
//! - Session storage and the login state kept in it (`Session`, `PendingAuth`)
//! - Error types for configuration and the login callback
//!
//! The HTTP surface lives in the server crate; nothing here depends on a web
//! framework.
//!
//! # Fail-open defaults
//!
//! Two defaults favour availability over protection and are security
//! relevant. A server without OAuth2 configuration lets every request
//! through, and an empty administrator set makes every logged-in identity an
//! administrator. Misconfiguration therefore disables protection rather than
//! denying access.
//!
//! # Example
//!
//! ```
//! use turnstile_access::{AdminRegistry, IdentityExtractor, sanitize_redirect_target};
//! use turnstile_core::Document;
//!
//! let target = sanitize_redirect_target("example.com", "https://evil.com/attack");
//! assert_eq!(target, "/");
//!
//! let userinfo = Document::from_slice(br#"{"mail": "Alt@Example.com"}"#).unwrap();
//! let email = IdentityExtractor::new().extract(&userinfo);
//! assert_eq!(email.as_deref(), Some("alt@example.com"));
//!
//! let admins = AdminRegistry::new();
//! admins.set_admins(["Test User <a@B.COM>"]);
//! assert!(admins.is_admin("a@b.com"));
//! ```

pub mod admin;
pub mod auth;
pub mod config;
pub mod error;
pub mod identity;
pub mod redirect;
pub mod session;

// Re-export main types at crate root
pub use admin::AdminRegistry;
pub use auth::{
    FlowPaths, PendingAuth, SessionIdentity, StoredToken, clear_identity, has_identity,
};
pub use config::{OAuth2Config, OAuth2ConfigBuilder};
pub use error::{ConfigError, FlowError};
pub use identity::{EMAIL_FIELDS, IdentityExtractor, MissingEmailHook, normalize_email, parse_mailbox};
pub use redirect::{normalize_host, sanitize_redirect_target};
pub use session::{
    DEFAULT_SESSION_LIFETIME_MINUTES, MemorySessionStore, Session, SessionKeys, SessionStore,
};
