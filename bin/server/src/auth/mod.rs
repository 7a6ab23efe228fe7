//! Authentication module for the turnstile server.
//!
//! This module provides:
//! - The OAuth2 Authorization Code login flow (`AuthServer`)
//! - Login, callback and logout routes derived from the callback URL
//! - Access gate middleware and the `AuthView` extractor for Axum routes
//! - The provider transport built on the `oauth2` crate
//!
//! # Access Model
//!
//! A session is anonymous until the callback stores the provider's userinfo
//! document in it. Gated routes send anonymous sessions into the login flow.
//! Admin-gated routes additionally require the session's email to be in the
//! administrator set.
//!
//! Both checks fail open: without OAuth2 configuration the gates pass every
//! request, and with an empty administrator set every logged-in identity is
//! an administrator. Treat a missing `oauth2` block or `admins` list as
//! disabling protection, not as denying access.

pub mod flow;
pub mod middleware;
pub mod provider;
pub mod routes;

#[cfg(test)]
pub(crate) mod testing;

pub use flow::{
    AuthServer, AuthServerBuilder, CallbackQuery, ForbiddenHandler, LoginFailedHook,
    LoginFailure, LoginHook, LogoutHook, RequestInfo,
};
pub use middleware::{AuthView, require_admin, require_auth};
pub use provider::{IdentityProvider, OAuth2Provider, ProviderError};
pub use routes::{callback, flow_router, login, logout};
