//! turnstile web server.
//!
//! Serves the OAuth2 login flow and a small demo application whose pages
//! sit behind the access gate.

pub mod app;
pub mod auth;
pub mod config;
pub mod error;
pub mod pages;
