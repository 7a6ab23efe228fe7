//! Core types and utilities for turnstile.
//!
//! This crate provides the error handling foundation, the session
//! identifier, and the provider userinfo document shared by the
//! access-control library and the server.

pub mod document;
pub mod error;
pub mod id;

pub use document::Document;
pub use error::Result;
pub use id::{ParseIdError, SessionId};
