//! # Authentication Module
//!
//! Credential state for the request client.
//!
//! ## Overview
//!
//! This crate owns the access/refresh token pair used to authenticate
//! requests. It restores persisted tokens at construction, derives the
//! `Authorization` header, and coordinates token refresh so that any number
//! of concurrent callers share a single refresh call.
//!
//! ## Features
//!
//! - `{unauthenticated, authenticated}` state where being authenticated always carries a token
//! - Token persistence through the injected key-value store
//! - Expiry-aware state that clears itself once the token has expired
//! - Single-flight refresh
//! - Auth lifecycle events on the shared event bus
//! - Forced logout signal to the host environment

pub mod error;
pub mod manager;
pub mod token_store;
pub mod types;

pub use error::{AuthError, Result};
pub use manager::{AuthManager, Subscription, AUTHORIZATION_HEADER};
pub use token_store::TokenStore;
pub use types::{AuthState, AuthToken, DEFAULT_TOKEN_TYPE};
