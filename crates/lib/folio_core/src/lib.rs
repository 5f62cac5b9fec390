//! # folio_core
//!
//! Core authentication domain logic for Folio: credentials, session tokens,
//! admin MFA, OAuth2 federation and brute-force lockout. No HTTP types live here.

pub mod auth;
pub mod cache;
pub mod config;
pub mod crypto;
pub mod migrate;
pub mod models;
pub mod oauth;
pub mod repository;
pub mod retry;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
