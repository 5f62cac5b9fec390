//! Domain models shared by the auth services and the storage backends.

pub mod auth;
pub mod oauth;
