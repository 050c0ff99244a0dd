//! OAuth 2.0 authorization server core library crate.
//!
//! Issues self-signed single-use authorization codes and ES256 access tokens,
//! publishes a rotating key set and validates authorization requests.

pub mod clock;
pub mod config;
pub mod errors;
pub mod oauth;
pub mod storage;
