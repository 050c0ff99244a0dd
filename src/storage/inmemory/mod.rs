//! In-memory storage implementations
//!
//! This module provides in-memory implementations of all storage traits.
//! These implementations are suitable for development and testing.

mod code_cache;
mod oauth;

pub use code_cache::MemoryAuthorizationCodeCache;
pub use oauth::MemoryOAuthStorage;
