//! Trait-based storage abstractions for the authorization core's collaborators.

pub mod inmemory;
pub mod traits;

// Re-export commonly used types and traits
pub use inmemory::{MemoryAuthorizationCodeCache, MemoryOAuthStorage};
pub use traits::*;
