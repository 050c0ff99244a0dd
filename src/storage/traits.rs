//! Storage trait definitions for the collaborators of the authorization core.
//!
//! Defines async interfaces for the client directory, the user directory, the
//! signing key store and the single-use authorization code cache.

use crate::errors::StorageError;
use crate::oauth::types::*;
use async_trait::async_trait;
use chrono::Duration;
use serde::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, StorageError>;

/// Trait for looking up and saving OAuth clients
#[async_trait]
pub trait ClientStore: Send + Sync {
    /// Retrieve a client by ID
    async fn get_client(&self, client_id: &str) -> Result<Option<ClientRecord>>;

    /// Insert or replace a client record
    async fn store_client(&self, client: &ClientRecord) -> Result<()>;

    /// Replace the client's refresh token, invalidating the previous one
    async fn update_refresh_token(&self, client_id: &str, refresh_token: &str) -> Result<()>;
}

/// Trait for looking up resource owners
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Retrieve a user by ID or email address
    async fn get_user(&self, id_or_email: &str) -> Result<Option<UserRecord>>;

    /// Insert or replace a user record
    async fn store_user(&self, user: &UserRecord) -> Result<()>;
}

/// Logical slot a signing key occupies in the key store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySlot {
    Current,
    Previous,
}

/// Persisted signing key (JWK members, private component included)
#[derive(Clone, Serialize, Deserialize)]
pub struct KeyRecord {
    pub slot: KeySlot,
    pub kid: String,
    pub kty: String,
    pub crv: String,
    pub alg: String,
    #[serde(rename = "use")]
    pub key_use: String,
    pub x: String,
    pub y: String,
    pub d: String,
}

impl std::fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRecord")
            .field("slot", &self.slot)
            .field("kid", &self.kid)
            .field("crv", &self.crv)
            .field("alg", &self.alg)
            .finish_non_exhaustive()
    }
}

/// Trait for storing and retrieving signing keys
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Store a key in its slot, replacing whatever occupied it
    async fn store_key(&self, record: &KeyRecord) -> Result<()>;

    /// List all persisted keys
    async fn list_keys(&self) -> Result<Vec<KeyRecord>>;

    /// Remove every persisted key
    async fn clear_keys(&self) -> Result<()>;
}

/// Single-use, TTL-bounded cache of outstanding authorization codes.
///
/// Keyed by client identity: at most one live code per client.
#[async_trait]
pub trait AuthorizationCodeCache: Send + Sync {
    /// Store the client's code, overwriting any previous entry
    async fn put_code(&self, client_id: &str, code: &str, ttl: Duration) -> Result<()>;

    /// Whether the client has a live entry
    async fn contains_code(&self, client_id: &str) -> Result<bool>;

    /// Atomically remove the client's entry if it is live and holds `code`.
    ///
    /// Returns `true` for exactly one caller per stored code.
    async fn consume_code(&self, client_id: &str, code: &str) -> Result<bool>;

    /// Drop expired entries, returning how many were removed
    async fn cleanup_expired_codes(&self) -> Result<usize>;
}

// ===== Combined Storage Trait =====

/// Combined collaborator storage trait
pub trait OAuthStorage: ClientStore + UserStore + KeyStore + Send + Sync {}
