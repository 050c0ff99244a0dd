//! In-memory OAuth storage implementation
//!
//! This module provides in-memory implementations for the client directory,
//! user directory and key store traits.

use crate::errors::StorageError;
use crate::oauth::types::*;
use crate::storage::traits::*;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

pub type Result<T> = std::result::Result<T, StorageError>;

/// In-memory implementation for OAuth storage
#[derive(Default)]
pub struct MemoryOAuthStorage {
    clients: Mutex<HashMap<String, ClientRecord>>,
    users: Mutex<HashMap<String, UserRecord>>,
    keys: Mutex<HashMap<KeySlot, String>>, // Store as serialized KeyRecord JSON
}

impl MemoryOAuthStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock_error<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::LockFailed(e.to_string())
}

#[async_trait]
impl ClientStore for MemoryOAuthStorage {
    async fn get_client(&self, client_id: &str) -> Result<Option<ClientRecord>> {
        let clients = self.clients.lock().map_err(lock_error)?;
        Ok(clients.get(client_id).cloned())
    }

    async fn store_client(&self, client: &ClientRecord) -> Result<()> {
        let mut clients = self.clients.lock().map_err(lock_error)?;
        clients.insert(client.client_id.clone(), client.clone());
        Ok(())
    }

    async fn update_refresh_token(&self, client_id: &str, refresh_token: &str) -> Result<()> {
        let mut clients = self.clients.lock().map_err(lock_error)?;
        match clients.get_mut(client_id) {
            Some(client) => {
                client.refresh_token = Some(refresh_token.to_string());
                Ok(())
            }
            None => Err(StorageError::NotFound(format!("client {}", client_id))),
        }
    }
}

#[async_trait]
impl UserStore for MemoryOAuthStorage {
    async fn get_user(&self, id_or_email: &str) -> Result<Option<UserRecord>> {
        let users = self.users.lock().map_err(lock_error)?;
        if let Some(user) = users.get(id_or_email) {
            return Ok(Some(user.clone()));
        }
        Ok(users.values().find(|u| u.email == id_or_email).cloned())
    }

    async fn store_user(&self, user: &UserRecord) -> Result<()> {
        let mut users = self.users.lock().map_err(lock_error)?;
        users.insert(user.id.clone(), user.clone());
        Ok(())
    }
}

#[async_trait]
impl KeyStore for MemoryOAuthStorage {
    async fn store_key(&self, record: &KeyRecord) -> Result<()> {
        let serialized = serde_json::to_string(record)
            .map_err(|e| StorageError::SerializationFailed(e.to_string()))?;
        let mut keys = self.keys.lock().map_err(lock_error)?;
        keys.insert(record.slot, serialized);
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<KeyRecord>> {
        let keys = self.keys.lock().map_err(lock_error)?;
        let mut records = keys
            .values()
            .map(|serialized| {
                serde_json::from_str::<KeyRecord>(serialized)
                    .map_err(|e| StorageError::SerializationFailed(e.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;
        records.sort_by_key(|record| match record.slot {
            KeySlot::Current => 0,
            KeySlot::Previous => 1,
        });
        Ok(records)
    }

    async fn clear_keys(&self) -> Result<()> {
        let mut keys = self.keys.lock().map_err(lock_error)?;
        keys.clear();
        Ok(())
    }
}

impl OAuthStorage for MemoryOAuthStorage {}
