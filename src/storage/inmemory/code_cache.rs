//! In-memory single-use authorization code cache
//!
//! Entries are keyed by client identity and expire after their TTL. Consumption
//! is a conditional remove on the owning shard, so concurrent redemptions of the
//! same code resolve to a single winner.

use crate::clock::{Clock, SystemClock};
use crate::storage::traits::{AuthorizationCodeCache, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct CachedCode {
    code: String,
    expires_at: DateTime<Utc>,
}

/// In-memory code cache (for testing/development)
pub struct MemoryAuthorizationCodeCache {
    codes: DashMap<String, CachedCode>,
    clock: Arc<dyn Clock>,
}

impl MemoryAuthorizationCodeCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            codes: DashMap::new(),
            clock,
        }
    }
}

impl Default for MemoryAuthorizationCodeCache {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[async_trait]
impl AuthorizationCodeCache for MemoryAuthorizationCodeCache {
    async fn put_code(&self, client_id: &str, code: &str, ttl: Duration) -> Result<()> {
        let expires_at = self.clock.now() + ttl;
        self.codes.insert(
            client_id.to_string(),
            CachedCode {
                code: code.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn contains_code(&self, client_id: &str) -> Result<bool> {
        let now = self.clock.now();
        Ok(self
            .codes
            .get(client_id)
            .is_some_and(|entry| entry.expires_at > now))
    }

    async fn consume_code(&self, client_id: &str, code: &str) -> Result<bool> {
        let now = self.clock.now();
        let removed = self
            .codes
            .remove_if(client_id, |_, entry| entry.code == code && entry.expires_at > now);
        Ok(removed.is_some())
    }

    async fn cleanup_expired_codes(&self) -> Result<usize> {
        let now = self.clock.now();
        let before = self.codes.len();
        self.codes.retain(|_, entry| entry.expires_at > now);
        Ok(before.saturating_sub(self.codes.len()))
    }
}
