//! Self-signed, single-use authorization codes.
//!
//! A code is a compact JWS over [`AuthorizationCodeClaims`]. The signed token
//! is also parked in the [`AuthorizationCodeCache`] under the client id, and a
//! redemption only succeeds for the caller that removes that entry.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::clock::Clock;
use crate::errors::{KeyError, TokenError};
use crate::oauth::keys::{KeyManager, decode_unverified};
use crate::storage::traits::AuthorizationCodeCache;

/// Claims carried by an authorization code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationCodeClaims {
    pub client_id: String,
    pub redirect_uri: String,
    pub user_subject: String,
    /// Unique per issued code
    pub code_id: String,
    /// Unix timestamp in seconds
    pub expires_at: i64,
}

/// Issues and redeems authorization codes
pub struct AuthorizationCodeService {
    keys: Arc<KeyManager>,
    cache: Arc<dyn AuthorizationCodeCache>,
    clock: Arc<dyn Clock>,
    code_lifetime: Duration,
}

impl AuthorizationCodeService {
    pub fn new(
        keys: Arc<KeyManager>,
        cache: Arc<dyn AuthorizationCodeCache>,
        clock: Arc<dyn Clock>,
        code_lifetime: Duration,
    ) -> Self {
        Self {
            keys,
            cache,
            clock,
            code_lifetime,
        }
    }

    /// Mint a code for the client, replacing any code it still has outstanding.
    pub async fn issue_code(
        &self,
        client_id: &str,
        redirect_uri: &str,
        user_subject: &str,
    ) -> Result<String, KeyError> {
        let claims = AuthorizationCodeClaims {
            client_id: client_id.to_string(),
            redirect_uri: redirect_uri.to_string(),
            user_subject: user_subject.to_string(),
            code_id: uuid::Uuid::new_v4().to_string(),
            expires_at: (self.clock.now() + self.code_lifetime).timestamp(),
        };

        let code = self.keys.sign(&claims).await?;
        self.cache
            .put_code(client_id, &code, self.code_lifetime)
            .await?;

        debug!(client_id, code_id = %claims.code_id, "issued authorization code");
        Ok(code)
    }

    /// Redeem a code on behalf of `presenting_client_id`.
    ///
    /// Succeeds at most once per issued code.
    pub async fn redeem_code(
        &self,
        code: &str,
        presenting_client_id: &str,
        redirect_uri: &str,
    ) -> Result<AuthorizationCodeClaims, TokenError> {
        let claims: AuthorizationCodeClaims = decode_unverified(code).map_err(|error| {
            error!(%error, "unparsable authorization code");
            TokenError::ServerError
        })?;

        if claims.redirect_uri != redirect_uri {
            return Err(TokenError::InvalidRequest);
        }

        if !self.cache.contains_code(presenting_client_id).await? {
            debug!(presenting_client_id, "no outstanding code for client");
            return Err(TokenError::InvalidGrant);
        }

        if self.clock.now().timestamp() > claims.expires_at {
            return Err(TokenError::InvalidGrant);
        }

        let verified: AuthorizationCodeClaims = match self.keys.verify(code).await {
            Ok(verified) => verified,
            Err(KeyError::InvalidSignature) => {
                warn!(presenting_client_id, "authorization code signature rejected");
                return Err(TokenError::InvalidGrant);
            }
            Err(e) => return Err(e.into()),
        };

        if !self.cache.consume_code(presenting_client_id, code).await? {
            debug!(presenting_client_id, code_id = %verified.code_id, "authorization code already consumed");
            return Err(TokenError::InvalidGrant);
        }

        Ok(verified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::{MemoryAuthorizationCodeCache, MemoryOAuthStorage};

    struct Fixture {
        codes: AuthorizationCodeService,
        cache: Arc<MemoryAuthorizationCodeCache>,
        keys: Arc<KeyManager>,
        clock: ManualClock,
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::default();
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let keys = Arc::new(KeyManager::new(
            Arc::new(MemoryOAuthStorage::new()),
            shared_clock.clone(),
            Duration::days(14),
        ));
        let cache = Arc::new(MemoryAuthorizationCodeCache::new(shared_clock.clone()));
        let codes = AuthorizationCodeService::new(
            keys.clone(),
            cache.clone(),
            shared_clock,
            Duration::minutes(3),
        );
        Fixture {
            codes,
            cache,
            keys,
            clock,
        }
    }

    #[tokio::test]
    async fn test_issue_and_redeem() {
        let f = fixture();
        let code = f
            .codes
            .issue_code("client-a", "https://app/callback", "user@example.com")
            .await
            .unwrap();

        let claims = f
            .codes
            .redeem_code(&code, "client-a", "https://app/callback")
            .await
            .unwrap();
        assert_eq!(claims.client_id, "client-a");
        assert_eq!(claims.user_subject, "user@example.com");

        assert_eq!(
            f.codes
                .redeem_code(&code, "client-a", "https://app/callback")
                .await
                .unwrap_err(),
            TokenError::InvalidGrant
        );
    }

    #[tokio::test]
    async fn test_unparsable_code_is_server_error() {
        let f = fixture();
        assert_eq!(
            f.codes
                .redeem_code("garbage", "client-a", "https://app/callback")
                .await
                .unwrap_err(),
            TokenError::ServerError
        );
    }

    #[tokio::test]
    async fn test_redirect_mismatch_is_invalid_request() {
        let f = fixture();
        let code = f
            .codes
            .issue_code("client-a", "https://app/callback", "user")
            .await
            .unwrap();

        assert_eq!(
            f.codes
                .redeem_code(&code, "client-a", "https://other/callback")
                .await
                .unwrap_err(),
            TokenError::InvalidRequest
        );
        // The failed attempt does not burn the code
        assert!(
            f.codes
                .redeem_code(&code, "client-a", "https://app/callback")
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_code_bound_to_issuing_client() {
        let f = fixture();
        let code_a = f
            .codes
            .issue_code("client-a", "https://app/callback", "user")
            .await
            .unwrap();
        f.codes
            .issue_code("client-b", "https://app/callback", "user")
            .await
            .unwrap();

        assert_eq!(
            f.codes
                .redeem_code(&code_a, "client-b", "https://app/callback")
                .await
                .unwrap_err(),
            TokenError::InvalidGrant
        );
        assert!(
            f.codes
                .redeem_code(&code_a, "client-a", "https://app/callback")
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_second_code_replaces_first() {
        let f = fixture();
        let first = f
            .codes
            .issue_code("client-a", "https://app/callback", "user")
            .await
            .unwrap();
        let second = f
            .codes
            .issue_code("client-a", "https://app/callback", "user")
            .await
            .unwrap();

        assert_eq!(
            f.codes
                .redeem_code(&first, "client-a", "https://app/callback")
                .await
                .unwrap_err(),
            TokenError::InvalidGrant
        );
        assert!(
            f.codes
                .redeem_code(&second, "client-a", "https://app/callback")
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_expired_code_is_invalid_grant() {
        let f = fixture();
        let code = f
            .codes
            .issue_code("client-a", "https://app/callback", "user")
            .await
            .unwrap();

        f.clock.advance(Duration::seconds(181));

        assert_eq!(
            f.codes
                .redeem_code(&code, "client-a", "https://app/callback")
                .await
                .unwrap_err(),
            TokenError::InvalidGrant
        );
    }

    #[tokio::test]
    async fn test_embedded_expiry_backs_up_the_cache() {
        let f = fixture();
        let code = f
            .codes
            .issue_code("client-a", "https://app/callback", "user")
            .await
            .unwrap();
        // Keep the cache entry alive past the code's own expiry
        f.cache
            .put_code("client-a", &code, Duration::minutes(10))
            .await
            .unwrap();

        f.clock.advance(Duration::minutes(4));

        assert!(f.cache.contains_code("client-a").await.unwrap());
        assert_eq!(
            f.codes
                .redeem_code(&code, "client-a", "https://app/callback")
                .await
                .unwrap_err(),
            TokenError::InvalidGrant
        );
    }

    #[tokio::test]
    async fn test_code_from_evicted_key_is_rejected() {
        let f = fixture();
        let code = f
            .codes
            .issue_code("client-a", "https://app/callback", "user")
            .await
            .unwrap();

        f.keys.rotate().await.unwrap();
        f.keys.rotate().await.unwrap();

        assert_eq!(
            f.codes
                .redeem_code(&code, "client-a", "https://app/callback")
                .await
                .unwrap_err(),
            TokenError::InvalidGrant
        );
    }
}
