//! Access and refresh token issuance and verification.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::clock::Clock;
use crate::errors::{KeyError, TokenError};
use crate::oauth::keys::{KeyManager, decode_unverified};
use crate::oauth::types::{TokenResponse, TokenType, generate_token};
use crate::storage::traits::OAuthStorage;

/// Claims carried by an access token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub sub: String,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    /// Client the token was issued to
    pub cid: String,
    /// Service-defined claims
    #[serde(flatten)]
    pub custom: Map<String, Value>,
}

/// Issuer-wide settings stamped into every access token
#[derive(Debug, Clone)]
pub struct TokenSettings {
    pub issuer: String,
    pub audience: String,
    pub access_token_lifetime: Duration,
    pub custom_claims: Map<String, Value>,
}

/// Mints and verifies access tokens, issues and checks refresh tokens
pub struct TokenService {
    keys: Arc<KeyManager>,
    storage: Arc<dyn OAuthStorage>,
    clock: Arc<dyn Clock>,
    settings: TokenSettings,
}

impl TokenService {
    pub fn new(
        keys: Arc<KeyManager>,
        storage: Arc<dyn OAuthStorage>,
        clock: Arc<dyn Clock>,
        settings: TokenSettings,
    ) -> Self {
        Self {
            keys,
            storage,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> &TokenSettings {
        &self.settings
    }

    pub async fn issue_access_token(
        &self,
        client_id: &str,
        user_subject: &str,
    ) -> Result<String, KeyError> {
        let now = self.clock.now();
        let claims = AccessTokenClaims {
            sub: user_subject.to_string(),
            iss: self.settings.issuer.clone(),
            aud: self.settings.audience.clone(),
            iat: now.timestamp(),
            exp: (now + self.settings.access_token_lifetime).timestamp(),
            cid: client_id.to_string(),
            custom: self.settings.custom_claims.clone(),
        };
        self.keys.sign(&claims).await
    }

    /// Generate a refresh token and make it the client's only valid one
    pub async fn issue_refresh_token(&self, client_id: &str) -> Result<String, TokenError> {
        let refresh_token = generate_token();
        self.storage
            .update_refresh_token(client_id, &refresh_token)
            .await?;
        debug!(client_id, "issued refresh token");
        Ok(refresh_token)
    }

    /// Verify an access token and return its claims
    pub async fn verify_access_token(&self, token: &str) -> Result<AccessTokenClaims, TokenError> {
        decode_unverified::<AccessTokenClaims>(token).map_err(|error| {
            error!(%error, "unparsable access token");
            TokenError::ServerError
        })?;

        let claims: AccessTokenClaims = match self.keys.verify(token).await {
            Ok(claims) => claims,
            Err(KeyError::InvalidSignature) => return Err(TokenError::InvalidClient),
            Err(e) => return Err(e.into()),
        };

        if self.clock.now().timestamp() > claims.exp {
            return Err(TokenError::InvalidGrant);
        }

        Ok(claims)
    }

    pub async fn verify_refresh_token(
        &self,
        client_id: &str,
        presented: &str,
    ) -> Result<(), TokenError> {
        let client = self
            .storage
            .get_client(client_id)
            .await?
            .ok_or(TokenError::InvalidClient)?;

        match client.refresh_token.as_deref() {
            Some(stored) if stored == presented => Ok(()),
            _ => Err(TokenError::InvalidGrant),
        }
    }

    /// Issue an access token for the client's owning user plus a fresh refresh token
    pub async fn create_token_response(&self, client_id: &str) -> Result<TokenResponse, TokenError> {
        let client = self
            .storage
            .get_client(client_id)
            .await?
            .ok_or(TokenError::InvalidClient)?;

        let user = self
            .storage
            .get_user(&client.owning_user_id)
            .await?
            .ok_or_else(|| {
                error!(
                    client_id,
                    owning_user_id = %client.owning_user_id,
                    "client owner not found"
                );
                TokenError::ServerError
            })?;

        let access_token = self.issue_access_token(client_id, &user.subject).await?;
        let refresh_token = self.issue_refresh_token(client_id).await?;

        info!(client_id, "issued tokens");

        Ok(TokenResponse {
            access_token,
            token_type: TokenType::Bearer,
            expires_in: self.settings.access_token_lifetime.num_seconds().max(0) as u64,
            refresh_token,
        })
    }
}
