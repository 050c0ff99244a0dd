//! OAuth 2.0 core types and data structures.
//!
//! Defines grants, client and user records, requests, and the token response.

use base64::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::errors::TokenError;

/// OAuth 2.0 Grant Types supported by this server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
    RefreshToken,
}

/// OAuth 2.0 Token Types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Bearer,
}

/// Registered OAuth client, owned by the client directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRecord {
    /// Unique client identifier
    pub client_id: String,
    /// Shared secret used to authenticate at the token endpoint
    pub client_secret: String,
    /// The single registered redirect URI
    pub redirect_uri: String,
    /// Scopes the client may be granted
    pub authorized_scope: BTreeSet<String>,
    /// Grants the client may use. Authorization requests check for `"code"`.
    pub authorized_grants: BTreeSet<String>,
    /// The only currently valid refresh token, if one was issued
    pub refresh_token: Option<String>,
    /// Identifier of the user that owns this client
    pub owning_user_id: String,
}

impl ClientRecord {
    pub fn is_authorized_for(&self, grant: &str) -> bool {
        self.authorized_grants.contains(grant)
    }
}

/// Resource owner known to the user directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    /// Identity placed in the `sub` claim of access tokens
    pub subject: String,
}

/// OAuth Authorization Request (RFC 6749 Section 4.1.1)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    /// Response type, only `code` is accepted
    pub response_type: String,
    /// Client ID
    pub client_id: String,
    /// Redirect URI
    pub redirect_uri: String,
    /// Requested scope; narrowed to the granted scope by validation
    pub scope: Vec<String>,
    /// State parameter echoed back to the client
    pub state: Option<String>,
}

impl AuthorizationRequest {
    pub fn new(
        response_type: impl Into<String>,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
        scope: Option<&str>,
        state: Option<String>,
    ) -> Self {
        Self {
            response_type: response_type.into(),
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            scope: scope.map(parse_scope).unwrap_or_default(),
            state,
        }
    }
}

/// Form data for the token endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenForm {
    pub grant_type: String,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub refresh_token: Option<String>,
}

/// Token Exchange Request, validated from [`TokenForm`]
#[derive(Debug, Clone)]
pub enum TokenRequest {
    AuthorizationCode { code: String, redirect_uri: String },
    RefreshToken { refresh_token: String },
}

impl TokenRequest {
    pub fn grant_type(&self) -> GrantType {
        match self {
            Self::AuthorizationCode { .. } => GrantType::AuthorizationCode,
            Self::RefreshToken { .. } => GrantType::RefreshToken,
        }
    }
}

impl TryFrom<TokenForm> for TokenRequest {
    type Error = TokenError;

    fn try_from(form: TokenForm) -> Result<Self, Self::Error> {
        let grant_type = match form.grant_type.as_str() {
            "authorization_code" => GrantType::AuthorizationCode,
            "refresh_token" => GrantType::RefreshToken,
            _ => return Err(TokenError::UnsupportedGrantType),
        };

        match grant_type {
            GrantType::AuthorizationCode => {
                let code = form.code.ok_or(TokenError::InvalidRequest)?;
                let redirect_uri = form.redirect_uri.ok_or(TokenError::InvalidRequest)?;
                Ok(Self::AuthorizationCode { code, redirect_uri })
            }
            GrantType::RefreshToken => {
                let refresh_token = form.refresh_token.ok_or(TokenError::InvalidRequest)?;
                Ok(Self::RefreshToken { refresh_token })
            }
        }
    }
}

/// Token Response (RFC 6749 Section 5.1)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Access token
    pub access_token: String,
    /// Token type
    pub token_type: TokenType,
    /// Expires in seconds
    pub expires_in: u64,
    /// Refresh token
    pub refresh_token: String,
}

/// User info returned for a valid bearer token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfo {
    pub sub: String,
}

/// Generate a secure random token
pub fn generate_token() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.r#gen();
    BASE64_URL_SAFE_NO_PAD.encode(bytes)
}

/// Parse a space separated scope string, keeping request order and dropping duplicates
pub fn parse_scope(scope: &str) -> Vec<String> {
    let mut scopes: Vec<String> = Vec::new();
    for s in scope.split_whitespace() {
        if !scopes.iter().any(|existing| existing == s) {
            scopes.push(s.to_string());
        }
    }
    scopes
}
