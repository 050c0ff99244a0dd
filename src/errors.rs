//! Standardized error types following the `error-authcore-<domain>-<number>` format.
//!
//! The two OAuth 2.0 taxonomies ([`AuthorizationError`] and [`TokenError`]) are closed sets:
//! each variant carries its wire code, a fixed human description and, for the token
//! endpoint, the HTTP status derived from the code.

use axum::{
    Json,
    response::{IntoResponse, Response},
};
use http::StatusCode;
use serde_json::json;
use thiserror::Error;

/// Configuration errors that occur during application startup
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error when version information is not available
    #[error("error-authcore-config-1 One of GIT_HASH or CARGO_PKG_VERSION must be set")]
    VersionNotSet,

    /// Error when duration string cannot be parsed
    #[error("error-authcore-config-2 Failed to parse duration '{0}': {1}")]
    DurationParsingFailed(String, String),

    /// Error when a duration is zero or negative
    #[error("error-authcore-config-3 Duration '{0}' must be greater than zero")]
    DurationNotPositive(String),

    /// Error when the custom access token claims are not a JSON object
    #[error("error-authcore-config-4 Failed to parse access token claims: {0}")]
    ClaimsParsingFailed(String),

    /// Error when a custom claim would shadow a registered claim
    #[error("error-authcore-config-5 Custom claim '{0}' collides with a registered claim")]
    ReservedClaim(String),

    /// Error when a URL setting cannot be parsed
    #[error("error-authcore-config-6 Invalid URL '{0}': {1}")]
    InvalidUrl(String, String),

    /// Error when a setting is empty
    #[error("error-authcore-config-7 {0} must not be empty")]
    EmptyValue(String),
}

/// Collaborator storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Error when a lock guarding in-memory state is poisoned
    #[error("error-authcore-storage-1 Lock error: {0}")]
    LockFailed(String),

    /// Error when data serialization fails
    #[error("error-authcore-storage-2 Data serialization failed: {0}")]
    SerializationFailed(String),

    /// Error when requested resource is not found
    #[error("error-authcore-storage-3 Not found: {0}")]
    NotFound(String),
}

/// Signing key and compact JWS errors
#[derive(Debug, Error)]
pub enum KeyError {
    /// Error when a P-256 key cannot be generated or exported
    #[error("error-authcore-key-1 Key generation failed: {0}")]
    GenerationFailed(String),

    /// Error when a persisted key record cannot be turned back into a key
    #[error("error-authcore-key-2 Malformed key record '{0}': {1}")]
    MalformedRecord(String, String),

    /// Error when the token is not a well-formed compact JWS
    #[error("error-authcore-key-3 Malformed token: {0}")]
    MalformedToken(String),

    /// Error when no retained key validates the signature
    #[error("error-authcore-key-4 Signature did not verify against the published key set")]
    InvalidSignature,

    /// Error when signing fails
    #[error("error-authcore-key-5 Signing failed: {0}")]
    SigningFailed(String),

    /// Error when the key store collaborator fails
    #[error("error-authcore-key-6 Key store failure: {0}")]
    Storage(#[from] StorageError),
}

/// Authorization endpoint errors (RFC 6749 Section 4.1.2.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthorizationError {
    /// Unknown client, or redirect URI does not match the registration
    #[error("error-authcore-authorize-1 invalid_request")]
    InvalidRequest,

    /// The resource owner denied the request
    #[error("error-authcore-authorize-2 access_denied")]
    AccessDenied,

    /// The client may not request a code this way
    #[error("error-authcore-authorize-3 unauthorized_client")]
    UnauthorizedClient,

    /// Only `code` is supported
    #[error("error-authcore-authorize-4 unsupported_response_type")]
    UnsupportedResponseType,

    /// Requested scope exceeds the client's authorized scope
    #[error("error-authcore-authorize-5 invalid_scope")]
    InvalidScope,

    /// Internal failure
    #[error("error-authcore-authorize-6 server_error")]
    ServerError,

    /// Maintenance or overload
    #[error("error-authcore-authorize-7 temporarily_unavailable")]
    TemporarilyUnavailable,
}

impl AuthorizationError {
    /// OAuth 2.0 `error` value.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::AccessDenied => "access_denied",
            Self::UnauthorizedClient => "unauthorized_client",
            Self::UnsupportedResponseType => "unsupported_response_type",
            Self::InvalidScope => "invalid_scope",
            Self::ServerError => "server_error",
            Self::TemporarilyUnavailable => "temporarily_unavailable",
        }
    }

    /// OAuth 2.0 `error_description` value.
    pub fn description(&self) -> &'static str {
        match self {
            Self::InvalidRequest => {
                "missing parameter, invalid parameter, or is otherwise invalid request"
            }
            Self::AccessDenied => "the user or authorization server denied the request",
            Self::UnauthorizedClient => {
                "the client is not allowed to request an authorization code using this method"
            }
            Self::UnsupportedResponseType => {
                "the server does not support obtaining an authorization code using this method"
            }
            Self::InvalidScope => "the requested scope is invalid or unknown",
            Self::ServerError => "the server reported a 500 Internal Server Error",
            Self::TemporarilyUnavailable => {
                "if the server is undergoing maintenance, or is otherwise unavailable"
            }
        }
    }

    /// Whether the error may be sent back to the client's redirect URI.
    ///
    /// `invalid_request` means the redirect URI itself is unverified.
    pub fn is_redirectable(&self) -> bool {
        !matches!(self, Self::InvalidRequest)
    }
}

/// Token endpoint errors (RFC 6749 Section 5.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    /// Missing or malformed parameter
    #[error("error-authcore-token-1 invalid_request")]
    InvalidRequest,

    /// Client authentication failed
    #[error("error-authcore-token-2 invalid_client")]
    InvalidClient,

    /// Code or refresh token invalid, expired, already used, or redirect mismatch
    #[error("error-authcore-token-3 invalid_grant")]
    InvalidGrant,

    /// Requested scope invalid
    #[error("error-authcore-token-4 invalid_scope")]
    InvalidScope,

    /// Client not allowed to use the grant type
    #[error("error-authcore-token-5 unauthorized_client")]
    UnauthorizedClient,

    /// Grant type unknown
    #[error("error-authcore-token-6 unsupported_grant_type")]
    UnsupportedGrantType,

    /// Internal failure, including unparsable tokens
    #[error("error-authcore-token-7 server_error")]
    ServerError,
}

impl TokenError {
    /// OAuth 2.0 `error` value.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::InvalidClient => "invalid_client",
            Self::InvalidGrant => "invalid_grant",
            Self::InvalidScope => "invalid_scope",
            Self::UnauthorizedClient => "unauthorized_client",
            Self::UnsupportedGrantType => "unsupported_grant_type",
            Self::ServerError => "server_error",
        }
    }

    /// OAuth 2.0 `error_description` value.
    pub fn description(&self) -> &'static str {
        match self {
            Self::InvalidRequest => {
                "missing, invalid, or unsupported parameter, or otherwise invalid request"
            }
            Self::InvalidClient => "client authentication failed",
            Self::InvalidGrant => {
                "the authorization code is invalid or expired or redirect_uri mismatch"
            }
            Self::InvalidScope => "the requested scope was invalid or unsupported",
            Self::UnauthorizedClient => {
                "this client is not authorized to use the requested grant type"
            }
            Self::UnsupportedGrantType => "the requested grant type is unknown or invalid",
            Self::ServerError => "the server reported a 500 Internal Server Error",
        }
    }

    /// `invalid_client` is a 401, everything else a 400.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidClient => StatusCode::UNAUTHORIZED,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<KeyError> for TokenError {
    fn from(error: KeyError) -> Self {
        tracing::error!(?error, "key manager failure during token processing");
        Self::ServerError
    }
}

impl From<StorageError> for TokenError {
    fn from(error: StorageError) -> Self {
        tracing::error!(?error, "storage failure during token processing");
        Self::ServerError
    }
}

impl IntoResponse for TokenError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.code(),
            "error_description": self.description(),
        });
        (self.status_code(), Json(body)).into_response()
    }
}
