//! Environment-based configuration types for the authorization server.

use anyhow::Result;
use serde_json::{Map, Value};

use crate::errors::ConfigError;
use crate::oauth::auth_server::ServerSettings;
use crate::oauth::tokens::TokenSettings;

/// Claims every access token carries that custom claims may not override
pub const REGISTERED_CLAIMS: [&str; 6] = ["sub", "iss", "aud", "iat", "exp", "cid"];

/// Issuer placed in the `iss` claim
#[derive(Clone, Debug)]
pub struct Issuer(String);

/// Audience placed in the `aud` claim
#[derive(Clone, Debug)]
pub struct Audience(String);

/// Key set cache lifespan, which is also the rotation cadence
#[derive(Clone, Debug)]
pub struct KeyRotationInterval(chrono::Duration);

/// Authorization code lifetime, used for the cache TTL and the embedded expiry
#[derive(Clone, Debug)]
pub struct AuthorizationCodeLifetime(chrono::Duration);

/// Access token lifetime
#[derive(Clone, Debug)]
pub struct AccessTokenLifetime(chrono::Duration);

/// Service-defined claims added to every access token
#[derive(Clone, Debug, Default)]
pub struct AccessTokenClaims(Map<String, Value>);

/// Main application configuration
#[derive(Clone, Debug)]
pub struct Config {
    pub version: String,
    pub issuer: Issuer,
    pub audience: Audience,
    pub key_rotation_interval: KeyRotationInterval,
    pub authorization_code_lifetime: AuthorizationCodeLifetime,
    pub access_token_lifetime: AccessTokenLifetime,
    pub access_token_claims: AccessTokenClaims,
}

impl Config {
    /// Create a new configuration from environment variables
    pub fn new() -> Result<Self> {
        let issuer: Issuer = default_env("ISSUER", "http://auth-server:8081/oauth2").try_into()?;
        let audience: Audience = default_env("AUDIENCE", "http://localhost:8080").try_into()?;
        let key_rotation_interval: KeyRotationInterval =
            default_env("KEY_ROTATION_INTERVAL", "14d").try_into()?;
        let authorization_code_lifetime: AuthorizationCodeLifetime =
            default_env("AUTHORIZATION_CODE_LIFETIME", "3m").try_into()?;
        let access_token_lifetime: AccessTokenLifetime =
            default_env("ACCESS_TOKEN_LIFETIME", "6h").try_into()?;
        let access_token_claims: AccessTokenClaims =
            default_env("ACCESS_TOKEN_CLAIMS", r#"{"accountNo":5000}"#).try_into()?;

        Ok(Self {
            version: version()?,
            issuer,
            audience,
            key_rotation_interval,
            authorization_code_lifetime,
            access_token_lifetime,
            access_token_claims,
        })
    }

    /// Settings for [`crate::oauth::AuthorizationServer::new`]
    pub fn server_settings(&self) -> ServerSettings {
        ServerSettings {
            key_rotation_interval: *self.key_rotation_interval.as_ref(),
            authorization_code_lifetime: *self.authorization_code_lifetime.as_ref(),
            tokens: TokenSettings {
                issuer: self.issuer.as_ref().clone(),
                audience: self.audience.as_ref().clone(),
                access_token_lifetime: *self.access_token_lifetime.as_ref(),
                custom_claims: self.access_token_claims.as_ref().clone(),
            },
        }
    }
}

/// Get application version from build environment
pub fn version() -> Result<String> {
    option_env!("GIT_HASH")
        .or(option_env!("CARGO_PKG_VERSION"))
        .map(|val| val.to_string())
        .ok_or(ConfigError::VersionNotSet.into())
}

fn default_env(name: &str, default_value: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default_value.to_string())
}

fn parse_positive_duration(value: String) -> Result<chrono::Duration, ConfigError> {
    let duration = duration_str::parse(&value)
        .map_err(|e| ConfigError::DurationParsingFailed(value.clone(), e.to_string()))?;
    if duration.is_zero() {
        return Err(ConfigError::DurationNotPositive(value));
    }
    chrono::Duration::from_std(duration)
        .map_err(|e| ConfigError::DurationParsingFailed(value, e.to_string()))
}

impl TryFrom<String> for Issuer {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        url::Url::parse(&value).map_err(|e| ConfigError::InvalidUrl(value.clone(), e.to_string()))?;
        Ok(Self(value))
    }
}

impl AsRef<String> for Issuer {
    fn as_ref(&self) -> &String {
        &self.0
    }
}

impl TryFrom<String> for Audience {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.trim().is_empty() {
            return Err(ConfigError::EmptyValue("AUDIENCE".to_string()));
        }
        Ok(Self(value))
    }
}

impl AsRef<String> for Audience {
    fn as_ref(&self) -> &String {
        &self.0
    }
}

impl TryFrom<String> for KeyRotationInterval {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        parse_positive_duration(value).map(Self)
    }
}

impl AsRef<chrono::Duration> for KeyRotationInterval {
    fn as_ref(&self) -> &chrono::Duration {
        &self.0
    }
}

impl TryFrom<String> for AuthorizationCodeLifetime {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        parse_positive_duration(value).map(Self)
    }
}

impl AsRef<chrono::Duration> for AuthorizationCodeLifetime {
    fn as_ref(&self) -> &chrono::Duration {
        &self.0
    }
}

impl TryFrom<String> for AccessTokenLifetime {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        parse_positive_duration(value).map(Self)
    }
}

impl AsRef<chrono::Duration> for AccessTokenLifetime {
    fn as_ref(&self) -> &chrono::Duration {
        &self.0
    }
}

impl TryFrom<String> for AccessTokenClaims {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.trim().is_empty() {
            return Ok(Self::default());
        }

        let claims: Map<String, Value> = serde_json::from_str(&value)
            .map_err(|e| ConfigError::ClaimsParsingFailed(e.to_string()))?;

        if let Some(reserved) = claims
            .keys()
            .find(|name| REGISTERED_CLAIMS.contains(&name.as_str()))
        {
            return Err(ConfigError::ReservedClaim(reserved.clone()));
        }

        Ok(Self(claims))
    }
}

impl AsRef<Map<String, Value>> for AccessTokenClaims {
    fn as_ref(&self) -> &Map<String, Value> {
        &self.0
    }
}
