//! OAuth 2.0 authorization server tying together validation, codes, tokens and keys.

use axum::{
    Json,
    response::{IntoResponse, Redirect, Response},
};
use chrono::Duration;
use http::StatusCode;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, warn};
use url::Url;

use crate::clock::Clock;
use crate::errors::{AuthorizationError, KeyError, TokenError};
use crate::oauth::codes::AuthorizationCodeService;
use crate::oauth::keys::{KeyManager, KeySet};
use crate::oauth::tokens::{TokenService, TokenSettings};
use crate::oauth::types::*;
use crate::oauth::validation::validate_authorization_request;
use crate::storage::traits::{AuthorizationCodeCache, OAuthStorage};

/// Settings the server is built from
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub key_rotation_interval: Duration,
    pub authorization_code_lifetime: Duration,
    pub tokens: TokenSettings,
}

/// Client credentials presented at the token endpoint
#[derive(Debug, Clone)]
pub struct ClientAuthentication {
    pub client_id: String,
    pub client_secret: String,
}

/// Authorization response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizeResponse {
    /// Send the user agent to this URL
    Redirect(String),
    /// Render locally, the redirect target is not trusted
    Error { error: String, description: String },
}

impl AuthorizeResponse {
    fn local(error: AuthorizationError) -> Self {
        Self::Error {
            error: error.code().to_string(),
            description: error.description().to_string(),
        }
    }
}

impl IntoResponse for AuthorizeResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Redirect(url) => Redirect::to(&url).into_response(),
            Self::Error { error, description } => {
                let body = json!({
                    "error": error,
                    "error_description": description,
                });
                (StatusCode::BAD_REQUEST, Json(body)).into_response()
            }
        }
    }
}

/// OAuth 2.0 Authorization Server
pub struct AuthorizationServer {
    storage: Arc<dyn OAuthStorage>,
    keys: Arc<KeyManager>,
    codes: AuthorizationCodeService,
    tokens: TokenService,
}

impl AuthorizationServer {
    pub fn new(
        storage: Arc<dyn OAuthStorage>,
        code_cache: Arc<dyn AuthorizationCodeCache>,
        clock: Arc<dyn Clock>,
        settings: ServerSettings,
    ) -> Self {
        let keys = Arc::new(KeyManager::new(
            storage.clone(),
            clock.clone(),
            settings.key_rotation_interval,
        ));
        let codes = AuthorizationCodeService::new(
            keys.clone(),
            code_cache,
            clock.clone(),
            settings.authorization_code_lifetime,
        );
        let tokens = TokenService::new(keys.clone(), storage.clone(), clock, settings.tokens);

        Self {
            storage,
            keys,
            codes,
            tokens,
        }
    }

    pub fn storage(&self) -> &Arc<dyn OAuthStorage> {
        &self.storage
    }

    pub fn keys(&self) -> &KeyManager {
        &self.keys
    }

    pub fn codes(&self) -> &AuthorizationCodeService {
        &self.codes
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Validate an authorization request (RFC 6749 Section 4.1.1).
    ///
    /// On success the client record is returned for the approval page and the
    /// request's scope holds only granted scope. On failure the response to
    /// send is returned instead.
    pub async fn authorize(
        &self,
        request: &mut AuthorizationRequest,
    ) -> Result<ClientRecord, AuthorizeResponse> {
        let client = match self.storage.get_client(&request.client_id).await {
            Ok(client) => client,
            Err(error) => {
                error!(?error, client_id = %request.client_id, "client lookup failed");
                return Err(AuthorizeResponse::local(AuthorizationError::ServerError));
            }
        };

        match validate_authorization_request(request, client.as_ref()) {
            Ok(()) => client.ok_or_else(|| AuthorizeResponse::local(AuthorizationError::InvalidRequest)),
            Err(error) => {
                debug!(client_id = %request.client_id, error = error.code(), "authorization request rejected");
                Err(self.error_response(request, error))
            }
        }
    }

    /// The resource owner approved the request: issue a code and redirect with it.
    pub async fn approve(
        &self,
        request: &AuthorizationRequest,
        user_subject: &str,
    ) -> AuthorizeResponse {
        let mut request = request.clone();
        if let Err(response) = self.authorize(&mut request).await {
            return response;
        }

        let code = match self
            .codes
            .issue_code(&request.client_id, &request.redirect_uri, user_subject)
            .await
        {
            Ok(code) => code,
            Err(error) => {
                error!(%error, client_id = %request.client_id, "failed to issue authorization code");
                return self.error_response(&request, AuthorizationError::ServerError);
            }
        };

        let mut params = vec![("code", code.as_str())];
        if let Some(state) = request.state.as_deref() {
            params.push(("state", state));
        }
        redirect_with(&request.redirect_uri, &params)
    }

    /// The resource owner denied the request
    pub async fn deny(&self, request: &AuthorizationRequest) -> AuthorizeResponse {
        let mut request = request.clone();
        if let Err(response) = self.authorize(&mut request).await {
            return response;
        }
        self.error_response(&request, AuthorizationError::AccessDenied)
    }

    /// Authenticate a client with its shared secret
    pub async fn authenticate_client(
        &self,
        auth: &ClientAuthentication,
    ) -> Result<ClientRecord, TokenError> {
        let client = self
            .storage
            .get_client(&auth.client_id)
            .await?
            .ok_or(TokenError::InvalidClient)?;

        if client.client_secret != auth.client_secret {
            warn!(client_id = %auth.client_id, "client secret mismatch");
            return Err(TokenError::InvalidClient);
        }

        Ok(client)
    }

    /// Handle token requests (RFC 6749 Section 4.1.3 and Section 6)
    pub async fn token(
        &self,
        form: TokenForm,
        auth: &ClientAuthentication,
    ) -> Result<TokenResponse, TokenError> {
        let client = self.authenticate_client(auth).await?;
        let request = TokenRequest::try_from(form)?;
        debug!(client_id = %client.client_id, grant_type = ?request.grant_type(), "token request");

        match request {
            TokenRequest::AuthorizationCode { code, redirect_uri } => {
                self.codes
                    .redeem_code(&code, &client.client_id, &redirect_uri)
                    .await?;
            }
            TokenRequest::RefreshToken { refresh_token } => {
                self.tokens
                    .verify_refresh_token(&client.client_id, &refresh_token)
                    .await?;
            }
        }

        self.tokens.create_token_response(&client.client_id).await
    }

    /// Published key set, current key first
    pub async fn jwks(&self) -> Result<KeySet, KeyError> {
        self.keys.get_key_set().await
    }

    /// Subject of a valid bearer token
    pub async fn userinfo(&self, access_token: &str) -> Result<UserInfo, TokenError> {
        let claims = self.tokens.verify_access_token(access_token).await?;
        Ok(UserInfo { sub: claims.sub })
    }

    fn error_response(
        &self,
        request: &AuthorizationRequest,
        error: AuthorizationError,
    ) -> AuthorizeResponse {
        if !error.is_redirectable() {
            return AuthorizeResponse::local(error);
        }

        let mut params = vec![("error", error.code()), ("error_description", error.description())];
        if let Some(state) = request.state.as_deref() {
            params.push(("state", state));
        }
        redirect_with(&request.redirect_uri, &params)
    }
}

/// Append query parameters to a verified redirect URI
fn redirect_with(redirect_uri: &str, params: &[(&str, &str)]) -> AuthorizeResponse {
    let mut url = match Url::parse(redirect_uri) {
        Ok(url) => url,
        Err(error) => {
            warn!(%error, redirect_uri, "registered redirect URI is not a valid URL");
            return AuthorizeResponse::local(AuthorizationError::InvalidRequest);
        }
    };
    url.query_pairs_mut().extend_pairs(params);
    AuthorizeResponse::Redirect(url.to_string())
}
