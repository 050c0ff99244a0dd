//! OAuth 2.0 authorization server core: signing keys, request validation,
//! single-use authorization codes and bearer tokens.

pub mod auth_server;
pub mod codes;
pub mod keys;
pub mod tokens;
pub mod types;
pub mod validation;

// Re-export frequently used items from each module
pub use crate::storage::{
    inmemory::{MemoryAuthorizationCodeCache, MemoryOAuthStorage},
    traits::{AuthorizationCodeCache, ClientStore, KeyStore, OAuthStorage, UserStore},
};
pub use auth_server::{AuthorizationServer, AuthorizeResponse, ClientAuthentication, ServerSettings};
pub use codes::{AuthorizationCodeClaims, AuthorizationCodeService};
pub use keys::{Jwk, KeyManager, KeySet};
pub use tokens::{AccessTokenClaims, TokenService, TokenSettings};
pub use types::{
    AuthorizationRequest, ClientRecord, GrantType, TokenForm, TokenRequest, TokenResponse,
    TokenType, UserInfo, UserRecord, parse_scope,
};
pub use validation::validate_authorization_request;
