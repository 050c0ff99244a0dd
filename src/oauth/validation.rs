//! Authorization request validation.
//!
//! Checks run in a fixed order and stop at the first failure. Only the first
//! check can fail before the redirect URI is known to belong to the client.

use crate::errors::AuthorizationError;
use crate::oauth::types::{AuthorizationRequest, ClientRecord};

/// The only response type this server issues
pub const RESPONSE_TYPE_CODE: &str = "code";

/// Grant a client must hold to request authorization codes
pub const GRANT_CODE: &str = "code";

/// Validate an authorization request against the client's registration.
///
/// On [`AuthorizationError::InvalidScope`] the request's scope has already been
/// narrowed to the subset the client is authorized for.
pub fn validate_authorization_request(
    request: &mut AuthorizationRequest,
    client: Option<&ClientRecord>,
) -> Result<(), AuthorizationError> {
    let client = match client {
        Some(client) if client.redirect_uri == request.redirect_uri => client,
        _ => return Err(AuthorizationError::InvalidRequest),
    };

    if request.response_type != RESPONSE_TYPE_CODE {
        return Err(AuthorizationError::UnsupportedResponseType);
    }

    if !client.is_authorized_for(GRANT_CODE) {
        return Err(AuthorizationError::UnauthorizedClient);
    }

    let requested = request.scope.len();
    request
        .scope
        .retain(|scope| client.authorized_scope.contains(scope));
    if request.scope.len() != requested {
        return Err(AuthorizationError::InvalidScope);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn client() -> ClientRecord {
        ClientRecord {
            client_id: "test-client".to_string(),
            client_secret: "secret".to_string(),
            redirect_uri: "https://app/callback".to_string(),
            authorized_scope: BTreeSet::from(["read:transactions".to_string(), "test".to_string()]),
            authorized_grants: BTreeSet::from(["code".to_string()]),
            refresh_token: None,
            owning_user_id: "1".to_string(),
        }
    }

    fn auth_request(response_type: &str, redirect_uri: &str, scope: &str) -> AuthorizationRequest {
        AuthorizationRequest::new(
            response_type,
            "test-client",
            redirect_uri,
            Some(scope),
            Some("xyz".to_string()),
        )
    }

    #[test]
    fn test_valid_request() {
        let client = client();
        let mut request = auth_request("code", "https://app/callback", "read:transactions");
        assert_eq!(
            validate_authorization_request(&mut request, Some(&client)),
            Ok(())
        );
        assert_eq!(request.scope, vec!["read:transactions".to_string()]);
    }

    #[test]
    fn test_unknown_client_or_redirect_mismatch() {
        let client = client();

        let mut request = auth_request("code", "https://app/callback", "test");
        assert_eq!(
            validate_authorization_request(&mut request, None),
            Err(AuthorizationError::InvalidRequest)
        );

        let mut request = auth_request("code", "https://evil/callback", "test");
        assert_eq!(
            validate_authorization_request(&mut request, Some(&client)),
            Err(AuthorizationError::InvalidRequest)
        );
    }

    #[test]
    fn test_checks_are_ordered() {
        let mut client = client();
        client.authorized_grants.clear();

        // Redirect mismatch wins over everything else
        let mut request = auth_request("token", "https://evil/callback", "admin");
        assert_eq!(
            validate_authorization_request(&mut request, Some(&client)),
            Err(AuthorizationError::InvalidRequest)
        );

        // Response type is checked before the grant
        let mut request = auth_request("token", "https://app/callback", "admin");
        assert_eq!(
            validate_authorization_request(&mut request, Some(&client)),
            Err(AuthorizationError::UnsupportedResponseType)
        );

        // Grant is checked before scope
        let mut request = auth_request("code", "https://app/callback", "admin");
        assert_eq!(
            validate_authorization_request(&mut request, Some(&client)),
            Err(AuthorizationError::UnauthorizedClient)
        );
    }

    #[test]
    fn test_scope_is_narrowed_on_invalid_scope() {
        let client = client();
        let mut request = auth_request("code", "https://app/callback", "read:transactions admin");

        assert_eq!(
            validate_authorization_request(&mut request, Some(&client)),
            Err(AuthorizationError::InvalidScope)
        );
        assert_eq!(request.scope, vec!["read:transactions".to_string()]);
    }

    #[test]
    fn test_empty_scope_is_a_subset() {
        let client = client();
        let mut request = AuthorizationRequest::new(
            "code",
            "test-client",
            "https://app/callback",
            None,
            None,
        );
        assert_eq!(
            validate_authorization_request(&mut request, Some(&client)),
            Ok(())
        );
    }
}
