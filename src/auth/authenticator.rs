//! Bearer-token gate for `/xrpc/` operations.

use std::sync::Arc;

use tracing::warn;

use crate::did::Did;

use super::service_jwt::{verify_service_jwt, ServiceJwtError, SigningKeyResolver, VerifiedToken};

/// Why a request failed authentication.
///
/// Only ever logged; callers see a uniform 403.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing Authorization header")]
    MissingHeader,

    #[error("Authorization header is not a Bearer token")]
    MalformedScheme,

    #[error(transparent)]
    Token(#[from] ServiceJwtError),
}

/// Verifies service JWTs addressed to this service
pub struct Authenticator {
    service_did: Did,
    resolver: Arc<dyn SigningKeyResolver>,
}

impl Authenticator {
    pub fn new(service_did: Did, resolver: Arc<dyn SigningKeyResolver>) -> Self {
        Self {
            service_did,
            resolver,
        }
    }

    /// Authenticate a request for `operation` from its Authorization header.
    pub async fn authenticate(
        &self,
        authorization: Option<&str>,
        operation: &str,
    ) -> Result<VerifiedToken, AuthError> {
        let token = extract_bearer_token(authorization)?;
        let verified = verify_service_jwt(
            token,
            self.service_did.as_str(),
            operation,
            self.resolver.as_ref(),
        )
        .await;

        if let Err(ServiceJwtError::Resolution(ref e)) = verified {
            warn!(operation = %operation, error = %e, "Issuer key resolution failed");
        }

        Ok(verified?)
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header.
///
/// The scheme name is case-insensitive (RFC 7235).
pub fn extract_bearer_token(auth_header: Option<&str>) -> Result<&str, AuthError> {
    let header = auth_header.ok_or(AuthError::MissingHeader)?;

    let token = header
        .split_once(' ')
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("Bearer"))
        .map(|(_, token)| token.trim())
        .ok_or(AuthError::MalformedScheme)?;

    if token.is_empty() || token.contains(' ') {
        return Err(AuthError::MalformedScheme);
    }

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::did::ResolverError;
    use async_trait::async_trait;
    use ed25519_dalek::VerifyingKey;

    struct NoKeys;

    #[async_trait]
    impl SigningKeyResolver for NoKeys {
        async fn resolve_signing_key(
            &self,
            did: &Did,
            _force_refresh: bool,
        ) -> Result<VerifyingKey, ResolverError> {
            Err(ResolverError::NoSigningKey(did.to_string()))
        }
    }

    fn authenticator() -> Authenticator {
        Authenticator::new(Did::parse("did:web:keys.example.com").unwrap(), Arc::new(NoKeys))
    }

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(extract_bearer_token(Some("Bearer abc123")).unwrap(), "abc123");
        assert_eq!(extract_bearer_token(Some("Bearer  abc123 ")).unwrap(), "abc123");
        assert_eq!(extract_bearer_token(Some("bearer abc123")).unwrap(), "abc123");
        assert_eq!(extract_bearer_token(Some("BEARER abc123")).unwrap(), "abc123");

        assert!(matches!(extract_bearer_token(None), Err(AuthError::MissingHeader)));
        for header in ["", "Bearer ", "Bearer", "abc123", "Basic abc123", "Bearerabc", "Bearer a b"] {
            assert!(
                matches!(extract_bearer_token(Some(header)), Err(AuthError::MalformedScheme)),
                "{header}"
            );
        }
    }

    #[tokio::test]
    async fn test_missing_header() {
        let result = authenticator().authenticate(None, "key.pigeon.muni.town").await;
        assert!(matches!(result, Err(AuthError::MissingHeader)));
    }

    #[tokio::test]
    async fn test_garbage_token() {
        let result = authenticator()
            .authenticate(Some("Bearer not-a-jwt"), "key.pigeon.muni.town")
            .await;
        assert!(matches!(result, Err(AuthError::Token(ServiceJwtError::Malformed(_)))));
    }
}
