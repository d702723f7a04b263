//! Service JWT verification
//!
//! Inbound requests carry short-lived EdDSA-signed JWTs minted by the
//! caller's own identity. The signing key is not known in advance: it is
//! looked up from the issuer DID through a [`SigningKeyResolver`].
//!
//! Security notes:
//! - Only `EdDSA` tokens are accepted, whatever the header claims otherwise
//! - `aud` must be this service's DID and `exp` must be in the future
//! - `lxm` must name the operation being invoked
//! - A signature failure triggers one forced re-resolution so that callers
//!   who rotated their key are not locked out until the cache expires

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use ed25519_dalek::VerifyingKey;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::did::{Did, ResolverError};

/// Source of issuer signing keys
#[async_trait]
pub trait SigningKeyResolver: Send + Sync {
    /// Current signing key for `did`.
    ///
    /// With `force_refresh` the lookup must bypass any cache.
    async fn resolve_signing_key(
        &self,
        did: &Did,
        force_refresh: bool,
    ) -> Result<VerifyingKey, ResolverError>;
}

/// Claims carried by a service JWT
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceClaims {
    /// Issuer DID, optionally with a `#service` fragment
    pub iss: String,
    /// Audience (this service's DID)
    pub aud: String,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
    /// Issued at (Unix timestamp)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
    /// Lexicon method the token is scoped to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lxm: Option<String>,
    /// Nonce
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

/// A token that passed every check
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    /// Issuer DID with any service fragment removed
    pub issuer: Did,
    pub claims: ServiceClaims,
}

/// The only field read before the signature is checked
#[derive(Deserialize)]
struct UnverifiedClaims {
    iss: String,
}

/// Reasons a service JWT is rejected
#[derive(Debug, thiserror::Error)]
pub enum ServiceJwtError {
    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("unsupported algorithm {0}")]
    UnsupportedAlgorithm(String),

    #[error("invalid issuer: {0}")]
    InvalidIssuer(String),

    #[error("could not resolve issuer signing key: {0}")]
    Resolution(#[from] ResolverError),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("token expired")]
    Expired,

    #[error("wrong audience")]
    WrongAudience,

    #[error("token scoped to {actual:?}, expected {expected}")]
    WrongOperation {
        expected: String,
        actual: Option<String>,
    },

    #[error("token validation failed: {0}")]
    Invalid(String),
}

/// Verify a service JWT for `expected_aud` and operation `expected_lxm`.
pub async fn verify_service_jwt(
    token: &str,
    expected_aud: &str,
    expected_lxm: &str,
    resolver: &dyn SigningKeyResolver,
) -> Result<VerifiedToken, ServiceJwtError> {
    let header = decode_header(token).map_err(|e| ServiceJwtError::Malformed(e.to_string()))?;
    if header.alg != Algorithm::EdDSA {
        return Err(ServiceJwtError::UnsupportedAlgorithm(format!("{:?}", header.alg)));
    }

    let issuer = unverified_issuer(token)?;

    let key = resolver.resolve_signing_key(&issuer, false).await?;
    let claims = match verify_with_key(token, &key, expected_aud) {
        Err(ServiceJwtError::InvalidSignature) => {
            let fresh = resolver.resolve_signing_key(&issuer, true).await?;
            if fresh == key {
                return Err(ServiceJwtError::InvalidSignature);
            }
            debug!(issuer = %issuer, "Signing key changed, retrying verification");
            verify_with_key(token, &fresh, expected_aud)?
        }
        result => result?,
    };

    if claims.lxm.as_deref() != Some(expected_lxm) {
        return Err(ServiceJwtError::WrongOperation {
            expected: expected_lxm.to_string(),
            actual: claims.lxm,
        });
    }

    Ok(VerifiedToken { issuer, claims })
}

/// Read `iss` from the payload without checking the signature.
fn unverified_issuer(token: &str) -> Result<Did, ServiceJwtError> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| ServiceJwtError::Malformed("missing payload".into()))?;

    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| ServiceJwtError::Malformed(e.to_string()))?;
    let claims: UnverifiedClaims =
        serde_json::from_slice(&bytes).map_err(|e| ServiceJwtError::Malformed(e.to_string()))?;

    issuer_did(&claims.iss)
}

/// Owner DID of an `iss` value, dropping any `#service` fragment.
pub fn issuer_did(iss: &str) -> Result<Did, ServiceJwtError> {
    let did = iss.split_once('#').map_or(iss, |(did, _)| did);
    Did::parse(did).map_err(|e| ServiceJwtError::InvalidIssuer(format!("{iss}: {e}")))
}

fn verify_with_key(
    token: &str,
    key: &VerifyingKey,
    expected_aud: &str,
) -> Result<ServiceClaims, ServiceJwtError> {
    let decoding_key = DecodingKey::from_ed_components(&URL_SAFE_NO_PAD.encode(key.as_bytes()))
        .map_err(|e| ServiceJwtError::Invalid(e.to_string()))?;

    let mut validation = Validation::new(Algorithm::EdDSA);
    validation.set_audience(&[expected_aud]);
    validation.set_required_spec_claims(&["exp", "aud", "iss"]);

    match decode::<ServiceClaims>(token, &decoding_key, &validation) {
        Ok(token_data) => Ok(token_data.claims),
        Err(err) => Err(match err.kind() {
            ErrorKind::InvalidSignature => ServiceJwtError::InvalidSignature,
            ErrorKind::ExpiredSignature => ServiceJwtError::Expired,
            ErrorKind::InvalidAudience => ServiceJwtError::WrongAudience,
            ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) => {
                ServiceJwtError::Malformed(err.to_string())
            }
            _ => ServiceJwtError::Invalid(err.to_string()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::{SystemTime, UNIX_EPOCH};

    const SERVICE: &str = "did:web:keys.example.com";
    const LXM: &str = "key.pigeon.muni.town";

    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    fn sign(key: &SigningKey, header: serde_json::Value, claims: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).unwrap());
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());
        let signing_input = format!("{header}.{payload}");
        let signature = key.sign(signing_input.as_bytes());
        format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature.to_bytes()))
    }

    fn token(key: &SigningKey, iss: &str, aud: &str, lxm: &str) -> String {
        sign(
            key,
            json!({ "alg": "EdDSA", "typ": "JWT" }),
            json!({ "iss": iss, "aud": aud, "exp": now() + 60, "iat": now(), "lxm": lxm }),
        )
    }

    /// Resolver with a possibly stale cached key and a current key.
    struct FakeResolver {
        cached: Mutex<VerifyingKey>,
        current: VerifyingKey,
        refreshes: AtomicUsize,
    }

    impl FakeResolver {
        fn new(key: &SigningKey) -> Self {
            Self::stale(key, key)
        }

        fn stale(cached: &SigningKey, current: &SigningKey) -> Self {
            Self {
                cached: Mutex::new(cached.verifying_key()),
                current: current.verifying_key(),
                refreshes: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SigningKeyResolver for FakeResolver {
        async fn resolve_signing_key(
            &self,
            _did: &Did,
            force_refresh: bool,
        ) -> Result<VerifyingKey, ResolverError> {
            let mut cached = self.cached.lock().unwrap();
            if force_refresh {
                self.refreshes.fetch_add(1, Ordering::SeqCst);
                *cached = self.current;
            }
            Ok(*cached)
        }
    }

    struct FailingResolver;

    #[async_trait]
    impl SigningKeyResolver for FailingResolver {
        async fn resolve_signing_key(
            &self,
            did: &Did,
            _force_refresh: bool,
        ) -> Result<VerifyingKey, ResolverError> {
            Err(ResolverError::NoSigningKey(did.to_string()))
        }
    }

    #[tokio::test]
    async fn test_valid_token() {
        let key = SigningKey::generate(&mut OsRng);
        let resolver = FakeResolver::new(&key);
        let jwt = token(&key, "did:plc:alice", SERVICE, LXM);

        let verified = verify_service_jwt(&jwt, SERVICE, LXM, &resolver).await.unwrap();
        assert_eq!(verified.issuer.as_str(), "did:plc:alice");
        assert_eq!(verified.claims.lxm.as_deref(), Some(LXM));
        assert_eq!(resolver.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_issuer_fragment_is_stripped() {
        let key = SigningKey::generate(&mut OsRng);
        let resolver = FakeResolver::new(&key);
        let jwt = token(&key, "did:plc:alice#atproto_pigeon", SERVICE, LXM);

        let verified = verify_service_jwt(&jwt, SERVICE, LXM, &resolver).await.unwrap();
        assert_eq!(verified.issuer.as_str(), "did:plc:alice");
    }

    #[tokio::test]
    async fn test_wrong_signature_rejected_after_refresh() {
        let key = SigningKey::generate(&mut OsRng);
        let impostor = SigningKey::generate(&mut OsRng);
        let resolver = FakeResolver::new(&key);
        let jwt = token(&impostor, "did:plc:alice", SERVICE, LXM);

        let result = verify_service_jwt(&jwt, SERVICE, LXM, &resolver).await;
        assert!(matches!(result, Err(ServiceJwtError::InvalidSignature)));
        assert_eq!(resolver.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rotated_key_accepted_after_refresh() {
        let old = SigningKey::generate(&mut OsRng);
        let new = SigningKey::generate(&mut OsRng);
        let resolver = FakeResolver::stale(&old, &new);
        let jwt = token(&new, "did:plc:alice", SERVICE, LXM);

        assert!(verify_service_jwt(&jwt, SERVICE, LXM, &resolver).await.is_ok());
        assert_eq!(resolver.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wrong_audience() {
        let key = SigningKey::generate(&mut OsRng);
        let resolver = FakeResolver::new(&key);
        let jwt = token(&key, "did:plc:alice", "did:web:elsewhere.example", LXM);

        let result = verify_service_jwt(&jwt, SERVICE, LXM, &resolver).await;
        assert!(matches!(result, Err(ServiceJwtError::WrongAudience)));
    }

    #[tokio::test]
    async fn test_wrong_operation() {
        let key = SigningKey::generate(&mut OsRng);
        let resolver = FakeResolver::new(&key);
        let jwt = token(&key, "did:plc:alice", SERVICE, "public.key.pigeon.muni.town");

        let result = verify_service_jwt(&jwt, SERVICE, LXM, &resolver).await;
        assert!(matches!(result, Err(ServiceJwtError::WrongOperation { .. })));
    }

    #[tokio::test]
    async fn test_missing_operation() {
        let key = SigningKey::generate(&mut OsRng);
        let resolver = FakeResolver::new(&key);
        let jwt = sign(
            &key,
            json!({ "alg": "EdDSA" }),
            json!({ "iss": "did:plc:alice", "aud": SERVICE, "exp": now() + 60 }),
        );

        let result = verify_service_jwt(&jwt, SERVICE, LXM, &resolver).await;
        assert!(matches!(
            result,
            Err(ServiceJwtError::WrongOperation { actual: None, .. })
        ));
    }

    #[tokio::test]
    async fn test_expired() {
        let key = SigningKey::generate(&mut OsRng);
        let resolver = FakeResolver::new(&key);
        let jwt = sign(
            &key,
            json!({ "alg": "EdDSA" }),
            json!({ "iss": "did:plc:alice", "aud": SERVICE, "exp": now() - 3600, "lxm": LXM }),
        );

        let result = verify_service_jwt(&jwt, SERVICE, LXM, &resolver).await;
        assert!(matches!(result, Err(ServiceJwtError::Expired)));
    }

    #[tokio::test]
    async fn test_other_algorithms_rejected() {
        let key = SigningKey::generate(&mut OsRng);
        let resolver = FakeResolver::new(&key);
        let jwt = sign(
            &key,
            json!({ "alg": "HS256" }),
            json!({ "iss": "did:plc:alice", "aud": SERVICE, "exp": now() + 60, "lxm": LXM }),
        );

        let result = verify_service_jwt(&jwt, SERVICE, LXM, &resolver).await;
        assert!(matches!(result, Err(ServiceJwtError::UnsupportedAlgorithm(_))));
    }

    #[tokio::test]
    async fn test_unsupported_issuer() {
        let key = SigningKey::generate(&mut OsRng);
        let resolver = FakeResolver::new(&key);
        let jwt = token(&key, "did:example:alice", SERVICE, LXM);

        let result = verify_service_jwt(&jwt, SERVICE, LXM, &resolver).await;
        assert!(matches!(result, Err(ServiceJwtError::InvalidIssuer(_))));
    }

    #[tokio::test]
    async fn test_resolution_failure() {
        let key = SigningKey::generate(&mut OsRng);
        let jwt = token(&key, "did:plc:alice", SERVICE, LXM);

        let result = verify_service_jwt(&jwt, SERVICE, LXM, &FailingResolver).await;
        assert!(matches!(result, Err(ServiceJwtError::Resolution(_))));
    }

    #[tokio::test]
    async fn test_garbage_token() {
        let key = SigningKey::generate(&mut OsRng);
        let resolver = FakeResolver::new(&key);

        for jwt in ["", "abc", "a.b.c", "invalid-token"] {
            let result = verify_service_jwt(jwt, SERVICE, LXM, &resolver).await;
            assert!(matches!(result, Err(ServiceJwtError::Malformed(_))), "{jwt}");
        }
    }

    #[test]
    fn test_issuer_did() {
        assert_eq!(issuer_did("did:plc:alice").unwrap().as_str(), "did:plc:alice");
        assert_eq!(
            issuer_did("did:web:example.com#svc").unwrap().as_str(),
            "did:web:example.com"
        );
        assert!(issuer_did("alice").is_err());
    }
}
