//! Authentication for gated XRPC operations
//!
//! Callers prove their identity with service JWTs signed by the key
//! published in their DID document.

pub mod authenticator;
pub mod service_jwt;

pub use authenticator::{extract_bearer_token, AuthError, Authenticator};
pub use service_jwt::{
    issuer_did, verify_service_jwt, ServiceClaims, ServiceJwtError, SigningKeyResolver,
    VerifiedToken,
};
