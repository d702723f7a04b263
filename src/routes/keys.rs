//! Keypair endpoints
//!
//! - `GET /xrpc/public.key.pigeon.muni.town?did=` returns the public half of
//!   any DID's keypair, creating the keypair on first lookup
//! - `GET /xrpc/key.pigeon.muni.town` returns both halves, only ever for the
//!   authenticated caller's own DID

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::did::Did;
use crate::keys::{encode_public_tag, encode_secret, KeypairManager};
use crate::types::{KeyserverError, Result};

use super::json_response;

/// Query string of the public key lookup
#[derive(Debug, Default, Deserialize)]
struct PublicKeyQuery {
    did: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyResponse {
    pub public_key: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeypairResponse {
    pub public_key: String,
    pub secret_key: String,
}

/// Handle GET /xrpc/public.key.pigeon.muni.town
pub async fn handle_public_key(
    keys: &KeypairManager,
    query: Option<&str>,
) -> Result<Response<Full<Bytes>>> {
    let query: PublicKeyQuery = serde_urlencoded::from_str(query.unwrap_or_default())
        .map_err(|_| KeyserverError::BadRequest("Invalid query string".to_string()))?;

    let raw = query
        .did
        .filter(|did| !did.is_empty())
        .ok_or_else(|| KeyserverError::BadRequest("Missing required parameter: did".to_string()))?;

    let did = Did::parse(&raw).map_err(|e| KeyserverError::BadRequest(e.to_string()))?;

    let keypair = keys.get_or_create(&did).await?;
    debug!(did = %did, "Served public key");

    json_response(
        StatusCode::OK,
        &PublicKeyResponse {
            public_key: encode_public_tag(keypair.public_key()),
        },
    )
}

/// Handle GET /xrpc/key.pigeon.muni.town for an authenticated caller
pub async fn handle_own_keypair(keys: &KeypairManager, caller: &Did) -> Result<Response<Full<Bytes>>> {
    let keypair = keys.get_or_create(caller).await?;
    debug!(did = %caller, "Served keypair to owner");

    json_response(
        StatusCode::OK,
        &KeypairResponse {
            public_key: encode_public_tag(keypair.public_key()),
            secret_key: encode_secret(keypair.secret_key()),
        },
    )
}
