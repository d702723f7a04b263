//! HTTP route handlers

pub mod health;
pub mod identity;
pub mod keys;

pub use health::handle_health;
pub use identity::{build_descriptor, handle_did_document, request_base_url, ServiceDescriptor};
pub use keys::{handle_own_keypair, handle_public_key, KeypairResponse, PublicKeyResponse};

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::types::Result;

/// Serialize `body` as an uncacheable JSON response
pub(crate) fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Result<Response<Full<Bytes>>> {
    let json = serde_json::to_vec(body)?;

    Ok(Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Cache-Control", "no-store")
        .body(Full::new(Bytes::from(json)))
        .unwrap())
}
