//! Service DID document
//!
//! Serves this keyserver's own W3C DID Document so that clients resolving
//! the service DID (usually `did:web`) find the keyserver endpoint.

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderMap, HOST};
use hyper::http::uri::Authority;
use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::did::{Did, DidMethod};
use crate::types::Result;

/// Fragment of the keyserver service entry
pub const SERVICE_ID: &str = "#pigeon_keyserver";

/// Service type advertised in the DID document
pub const SERVICE_TYPE: &str = "PigeonKeyserver";

/// W3C DID Document structure
/// See: https://www.w3.org/TR/did-core/
#[derive(Debug, Serialize)]
pub struct ServiceDescriptor {
    /// JSON-LD context
    #[serde(rename = "@context")]
    pub context: Vec<String>,

    /// The DID that this document describes
    pub id: String,

    /// Service endpoints
    pub service: Vec<Service>,
}

/// Service endpoint in DID Document
#[derive(Debug, Serialize)]
pub struct Service {
    /// Full ID of this service
    pub id: String,

    /// Type of service
    #[serde(rename = "type")]
    pub service_type: String,

    /// Service endpoint URL
    #[serde(rename = "serviceEndpoint")]
    pub service_endpoint: String,
}

/// Build the DID Document for this service
pub fn build_descriptor(service_did: &Did, base_url: &str) -> ServiceDescriptor {
    ServiceDescriptor {
        context: vec!["https://www.w3.org/ns/did/v1".to_string()],
        id: service_did.to_string(),
        service: vec![Service {
            id: SERVICE_ID.to_string(),
            service_type: SERVICE_TYPE.to_string(),
            service_endpoint: base_url.to_string(),
        }],
    }
}

/// Base URL the request was addressed to.
///
/// Honors `X-Forwarded-Proto` from a fronting proxy. Without it, loopback
/// hosts are assumed to be plain http and everything else https. Requests
/// without a usable Host header (missing, or not a bare `host[:port]`)
/// fall back to the service's did:web domain.
pub fn request_base_url(headers: &HeaderMap, service_did: &Did) -> String {
    let host = headers
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.trim().parse::<Authority>().ok())
        .filter(|authority| !authority.as_str().contains('@'))
        .map(|authority| authority.as_str().to_string())
        .or_else(|| did_web_host(service_did))
        .unwrap_or_else(|| "localhost".to_string());

    let proto = headers
        .get("x-forwarded-proto")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.split(',').next())
        .map(|p| p.trim().to_ascii_lowercase())
        .filter(|p| p == "http" || p == "https")
        .unwrap_or_else(|| {
            if is_loopback(&host) {
                "http".to_string()
            } else {
                "https".to_string()
            }
        });

    format!("{proto}://{host}")
}

fn did_web_host(did: &Did) -> Option<String> {
    match did.method() {
        DidMethod::Web => did
            .method_specific_id()
            .split(':')
            .next()
            .map(|domain| domain.replace("%3A", ":").replace("%3a", ":")),
        DidMethod::Plc => None,
    }
}

fn is_loopback(host: &str) -> bool {
    let name = match host.strip_prefix('[') {
        Some(v6) => v6.split(']').next().unwrap_or(v6),
        None => host.split(':').next().unwrap_or(host),
    };
    matches!(name, "localhost" | "127.0.0.1" | "::1")
}

/// Handle GET /.well-known/did.json
///
/// Public, and cacheable for five minutes.
pub fn handle_did_document(service_did: &Did, headers: &HeaderMap) -> Result<Response<Full<Bytes>>> {
    let document = build_descriptor(service_did, &request_base_url(headers, service_did));
    let body = serde_json::to_string_pretty(&document)?;

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/did+ld+json")
        .header("Cache-Control", "public, max-age=300") // 5 minute cache
        .body(Full::new(Bytes::from(body)))
        .unwrap())
}
