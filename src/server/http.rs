//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling. Everything under
//! `/xrpc/` except the public routes must carry a service JWT scoped to the
//! operation named by the first path segment.

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, ACCESS_CONTROL_ALLOW_ORIGIN, AUTHORIZATION};
use hyper::http::request::Parts;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::auth::{Authenticator, SigningKeyResolver};
use crate::did::Did;
use crate::keys::{KeypairManager, KeypairStore};
use crate::routes;
use crate::types::{KeyserverError, Result};

/// Prefix of all gated operations
pub const XRPC_PREFIX: &str = "/xrpc/";

/// Operation returning the caller's own keypair
pub const OWN_KEYPAIR_OPERATION: &str = "key.pigeon.muni.town";

/// Operation returning any DID's public key
pub const PUBLIC_KEY_OPERATION: &str = "public.key.pigeon.muni.town";

/// Liveness operation
pub const HEALTH_OPERATION: &str = "_health";

/// Shared application state
pub struct AppState {
    /// This service's DID
    pub service_did: Did,
    /// Per-DID keypairs
    pub keys: KeypairManager,
    /// Gate for `/xrpc/` operations
    pub authenticator: Authenticator,
}

impl AppState {
    pub fn new(
        service_did: Did,
        store: Arc<dyn KeypairStore>,
        resolver: Arc<dyn SigningKeyResolver>,
    ) -> Self {
        Self {
            keys: KeypairManager::new(store),
            authenticator: Authenticator::new(service_did.clone(), resolver),
            service_did,
        }
    }
}

pub async fn run(state: Arc<AppState>, listen: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(listen).await?;

    info!("Keyserver listening on {} as {}", listen, state.service_did);

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        let span = info_span!("request", id = %Uuid::new_v4(), peer = %addr);
                        async move { Ok::<_, Infallible>(handle_request(state, req).await) }
                            .instrument(span)
                    });

                    if let Err(err) = http1::Builder::new()
                        .serve_connection(io, service)
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route an HTTP request.
///
/// The body is dropped unread, so any body type is accepted.
pub async fn handle_request<B>(state: Arc<AppState>, req: Request<B>) -> Response<Full<Bytes>> {
    let (parts, _) = req.into_parts();
    let method = parts.method.clone();
    let path = parts.uri.path().to_string();

    info!("{} {}", method, path);

    let result = match (&method, path.as_str()) {
        (&Method::OPTIONS, _) => Ok(preflight_response()),

        (&Method::GET, "/.well-known/did.json") => {
            routes::handle_did_document(&state.service_did, &parts.headers)
        }

        (&Method::GET, p) if is_operation(p, HEALTH_OPERATION) => routes::handle_health(),

        (&Method::GET, p) if is_operation(p, PUBLIC_KEY_OPERATION) => {
            routes::handle_public_key(&state.keys, parts.uri.query()).await
        }

        (_, p) if p.starts_with(XRPC_PREFIX) => handle_gated(&state, &parts, p).await,

        _ => Err(KeyserverError::NotFound(path.clone())),
    };

    let mut response = result.unwrap_or_else(|e| error_response(&e));
    response
        .headers_mut()
        .insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));

    debug!(status = %response.status(), "{} {} done", method, path);
    response
}

/// Authenticate, then dispatch an operation that requires a caller identity
async fn handle_gated(state: &AppState, parts: &Parts, path: &str) -> Result<Response<Full<Bytes>>> {
    let operation = operation_name(path);
    let authorization = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let caller = match state.authenticator.authenticate(authorization, operation).await {
        Ok(verified) => verified.issuer,
        Err(e) => {
            warn!(operation = %operation, cause = %e, "Authentication failed");
            return Err(KeyserverError::Forbidden(e.to_string()));
        }
    };

    debug!(caller = %caller, operation = %operation, "Authenticated");

    match (&parts.method, path) {
        (&Method::GET, p) if p == format!("{XRPC_PREFIX}{OWN_KEYPAIR_OPERATION}") => {
            routes::handle_own_keypair(&state.keys, &caller).await
        }
        _ => Err(KeyserverError::NotFound(path.to_string())),
    }
}

/// Operation name: the path segment after `/xrpc/`
fn operation_name(path: &str) -> &str {
    path.strip_prefix(XRPC_PREFIX)
        .and_then(|rest| rest.split('/').next())
        .unwrap_or_default()
}

fn is_operation(path: &str, operation: &str) -> bool {
    path.strip_prefix(XRPC_PREFIX) == Some(operation)
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

/// Error response with a caller-safe message
fn error_response(err: &KeyserverError) -> Response<Full<Bytes>> {
    match err {
        KeyserverError::Database(_) | KeyserverError::Internal(_) | KeyserverError::Config(_) => {
            error!("Request failed: {}", err)
        }
        _ => debug!("Request rejected: {}", err),
    }

    let body = ErrorBody {
        error: err.kind(),
        message: err.public_message(),
    };
    let json = serde_json::to_vec(&body).unwrap_or_default();

    Response::builder()
        .status(err.status_code())
        .header("Content-Type", "application/json")
        .header("Cache-Control", "no-store")
        .body(Full::new(Bytes::from(json)))
        .unwrap()
}

/// CORS preflight response
fn preflight_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Headers", "*")
        .header("Access-Control-Allow-Methods", "GET, OPTIONS")
        .header("Access-Control-Max-Age", "86400")
        .body(Full::new(Bytes::new()))
        .unwrap()
}
