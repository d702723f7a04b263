//! HTTP server

pub mod http;

pub use http::{
    handle_request, run, AppState, HEALTH_OPERATION, OWN_KEYPAIR_OPERATION, PUBLIC_KEY_OPERATION,
    XRPC_PREFIX,
};
