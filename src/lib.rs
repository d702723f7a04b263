//! Pigeon keyserver
//!
//! An identity-bound keyserver. Every DID gets one Ed25519 keypair, generated
//! on first use and kept forever.
//!
//! ## Endpoints
//!
//! - **Descriptor**: `GET /.well-known/did.json`, the service's DID document
//! - **Public key**: `GET /xrpc/public.key.pigeon.muni.town?did=`, the public
//!   half of any DID's keypair
//! - **Own keypair**: `GET /xrpc/key.pigeon.muni.town`, both halves, only for
//!   a caller presenting a service JWT signed by the DID's own key

pub mod auth;
pub mod config;
pub mod db;
pub mod did;
pub mod keys;
pub mod logging;
pub mod routes;
pub mod server;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{KeyserverError, Result};
