//! Configuration for the keyserver
//!
//! CLI arguments and environment variable handling using clap.

use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::time::Duration;

use crate::did::{Did, DidResolverConfig};

/// Pigeon keyserver - per-DID keypairs behind service-auth
#[derive(Parser, Debug, Clone)]
#[command(name = "pigeon-keyserver")]
#[command(about = "Identity-bound keyserver for DID-authenticated callers")]
pub struct Args {
    /// DID of this service: the descriptor `id` and the audience every
    /// inbound token must name
    #[arg(long, env = "SERVICE_DID")]
    pub service_did: Option<String>,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "pigeon_keyserver")]
    pub mongodb_db: String,

    /// Enable development mode (falls back to an in-memory store when
    /// MongoDB is unreachable)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// PLC directory used to resolve did:plc identities
    #[arg(long, env = "PLC_URL", default_value = "https://plc.directory")]
    pub plc_url: String,

    /// How long resolved DID documents are cached, in seconds
    #[arg(long, env = "DID_CACHE_TTL_SECS", default_value = "300")]
    pub did_cache_ttl_secs: u64,

    /// Timeout for DID document fetches in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "5000")]
    pub request_timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "pretty")]
    pub log_format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Pretty,
    /// One JSON object per event
    Json,
}

impl Args {
    /// The configured service DID, parsed.
    pub fn service_did(&self) -> Result<Did, String> {
        let raw = self
            .service_did
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| "SERVICE_DID is required".to_string())?;

        Did::parse(raw.trim()).map_err(|e| format!("SERVICE_DID {raw:?}: {e}"))
    }

    /// Resolver settings derived from the CLI
    pub fn resolver_config(&self) -> DidResolverConfig {
        DidResolverConfig {
            cache_ttl: Duration::from_secs(self.did_cache_ttl_secs),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            plc_url: self.plc_url.clone(),
            ..DidResolverConfig::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        self.service_did()?;

        if !self.plc_url.starts_with("https://") && !self.plc_url.starts_with("http://") {
            return Err("PLC_URL must be an http(s) URL".to_string());
        }

        if self.request_timeout_ms == 0 {
            return Err("REQUEST_TIMEOUT_MS must be greater than zero".to_string());
        }

        Ok(())
    }
}
