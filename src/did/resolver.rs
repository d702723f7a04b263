//! DID Resolution Service
//!
//! Resolves `did:web` and `did:plc` DIDs to their DID Documents and extracts
//! the Ed25519 signing key that service tokens from that DID must carry.
//! Documents are cached per DID; a forced refresh bypasses the cache and
//! replaces the entry.

use async_trait::async_trait;
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::auth::SigningKeyResolver;
use crate::keys::decode_multikey;

use super::syntax::{Did, DidMethod};

/// Default PLC directory
pub const DEFAULT_PLC_URL: &str = "https://plc.directory";

/// Verification method fragment holding the atproto signing key
const SIGNING_KEY_FRAGMENT: &str = "#atproto";

/// Configuration for the DID resolver
#[derive(Debug, Clone)]
pub struct DidResolverConfig {
    /// Cache TTL for resolved DID documents (default: 5 minutes)
    pub cache_ttl: Duration,
    /// Timeout for HTTP requests (default: 5 seconds)
    pub request_timeout: Duration,
    /// Maximum cache entries (default: 1000)
    pub max_cache_entries: usize,
    /// Base URL of the PLC directory
    pub plc_url: String,
}

impl Default for DidResolverConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(300),
            request_timeout: Duration::from_secs(5),
            max_cache_entries: 1000,
            plc_url: DEFAULT_PLC_URL.to_string(),
        }
    }
}

/// Cached DID document with expiration
struct CachedDocument {
    document: DidDocument,
    expires_at: Instant,
}

/// DID Resolution Service
pub struct DidResolver {
    config: DidResolverConfig,
    cache: RwLock<HashMap<String, CachedDocument>>,
    http_client: reqwest::Client,
}

impl DidResolver {
    /// Create a new DID resolver with default configuration
    pub fn new() -> Self {
        Self::with_config(DidResolverConfig::default())
    }

    /// Create a new DID resolver with custom configuration
    pub fn with_config(config: DidResolverConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("pigeon-keyserver/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();

        Self {
            config,
            cache: RwLock::new(HashMap::new()),
            http_client,
        }
    }

    /// Resolve a DID to its DID Document
    pub async fn resolve(
        &self,
        did: &Did,
        force_refresh: bool,
    ) -> Result<DidDocument, ResolverError> {
        if !force_refresh {
            if let Some(doc) = self.get_cached(did.as_str()).await {
                debug!(did = %did, "DID resolved from cache");
                return Ok(doc);
            }
        }

        let url = self.document_url(did)?;
        let document = self.fetch_document(did, &url).await?;
        self.cache_document(did.as_str(), document.clone()).await;

        Ok(document)
    }

    /// Resolve a DID straight to its Ed25519 signing key
    pub async fn resolve_signing_key(
        &self,
        did: &Did,
        force_refresh: bool,
    ) -> Result<VerifyingKey, ResolverError> {
        let document = self.resolve(did, force_refresh).await?;
        extract_signing_key(&document)
    }

    /// URL the DID document is fetched from
    fn document_url(&self, did: &Did) -> Result<String, ResolverError> {
        match did.method() {
            DidMethod::Web => did_web_to_url(did),
            DidMethod::Plc => Ok(format!(
                "{}/{}",
                self.config.plc_url.trim_end_matches('/'),
                did
            )),
        }
    }

    async fn fetch_document(&self, did: &Did, url: &str) -> Result<DidDocument, ResolverError> {
        debug!(did = %did, url = %url, "Fetching DID document");

        let response = self
            .http_client
            .get(url)
            .header("Accept", "application/did+ld+json, application/json")
            .send()
            .await
            .map_err(|e| ResolverError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ResolverError::ResolutionFailed(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        let document: DidDocument = response
            .json()
            .await
            .map_err(|e| ResolverError::InvalidDocument(e.to_string()))?;

        // A host serving another identity's document must not be able to
        // vouch for that identity's key.
        if document.id != did.as_str() {
            warn!(
                expected = %did,
                actual = %document.id,
                "DID document ID mismatch"
            );
            return Err(ResolverError::InvalidDocument(format!(
                "document id {} does not match {}",
                document.id, did
            )));
        }

        Ok(document)
    }

    /// Get a cached DID document if still valid
    async fn get_cached(&self, did: &str) -> Option<DidDocument> {
        let cache = self.cache.read().await;
        cache.get(did).and_then(|cached| {
            if cached.expires_at > Instant::now() {
                Some(cached.document.clone())
            } else {
                None
            }
        })
    }

    /// Cache a DID document
    async fn cache_document(&self, did: &str, document: DidDocument) {
        let mut cache = self.cache.write().await;

        // Evict oldest entries if cache is full
        if cache.len() >= self.config.max_cache_entries {
            // Simple eviction: remove expired entries first
            cache.retain(|_, v| v.expires_at > Instant::now());

            // If still too full, just clear half
            if cache.len() >= self.config.max_cache_entries {
                let to_remove: Vec<_> = cache.keys().take(cache.len() / 2).cloned().collect();
                for key in to_remove {
                    cache.remove(&key);
                }
            }
        }

        cache.insert(
            did.to_string(),
            CachedDocument {
                document,
                expires_at: Instant::now() + self.config.cache_ttl,
            },
        );
    }

    /// Get cache statistics
    pub async fn cache_stats(&self) -> DidResolverStats {
        let cache = self.cache.read().await;
        let now = Instant::now();
        let valid_entries = cache.values().filter(|v| v.expires_at > now).count();

        DidResolverStats {
            total_entries: cache.len(),
            valid_entries,
            expired_entries: cache.len() - valid_entries,
        }
    }
}

impl Default for DidResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SigningKeyResolver for DidResolver {
    async fn resolve_signing_key(
        &self,
        did: &Did,
        force_refresh: bool,
    ) -> Result<VerifyingKey, ResolverError> {
        DidResolver::resolve_signing_key(self, did, force_refresh).await
    }
}

/// Convert a did:web DID to its resolution URL
///
/// did:web:example.com → https://example.com/.well-known/did.json
/// did:web:example.com:path:to → https://example.com/path/to/did.json
fn did_web_to_url(did: &Did) -> Result<String, ResolverError> {
    let parts: Vec<&str> = did.method_specific_id().split(':').collect();

    // First part is the domain (with percent-encoding for the port separator)
    let domain = parts[0].replace("%3A", ":").replace("%3a", ":");
    if domain.is_empty() || domain.contains('%') {
        return Err(ResolverError::InvalidDid(format!(
            "Invalid did:web domain: {}",
            parts[0]
        )));
    }

    let path = if parts.len() > 1 {
        format!("/{}/did.json", parts[1..].join("/"))
    } else {
        "/.well-known/did.json".to_string()
    };

    Ok(format!("https://{domain}{path}"))
}

/// Pick the signing key out of a DID document.
///
/// Prefers the `#atproto` verification method, falling back to the first
/// method that carries a multibase key.
pub fn extract_signing_key(document: &DidDocument) -> Result<VerifyingKey, ResolverError> {
    let method = document
        .verification_method
        .iter()
        .find(|m| m.id.ends_with(SIGNING_KEY_FRAGMENT) && m.public_key_multibase.is_some())
        .or_else(|| {
            document
                .verification_method
                .iter()
                .find(|m| m.public_key_multibase.is_some())
        })
        .ok_or_else(|| ResolverError::NoSigningKey(document.id.clone()))?;

    // Checked by both find() predicates above
    let multibase = method.public_key_multibase.as_deref().unwrap_or_default();

    let bytes =
        decode_multikey(multibase).map_err(|e| ResolverError::UnsupportedKey(e.to_string()))?;

    VerifyingKey::from_bytes(&bytes).map_err(|e| ResolverError::UnsupportedKey(e.to_string()))
}

/// DID Document structure (simplified for resolution)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DidDocument {
    /// JSON-LD context
    #[serde(rename = "@context", default)]
    pub context: Vec<String>,

    /// The DID this document describes
    pub id: String,

    /// Other identifiers for the subject (e.g. `at://handle`)
    #[serde(rename = "alsoKnownAs", default)]
    pub also_known_as: Vec<String>,

    /// Verification methods (public keys)
    #[serde(rename = "verificationMethod", default)]
    pub verification_method: Vec<VerificationMethod>,

    /// Service endpoints
    #[serde(default)]
    pub service: Vec<Service>,
}

/// Verification method in DID Document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationMethod {
    pub id: String,
    #[serde(rename = "type")]
    pub method_type: String,
    pub controller: String,
    #[serde(rename = "publicKeyMultibase", skip_serializing_if = "Option::is_none")]
    pub public_key_multibase: Option<String>,
}

/// Service endpoint in DID Document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    #[serde(rename = "type")]
    pub service_type: String,
    #[serde(rename = "serviceEndpoint")]
    pub service_endpoint: String,
}

/// DID resolver statistics
#[derive(Debug, Clone)]
pub struct DidResolverStats {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
}

/// Errors from DID resolution
#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    #[error("Invalid DID: {0}")]
    InvalidDid(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Resolution failed: {0}")]
    ResolutionFailed(String),

    #[error("Invalid DID document: {0}")]
    InvalidDocument(String),

    #[error("No signing key in DID document for {0}")]
    NoSigningKey(String),

    #[error("Unsupported signing key: {0}")]
    UnsupportedKey(String),
}
