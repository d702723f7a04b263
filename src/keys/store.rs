//! Keypair storage backends.
//!
//! The store is the only source of truth for which keypair belongs to a DID.
//! Backends must make `insert_if_absent` atomic: concurrent callers for the
//! same DID all get back the single entry that was persisted.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::did::Did;
use crate::types::Result;

use super::crypto::Keypair;

/// Durable DID → keypair mapping
#[async_trait]
pub trait KeypairStore: Send + Sync {
    /// Look up the keypair for a DID
    async fn get(&self, did: &Did) -> Result<Option<Keypair>>;

    /// Persist `keypair` unless the DID already has one.
    ///
    /// Returns the canonical keypair: the argument if it was written,
    /// otherwise the entry that already existed.
    async fn insert_if_absent(&self, did: &Did, keypair: Keypair) -> Result<Keypair>;
}

/// In-memory store for development mode and tests
#[derive(Default)]
pub struct MemoryKeypairStore {
    entries: DashMap<String, Keypair>,
}

impl MemoryKeypairStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KeypairStore for MemoryKeypairStore {
    async fn get(&self, did: &Did) -> Result<Option<Keypair>> {
        Ok(self.entries.get(did.as_str()).map(|entry| entry.value().clone()))
    }

    async fn insert_if_absent(&self, did: &Did, keypair: Keypair) -> Result<Keypair> {
        let entry = self
            .entries
            .entry(did.as_str().to_string())
            .or_insert(keypair);
        Ok(entry.value().clone())
    }
}
