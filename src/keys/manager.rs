//! Get-or-create for per-DID keypairs.
//!
//! Creation for a given DID is serialized behind an async mutex scoped to
//! that DID, and the final write goes through the store's atomic
//! `insert_if_absent`. Every caller racing on a fresh DID therefore ends up
//! with the one keypair that was persisted. Requests for different DIDs
//! never wait on each other.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::did::Did;
use crate::types::Result;

use super::crypto::Keypair;
use super::store::KeypairStore;

/// Keypair lifecycle manager
pub struct KeypairManager {
    store: Arc<dyn KeypairStore>,
    /// Creation locks, present only while a creation is in flight
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeypairManager {
    pub fn new(store: Arc<dyn KeypairStore>) -> Self {
        Self {
            store,
            locks: DashMap::new(),
        }
    }

    /// Return the keypair for `did`, generating and persisting it on first use.
    pub async fn get_or_create(&self, did: &Did) -> Result<Keypair> {
        if let Some(existing) = self.store.get(did).await? {
            return Ok(existing);
        }

        let slot = CreationSlot::acquire(&self.locks, did);
        let _guard = slot.lock.lock().await;
        self.create_locked(did).await
    }

    /// Number of DIDs with a creation currently in flight
    pub fn pending_creations(&self) -> usize {
        self.locks.len()
    }

    async fn create_locked(&self, did: &Did) -> Result<Keypair> {
        // Another task may have finished while we waited for the lock.
        if let Some(existing) = self.store.get(did).await? {
            debug!(did = %did, "Keypair created by a concurrent request");
            return Ok(existing);
        }

        let fresh = Keypair::generate();
        let canonical = self.store.insert_if_absent(did, fresh.clone()).await?;

        if canonical == fresh {
            info!(did = %did, "Generated new keypair");
        } else {
            debug!(did = %did, "Keypair persisted elsewhere first, using stored entry");
        }

        Ok(canonical)
    }
}

/// A claim on the creation lock for one DID.
///
/// Dropping the slot (including when the request future is abandoned)
/// removes the map entry once no other task holds or waits on it.
struct CreationSlot<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    key: &'a str,
    lock: Arc<Mutex<()>>,
}

impl<'a> CreationSlot<'a> {
    fn acquire(locks: &'a DashMap<String, Arc<Mutex<()>>>, did: &'a Did) -> Self {
        let lock = Arc::clone(
            locks
                .entry(did.as_str().to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        Self {
            locks,
            key: did.as_str(),
            lock,
        }
    }
}

impl Drop for CreationSlot<'_> {
    fn drop(&mut self) {
        // Map entry + this slot = 2; anything more is another waiter.
        self.locks.remove_if(self.key, |_, lock| {
            Arc::ptr_eq(lock, &self.lock) && Arc::strong_count(lock) <= 2
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::store::MemoryKeypairStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    fn did(s: &str) -> Did {
        Did::parse(s).unwrap()
    }

    /// Store with last-write-wins `insert_if_absent` and a slow read, so any
    /// missing serialization in the manager shows up as divergent keypairs.
    #[derive(Default)]
    struct RacyStore {
        inner: DashMap<String, Keypair>,
        writes: AtomicUsize,
    }

    #[async_trait]
    impl KeypairStore for RacyStore {
        async fn get(&self, did: &Did) -> Result<Option<Keypair>> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(self.inner.get(did.as_str()).map(|e| e.value().clone()))
        }

        async fn insert_if_absent(&self, did: &Did, keypair: Keypair) -> Result<Keypair> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.insert(did.as_str().to_string(), keypair.clone());
            Ok(keypair)
        }
    }

    /// Store whose first read misses and whose second read, made under the
    /// creation lock, never completes.
    #[derive(Default)]
    struct ParkingStore {
        reads: AtomicUsize,
        writes: AtomicUsize,
        parked: Notify,
    }

    #[async_trait]
    impl KeypairStore for ParkingStore {
        async fn get(&self, _did: &Did) -> Result<Option<Keypair>> {
            if self.reads.fetch_add(1, Ordering::SeqCst) == 0 {
                return Ok(None);
            }
            self.parked.notify_one();
            std::future::pending().await
        }

        async fn insert_if_absent(&self, _did: &Did, keypair: Keypair) -> Result<Keypair> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(keypair)
        }
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let manager = KeypairManager::new(Arc::new(MemoryKeypairStore::new()));
        let alice = did("did:plc:alice");

        let first = manager.get_or_create(&alice).await.unwrap();
        let second = manager.get_or_create(&alice).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(manager.pending_creations(), 0);
    }

    #[tokio::test]
    async fn test_different_dids_get_different_keypairs() {
        let manager = KeypairManager::new(Arc::new(MemoryKeypairStore::new()));
        let a = manager.get_or_create(&did("did:plc:alice")).await.unwrap();
        let b = manager.get_or_create(&did("did:plc:bob")).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_requests_converge() {
        let store = Arc::new(RacyStore::default());
        let manager = Arc::new(KeypairManager::new(store.clone()));
        let carol = did("did:web:carol.example");

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..32 {
            let manager = Arc::clone(&manager);
            let carol = carol.clone();
            tasks.spawn(async move { manager.get_or_create(&carol).await.unwrap() });
        }

        let mut results = Vec::new();
        while let Some(result) = tasks.join_next().await {
            results.push(result.unwrap());
        }

        let stored = store.inner.get(carol.as_str()).unwrap().value().clone();
        assert_eq!(store.writes.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|kp| *kp == stored));
        assert_eq!(manager.pending_creations(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_creation_releases_lock() {
        let store = Arc::new(ParkingStore::default());
        let manager = KeypairManager::new(store.clone());
        let erin = did("did:plc:erin");

        let mut creation = Box::pin(manager.get_or_create(&erin));
        tokio::select! {
            biased;
            _ = &mut creation => panic!("creation finished while its re-read was parked"),
            _ = store.parked.notified() => {}
        }
        assert_eq!(store.reads.load(Ordering::SeqCst), 2);
        assert_eq!(manager.pending_creations(), 1);

        drop(creation);
        assert_eq!(manager.pending_creations(), 0);
        assert_eq!(store.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_abandoned_read_leaves_no_entry() {
        let store = Arc::new(RacyStore::default());
        let manager = KeypairManager::new(store.clone());
        let dave = did("did:plc:dave");

        // Abandon the request while it is parked in the store read.
        let abandoned =
            tokio::time::timeout(Duration::from_millis(1), manager.get_or_create(&dave)).await;
        assert!(abandoned.is_err());
        assert!(store.inner.get(dave.as_str()).is_none());

        let keypair = manager.get_or_create(&dave).await.unwrap();
        assert_eq!(store.inner.get(dave.as_str()).unwrap().value(), &keypair);
    }
}
