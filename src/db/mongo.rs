//! MongoDB keypair store
//!
//! One document per DID in the `keypairs` collection, keyed by `_id`.
//! Creation goes through `findOneAndUpdate` with `$setOnInsert` and upsert,
//! so an existing document is never overwritten.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bson::{doc, DateTime};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::ReturnDocument;
use mongodb::{Client, Collection};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::did::Did;
use crate::keys::{Keypair, KeypairStore, PUBLIC_KEY_LEN, SECRET_KEY_LEN};
use crate::types::{KeyserverError, Result};

/// Collection holding one keypair per DID
pub const KEYPAIRS_COLLECTION: &str = "keypairs";

/// Server error code for unique index violations
const DUPLICATE_KEY_CODE: i32 = 11000;

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Connect and verify the server answers a ping
    pub async fn new(uri: &str, db_name: &str) -> Result<Self> {
        info!("Connecting to MongoDB at {}", redact_uri(uri));

        // Use serverSelectionTimeoutMS to avoid hanging on unreachable MongoDB
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| KeyserverError::Database(format!("Failed to connect to MongoDB: {}", e)))?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| KeyserverError::Database(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    /// Keypair store backed by this database
    pub fn keypair_store(&self) -> MongoKeypairStore {
        MongoKeypairStore::new(
            self.client
                .database(&self.db_name)
                .collection::<KeypairDoc>(KEYPAIRS_COLLECTION),
        )
    }
}

/// Stored form of a keypair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeypairDoc {
    /// Owner DID
    #[serde(rename = "_id")]
    pub did: String,
    /// Standard base64 of the raw public key
    pub public_key: String,
    /// Standard base64 of the raw secret key
    pub secret_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime>,
}

impl KeypairDoc {
    pub fn new(did: &Did, keypair: &Keypair) -> Self {
        Self {
            did: did.to_string(),
            public_key: BASE64.encode(keypair.public_key()),
            secret_key: BASE64.encode(keypair.secret_key()),
            created_at: Some(DateTime::now()),
        }
    }

    /// Decode the stored halves.
    pub fn to_keypair(&self) -> Result<Keypair> {
        Ok(Keypair::from_parts(
            decode_field::<PUBLIC_KEY_LEN>(&self.did, "public_key", &self.public_key)?,
            decode_field::<SECRET_KEY_LEN>(&self.did, "secret_key", &self.secret_key)?,
        ))
    }
}

fn decode_field<const N: usize>(did: &str, field: &str, value: &str) -> Result<[u8; N]> {
    let corrupt = |reason: String| {
        KeyserverError::Internal(format!("Corrupt {field} stored for {did}: {reason}"))
    };

    let bytes = BASE64.decode(value).map_err(|e| corrupt(e.to_string()))?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| corrupt(format!("expected {N} bytes, got {len}")))
}

/// [`KeypairStore`] over a MongoDB collection
#[derive(Clone)]
pub struct MongoKeypairStore {
    collection: Collection<KeypairDoc>,
}

impl MongoKeypairStore {
    pub fn new(collection: Collection<KeypairDoc>) -> Self {
        Self { collection }
    }
}

#[async_trait]
impl KeypairStore for MongoKeypairStore {
    async fn get(&self, did: &Did) -> Result<Option<Keypair>> {
        self.collection
            .find_one(doc! { "_id": did.as_str() })
            .await?
            .map(|stored| stored.to_keypair())
            .transpose()
    }

    async fn insert_if_absent(&self, did: &Did, keypair: Keypair) -> Result<Keypair> {
        let fresh = KeypairDoc::new(did, &keypair);
        let update = doc! {
            "$setOnInsert": {
                "public_key": fresh.public_key.as_str(),
                "secret_key": fresh.secret_key.as_str(),
                "created_at": DateTime::now(),
            }
        };

        let result = self
            .collection
            .find_one_and_update(doc! { "_id": did.as_str() }, update)
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await;

        match result {
            Ok(Some(stored)) => stored.to_keypair(),
            Ok(None) => Err(KeyserverError::Database(format!(
                "Upsert for {} returned no document",
                did
            ))),
            // Two upserts on the same _id can race; the loser reads the winner.
            Err(e) if is_duplicate_key(&e) => {
                debug!(did = %did, "Concurrent upsert, reading stored keypair");
                self.get(did).await?.ok_or_else(|| {
                    KeyserverError::Database(format!("Keypair for {} vanished after upsert", did))
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(e)) => e.code == DUPLICATE_KEY_CODE,
        ErrorKind::Command(e) => e.code == DUPLICATE_KEY_CODE,
        _ => false,
    }
}

/// Strip credentials from a connection string before logging it
fn redact_uri(uri: &str) -> String {
    match (uri.find("://"), uri.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***@{}", &uri[..scheme_end], &uri[at + 1..])
        }
        _ => uri.to_string(),
    }
}
