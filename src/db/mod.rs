//! Durable storage

pub mod mongo;

pub use mongo::{KeypairDoc, MongoClient, MongoKeypairStore, KEYPAIRS_COLLECTION};
