//! Per-DID keypair management
//!
//! Each DID owns exactly one Ed25519 keypair for the lifetime of its store
//! entry:
//! - generated lazily on first request and written once
//! - public half published as a `did:key` multikey to anyone
//! - secret half released only to the authenticated owner

pub mod crypto;
pub mod encoding;
pub mod manager;
pub mod store;

pub use crypto::{Keypair, PUBLIC_KEY_LEN, SECRET_KEY_LEN};
pub use encoding::{
    decode_multikey, decode_public_tag, decode_secret, encode_multikey, encode_public_tag,
    encode_secret, KeyEncodingError, PUBLIC_KEY_TAG,
};
pub use manager::KeypairManager;
pub use store::{KeypairStore, MemoryKeypairStore};
