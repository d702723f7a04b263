//! Keypair generation.
//!
//! Keypairs are Ed25519: a 32-byte verifying key and the 32-byte secret
//! seed it was derived from. The secret half is zeroized when the value is
//! dropped.

use std::fmt;

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Ed25519 public key length (32 bytes)
pub const PUBLIC_KEY_LEN: usize = 32;

/// Ed25519 secret seed length (32 bytes)
pub const SECRET_KEY_LEN: usize = 32;

/// A keypair owned by exactly one DID.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Keypair {
    public_key: [u8; PUBLIC_KEY_LEN],
    secret_key: [u8; SECRET_KEY_LEN],
}

impl Keypair {
    /// Generate a fresh keypair from the OS random number generator.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self {
            public_key: signing_key.verifying_key().to_bytes(),
            secret_key: signing_key.to_bytes(),
        }
    }

    /// Rebuild a keypair from stored halves.
    ///
    /// The halves are taken as-is; the store is the source of truth and is
    /// not second-guessed on read.
    pub fn from_parts(public_key: [u8; PUBLIC_KEY_LEN], secret_key: [u8; SECRET_KEY_LEN]) -> Self {
        Self {
            public_key,
            secret_key,
        }
    }

    pub fn public_key(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.public_key
    }

    pub fn secret_key(&self) -> &[u8; SECRET_KEY_LEN] {
        &self.secret_key
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("public_key", &super::encoding::encode_multikey(&self.public_key))
            .field("secret_key", &"<redacted>")
            .finish()
    }
}
