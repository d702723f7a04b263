//! Textual encodings for keypair halves.
//!
//! Public keys are published as `did:key` multikeys:
//!
//! ```text
//! did:key: z <base58btc( [0xed, 0x01] ++ public_key_bytes )>
//! ```
//!
//! `[0xed, 0x01]` is the unsigned-varint `ed25519-pub` multicodec, which is
//! what makes every encoded key start with `did:key:z6Mk`. Secret keys are
//! plain standard base64 with no marker. Consumers depend on both formats,
//! so they must not change.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use super::crypto::{PUBLIC_KEY_LEN, SECRET_KEY_LEN};

/// Prefix of every encoded public key
pub const PUBLIC_KEY_TAG: &str = "did:key:";

/// Multibase prefix for base58btc
const MULTIBASE_BASE58BTC: char = 'z';

/// Unsigned-varint multicodec prefix for `ed25519-pub`
const ED25519_PUB_MULTICODEC: [u8; 2] = [0xed, 0x01];

/// Errors from decoding encoded key material
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyEncodingError {
    #[error("missing {0} prefix")]
    MissingPrefix(&'static str),

    #[error("invalid base58btc: {0}")]
    Base58(String),

    #[error("invalid base64: {0}")]
    Base64(String),

    #[error("unsupported multicodec prefix {0:#04x} {1:#04x}")]
    UnsupportedCodec(u8, u8),

    #[error("expected {expected} key bytes, got {actual}")]
    Length { expected: usize, actual: usize },
}

/// Encode a public key as a `did:key` multikey.
pub fn encode_public_tag(public_key: &[u8; PUBLIC_KEY_LEN]) -> String {
    format!("{PUBLIC_KEY_TAG}{}", encode_multikey(public_key))
}

/// Inverse of [`encode_public_tag`].
pub fn decode_public_tag(encoded: &str) -> Result<[u8; PUBLIC_KEY_LEN], KeyEncodingError> {
    let multikey = encoded
        .strip_prefix(PUBLIC_KEY_TAG)
        .ok_or(KeyEncodingError::MissingPrefix(PUBLIC_KEY_TAG))?;
    decode_multikey(multikey)
}

/// Encode a secret key as plain base64.
pub fn encode_secret(secret_key: &[u8; SECRET_KEY_LEN]) -> String {
    BASE64.encode(secret_key)
}

/// Inverse of [`encode_secret`].
pub fn decode_secret(encoded: &str) -> Result<[u8; SECRET_KEY_LEN], KeyEncodingError> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| KeyEncodingError::Base64(e.to_string()))?;
    to_array(bytes)
}

/// Encode an Ed25519 public key as a bare multibase multikey (`z6Mk…`).
pub fn encode_multikey(public_key: &[u8; PUBLIC_KEY_LEN]) -> String {
    let mut prefixed = Vec::with_capacity(ED25519_PUB_MULTICODEC.len() + PUBLIC_KEY_LEN);
    prefixed.extend_from_slice(&ED25519_PUB_MULTICODEC);
    prefixed.extend_from_slice(public_key);
    format!("{MULTIBASE_BASE58BTC}{}", bs58::encode(prefixed).into_string())
}

/// Decode a bare multibase multikey, accepting only Ed25519 public keys.
///
/// Also used for `publicKeyMultibase` values found in resolved DID documents.
pub fn decode_multikey(multikey: &str) -> Result<[u8; PUBLIC_KEY_LEN], KeyEncodingError> {
    let body = multikey
        .strip_prefix(MULTIBASE_BASE58BTC)
        .ok_or(KeyEncodingError::MissingPrefix("multibase 'z'"))?;

    let bytes = bs58::decode(body)
        .into_vec()
        .map_err(|e| KeyEncodingError::Base58(e.to_string()))?;

    match bytes.as_slice() {
        [a, b, key @ ..] if [*a, *b] == ED25519_PUB_MULTICODEC => to_array(key.to_vec()),
        [a, b, ..] => Err(KeyEncodingError::UnsupportedCodec(*a, *b)),
        _ => Err(KeyEncodingError::Length {
            expected: ED25519_PUB_MULTICODEC.len() + PUBLIC_KEY_LEN,
            actual: bytes.len(),
        }),
    }
}

fn to_array<const N: usize>(bytes: Vec<u8>) -> Result<[u8; N], KeyEncodingError> {
    let actual = bytes.len();
    bytes
        .try_into()
        .map_err(|_| KeyEncodingError::Length { expected: N, actual })
}
