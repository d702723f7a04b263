//! Decentralized identifiers: syntax validation and document resolution.

pub mod resolver;
pub mod syntax;

pub use resolver::{
    extract_signing_key, DidDocument, DidResolver, DidResolverConfig, DidResolverStats,
    ResolverError, DEFAULT_PLC_URL,
};
pub use syntax::{Did, DidError, DidMethod, MAX_DID_LEN};
