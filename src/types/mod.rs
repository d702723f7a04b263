//! Shared types for the keyserver

pub mod error;

pub use error::{KeyserverError, Result};
