//! Error types for the keyserver
//!
//! Every request-level failure is funnelled into [`KeyserverError`], which
//! knows its HTTP status and the text that is safe to show a caller.

use hyper::StatusCode;

/// Main error type for keyserver operations
#[derive(Debug, thiserror::Error)]
pub enum KeyserverError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Authentication failures. The payload is the logged cause and is
    /// never written to the response body.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl KeyserverError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short error name used in the `error` field of JSON bodies
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "Bad Request",
            Self::Forbidden(_) => "Forbidden",
            Self::NotFound(_) => "Not Found",
            Self::Database(_) => "Service Unavailable",
            Self::Internal(_) | Self::Config(_) => "Internal Server Error",
        }
    }

    /// Message that may be disclosed to the caller.
    ///
    /// Client input errors name the violated constraint. Everything else is
    /// generic so resolver, signature and storage details stay server-side.
    pub fn public_message(&self) -> String {
        match self {
            Self::BadRequest(msg) => msg.clone(),
            Self::NotFound(path) => format!("No route for {path}"),
            Self::Forbidden(_) => "Authentication required".to_string(),
            Self::Database(_) => "Storage temporarily unavailable".to_string(),
            Self::Internal(_) | Self::Config(_) => "Internal server error".to_string(),
        }
    }
}

impl From<std::io::Error> for KeyserverError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for KeyserverError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON error: {}", err))
    }
}

impl From<mongodb::error::Error> for KeyserverError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// Result type alias for keyserver operations
pub type Result<T> = std::result::Result<T, KeyserverError>;
