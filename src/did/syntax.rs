//! DID syntax validation
//!
//! Accepts `did:<method>:<method-specific-id>` where the method is lowercase
//! alphanumeric and the identifier uses the characters allowed by the
//! W3C DID core grammar, with every `%` starting a two-hex-digit escape.
//! Only `did:web` and `did:plc` are served.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

/// Maximum accepted DID length
pub const MAX_DID_LEN: usize = 2048;

/// Supported DID methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DidMethod {
    /// `did:web` - resolved from a well-known document on the host
    Web,
    /// `did:plc` - resolved through the PLC directory
    Plc,
}

impl DidMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Plc => "plc",
        }
    }
}

/// Errors from DID parsing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DidError {
    #[error("Invalid DID syntax")]
    InvalidSyntax,

    #[error("Unsupported DID method, expected did:web or did:plc")]
    UnsupportedMethod(String),
}

/// A syntactically valid DID using one of the supported methods
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Did {
    value: String,
    method: DidMethod,
}

impl Did {
    /// Parse and validate a DID string
    pub fn parse(input: &str) -> Result<Self, DidError> {
        if input.len() > MAX_DID_LEN {
            return Err(DidError::InvalidSyntax);
        }

        let rest = input.strip_prefix("did:").ok_or(DidError::InvalidSyntax)?;
        let (method, id) = rest.split_once(':').ok_or(DidError::InvalidSyntax)?;

        if method.is_empty()
            || !method
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
        {
            return Err(DidError::InvalidSyntax);
        }

        if id.is_empty() || id.ends_with(':') || !is_valid_id(id) {
            return Err(DidError::InvalidSyntax);
        }

        let method = match method {
            "web" => DidMethod::Web,
            "plc" => DidMethod::Plc,
            other => return Err(DidError::UnsupportedMethod(other.to_string())),
        };

        Ok(Self {
            value: input.to_string(),
            method,
        })
    }

    pub fn method(&self) -> DidMethod {
        self.method
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// The part after `did:<method>:`
    pub fn method_specific_id(&self) -> &str {
        // Prefix length is fixed once the method is known.
        &self.value[4 + self.method.as_str().len() + 1..]
    }
}

fn is_valid_id(id: &str) -> bool {
    let mut bytes = id.bytes();
    while let Some(b) = bytes.next() {
        match b {
            b'%' => {
                let escape = (bytes.next(), bytes.next());
                if !matches!(escape, (Some(h), Some(l)) if h.is_ascii_hexdigit() && l.is_ascii_hexdigit())
                {
                    return false;
                }
            }
            b if b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b':' | b'-') => {}
            _ => return false,
        }
    }
    true
}

impl FromStr for Did {
    type Err = DidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl Serialize for Did {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.value)
    }
}

impl AsRef<str> for Did {
    fn as_ref(&self) -> &str {
        &self.value
    }
}
