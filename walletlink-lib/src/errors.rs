//! Error types for WalletLink library operations.
//!
//! Library errors describe malformed input, cryptographic failures and
//! transport problems. Protocol-level outcomes (a peer refusing a request)
//! are expressed with [`crate::Reason`] instead.

use std::fmt;

/// Stable numeric error codes for host integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum LinkErrorCode {
    /// Invalid request/data
    InvalidData = 1000,
    /// Malformed connection URI
    InvalidUri = 1001,
    /// Malformed chain, account or method identifier
    InvalidIdentifier = 1002,
    /// Resource not found
    NotFound = 2000,
    /// Relay/network layer error
    Transport = 3000,
    /// Key agreement, encryption or decryption failed
    Crypto = 4000,
    /// Serialization error
    Serialization = 5000,
    /// Storage error
    Storage = 6000,
    /// Internal/unexpected error
    Internal = 9999,
}

/// Error type for WalletLink library operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// Invalid data provided.
    InvalidData {
        /// Field or parameter name
        field: String,
        /// Reason for invalidity
        reason: String,
    },

    /// Connection URI could not be parsed.
    InvalidUri(String),

    /// Chain, account or method identifier is malformed.
    InvalidIdentifier {
        /// Kind of identifier (e.g., "chain", "account")
        kind: &'static str,
        /// The offending value
        value: String,
    },

    /// Resource not found.
    NotFound {
        /// Type of resource (e.g., "secret", "key pair")
        resource_type: String,
        /// Resource identifier
        identifier: String,
    },

    /// Relay/network layer error.
    Transport(String),

    /// Cryptographic operation failed.
    Crypto(String),

    /// Serialization/deserialization error.
    Serialization(String),

    /// Storage operation failed.
    Storage(String),

    /// Internal/unexpected error.
    Internal(String),
}

impl LinkError {
    /// Get the numeric error code.
    pub fn code(&self) -> LinkErrorCode {
        match self {
            Self::InvalidData { .. } => LinkErrorCode::InvalidData,
            Self::InvalidUri(_) => LinkErrorCode::InvalidUri,
            Self::InvalidIdentifier { .. } => LinkErrorCode::InvalidIdentifier,
            Self::NotFound { .. } => LinkErrorCode::NotFound,
            Self::Transport(_) => LinkErrorCode::Transport,
            Self::Crypto(_) => LinkErrorCode::Crypto,
            Self::Serialization(_) => LinkErrorCode::Serialization,
            Self::Storage(_) => LinkErrorCode::Storage,
            Self::Internal(_) => LinkErrorCode::Internal,
        }
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Storage(_))
    }

    pub fn invalid_data(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidData {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_identifier(kind: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidIdentifier {
            kind,
            value: value.into(),
        }
    }

    pub fn not_found(resource_type: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self::NotFound {
            resource_type: resource_type.into(),
            identifier: identifier.into(),
        }
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn crypto(msg: impl Into<String>) -> Self {
        Self::Crypto(msg.into())
    }
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidData { field, reason } => {
                write!(f, "Invalid data in '{}': {}", field, reason)
            }
            Self::InvalidUri(msg) => write!(f, "Invalid connection URI: {}", msg),
            Self::InvalidIdentifier { kind, value } => {
                write!(f, "Malformed {} identifier: '{}'", kind, value)
            }
            Self::NotFound {
                resource_type,
                identifier,
            } => write!(f, "{} not found: {}", resource_type, identifier),
            Self::Transport(msg) => write!(f, "Transport error: {}", msg),
            Self::Crypto(msg) => write!(f, "Crypto error: {}", msg),
            Self::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Self::Storage(msg) => write!(f, "Storage error: {}", msg),
            Self::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for LinkError {}

impl From<serde_json::Error> for LinkError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_variants() {
        assert_eq!(
            LinkError::invalid_data("x", "y").code(),
            LinkErrorCode::InvalidData
        );
        assert_eq!(
            LinkError::InvalidUri("bad".into()).code(),
            LinkErrorCode::InvalidUri
        );
        assert_eq!(
            LinkError::invalid_identifier("chain", "eth").code(),
            LinkErrorCode::InvalidIdentifier
        );
        assert_eq!(LinkError::crypto("tag").code(), LinkErrorCode::Crypto);
        assert_eq!(LinkErrorCode::Internal as i32, 9999);
    }

    #[test]
    fn retryable_errors() {
        assert!(LinkError::transport("down").is_retryable());
        assert!(LinkError::Storage("disk".into()).is_retryable());
        assert!(!LinkError::crypto("bad tag").is_retryable());
        assert!(!LinkError::InvalidUri("x".into()).is_retryable());
    }

    #[test]
    fn display_messages() {
        let err = LinkError::not_found("secret", "abc");
        assert_eq!(err.to_string(), "secret not found: abc");

        let err = LinkError::invalid_identifier("account", "eip155:1");
        assert_eq!(err.to_string(), "Malformed account identifier: 'eip155:1'");
    }

    #[test]
    fn serde_errors_convert() {
        let err: LinkError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert_eq!(err.code(), LinkErrorCode::Serialization);
    }
}
