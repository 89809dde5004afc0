//! WalletLink protocol library.
//!
//! This crate holds the vocabulary shared by both peers of a WalletLink
//! connection and stays free of protocol state. Stateful pairing and session
//! handling lives in `walletlink-engine`.
//!
//! # Features
//!
//! - **Connection URIs**: Encode and parse the `wc:` URI a proposer hands out
//! - **Key Management**: X25519 key pairs, key agreement and per-topic secrets
//! - **Envelopes**: JSON-RPC payloads sealed with the secret bound to a topic
//! - **Relay Seam**: Trait-based publish/subscribe transport
//!
//! # Example
//!
//! ```
//! use walletlink_lib::{ConnectionUri, PublicKey, RelayProtocolOptions, Topic};
//!
//! let uri = ConnectionUri::new(
//!     Topic::new("a0b1c2"),
//!     PublicKey::from_bytes(&[7u8; 32]),
//!     false,
//!     RelayProtocolOptions::default(),
//! );
//!
//! let encoded = uri.to_string();
//! assert!(encoded.starts_with("wc:a0b1c2@2?"));
//! assert_eq!(encoded.parse::<ConnectionUri>().unwrap(), uri);
//! ```

pub mod caip;
pub mod crypto;
pub mod errors;
pub mod jsonrpc;
pub mod kms;
pub mod permissions;
pub mod protocol;
pub mod reason;
mod relay;
pub mod topic;
pub mod uri;

/// Test utilities for relay-level testing.
///
/// This module is only available with the `test-utils` feature or in test builds.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use errors::{LinkError, LinkErrorCode};
pub use jsonrpc::{JsonRpcError, JsonRpcPayload, JsonRpcRequest, JsonRpcResponse};
pub use kms::{AgreementSecret, InMemoryKeyManagement, KeyManagementService, SharedSecret};
pub use permissions::Permissions;
pub use reason::{Reason, ReasonCode};
pub use relay::{RelayEvent, RelayTransport};
pub use topic::{RandomTopicGenerator, TopicGenerator};
pub use uri::{parse_uri, ConnectionUri};

/// Common result alias for WalletLink library operations.
pub type Result<T> = std::result::Result<T, LinkError>;

/// Relay channel identifier.
///
/// Proposal topics are random; settled topics are derived from the shared
/// secret of the two peers (see [`crypto::derive_topic`]).
///
/// # Example
///
/// ```
/// use walletlink_lib::Topic;
///
/// let topic: Topic = "c0ffee".into();
/// assert_eq!(topic.as_str(), "c0ffee");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Topic(pub String);

impl Topic {
    /// Create a new Topic from a string.
    pub fn new(topic: impl Into<String>) -> Self {
        Self(topic.into())
    }

    /// Get the topic as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Topic {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Topic {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hex-encoded X25519 public key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct PublicKey(pub String);

impl PublicKey {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// Encode raw key bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self(hex::encode(bytes))
    }

    /// Decode the key into its raw 32 bytes.
    pub fn to_bytes(&self) -> Result<[u8; 32]> {
        let raw = hex::decode(&self.0)
            .map_err(|e| LinkError::invalid_data("public_key", e.to_string()))?;
        raw.try_into().map_err(|v: Vec<u8>| {
            LinkError::invalid_data("public_key", format!("expected 32 bytes, got {}", v.len()))
        })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PublicKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Relay protocol selection carried in URIs and proposals.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RelayProtocolOptions {
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl RelayProtocolOptions {
    /// Default relay protocol name.
    pub const DEFAULT_PROTOCOL: &'static str = "waku";

    pub fn new(protocol: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            params: None,
        }
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = Some(params);
        self
    }
}

impl Default for RelayProtocolOptions {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PROTOCOL)
    }
}

/// Descriptive metadata an application shares with its peer.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AppMetadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub icons: Vec<String>,
}

impl AppMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icons.push(icon.into());
        self
    }
}

/// Current unix time in milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Current unix time in seconds.
pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}
