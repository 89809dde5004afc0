//! WalletLink pairing and session engines.
//!
//! Two peers establish an encrypted, long-lived **pairing** by exchanging a
//! connection URI, then negotiate any number of **sessions** over it. Both
//! are sequences: a pending proposal that settles on a topic derived from an
//! X25519 key agreement.
//!
//! [`WalletLinkClient`] wires the pairing engine, the session engine, the
//! relay subscriber and the expiry sweeper together.
//!
//! # Example
//!
//! ```ignore
//! use walletlink_engine::{EngineConfig, WalletLinkClient};
//! use walletlink_lib::InMemoryKeyManagement;
//!
//! let (relay, relay_events) = connect_to_relay();
//! let client = WalletLinkClient::new(EngineConfig::default(), relay, Arc::new(InMemoryKeyManagement::new()))?;
//! client.start(relay_events).await?;
//!
//! let uri = client.pairing().propose().await?;
//! show_qr_code(&uri.to_string());
//! ```

use walletlink_lib::kms::KeyStoreError;
use walletlink_lib::{LinkError, Reason, ReasonCode};

mod client;
mod codec;
pub mod config;
pub mod events;
pub mod pairing;
mod registry;
mod rpc;
pub mod sequence;
pub mod session;
pub mod storage;
mod subscriber;

pub use client::{WalletLinkClient, WalletLinkClientBuilder};
pub use config::EngineConfig;
pub use events::{EngineEvent, EventBus};
pub use pairing::PairingEngine;
pub use sequence::{
    Participant, PendingOutcome, PendingSequence, PendingStatus, Sequence, SequenceKind,
    SequenceState, SettledSequence, SettledStatus,
};
pub use session::{SessionEngine, SessionRequest};
pub use storage::{FileSequenceStore, InMemorySequenceStore, SequenceStore};

/// Errors surfaced by engine operations.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Caller's role does not allow the operation.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Method, chain or notification type outside the granted permissions.
    #[error("not permitted: {0}")]
    NotPermitted(String),
    #[error("no {kind} sequence for topic {topic}")]
    NotFound { kind: &'static str, topic: String },
    /// Malformed identifier, URI or parameter.
    #[error("malformed input: {0}")]
    Malformed(String),
    #[error("crypto error: {0}")]
    Crypto(String),
    #[error("transport error: {0}")]
    Transport(String),
    /// The peer answered with an error.
    #[error("rejected by peer: {0}")]
    Rejected(Reason),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The topic generator could not produce an unused topic.
    #[error("no unused topic after {attempts} attempts")]
    TopicExhausted { attempts: u32 },
    /// The sequence went away before its response arrived.
    #[error("request cancelled: {0}")]
    Cancelled(String),
    #[error("sequence already exists for topic {0}")]
    AlreadyExists(String),
}

impl EngineError {
    pub fn not_found(kind: &'static str, topic: impl std::fmt::Display) -> Self {
        Self::NotFound {
            kind,
            topic: topic.to_string(),
        }
    }

    /// Wire reason to send when this error ends an inbound request.
    pub fn reason(&self) -> Reason {
        match self {
            Self::Rejected(reason) => reason.clone(),
            Self::NotFound { .. } => Reason::from_code(ReasonCode::NoMatchingTopic),
            Self::Unauthorized(msg) => {
                Reason::with_message(ReasonCode::UnauthorizedMatchingController, msg.clone())
            }
            other => Reason::with_message(ReasonCode::MissingOrInvalid, other.to_string()),
        }
    }
}

impl From<LinkError> for EngineError {
    fn from(e: LinkError) -> Self {
        match e {
            LinkError::InvalidData { .. }
            | LinkError::InvalidUri(_)
            | LinkError::InvalidIdentifier { .. } => Self::Malformed(e.to_string()),
            LinkError::Transport(msg) => Self::Transport(msg),
            LinkError::Crypto(msg) => Self::Crypto(msg),
            LinkError::Serialization(msg) => Self::Serialization(msg),
            LinkError::Storage(msg) => Self::Storage(msg),
            LinkError::NotFound { .. } | LinkError::Internal(_) => Self::Crypto(e.to_string()),
        }
    }
}

impl From<KeyStoreError> for EngineError {
    fn from(e: KeyStoreError) -> Self {
        Self::Crypto(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
