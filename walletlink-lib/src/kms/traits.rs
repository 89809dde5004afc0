//! Core traits for key management.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{LinkError, PublicKey, Topic};

/// Error codes for key management operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum KeyStoreErrorCode {
    /// No private key for the given public key
    KeyNotFound = 1000,
    /// Peer public key is malformed
    InvalidKey = 4000,
    /// Key agreement produced an unusable secret
    AgreementFailed = 5000,
    /// Internal error
    Internal = 9999,
}

/// Error type for key management operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyStoreError {
    pub code: KeyStoreErrorCode,
    pub message: String,
    /// Key identifier related to error (if applicable)
    pub key_id: Option<String>,
}

impl KeyStoreError {
    pub fn new(code: KeyStoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            key_id: None,
        }
    }

    /// Create a "key not found" error.
    pub fn key_not_found(key_id: impl Into<String>) -> Self {
        let key_id = key_id.into();
        Self {
            code: KeyStoreErrorCode::KeyNotFound,
            message: format!("No private key for {}", key_id),
            key_id: Some(key_id),
        }
    }

    pub fn invalid_key(key_id: impl Into<String>, reason: impl fmt::Display) -> Self {
        let key_id = key_id.into();
        Self {
            code: KeyStoreErrorCode::InvalidKey,
            message: format!("Invalid public key: {}", reason),
            key_id: Some(key_id),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.code == KeyStoreErrorCode::KeyNotFound
    }
}

impl fmt::Display for KeyStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(key_id) = &self.key_id {
            write!(f, "{} (key: {})", self.message, key_id)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for KeyStoreError {}

impl From<KeyStoreError> for LinkError {
    fn from(e: KeyStoreError) -> Self {
        match e.code {
            KeyStoreErrorCode::KeyNotFound => {
                LinkError::not_found("private key", e.key_id.unwrap_or_default())
            }
            KeyStoreErrorCode::Internal => LinkError::Internal(e.message),
            _ => LinkError::Crypto(e.to_string()),
        }
    }
}

/// Result type for key management operations.
pub type KeyStoreResult<T> = Result<T, KeyStoreError>;

/// 32-byte symmetric secret bound to one or more topics.
///
/// Wiped from memory on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; 32]);

impl SharedSecret {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}

/// Outcome of a key agreement: the shared secret plus our own public key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgreementSecret {
    pub shared_secret: SharedSecret,
    pub public_key: PublicKey,
}

/// Key pairs and per-topic secrets.
///
/// Private keys never leave the implementation; callers refer to them by
/// their public half.
#[async_trait::async_trait]
pub trait KeyManagementService: Send + Sync {
    /// Create a fresh X25519 key pair and return its public key.
    async fn generate_key_pair(&self) -> KeyStoreResult<PublicKey>;

    /// Diffie-Hellman between our private key for `self_public` and `peer_public`.
    async fn perform_key_agreement(
        &self,
        self_public: &PublicKey,
        peer_public: &PublicKey,
    ) -> KeyStoreResult<AgreementSecret>;

    /// Bind `secret` to `topic`, replacing any previous binding.
    async fn set_secret(&self, topic: &Topic, secret: &SharedSecret) -> KeyStoreResult<()>;

    async fn get_secret(&self, topic: &Topic) -> KeyStoreResult<Option<SharedSecret>>;

    /// Remove a private key. Missing keys are not an error.
    async fn delete_private_key(&self, public_key: &PublicKey) -> KeyStoreResult<()>;

    /// Remove a topic binding. Missing bindings are not an error.
    async fn delete_secret(&self, topic: &Topic) -> KeyStoreResult<()>;

    async fn has_secret(&self, topic: &Topic) -> KeyStoreResult<bool> {
        Ok(self.get_secret(topic).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_debug_is_redacted() {
        let secret = SharedSecret::from_bytes([9; 32]);
        assert_eq!(format!("{:?}", secret), "SharedSecret(..)");
        assert_eq!(secret.to_hex(), "09".repeat(32));
    }

    #[test]
    fn not_found_maps_to_link_error() {
        let err: LinkError = KeyStoreError::key_not_found("abc").into();
        assert_eq!(err, LinkError::not_found("private key", "abc"));
    }
}
