//! In-memory key management.
//!
//! Keys and secrets live only as long as the process. Private keys are wiped
//! when removed.
//!
//! # Thread Safety
//!
//! A single `Mutex` guards both maps, so a key agreement never observes a
//! key pair that is concurrently being deleted. Lock poisoning is reported
//! as an error rather than a panic.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use rand::RngCore;
use x25519_dalek::StaticSecret;

use super::traits::{
    AgreementSecret, KeyManagementService, KeyStoreError, KeyStoreErrorCode, KeyStoreResult,
    SharedSecret,
};
use crate::{PublicKey, Topic};

#[derive(Default)]
struct KeyState {
    private_keys: HashMap<PublicKey, StaticSecret>,
    secrets: HashMap<Topic, SharedSecret>,
}

/// In-memory implementation of [`KeyManagementService`].
#[derive(Default)]
pub struct InMemoryKeyManagement {
    state: Mutex<KeyState>,
}

fn lock_error(context: &str) -> KeyStoreError {
    KeyStoreError::new(
        KeyStoreErrorCode::Internal,
        format!("InMemoryKeyManagement: lock poisoned during {}", context),
    )
}

impl InMemoryKeyManagement {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self, context: &str) -> KeyStoreResult<MutexGuard<'_, KeyState>> {
        self.state.lock().map_err(|_| lock_error(context))
    }

    /// Number of private keys held. Returns 0 if the lock is poisoned.
    pub fn key_count(&self) -> usize {
        self.state.lock().map(|s| s.private_keys.len()).unwrap_or(0)
    }

    /// Number of topic bindings held. Returns 0 if the lock is poisoned.
    pub fn secret_count(&self) -> usize {
        self.state.lock().map(|s| s.secrets.len()).unwrap_or(0)
    }

    pub fn has_private_key(&self, public_key: &PublicKey) -> bool {
        self.state
            .lock()
            .map(|s| s.private_keys.contains_key(public_key))
            .unwrap_or(false)
    }
}

#[async_trait::async_trait]
impl KeyManagementService for InMemoryKeyManagement {
    async fn generate_key_pair(&self) -> KeyStoreResult<PublicKey> {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        let secret = StaticSecret::from(seed);
        let public = PublicKey::from_bytes(x25519_dalek::PublicKey::from(&secret).as_bytes());

        self.lock("generate_key_pair")?
            .private_keys
            .insert(public.clone(), secret);

        #[cfg(feature = "tracing")]
        tracing::debug!(public_key = %public, "generated key pair");

        Ok(public)
    }

    async fn perform_key_agreement(
        &self,
        self_public: &PublicKey,
        peer_public: &PublicKey,
    ) -> KeyStoreResult<AgreementSecret> {
        let peer_bytes = peer_public
            .to_bytes()
            .map_err(|e| KeyStoreError::invalid_key(peer_public.as_str(), e))?;

        let state = self.lock("perform_key_agreement")?;
        let private = state
            .private_keys
            .get(self_public)
            .ok_or_else(|| KeyStoreError::key_not_found(self_public.as_str()))?;

        let shared = private.diffie_hellman(&x25519_dalek::PublicKey::from(peer_bytes));
        if !shared.was_contributory() {
            return Err(KeyStoreError::new(
                KeyStoreErrorCode::AgreementFailed,
                "peer public key produced a non-contributory secret",
            ));
        }

        Ok(AgreementSecret {
            shared_secret: SharedSecret::from_bytes(*shared.as_bytes()),
            public_key: self_public.clone(),
        })
    }

    async fn set_secret(&self, topic: &Topic, secret: &SharedSecret) -> KeyStoreResult<()> {
        self.lock("set_secret")?
            .secrets
            .insert(topic.clone(), secret.clone());
        Ok(())
    }

    async fn get_secret(&self, topic: &Topic) -> KeyStoreResult<Option<SharedSecret>> {
        Ok(self.lock("get_secret")?.secrets.get(topic).cloned())
    }

    async fn delete_private_key(&self, public_key: &PublicKey) -> KeyStoreResult<()> {
        self.lock("delete_private_key")?
            .private_keys
            .remove(public_key);
        Ok(())
    }

    async fn delete_secret(&self, topic: &Topic) -> KeyStoreResult<()> {
        self.lock("delete_secret")?.secrets.remove(topic);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn agreement_is_symmetric() {
        let kms = InMemoryKeyManagement::new();
        let a = kms.generate_key_pair().await.unwrap();
        let b = kms.generate_key_pair().await.unwrap();

        let ab = kms.perform_key_agreement(&a, &b).await.unwrap();
        let ba = kms.perform_key_agreement(&b, &a).await.unwrap();

        assert_eq!(ab.shared_secret, ba.shared_secret);
        assert_eq!(ab.public_key, a);
        assert_eq!(ba.public_key, b);
    }

    #[tokio::test]
    async fn agreement_requires_own_key() {
        let kms = InMemoryKeyManagement::new();
        let peer = kms.generate_key_pair().await.unwrap();
        let unknown = PublicKey::from_bytes(&[3; 32]);

        let err = kms.perform_key_agreement(&unknown, &peer).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn agreement_rejects_malformed_peer() {
        let kms = InMemoryKeyManagement::new();
        let own = kms.generate_key_pair().await.unwrap();

        let err = kms
            .perform_key_agreement(&own, &PublicKey::new("beef"))
            .await
            .unwrap_err();
        assert_eq!(err.code, KeyStoreErrorCode::InvalidKey);

        // all-zero point is a low-order point
        let err = kms
            .perform_key_agreement(&own, &PublicKey::from_bytes(&[0; 32]))
            .await
            .unwrap_err();
        assert_eq!(err.code, KeyStoreErrorCode::AgreementFailed);
    }

    #[tokio::test]
    async fn deletes_are_idempotent() {
        let kms = InMemoryKeyManagement::new();
        let key = kms.generate_key_pair().await.unwrap();
        let topic = Topic::new("t");
        kms.set_secret(&topic, &SharedSecret::from_bytes([1; 32]))
            .await
            .unwrap();

        assert_eq!(kms.key_count(), 1);
        assert!(kms.has_secret(&topic).await.unwrap());

        kms.delete_private_key(&key).await.unwrap();
        kms.delete_private_key(&key).await.unwrap();
        kms.delete_secret(&topic).await.unwrap();
        kms.delete_secret(&topic).await.unwrap();

        assert_eq!(kms.key_count(), 0);
        assert_eq!(kms.secret_count(), 0);
        assert!(kms.get_secret(&topic).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn one_secret_can_back_two_topics() {
        let kms = InMemoryKeyManagement::new();
        let secret = SharedSecret::from_bytes([5; 32]);
        kms.set_secret(&Topic::new("pairing"), &secret).await.unwrap();
        kms.set_secret(&Topic::new("proposal"), &secret).await.unwrap();

        kms.delete_secret(&Topic::new("proposal")).await.unwrap();
        assert_eq!(
            kms.get_secret(&Topic::new("pairing")).await.unwrap(),
            Some(secret)
        );
    }
}
