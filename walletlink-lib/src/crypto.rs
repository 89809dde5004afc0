//! Topic derivation and envelope encryption.
//!
//! Messages on a topic with a bound secret are sealed with AES-256-GCM under
//! a key derived from that secret with HKDF-SHA256.
//!
//! # Wire Format
//!
//! ```text
//! hex([1 byte version][12 bytes nonce][N bytes ciphertext][16 bytes auth tag])
//! ```

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::kms::SharedSecret;
use crate::{LinkError, Result, Topic};

/// Current envelope format version.
const ENVELOPE_VERSION: u8 = 1;

/// Size of the nonce in bytes (96 bits for GCM).
const NONCE_SIZE: usize = 12;

/// Size of the authentication tag in bytes.
const TAG_SIZE: usize = 16;

const ENVELOPE_KEY_INFO: &[u8] = b"walletlink-envelope-v1";

/// Settled topic for a shared secret: lowercase hex SHA-256 of the secret.
///
/// Both peers compute the same topic independently after key agreement.
pub fn derive_topic(secret: &SharedSecret) -> Topic {
    Topic::new(hex::encode(Sha256::digest(secret.as_bytes())))
}

fn envelope_key(secret: &SharedSecret) -> Result<Zeroizing<[u8; 32]>> {
    let hk = Hkdf::<Sha256>::new(None, secret.as_bytes());
    let mut key = Zeroizing::new([0u8; 32]);
    hk.expand(ENVELOPE_KEY_INFO, &mut key[..])
        .map_err(|e| LinkError::crypto(format!("key derivation failed: {}", e)))?;
    Ok(key)
}

/// Encrypt `plaintext` and return the hex-encoded envelope.
pub fn seal(secret: &SharedSecret, plaintext: &[u8]) -> Result<String> {
    let key = envelope_key(secret)?;
    let cipher = Aes256Gcm::new_from_slice(&key[..])
        .map_err(|e| LinkError::crypto(format!("encryption failed: {}", e)))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| LinkError::crypto(format!("encryption failed: {}", e)))?;

    let mut envelope = Vec::with_capacity(1 + NONCE_SIZE + ciphertext.len());
    envelope.push(ENVELOPE_VERSION);
    envelope.extend_from_slice(&nonce_bytes);
    envelope.extend_from_slice(&ciphertext);

    Ok(hex::encode(envelope))
}

/// Decrypt a hex-encoded envelope produced by [`seal`].
pub fn open(secret: &SharedSecret, envelope: &str) -> Result<Vec<u8>> {
    let data = hex::decode(envelope.trim())
        .map_err(|e| LinkError::crypto(format!("envelope is not hex: {}", e)))?;

    if data.len() < 1 + NONCE_SIZE + TAG_SIZE {
        return Err(LinkError::crypto("envelope too short"));
    }

    let version = data[0];
    if version != ENVELOPE_VERSION {
        return Err(LinkError::crypto(format!(
            "unsupported envelope version {}",
            version
        )));
    }

    let nonce = Nonce::from_slice(&data[1..1 + NONCE_SIZE]);
    let ciphertext = &data[1 + NONCE_SIZE..];

    let key = envelope_key(secret)?;
    let cipher = Aes256Gcm::new_from_slice(&key[..])
        .map_err(|e| LinkError::crypto(format!("decryption failed: {}", e)))?;

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| LinkError::crypto("decryption failed: authentication tag mismatch"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(byte: u8) -> SharedSecret {
        SharedSecret::from_bytes([byte; 32])
    }

    #[test]
    fn topic_is_sha256_hex() {
        let topic = derive_topic(&secret(0));
        assert_eq!(
            topic.as_str(),
            "66687aadf862bd776c8fc18b8e9f8e20089714856ee233b3902a591d0d5f2925"
        );
        assert_eq!(derive_topic(&secret(0)), topic);
        assert_ne!(derive_topic(&secret(1)), topic);
    }

    #[test]
    fn seal_then_open() {
        let s = secret(4);
        let envelope = seal(&s, b"{\"id\":1}").unwrap();
        assert_eq!(open(&s, &envelope).unwrap(), b"{\"id\":1}");
    }

    #[test]
    fn nonces_differ_between_seals() {
        let s = secret(4);
        assert_ne!(seal(&s, b"same").unwrap(), seal(&s, b"same").unwrap());
    }

    #[test]
    fn wrong_secret_fails() {
        let envelope = seal(&secret(1), b"hello").unwrap();
        assert!(open(&secret(2), &envelope).is_err());
    }

    #[test]
    fn tampering_is_detected() {
        let s = secret(1);
        let mut raw = hex::decode(seal(&s, b"hello").unwrap()).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        assert!(open(&s, &hex::encode(raw)).is_err());
    }

    #[test]
    fn rejects_short_and_unknown_version() {
        let s = secret(1);
        assert!(open(&s, "0102").is_err());

        let mut raw = hex::decode(seal(&s, b"hello").unwrap()).unwrap();
        raw[0] = 9;
        assert!(open(&s, &hex::encode(raw)).is_err());
        assert!(open(&s, "not hex").is_err());
    }
}
