//! AES-256-GCM payload encryption with project-specific keys.
//!
//! Wire form: URL-safe base64 of `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
//! The plaintext is the compact JSON serialization of the payload.

use crate::error::EncryptionError;
use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE as BASE64, Engine as _};
use rand::RngCore;
use serde::Serialize;

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

fn derive_key(seed: &[u8]) -> [u8; KEY_LEN] {
    use ring::digest;
    let mut out = [0u8; KEY_LEN];
    let h = digest::digest(&digest::SHA256, seed);
    out.copy_from_slice(h.as_ref());
    out
}

pub struct PayloadEncryptor {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for PayloadEncryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadEncryptor").finish_non_exhaustive()
    }
}

impl PayloadEncryptor {
    /// Build from a URL-safe base64 encoded 256-bit key issued by the collector.
    pub fn new(project_key: &str) -> Result<Self, EncryptionError> {
        if project_key.is_empty() {
            return Err(EncryptionError::InvalidKey(
                "project key cannot be empty".to_string(),
            ));
        }
        let key = BASE64
            .decode(project_key)
            .map_err(|e| EncryptionError::InvalidKey(e.to_string()))?;
        if key.len() != KEY_LEN {
            return Err(EncryptionError::InvalidKey(format!(
                "invalid key size: {} bytes, expected {KEY_LEN}",
                key.len()
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| EncryptionError::InvalidKey(e.to_string()))?;
        Ok(Self { cipher })
    }

    /// Build from an arbitrary secret; the key is its SHA-256 digest.
    pub fn from_secret(secret: &[u8]) -> Self {
        let key = derive_key(secret);
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
        }
    }

    /// Serialize `data` to JSON and encrypt it. `associated_data` is authenticated but
    /// not encrypted; the same value must be passed to [`decrypt`](Self::decrypt).
    pub fn encrypt<T: Serialize + ?Sized>(
        &self,
        data: &T,
        associated_data: Option<&str>,
    ) -> Result<String, EncryptionError> {
        let plaintext =
            serde_json::to_vec(data).map_err(|e| EncryptionError::Encrypt(e.to_string()))?;

        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let payload = Payload {
            msg: &plaintext,
            aad: associated_data.map(str::as_bytes).unwrap_or_default(),
        };
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), payload)
            .map_err(|e| EncryptionError::Encrypt(e.to_string()))?;

        let mut out = nonce.to_vec();
        out.extend(ciphertext);
        Ok(BASE64.encode(out))
    }

    /// Reverse of [`encrypt`](Self::encrypt). Any decoding, authentication or JSON
    /// failure is reported as [`EncryptionError::Tampered`].
    pub fn decrypt(
        &self,
        encoded: &str,
        associated_data: Option<&str>,
    ) -> Result<serde_json::Value, EncryptionError> {
        let raw = BASE64
            .decode(encoded)
            .map_err(|_| EncryptionError::Tampered)?;
        if raw.len() < NONCE_LEN {
            return Err(EncryptionError::Tampered);
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let payload = Payload {
            msg: ciphertext,
            aad: associated_data.map(str::as_bytes).unwrap_or_default(),
        };
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), payload)
            .map_err(|_| EncryptionError::Tampered)?;
        serde_json::from_slice(&plaintext).map_err(|_| EncryptionError::Tampered)
    }

    /// Round-trip a sample value through the cipher.
    pub fn verify_key(&self) -> bool {
        let sample = serde_json::json!({ "test": "verification" });
        match self.encrypt(&sample, None) {
            Ok(encrypted) => self.decrypt(&encrypted, None).ok() == Some(sample),
            Err(_) => false,
        }
    }
}

/// Generate a fresh URL-safe base64 project key.
pub fn generate_key() -> String {
    let mut key = [0u8; KEY_LEN];
    rand::thread_rng().fill_bytes(&mut key);
    BASE64.encode(key)
}
