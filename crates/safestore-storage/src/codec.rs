//! AES-256-GCM codec for JSON-serializable values.

use std::fmt;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::{rngs::OsRng, RngCore};
use safestore_core::{Result, SafeStoreError};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Size of an AES-256 key in bytes.
pub const KEY_LEN: usize = 32;
/// Size of a GCM nonce in bytes.
pub const NONCE_LEN: usize = 12;

/// 256-bit symmetric key. Exported and imported as raw bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey {
    bytes: [u8; KEY_LEN],
}

impl EncryptionKey {
    /// Fresh key from the OS random source.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Import raw key bytes; anything other than exactly 32 bytes is unusable key material.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; KEY_LEN] =
            bytes
                .try_into()
                .map_err(|_| SafeStoreError::KeyMaterialUnavailable {
                    reason: format!("expected {KEY_LEN} key bytes, got {}", bytes.len()),
                })?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Output of one encryption call. Serializes as the backend value record
/// `{"iv": [..12 bytes..], "data": [..ciphertext bytes..]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    #[serde(rename = "iv")]
    pub nonce: [u8; NONCE_LEN],
    #[serde(rename = "data")]
    pub ciphertext: Vec<u8>,
}

impl EncryptedPayload {
    /// Text stored as a backend value.
    pub fn to_record_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| SafeStoreError::Serialization {
            reason: format!("value record: {e}"),
        })
    }

    /// Parse a backend value; structural problems are `CorruptRecord`, not decryption failures.
    pub fn from_record_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| SafeStoreError::CorruptRecord {
            reason: e.to_string(),
        })
    }
}

/// Stateless encrypt/decrypt over a single key. Every call to `encrypt` draws a new nonce.
#[derive(Clone)]
pub struct CryptoCodec {
    cipher: Aes256Gcm,
}

impl CryptoCodec {
    pub fn new(key: &EncryptionKey) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes())),
        }
    }

    pub fn encrypt<T: Serialize + ?Sized>(&self, value: &T) -> Result<EncryptedPayload> {
        let plaintext = serde_json::to_vec(value).map_err(|e| SafeStoreError::Serialization {
            reason: e.to_string(),
        })?;

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_ref())
            .map_err(encrypt_err)?;

        Ok(EncryptedPayload { nonce, ciphertext })
    }

    pub fn decrypt<T: DeserializeOwned>(&self, payload: &EncryptedPayload) -> Result<T> {
        let plaintext = self.decrypt_raw(payload)?;
        serde_json::from_slice(&plaintext).map_err(|e| SafeStoreError::Serialization {
            reason: format!("decrypted value: {e}"),
        })
    }

    /// Authenticated decryption without deserializing the plaintext.
    pub(crate) fn decrypt_raw(&self, payload: &EncryptedPayload) -> Result<Vec<u8>> {
        self.cipher
            .decrypt(
                Nonce::from_slice(&payload.nonce),
                payload.ciphertext.as_ref(),
            )
            .map_err(|e| SafeStoreError::Decryption {
                reason: e.to_string(),
            })
    }
}

impl fmt::Debug for CryptoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoCodec").finish_non_exhaustive()
    }
}

/// AES-GCM only refuses to encrypt a plaintext over its length limit, so the failure is
/// reported against the value being written rather than as a cryptographic fault.
fn encrypt_err(err: aes_gcm::Error) -> SafeStoreError {
    SafeStoreError::Serialization {
        reason: format!("value too large to encrypt ({err})"),
    }
}

/// Printable form of raw bytes for embedding in a backend key.
pub fn encode_bytes(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode_bytes(text: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(text)
}
