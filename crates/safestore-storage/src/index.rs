//! Resolution of plaintext logical keys to the encrypted keys stored in the backend.
//!
//! Every encryption uses a fresh nonce, so the same logical key never encrypts to the same
//! backend key twice and there is nothing to look up directly. Resolution instead walks the
//! backend in enumeration order and decrypts each stored key until one matches. That costs
//! one AES-GCM decryption per stored entry on every read and write; callers that need scale
//! must shard across backends or cache resolutions themselves.

use std::fmt;

use safestore_core::{KeyValueBackend, Result, SafeStoreError};
use tracing::{debug, trace};

use crate::codec::{decode_bytes, encode_bytes, CryptoCodec, EncryptedPayload, NONCE_LEN};

/// Backend-visible key text: `base64(nonce) ":" base64(ciphertext)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EncryptedKeyRecord(String);

impl EncryptedKeyRecord {
    pub fn from_payload(payload: &EncryptedPayload) -> Self {
        Self(format!(
            "{}:{}",
            encode_bytes(&payload.nonce),
            encode_bytes(&payload.ciphertext)
        ))
    }

    /// Split a backend key into its payload. `None` means the key is not in record form
    /// (written by something other than the overlay).
    pub fn parse(text: &str) -> Option<EncryptedPayload> {
        let (nonce, ciphertext) = text.split_once(':')?;
        let nonce: [u8; NONCE_LEN] = decode_bytes(nonce).ok()?.try_into().ok()?;
        let ciphertext = decode_bytes(ciphertext).ok()?;
        Some(EncryptedPayload { nonce, ciphertext })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EncryptedKeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of a scan, with the number of decryptions it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub record: Option<EncryptedKeyRecord>,
    pub decrypt_attempts: usize,
}

pub struct EncryptedKeyIndex<'a> {
    backend: &'a dyn KeyValueBackend,
    codec: &'a CryptoCodec,
}

impl<'a> EncryptedKeyIndex<'a> {
    pub fn new(backend: &'a dyn KeyValueBackend, codec: &'a CryptoCodec) -> Self {
        Self { backend, codec }
    }

    /// Decrypt stored keys in enumeration order until one matches `plaintext_key`.
    ///
    /// A record-shaped key that fails authentication aborts the scan with `Decryption`
    /// rather than being passed over as a miss.
    pub fn scan(&self, plaintext_key: &str) -> Result<Resolution> {
        let needle = serde_json::to_vec(plaintext_key).map_err(|e| {
            SafeStoreError::Serialization {
                reason: e.to_string(),
            }
        })?;

        let mut decrypt_attempts = 0;
        for stored in self.backend.keys()? {
            let Some(payload) = EncryptedKeyRecord::parse(&stored) else {
                trace!("skipping backend entry not written by the overlay");
                continue;
            };

            decrypt_attempts += 1;
            if self.codec.decrypt_raw(&payload)? == needle {
                debug!(decrypt_attempts, "resolved encrypted key");
                return Ok(Resolution {
                    record: Some(EncryptedKeyRecord(stored)),
                    decrypt_attempts,
                });
            }
        }

        debug!(decrypt_attempts, "no encrypted key for logical key");
        Ok(Resolution {
            record: None,
            decrypt_attempts,
        })
    }

    pub fn resolve(&self, plaintext_key: &str) -> Result<Option<EncryptedKeyRecord>> {
        Ok(self.scan(plaintext_key)?.record)
    }

    /// Fresh record for `plaintext_key`. Does not touch the backend.
    pub fn create(&self, plaintext_key: &str) -> Result<EncryptedKeyRecord> {
        let payload = self.codec.encrypt(plaintext_key)?;
        Ok(EncryptedKeyRecord::from_payload(&payload))
    }

    /// Existing record if there is one, otherwise a new one. The caller commits the write.
    pub fn resolve_or_create(&self, plaintext_key: &str) -> Result<EncryptedKeyRecord> {
        match self.resolve(plaintext_key)? {
            Some(record) => Ok(record),
            None => self.create(plaintext_key),
        }
    }
}
