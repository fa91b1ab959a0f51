use thiserror::Error;

/// Errors surfaced by the encrypted overlay. Absence of a logical key is not an error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SafeStoreError {
    /// The key-material store could not be opened, read, or written.
    #[error("key material unavailable: {reason}")]
    KeyMaterialUnavailable { reason: String },
    /// Authentication failed or the ciphertext was malformed.
    #[error("decryption failed: {reason}")]
    Decryption { reason: String },
    /// A stored value record is not a valid encrypted payload.
    #[error("corrupt record: {reason}")]
    CorruptRecord { reason: String },
    /// A value could not be serialized, or decrypted plaintext did not match the requested type.
    #[error("serialization failed: {reason}")]
    Serialization { reason: String },
    /// Underlying key-value backend failure.
    #[error("backend failure: {reason}")]
    Backend { reason: String },
}

/// Errors produced by key-material store implementations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyStoreError {
    #[error("open failed: {0}")]
    Open(String),
    #[error("read failed: {0}")]
    Read(String),
    #[error("write failed: {0}")]
    Write(String),
}

impl From<KeyStoreError> for SafeStoreError {
    fn from(err: KeyStoreError) -> Self {
        SafeStoreError::KeyMaterialUnavailable {
            reason: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SafeStoreError>;

/// Shorthand for wrapping any displayable failure as a backend error.
pub fn backend_err<E: ToString>(err: E) -> SafeStoreError {
    SafeStoreError::Backend {
        reason: err.to_string(),
    }
}
