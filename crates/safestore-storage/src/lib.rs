//! Encrypted key-value overlay: AES-256-GCM codec, key lifecycle, encrypted key index and
//! the `SafeStore` facade, plus durable backends and key stores.

pub mod codec;
pub mod file_backend;
pub mod index;
pub mod key_store;
pub mod key_vault;
pub mod safe_store;

pub use codec::{CryptoCodec, EncryptedPayload, EncryptionKey};
pub use file_backend::FileBackend;
pub use index::{EncryptedKeyIndex, EncryptedKeyRecord, Resolution};
pub use key_store::{FileKeyStore, KeyringKeyStore};
pub use key_vault::KeyVault;
pub use safe_store::SafeStore;
