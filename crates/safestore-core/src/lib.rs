//! Core abstractions for SafeStore: the backend and key-material contracts the encrypted
//! overlay is built on, plus the shared error taxonomy.
//! This crate is intentionally small to keep dependency surface minimal.

pub mod backend;
pub mod error;
pub mod key_store;

pub use backend::{KeyValueBackend, Mechanism, Mechanisms, MemoryBackend};
pub use error::{KeyStoreError, Result, SafeStoreError};
pub use key_store::{InMemoryKeyStore, KeyMaterialStore};
