use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::KeyStoreError;

/// Durable home for the raw encryption key, kept apart from the encrypted backend.
///
/// Holds at most one record; the bytes are stored as-is with no wrapping format.
#[async_trait]
pub trait KeyMaterialStore: Send + Sync {
    /// Previously persisted key bytes, or `None` when nothing has been stored yet.
    async fn load(&self) -> Result<Option<Vec<u8>>, KeyStoreError>;

    /// Persist key bytes, replacing any existing record.
    async fn store(&self, bytes: &[u8]) -> Result<(), KeyStoreError>;
}

/// In-memory key store for tests and ephemeral sessions. Clones share the same record.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKeyStore {
    inner: Arc<Mutex<Option<Vec<u8>>>>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyMaterialStore for InMemoryKeyStore {
    async fn load(&self) -> Result<Option<Vec<u8>>, KeyStoreError> {
        let guard = self
            .inner
            .lock()
            .map_err(|err| KeyStoreError::Read(format!("lock poisoned: {err}")))?;
        Ok(guard.clone())
    }

    async fn store(&self, bytes: &[u8]) -> Result<(), KeyStoreError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|err| KeyStoreError::Write(format!("lock poisoned: {err}")))?;
        *guard = Some(bytes.to_vec());
        Ok(())
    }
}
