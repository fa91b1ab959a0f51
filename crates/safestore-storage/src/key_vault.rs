use safestore_core::{KeyMaterialStore, Result};
use tokio::sync::OnceCell;
use tracing::{debug, instrument};

use crate::codec::EncryptionKey;

/// Owns the single encryption key of an overlay instance.
///
/// The key is loaded from (or generated into) the key-material store at most once per
/// vault. Callers that race on first use all await the same in-flight initialization, so
/// concurrent first writes can never generate two keys and orphan records written under
/// the loser. A failed initialization leaves the vault empty and the next call retries.
pub struct KeyVault<K: KeyMaterialStore> {
    store: K,
    key: OnceCell<EncryptionKey>,
}

impl<K: KeyMaterialStore> KeyVault<K> {
    pub fn new(store: K) -> Self {
        Self {
            store,
            key: OnceCell::new(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.key.initialized()
    }

    /// Cached key, loading or generating it on first call.
    pub async fn ensure_ready(&self) -> Result<&EncryptionKey> {
        self.key.get_or_try_init(|| self.load_or_generate()).await
    }

    #[instrument(skip_all)]
    async fn load_or_generate(&self) -> Result<EncryptionKey> {
        if let Some(bytes) = self.store.load().await? {
            let key = EncryptionKey::from_bytes(&bytes)?;
            debug!("loaded persisted encryption key");
            return Ok(key);
        }

        let key = EncryptionKey::generate();
        self.store.store(key.as_bytes()).await?;
        debug!("generated and persisted new encryption key");
        Ok(key)
    }
}
