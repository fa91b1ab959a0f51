use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use color_eyre::Result;
use dirs::data_dir;
use safestore_core::{KeyMaterialStore, KeyStoreError, Mechanism, Mechanisms};
use safestore_storage::{FileBackend, FileKeyStore, KeyringKeyStore, SafeStore};
use tracing::debug;

use crate::config::{Config, KeyStoreKind};

const KEYRING_ACCOUNT: &str = "encryption-key";
const DEFAULT_KEYRING_SERVICE: &str = "safestore";

/// Key store chosen by configuration.
pub enum ConfiguredKeyStore {
    File(FileKeyStore),
    Keyring(KeyringKeyStore),
}

#[async_trait]
impl KeyMaterialStore for ConfiguredKeyStore {
    async fn load(&self) -> Result<Option<Vec<u8>>, KeyStoreError> {
        match self {
            ConfiguredKeyStore::File(store) => store.load().await,
            ConfiguredKeyStore::Keyring(store) => store.load().await,
        }
    }

    async fn store(&self, bytes: &[u8]) -> Result<(), KeyStoreError> {
        match self {
            ConfiguredKeyStore::File(store) => store.store(bytes).await,
            ConfiguredKeyStore::Keyring(store) => store.store(bytes).await,
        }
    }
}

/// Resolve the data directory, honoring the config override.
pub fn data_dir_from_config(config: &Config) -> Result<PathBuf> {
    if let Some(root) = &config.data_dir {
        return Ok(root.clone());
    }
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("safestore"))
}

/// Session storage lives in the OS temp dir so it does not outlive it. Each data root gets
/// its own file, since session records are only readable with that root's key.
fn session_path(root: &Path) -> PathBuf {
    let scope = URL_SAFE_NO_PAD.encode(root.to_string_lossy().as_bytes());
    std::env::temp_dir()
        .join("safestore")
        .join(scope)
        .join("session.json")
}

fn mechanisms_at(local: PathBuf, session: PathBuf) -> Result<Mechanisms> {
    Ok(Mechanisms::new(
        Arc::new(FileBackend::open(local)?),
        Arc::new(FileBackend::open(session)?),
    ))
}

/// Build the encrypted store described by `config` on the given mechanism.
pub fn store_from_config(
    config: &Config,
    mechanism: Mechanism,
) -> Result<SafeStore<ConfiguredKeyStore>> {
    let root = data_dir_from_config(config)?;
    debug!(?root, %mechanism, "initializing encrypted store");

    let key_store = match config.key_store.unwrap_or_default() {
        KeyStoreKind::File => ConfiguredKeyStore::File(FileKeyStore::new(&root)),
        KeyStoreKind::Keyring => ConfiguredKeyStore::Keyring(KeyringKeyStore::new(
            config
                .keyring_service
                .clone()
                .unwrap_or_else(|| DEFAULT_KEYRING_SERVICE.to_string()),
            KEYRING_ACCOUNT,
        )),
    };

    let mechanisms = mechanisms_at(root.join("local.json"), session_path(&root))?;
    Ok(SafeStore::with_mechanism(&mechanisms, mechanism, key_store))
}

/// Helper for tests: both mechanisms and the key store rooted at a temp dir.
#[cfg(test)]
pub fn test_store(root: impl Into<PathBuf>) -> SafeStore<FileKeyStore> {
    let root = root.into();
    let mechanisms = mechanisms_at(root.join("local.json"), root.join("session.json"))
        .expect("open test backends");
    SafeStore::new(&mechanisms, FileKeyStore::new(&root))
}
