//! Durable key-material stores: a versioned on-disk store and the OS keyring.

use std::{
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use safestore_core::{KeyMaterialStore, KeyStoreError};
use tempfile::NamedTempFile;
use tracing::{debug, instrument};

/// Name the on-disk store is opened under unless overridden.
pub const DEFAULT_STORE_NAME: &str = "safestore-keys";
/// Schema version of the on-disk layout. Opening an older store upgrades it in place.
pub const STORE_VERSION: u32 = 1;

const COLLECTION: &str = "keys";
const RECORD_ID: &str = "encryption-key";
const VERSION_FILE: &str = "VERSION";

/// On-disk key store: `<dir>/<name>/VERSION` plus a single collection holding at most one
/// record. Writes go through a temp file and an atomic rename.
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    root: PathBuf,
}

impl FileKeyStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self::with_name(dir, DEFAULT_STORE_NAME)
    }

    pub fn with_name(dir: impl AsRef<Path>, name: &str) -> Self {
        Self {
            root: dir.as_ref().join(name),
        }
    }

    fn record_path(&self) -> PathBuf {
        self.root.join(COLLECTION).join(RECORD_ID)
    }

    /// Open the store, creating or upgrading the collection when needed.
    fn open(&self) -> Result<PathBuf, KeyStoreError> {
        fs::create_dir_all(&self.root).map_err(open_err)?;

        let version_path = self.root.join(VERSION_FILE);
        let current = match fs::read_to_string(&version_path) {
            Ok(text) => text
                .trim()
                .parse::<u32>()
                .map_err(|e| KeyStoreError::Open(format!("invalid store version: {e}")))?,
            Err(err) if err.kind() == ErrorKind::NotFound => 0,
            Err(err) => return Err(open_err(err)),
        };

        if current > STORE_VERSION {
            return Err(KeyStoreError::Open(format!(
                "store version {current} is newer than supported {STORE_VERSION}"
            )));
        }

        let collection = self.root.join(COLLECTION);
        if current < STORE_VERSION {
            debug!(from = current, to = STORE_VERSION, "upgrading key store");
            fs::create_dir_all(&collection).map_err(open_err)?;
            write_atomic(&version_path, STORE_VERSION.to_string().as_bytes())
                .map_err(open_err)?;
        }
        Ok(collection)
    }
}

#[async_trait]
impl KeyMaterialStore for FileKeyStore {
    #[instrument(skip_all)]
    async fn load(&self) -> Result<Option<Vec<u8>>, KeyStoreError> {
        self.open()?;
        match fs::read(self.record_path()) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(KeyStoreError::Read(err.to_string())),
        }
    }

    #[instrument(skip_all)]
    async fn store(&self, bytes: &[u8]) -> Result<(), KeyStoreError> {
        self.open()?;
        write_atomic(&self.record_path(), bytes).map_err(|e| KeyStoreError::Write(e.to_string()))
    }
}

/// OS keyring-backed store. Uses the `keyring` crate's binary secret API so the record is
/// the raw key bytes.
#[derive(Debug, Clone)]
pub struct KeyringKeyStore {
    service: String,
    account: String,
}

impl KeyringKeyStore {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, KeyStoreError> {
        keyring::Entry::new(&self.service, &self.account)
            .map_err(|e| KeyStoreError::Open(e.to_string()))
    }
}

#[async_trait]
impl KeyMaterialStore for KeyringKeyStore {
    // Keyring operations are synchronous; wrap in async for trait compatibility.
    async fn load(&self) -> Result<Option<Vec<u8>>, KeyStoreError> {
        match self.entry()?.get_secret() {
            Ok(bytes) => Ok(Some(bytes)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(KeyStoreError::Read(err.to_string())),
        }
    }

    /// Writes, then reads back through a fresh entry. A credential store that drops the
    /// secret would otherwise let every run generate a new key and orphan earlier records.
    async fn store(&self, bytes: &[u8]) -> Result<(), KeyStoreError> {
        self.entry()?
            .set_secret(bytes)
            .map_err(|e| KeyStoreError::Write(e.to_string()))?;

        match self.entry()?.get_secret() {
            Ok(stored) if stored == bytes => Ok(()),
            Ok(_) => Err(KeyStoreError::Write(
                "keyring returned different key bytes after write".to_string(),
            )),
            Err(err) => Err(KeyStoreError::Write(format!(
                "keyring did not persist the key: {err}"
            ))),
        }
    }
}

/// Replace `path` with `bytes` via a sibling temp file.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| std::io::Error::new(ErrorKind::InvalidInput, "invalid storage path"))?;
    fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn open_err<E: ToString>(err: E) -> KeyStoreError {
    KeyStoreError::Open(err.to_string())
}
