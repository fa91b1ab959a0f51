use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Mutex,
};

use safestore_core::{error::backend_err, KeyValueBackend, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::key_store::write_atomic;

/// File-backed key-value backend: the whole document is held in memory and rewritten
/// atomically on every mutation. A mutation is applied in memory only after the write
/// succeeds.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    entries: Mutex<Vec<StoredEntry>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    key: String,
    value: String,
}

impl FileBackend {
    /// Open the document at `path`, starting empty when it does not exist yet.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => Vec::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| backend_err(format!("unreadable backend file: {e}")))?,
            Err(err) if err.kind() == ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(backend_err(err)),
        };
        debug!(entries = entries.len(), "opened file backend");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read<T>(&self, f: impl FnOnce(&[StoredEntry]) -> T) -> Result<T> {
        let entries = self
            .entries
            .lock()
            .map_err(|err| backend_err(format!("lock poisoned: {err}")))?;
        Ok(f(&entries))
    }

    fn mutate(&self, f: impl FnOnce(&mut Vec<StoredEntry>)) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|err| backend_err(format!("lock poisoned: {err}")))?;
        let mut next = entries.clone();
        f(&mut next);

        let json = serde_json::to_vec(&next).map_err(backend_err)?;
        write_atomic(&self.path, &json).map_err(backend_err)?;
        *entries = next;
        Ok(())
    }
}

impl KeyValueBackend for FileBackend {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.read(|entries| {
            entries
                .iter()
                .find(|e| e.key == key)
                .map(|e| e.value.clone())
        })
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.mutate(|entries| match entries.iter_mut().find(|e| e.key == key) {
            Some(entry) => entry.value = value.to_string(),
            None => entries.push(StoredEntry {
                key: key.to_string(),
                value: value.to_string(),
            }),
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        if self.get(key)?.is_none() {
            return Ok(());
        }
        self.mutate(|entries| entries.retain(|e| e.key != key))
    }

    fn clear(&self) -> Result<()> {
        self.mutate(Vec::clear)
    }

    fn len(&self) -> Result<usize> {
        self.read(<[StoredEntry]>::len)
    }

    fn key(&self, index: usize) -> Result<Option<String>> {
        self.read(|entries| entries.get(index).map(|e| e.key.clone()))
    }
}
