use std::{
    fmt,
    str::FromStr,
    sync::{Arc, Mutex},
};

use serde::{Deserialize, Serialize};

use crate::error::{backend_err, Result};

/// Synchronous key-value mechanism the overlay writes its encrypted records into.
///
/// Mirrors browser-style storage: string keys and values, positional enumeration that is
/// stable while the backend is unmodified.
pub trait KeyValueBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Insert or overwrite. Overwriting keeps the entry's enumeration position.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a single entry (idempotent).
    fn remove(&self, key: &str) -> Result<()>;

    fn clear(&self) -> Result<()>;

    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Key at `index` in enumeration order, or `None` past the end.
    fn key(&self, index: usize) -> Result<Option<String>>;

    /// Snapshot of all keys in enumeration order.
    fn keys(&self) -> Result<Vec<String>> {
        let len = self.len()?;
        let mut out = Vec::with_capacity(len);
        for index in 0..len {
            if let Some(key) = self.key(index)? {
                out.push(key);
            }
        }
        Ok(out)
    }
}

/// Which of the two interchangeable backends an overlay binds to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mechanism {
    /// Long-lived storage that survives restarts.
    #[default]
    Local,
    /// Storage scoped to the current session.
    Session,
}

impl Mechanism {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mechanism::Local => "local",
            Mechanism::Session => "session",
        }
    }
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mechanism {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Mechanism::Local),
            "session" => Ok(Mechanism::Session),
            other => Err(format!(
                "unknown storage mechanism `{other}` (expected `local` or `session`)"
            )),
        }
    }
}

/// The pair of backends an overlay can be constructed against.
#[derive(Clone)]
pub struct Mechanisms {
    local: Arc<dyn KeyValueBackend>,
    session: Arc<dyn KeyValueBackend>,
}

impl Mechanisms {
    pub fn new(local: Arc<dyn KeyValueBackend>, session: Arc<dyn KeyValueBackend>) -> Self {
        Self { local, session }
    }

    /// Two independent in-memory backends, for tests and ephemeral use.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryBackend::new()),
            Arc::new(MemoryBackend::new()),
        )
    }

    pub fn select(&self, mechanism: Mechanism) -> Arc<dyn KeyValueBackend> {
        match mechanism {
            Mechanism::Local => Arc::clone(&self.local),
            Mechanism::Session => Arc::clone(&self.session),
        }
    }
}

impl fmt::Debug for Mechanisms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mechanisms").finish_non_exhaustive()
    }
}

/// Insertion-ordered in-process backend. Clones share the same entries.
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    inner: Arc<Mutex<Vec<(String, String)>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut Vec<(String, String)>) -> T) -> Result<T> {
        let mut entries = self
            .inner
            .lock()
            .map_err(|err| backend_err(format!("lock poisoned: {err}")))?;
        Ok(f(&mut entries))
    }
}

impl KeyValueBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_entries(|entries| {
            entries
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        })
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.with_entries(|entries| {
            match entries.iter_mut().find(|(k, _)| k == key) {
                Some(entry) => entry.1 = value.to_string(),
                None => entries.push((key.to_string(), value.to_string())),
            }
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.with_entries(|entries| entries.retain(|(k, _)| k != key))
    }

    fn clear(&self) -> Result<()> {
        self.with_entries(|entries| entries.clear())
    }

    fn len(&self) -> Result<usize> {
        self.with_entries(|entries| entries.len())
    }

    fn key(&self, index: usize) -> Result<Option<String>> {
        self.with_entries(|entries| entries.get(index).map(|(k, _)| k.clone()))
    }
}
