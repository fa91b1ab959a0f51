use std::sync::Arc;

use safestore_core::{KeyMaterialStore, KeyValueBackend, Mechanism, Mechanisms, Result};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, instrument};

use crate::{
    codec::{CryptoCodec, EncryptedPayload},
    index::EncryptedKeyIndex,
    key_vault::KeyVault,
};

/// Encrypted overlay over one backend mechanism. Keys and values reach the backend only
/// in encrypted form; the key itself lives in the injected key-material store.
///
/// Operations are not serialized against each other: two concurrent `set_item` calls for
/// the same logical key can both miss resolution and leave two records until one is
/// removed. Key initialization is the one step guaranteed to run once.
pub struct SafeStore<K: KeyMaterialStore> {
    mechanism: Mechanism,
    backend: Arc<dyn KeyValueBackend>,
    vault: KeyVault<K>,
}

impl<K: KeyMaterialStore> SafeStore<K> {
    /// Overlay on the default (`Local`) mechanism.
    pub fn new(mechanisms: &Mechanisms, key_store: K) -> Self {
        Self::with_mechanism(mechanisms, Mechanism::default(), key_store)
    }

    pub fn with_mechanism(mechanisms: &Mechanisms, mechanism: Mechanism, key_store: K) -> Self {
        Self {
            mechanism,
            backend: mechanisms.select(mechanism),
            vault: KeyVault::new(key_store),
        }
    }

    pub fn mechanism(&self) -> Mechanism {
        self.mechanism
    }

    /// The backend this overlay writes to (holds ciphertext only).
    pub fn backend(&self) -> &dyn KeyValueBackend {
        self.backend.as_ref()
    }

    /// Load or generate the encryption key without touching the backend.
    pub async fn ensure_ready(&self) -> Result<()> {
        self.vault.ensure_ready().await.map(|_| ())
    }

    async fn codec(&self) -> Result<CryptoCodec> {
        let key = self.vault.ensure_ready().await?;
        Ok(CryptoCodec::new(key))
    }

    /// Store `value` under `key`, reusing the existing encrypted key when there is one.
    /// Nothing is written unless every step before the backend write succeeds.
    #[instrument(skip_all, fields(mechanism = %self.mechanism))]
    pub async fn set_item<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let codec = self.codec().await?;
        let encrypted_key =
            EncryptedKeyIndex::new(self.backend.as_ref(), &codec).resolve_or_create(key)?;
        let record = codec.encrypt(value)?.to_record_json()?;
        self.backend.set(encrypted_key.as_str(), &record)
    }

    /// Decrypted value for `key`, or `None` when the key was never set or has been removed.
    #[instrument(skip_all, fields(mechanism = %self.mechanism))]
    pub async fn get_item<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let codec = self.codec().await?;
        let index = EncryptedKeyIndex::new(self.backend.as_ref(), &codec);
        let Some(encrypted_key) = index.resolve(key)? else {
            return Ok(None);
        };

        // The entry can disappear between enumeration and read.
        let Some(raw) = self.backend.get(encrypted_key.as_str())? else {
            debug!("resolved entry vanished before read");
            return Ok(None);
        };

        let payload = EncryptedPayload::from_record_json(&raw)?;
        codec.decrypt(&payload).map(Some)
    }

    /// Remove `key` if present; removing a missing key is a no-op.
    #[instrument(skip_all, fields(mechanism = %self.mechanism))]
    pub async fn remove_item(&self, key: &str) -> Result<()> {
        let codec = self.codec().await?;
        match EncryptedKeyIndex::new(self.backend.as_ref(), &codec).resolve(key)? {
            Some(encrypted_key) => self.backend.remove(encrypted_key.as_str()),
            None => Ok(()),
        }
    }

    /// Empty the whole backend, including entries the overlay did not write.
    /// The encryption key is kept.
    #[instrument(skip_all, fields(mechanism = %self.mechanism))]
    pub fn clear(&self) -> Result<()> {
        self.backend.clear()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use safestore_core::{InMemoryKeyStore, KeyStoreError, SafeStoreError};
    use serde::Deserialize;
    use serde_json::{json, Value};

    use super::*;
    use crate::{
        file_backend::FileBackend,
        index::EncryptedKeyRecord,
        key_store::FileKeyStore,
    };

    fn store() -> SafeStore<InMemoryKeyStore> {
        SafeStore::new(&Mechanisms::in_memory(), InMemoryKeyStore::new())
    }

    #[tokio::test]
    async fn username_scenario() {
        let store = store();

        store.set_item("username", "john_doe").await.expect("set");
        let value: Option<String> = store.get_item("username").await.expect("get");
        assert_eq!(value.as_deref(), Some("john_doe"));

        store.remove_item("username").await.expect("remove");
        let value: Option<String> = store.get_item("username").await.expect("get");
        assert_eq!(value, None);

        for (key, value) in [("a", 1), ("b", 2), ("c", 3)] {
            store.set_item(key, &value).await.expect("set");
        }
        store.clear().expect("clear");
        assert_eq!(store.backend().len().expect("len"), 0);
    }

    #[tokio::test]
    async fn round_trips_any_json_value() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Profile {
            name: String,
            age: u8,
            tags: Vec<String>,
        }

        let store = store();
        let profile = Profile {
            name: "Ada".into(),
            age: 36,
            tags: vec!["math".into()],
        };
        store.set_item("profile", &profile).await.expect("set");
        assert_eq!(
            store.get_item::<Profile>("profile").await.expect("get"),
            Some(profile)
        );

        let values = [
            json!(null),
            json!(false),
            json!(3.25),
            json!(["x", 1, null]),
            json!({"deep": {"map": [1, 2, 3]}}),
        ];
        for (i, value) in values.into_iter().enumerate() {
            let key = format!("value-{i}");
            store.set_item(&key, &value).await.expect("set");
            assert_eq!(store.get_item::<Value>(&key).await.expect("get"), Some(value));
        }
    }

    #[tokio::test]
    async fn missing_key_is_absent_not_an_error() {
        let store = store();
        assert_eq!(store.get_item::<Value>("nope").await.expect("get"), None);
        store.remove_item("nope").await.expect("remove is a no-op");
    }

    #[tokio::test]
    async fn updates_reuse_the_encrypted_key() {
        let store = store();
        store.set_item("counter", &1).await.expect("set");
        let before = store.backend().keys().expect("keys");

        store.set_item("counter", &2).await.expect("update");
        store.set_item("counter", &3).await.expect("update");

        assert_eq!(store.backend().keys().expect("keys"), before);
        assert_eq!(store.get_item::<i32>("counter").await.expect("get"), Some(3));
    }

    #[tokio::test]
    async fn removal_leaves_other_keys_intact() {
        let store = store();
        store.set_item("keep", "yes").await.expect("set");
        store.set_item("drop", "no").await.expect("set");

        store.remove_item("drop").await.expect("remove");

        assert_eq!(store.backend().len().expect("len"), 1);
        assert_eq!(
            store.get_item::<String>("keep").await.expect("get").as_deref(),
            Some("yes")
        );
        assert_eq!(store.get_item::<String>("drop").await.expect("get"), None);
    }

    #[tokio::test]
    async fn backend_never_sees_plaintext() {
        let store = store();
        store
            .set_item("email", "ada@example.com")
            .await
            .expect("set");

        let key = store.backend().key(0).expect("key").expect("present");
        let value = store.backend().get(&key).expect("get").expect("present");
        assert!(!key.contains("email"));
        assert!(!value.contains("ada@example.com"));

        let record: BTreeMap<String, Value> = serde_json::from_str(&value).expect("json");
        assert_eq!(
            record.keys().collect::<Vec<_>>(),
            vec!["data", "iv"]
        );
        assert_eq!(record["iv"].as_array().expect("iv array").len(), 12);
    }

    #[tokio::test]
    async fn instances_sharing_key_store_share_the_key() {
        let mechanisms = Mechanisms::in_memory();
        let key_store = InMemoryKeyStore::new();

        let first = SafeStore::new(&mechanisms, key_store.clone());
        first.set_item("session", "abc").await.expect("set");
        drop(first);

        let second = SafeStore::new(&mechanisms, key_store);
        assert_eq!(
            second.get_item::<String>("session").await.expect("get").as_deref(),
            Some("abc")
        );
    }

    #[tokio::test]
    async fn persists_across_reopen_with_file_stores() {
        let dir = tempfile::tempdir().expect("tempdir");
        let open = || {
            let local = FileBackend::open(dir.path().join("local.json")).expect("open local");
            let mechanisms = Mechanisms::new(
                Arc::new(local),
                Arc::new(safestore_core::MemoryBackend::new()),
            );
            SafeStore::new(&mechanisms, FileKeyStore::new(dir.path()))
        };

        open()
            .set_item("token", &json!({"value": "t-1"}))
            .await
            .expect("set");

        let reopened = open();
        assert_eq!(
            reopened.get_item::<Value>("token").await.expect("get"),
            Some(json!({"value": "t-1"}))
        );
    }

    #[tokio::test]
    async fn mechanisms_are_isolated() {
        let mechanisms = Mechanisms::in_memory();
        let key_store = InMemoryKeyStore::new();
        let local = SafeStore::new(&mechanisms, key_store.clone());
        let session = SafeStore::with_mechanism(&mechanisms, Mechanism::Session, key_store);

        assert_eq!(local.mechanism(), Mechanism::Local);
        session.set_item("tab", "1").await.expect("set");

        assert_eq!(local.get_item::<String>("tab").await.expect("get"), None);
        assert_eq!(
            session.get_item::<String>("tab").await.expect("get").as_deref(),
            Some("1")
        );
    }

    #[tokio::test]
    async fn clear_keeps_the_encryption_key_usable() {
        let store = store();
        store.backend().set("foreign", "entry").expect("set");
        store.set_item("a", "1").await.expect("set");

        store.clear().expect("clear");
        assert!(store.backend().is_empty().expect("is_empty"));

        store.set_item("a", "2").await.expect("set after clear");
        assert_eq!(
            store.get_item::<String>("a").await.expect("get").as_deref(),
            Some("2")
        );
    }

    #[tokio::test]
    async fn malformed_value_record_is_corrupt() {
        let store = store();
        store.set_item("k", "v").await.expect("set");
        let key = store.backend().key(0).expect("key").expect("present");
        store.backend().set(&key, "not-json").expect("overwrite");

        let err = store
            .get_item::<String>("k")
            .await
            .expect_err("should be corrupt");
        assert!(matches!(err, SafeStoreError::CorruptRecord { .. }));
    }

    #[tokio::test]
    async fn tampered_value_record_fails_decryption() {
        let store = store();
        store.set_item("k", "v").await.expect("set");
        let key = store.backend().key(0).expect("key").expect("present");
        let raw = store.backend().get(&key).expect("get").expect("present");

        let mut payload = EncryptedPayload::from_record_json(&raw).expect("parse");
        payload.ciphertext[0] ^= 0xFF;
        store
            .backend()
            .set(&key, &payload.to_record_json().expect("serialize"))
            .expect("overwrite");

        let err = store
            .get_item::<String>("k")
            .await
            .expect_err("should fail");
        assert!(matches!(err, SafeStoreError::Decryption { .. }));
    }

    #[tokio::test]
    async fn tampered_key_record_fails_decryption() {
        let store = store();
        store.set_item("k", "v").await.expect("set");
        let key = store.backend().key(0).expect("key").expect("present");
        let value = store.backend().get(&key).expect("get").expect("present");

        let mut payload = EncryptedKeyRecord::parse(&key).expect("record");
        payload.nonce[0] ^= 0x01;
        store.backend().remove(&key).expect("remove");
        store
            .backend()
            .set(EncryptedKeyRecord::from_payload(&payload).as_str(), &value)
            .expect("set tampered");

        let err = store
            .get_item::<String>("k")
            .await
            .expect_err("should fail");
        assert!(matches!(err, SafeStoreError::Decryption { .. }));
    }

    #[tokio::test]
    async fn type_mismatch_is_a_serialization_error() {
        let store = store();
        store.set_item("n", "not a number").await.expect("set");

        let err = store.get_item::<u32>("n").await.expect_err("should fail");
        assert!(matches!(err, SafeStoreError::Serialization { .. }));
    }

    #[tokio::test]
    async fn failed_key_material_leaves_backend_untouched() {
        struct Unavailable;

        #[async_trait::async_trait]
        impl KeyMaterialStore for Unavailable {
            async fn load(&self) -> std::result::Result<Option<Vec<u8>>, KeyStoreError> {
                Err(KeyStoreError::Open("blocked".into()))
            }

            async fn store(&self, _bytes: &[u8]) -> std::result::Result<(), KeyStoreError> {
                Err(KeyStoreError::Write("blocked".into()))
            }
        }

        let store = SafeStore::new(&Mechanisms::in_memory(), Unavailable);
        let err = store.set_item("k", "v").await.expect_err("should fail");

        assert!(matches!(err, SafeStoreError::KeyMaterialUnavailable { .. }));
        assert!(store.backend().is_empty().expect("is_empty"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writes_to_distinct_keys_share_one_key() {
        let mechanisms = Mechanisms::in_memory();
        let key_store = InMemoryKeyStore::new();
        let store = Arc::new(SafeStore::new(&mechanisms, key_store.clone()));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    let key = format!("key-{i}");
                    store.set_item(&key, &i).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.expect("join").expect("set");
        }
        assert_eq!(store.backend().len().expect("len"), 8);

        let reopened = SafeStore::new(&mechanisms, key_store);
        for i in 0..8 {
            assert_eq!(
                reopened
                    .get_item::<i32>(&format!("key-{i}"))
                    .await
                    .expect("get"),
                Some(i)
            );
        }
    }
}
