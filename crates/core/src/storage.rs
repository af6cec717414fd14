use crate::{BoosterError, Result};
use async_trait::async_trait;
use booster_protocol::{ExtensionConfig, PartialConfig, STORAGE_KEY};
use log::{debug, error};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, Mutex as TokioMutex};

const CHANGE_CHANNEL_CAPACITY: usize = 16;

/// Raw key-value persistence. Values are stored as-is; interpretation and
/// sanitization belong to [`ConfigStore`].
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> Result<()>;
}

/// Process-local backend. Can be switched into an unavailable state to
/// exercise failure handling.
#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, Value>>,
    unavailable: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BoosterError::StorageError("storage unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.check_available()?;
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.check_available()?;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value);
        Ok(())
    }
}

/// JSON object on disk, one entry per key. Writes go through a temporary
/// file and a rename.
pub struct FileBackend {
    path: PathBuf,
    write_lock: TokioMutex<()>,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: TokioMutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Map<String, Value>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => match serde_json::from_slice::<Value>(&bytes)? {
                Value::Object(map) => Ok(map),
                _ => Err(BoosterError::StorageError(format!(
                    "{} does not hold a JSON object",
                    self.path.display()
                ))),
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.read_all().await?.remove(key))
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut all = self.read_all().await?;
        all.insert(key.to_string(), value);

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let bytes = serde_json::to_vec_pretty(&Value::Object(all))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// Typed access to the persisted [`ExtensionConfig`] with change
/// notification.
pub struct ConfigStore {
    backend: Arc<dyn StorageBackend>,
    changes: broadcast::Sender<ExtensionConfig>,
}

impl ConfigStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self { backend, changes }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(FileBackend::new(path)))
    }

    /// Current configuration. Never fails: unreadable storage yields the
    /// defaults.
    pub async fn load(&self) -> ExtensionConfig {
        match self.backend.get(STORAGE_KEY).await {
            Ok(raw) => ExtensionConfig::from_stored(raw.as_ref()),
            Err(err) => {
                error!("failed to load config, using defaults: {err}");
                ExtensionConfig::default()
            }
        }
    }

    /// Merges `partial` into the current configuration, persists the
    /// sanitized result and notifies subscribers.
    pub async fn save(&self, partial: &PartialConfig) -> Result<ExtensionConfig> {
        let merged = self.load().await.merged(partial);
        self.backend
            .set(STORAGE_KEY, serde_json::to_value(merged)?)
            .await?;
        debug!("config saved: {merged:?}");
        self.publish(merged);
        Ok(merged)
    }

    /// Stores `raw` verbatim, the way another writer sharing the backend
    /// would, and notifies subscribers with its sanitized reading.
    pub async fn write_raw(&self, raw: Value) -> Result<ExtensionConfig> {
        let config = ExtensionConfig::from_stored(Some(&raw));
        self.backend.set(STORAGE_KEY, raw).await?;
        self.publish(config);
        Ok(config)
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<ExtensionConfig> {
        self.changes.subscribe()
    }

    fn publish(&self, config: ExtensionConfig) {
        // No receivers is fine.
        let _ = self.changes.send(config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn empty_store_loads_defaults() {
        let store = ConfigStore::in_memory();
        assert_eq!(store.load().await, ExtensionConfig::default());
    }

    #[tokio::test]
    async fn save_merges_clamps_and_notifies() {
        let store = ConfigStore::in_memory();
        let mut changes = store.subscribe_changes();

        let saved = store
            .save(&PartialConfig {
                load_more_batch_size: Some(1000.0),
                ..PartialConfig::default()
            })
            .await
            .unwrap();
        assert_eq!(saved.load_more_batch_size, 50);
        assert_eq!(saved.visible_message_limit, 10);
        assert_eq!(store.load().await, saved);
        assert_eq!(changes.recv().await.unwrap(), saved);
    }

    #[tokio::test]
    async fn malformed_raw_value_is_sanitized_on_read() {
        let store = ConfigStore::in_memory();
        let mut changes = store.subscribe_changes();
        let reported = store
            .write_raw(json!({ "visibleMessageLimit": 0, "enabled": "sometimes" }))
            .await
            .unwrap();

        let expected = ExtensionConfig {
            visible_message_limit: 1,
            ..ExtensionConfig::default()
        };
        assert_eq!(reported, expected);
        assert_eq!(store.load().await, expected);
        assert_eq!(changes.recv().await.unwrap(), expected);
    }

    #[tokio::test]
    async fn unavailable_backend_degrades_to_defaults() {
        let backend = Arc::new(MemoryBackend::new());
        let store = ConfigStore::new(backend.clone());
        store
            .save(&PartialConfig {
                enabled: Some(false),
                ..PartialConfig::default()
            })
            .await
            .unwrap();

        backend.set_unavailable(true);
        assert_eq!(store.load().await, ExtensionConfig::default());
        assert!(store.save(&PartialConfig::default()).await.is_err());

        backend.set_unavailable(false);
        assert!(!store.load().await.enabled);
    }

    #[tokio::test]
    async fn file_backend_round_trips_and_keeps_other_keys() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("storage.json");
        let backend = FileBackend::new(&path);
        backend.set("other", json!(42)).await.unwrap();

        let store = ConfigStore::new(Arc::new(backend));
        store
            .save(&PartialConfig {
                visible_message_limit: Some(25.0),
                ..PartialConfig::default()
            })
            .await
            .unwrap();

        let reopened = FileBackend::new(&path);
        assert_eq!(reopened.get("other").await.unwrap(), Some(json!(42)));
        let raw = reopened.get(STORAGE_KEY).await.unwrap().unwrap();
        assert_eq!(raw["visibleMessageLimit"], json!(25));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn corrupt_file_falls_back_to_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("storage.json");
        tokio::fs::write(&path, b"not json").await.unwrap();

        let store = ConfigStore::file(&path);
        assert_eq!(store.load().await, ExtensionConfig::default());
    }
}
