//! Storage adapters
//!
//! - [`MemoryStorage`]: process-local map (tests, fallback environment)
//! - [`JsonFileStorage`]: a JSON document on disk, rewritten on every change
//!   (desktop builds)
//! - [`MirroredStorage`]: synchronous facade over an asynchronous
//!   [`KeyValueBackend`]. The mirror is hydrated once at startup; writes hit
//!   the mirror immediately and are persisted by a single background writer
//!   in the order they were issued.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use super::StorageAdapter;
use crate::error::StorageError;

#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StorageAdapter for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

/// Key/value storage persisted as a single JSON object on disk.
#[derive(Debug)]
pub struct JsonFileStorage {
    path: PathBuf,
    entries: RwLock<HashMap<String, String>>,
}

impl JsonFileStorage {
    /// Open (or create) the storage file at `path`. `~` is expanded and
    /// missing parent directories are created. An unreadable or corrupt
    /// file starts out empty.
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let expanded = PathBuf::from(shellexpand::tilde(path).to_string());

        if let Some(parent) = expanded.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Backend(format!(
                    "Failed to create storage directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let entries = Self::read_entries(&expanded);
        Ok(Self {
            path: expanded,
            entries: RwLock::new(entries),
        })
    }

    /// `<data_dir>/feomo/storage.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join("feomo").join("storage.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(path: &Path) -> HashMap<String, String> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read storage file");
                return HashMap::new();
            }
        };

        serde_json::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "Discarding corrupt storage file");
            HashMap::new()
        })
    }

    fn persist(&self, entries: &HashMap<String, String>) -> Result<(), StorageError> {
        let json = serde_json::to_string_pretty(entries)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        std::fs::write(&self.path, json).map_err(|e| {
            StorageError::Backend(format!("Failed to write {}: {}", self.path.display(), e))
        })
    }
}

impl StorageAdapter for JsonFileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries)
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }
}

/// Asynchronous key/value persistence used behind a [`MirroredStorage`].
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    async fn load_all(&self) -> Result<Vec<(String, String)>, StorageError>;

    async fn put(&self, key: &str, value: &str) -> Result<(), StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Identifier used in log messages
    fn backend_name(&self) -> &str;
}

enum WriteOp {
    Put(String, String),
    Delete(String),
    Flush(oneshot::Sender<()>),
}

pub struct MirroredStorage {
    mirror: RwLock<HashMap<String, String>>,
    writer: mpsc::UnboundedSender<WriteOp>,
    backend_name: String,
}

impl MirroredStorage {
    /// Load every persisted entry into memory and start the writer task.
    ///
    /// Must be called from within a tokio runtime. A failed load starts with
    /// an empty mirror.
    pub async fn hydrate(backend: Arc<dyn KeyValueBackend>) -> Self {
        let backend_name = backend.backend_name().to_string();

        let mirror: HashMap<String, String> = match backend.load_all().await {
            Ok(entries) => {
                tracing::debug!(
                    backend = %backend_name,
                    count = entries.len(),
                    "Hydrated storage mirror"
                );
                entries.into_iter().collect()
            }
            Err(e) => {
                tracing::warn!(backend = %backend_name, error = %e, "Failed to hydrate storage mirror");
                HashMap::new()
            }
        };

        let (writer, queue) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(backend, queue));

        Self {
            mirror: RwLock::new(mirror),
            writer,
            backend_name,
        }
    }

    /// Wait until every write queued so far has reached the backend.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.writer.send(WriteOp::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    fn enqueue(&self, op: WriteOp) {
        if self.writer.send(op).is_err() {
            tracing::warn!(backend = %self.backend_name, "Storage writer stopped; change kept in memory only");
        }
    }
}

async fn run_writer(backend: Arc<dyn KeyValueBackend>, mut queue: mpsc::UnboundedReceiver<WriteOp>) {
    while let Some(op) = queue.recv().await {
        match op {
            WriteOp::Put(key, value) => {
                if let Err(e) = backend.put(&key, &value).await {
                    tracing::warn!(backend = %backend.backend_name(), key = %key, error = %e, "Failed to persist storage value");
                }
            }
            WriteOp::Delete(key) => {
                if let Err(e) = backend.delete(&key).await {
                    tracing::warn!(backend = %backend.backend_name(), key = %key, error = %e, "Failed to remove storage value");
                }
            }
            WriteOp::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

impl StorageAdapter for MirroredStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mirror = self.mirror.read().unwrap_or_else(PoisonError::into_inner);
        Ok(mirror.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        {
            let mut mirror = self.mirror.write().unwrap_or_else(PoisonError::into_inner);
            mirror.insert(key.to_string(), value.to_string());
        }
        self.enqueue(WriteOp::Put(key.to_string(), value.to_string()));
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        {
            let mut mirror = self.mirror.write().unwrap_or_else(PoisonError::into_inner);
            mirror.remove(key);
        }
        self.enqueue(WriteOp::Delete(key.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingBackend {
        seed: Vec<(String, String)>,
        fail_load: bool,
        fail_writes: bool,
        log: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl KeyValueBackend for RecordingBackend {
        async fn load_all(&self) -> Result<Vec<(String, String)>, StorageError> {
            if self.fail_load {
                return Err(StorageError::Backend("disk unavailable".to_string()));
            }
            Ok(self.seed.clone())
        }

        async fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
            if self.fail_writes {
                return Err(StorageError::Backend("read-only".to_string()));
            }
            self.log.lock().unwrap().push(format!("put {}={}", key, value));
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<(), StorageError> {
            self.log.lock().unwrap().push(format!("delete {}", key));
            Ok(())
        }

        fn backend_name(&self) -> &str {
            "recording"
        }
    }

    #[test]
    fn test_memory_storage_basic_operations() {
        let storage = MemoryStorage::new();
        assert!(storage.is_empty());

        storage.set_item("a", "1").unwrap();
        storage.set_item("a", "2").unwrap();
        assert_eq!(storage.get_item("a").unwrap(), Some("2".to_string()));
        assert_eq!(storage.len(), 1);

        storage.remove_item("a").unwrap();
        storage.remove_item("never-set").unwrap();
        assert!(storage.is_empty());
    }

    #[test]
    fn test_json_file_storage_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("storage.json");
        let path_str = path.to_string_lossy().to_string();

        let storage = JsonFileStorage::open(&path_str).unwrap();
        storage.set_item("gts_access_token", "token-1").unwrap();
        storage.set_item("other", "x").unwrap();
        storage.remove_item("other").unwrap();
        drop(storage);

        let reopened = JsonFileStorage::open(&path_str).unwrap();
        assert_eq!(
            reopened.get_item("gts_access_token").unwrap(),
            Some("token-1".to_string())
        );
        assert_eq!(reopened.get_item("other").unwrap(), None);
    }

    #[test]
    fn test_json_file_storage_discards_corrupt_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("storage.json");
        std::fs::write(&path, "{not json").unwrap();

        let storage = JsonFileStorage::open(&path.to_string_lossy()).unwrap();
        assert_eq!(storage.get_item("anything").unwrap(), None);
    }

    #[tokio::test]
    async fn test_mirrored_storage_hydrates_and_reads_synchronously() {
        let backend = Arc::new(RecordingBackend {
            seed: vec![("gts_client_id".to_string(), "abc".to_string())],
            ..Default::default()
        });

        let storage = MirroredStorage::hydrate(backend).await;
        assert_eq!(storage.get_item("gts_client_id").unwrap(), Some("abc".to_string()));
    }

    #[tokio::test]
    async fn test_mirrored_storage_persists_in_call_order() {
        let backend = Arc::new(RecordingBackend::default());
        let storage = MirroredStorage::hydrate(backend.clone()).await;

        storage.set_item("k", "1").unwrap();
        storage.remove_item("k").unwrap();
        storage.set_item("k", "2").unwrap();
        storage.flush().await;

        let log = backend.log.lock().unwrap().clone();
        assert_eq!(log, vec!["put k=1", "delete k", "put k=2"]);
        assert_eq!(storage.get_item("k").unwrap(), Some("2".to_string()));
    }

    #[tokio::test]
    async fn test_mirrored_storage_failed_hydration_starts_empty() {
        let backend = Arc::new(RecordingBackend {
            seed: vec![("k".to_string(), "v".to_string())],
            fail_load: true,
            ..Default::default()
        });

        let storage = MirroredStorage::hydrate(backend).await;
        assert_eq!(storage.get_item("k").unwrap(), None);
    }

    #[tokio::test]
    async fn test_mirrored_storage_write_failures_are_absorbed() {
        let backend = Arc::new(RecordingBackend {
            fail_writes: true,
            ..Default::default()
        });
        let storage = MirroredStorage::hydrate(backend).await;

        assert!(storage.set_item("k", "v").is_ok());
        storage.flush().await;
        assert_eq!(storage.get_item("k").unwrap(), Some("v".to_string()));
    }
}
