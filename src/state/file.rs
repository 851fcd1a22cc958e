//! Filesystem backends
//!
//! `FileBackend` keeps one JSON document per collection and rewrites it
//! atomically (unique temp file + rename) for every transaction. All connections
//! to a collection in this process share one lock. `FileKvStore` keeps one
//! small file per key.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::backend::{FallbackStore, PrimaryBackend, PrimaryConnection};
use crate::constants::storage;
use crate::error::BackendError;

/// Per collection file locks, keyed by path
static COLLECTION_LOCKS: LazyLock<std::sync::Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> =
    LazyLock::new(Default::default);

fn collection_lock(path: &Path) -> Arc<Mutex<()>> {
    let mut locks = COLLECTION_LOCKS
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    Arc::clone(locks.entry(path.to_path_buf()).or_default())
}

/// On-disk layout of a collection file
#[derive(Debug, Default, Serialize, Deserialize)]
struct CollectionFile {
    version: u32,
    #[serde(default)]
    records: BTreeMap<String, Value>,
}

/// Primary backend rooted at `<root>/<db name>/`
#[derive(Debug, Clone)]
pub struct FileBackend {
    db_dir: PathBuf,
}

impl FileBackend {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            db_dir: root.as_ref().join(storage::DB_NAME),
        }
    }

    pub fn db_dir(&self) -> &Path {
        &self.db_dir
    }
}

#[async_trait]
impl PrimaryBackend for FileBackend {
    async fn open(&self, collection: &str) -> Result<Arc<dyn PrimaryConnection>, BackendError> {
        tokio::fs::create_dir_all(&self.db_dir).await?;
        let path = self.db_dir.join(format!("{collection}.json"));
        let lock = collection_lock(&path);

        {
            let _guard = lock.lock().await;
            if tokio::fs::try_exists(&path).await? {
                // Refuse to run against a schema written by a newer build
                read_collection(&path).await?;
            } else {
                let empty = CollectionFile {
                    version: storage::SCHEMA_VERSION,
                    records: BTreeMap::new(),
                };
                write_collection(&path, &empty).await?;
                info!(path = %path.display(), "Created record collection");
            }
        }

        Ok(Arc::new(FileConnection {
            path,
            lock,
            closed: AtomicBool::new(false),
        }))
    }
}

struct FileConnection {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
    closed: AtomicBool,
}

impl FileConnection {
    fn ensure_open(&self) -> Result<(), BackendError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BackendError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl PrimaryConnection for FileConnection {
    async fn get(&self, key: &str) -> Result<Option<Value>, BackendError> {
        self.ensure_open()?;
        let _guard = self.lock.lock().await;
        let collection = read_collection(&self.path).await?;
        Ok(collection.records.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), BackendError> {
        self.ensure_open()?;
        let _guard = self.lock.lock().await;
        let mut collection = read_collection(&self.path).await?;
        collection.records.insert(key.to_string(), value);
        write_collection(&self.path, &collection).await?;
        debug!(key = %key, "Committed record");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        self.ensure_open()?;
        let _guard = self.lock.lock().await;
        let mut collection = read_collection(&self.path).await?;
        if collection.records.remove(key).is_some() {
            write_collection(&self.path, &collection).await?;
            debug!(key = %key, "Deleted record");
        }
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

async fn read_collection(path: &Path) -> Result<CollectionFile, BackendError> {
    let bytes = tokio::fs::read(path).await?;
    let collection: CollectionFile = serde_json::from_slice(&bytes)?;
    if collection.version > storage::SCHEMA_VERSION {
        return Err(BackendError::VersionChange {
            found: collection.version,
            expected: storage::SCHEMA_VERSION,
        });
    }
    Ok(collection)
}

async fn write_collection(path: &Path, collection: &CollectionFile) -> Result<(), BackendError> {
    let json = serde_json::to_vec(collection)?;
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || write_atomic(&path, &json))
        .await
        .map_err(|e| BackendError::Io(std::io::Error::other(e)))?
}

/// Write to a uniquely named temp file next to `path`, then rename it over `path`
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), BackendError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(bytes)?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Fallback store with one file per key.
///
/// Uses blocking `std::fs` calls, matching the synchronous `FallbackStore` contract.
/// Items are small, so callers on the async runtime call it directly.
#[derive(Debug, Clone)]
pub struct FileKvStore {
    dir: PathBuf,
    max_value_bytes: usize,
}

impl FileKvStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_value_bytes: storage::FALLBACK_MAX_VALUE_BYTES,
        }
    }

    pub fn with_quota(mut self, max_value_bytes: usize) -> Self {
        self.max_value_bytes = max_value_bytes;
        self
    }

    /// Percent-encoded key as the file name, or a SHA-256 digest for keys that
    /// would exceed the file name limit. `#` never appears in an encoded key, so
    /// the two forms cannot collide.
    fn item_path(&self, key: &str) -> PathBuf {
        let encoded = urlencoding::encode(key);
        let name = if encoded.len() <= storage::FALLBACK_MAX_NAME_BYTES {
            encoded.into_owned()
        } else {
            format!("#{:x}", Sha256::digest(key.as_bytes()))
        };
        self.dir.join(format!("{name}.json"))
    }
}

impl FallbackStore for FileKvStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, BackendError> {
        match fs::read_to_string(self.item_path(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), BackendError> {
        if value.len() > self.max_value_bytes {
            return Err(BackendError::QuotaExceeded {
                size: value.len(),
                max: self.max_value_bytes,
            });
        }
        fs::create_dir_all(&self.dir)?;
        write_atomic(&self.item_path(key), value.as_bytes())
    }

    fn remove_item(&self, key: &str) -> Result<(), BackendError> {
        match fs::remove_file(self.item_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to remove fallback item");
                Err(e.into())
            }
        }
    }
}
