//! In-process backends
//!
//! Used for embedding without a filesystem and for exercising the fallback
//! paths: each backend can be switched into a failing mode at runtime.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::backend::{FallbackStore, PrimaryBackend, PrimaryConnection};
use crate::error::BackendError;

#[derive(Debug, Default)]
struct MemoryShared {
    records: Mutex<HashMap<String, Value>>,
    fail_open: AtomicBool,
    fail_ops: AtomicBool,
    opens: AtomicUsize,
    puts: AtomicUsize,
    /// Bumped to invalidate every connection opened before
    epoch: AtomicUsize,
}

/// Primary backend held in memory. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    shared: Arc<MemoryShared>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `open` fail
    pub fn set_fail_open(&self, fail: bool) {
        self.shared.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Make every get/put/delete fail
    pub fn set_fail_operations(&self, fail: bool) {
        self.shared.fail_ops.store(fail, Ordering::SeqCst);
    }

    /// Simulate a schema upgrade from another process
    pub fn bump_version(&self) {
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
    }

    pub fn open_count(&self) -> usize {
        self.shared.opens.load(Ordering::SeqCst)
    }

    /// Number of committed puts
    pub fn put_count(&self) -> usize {
        self.shared.puts.load(Ordering::SeqCst)
    }

    pub fn record(&self, key: &str) -> Option<Value> {
        lock(&self.shared.records).get(key).cloned()
    }

    pub fn insert_record(&self, key: &str, value: Value) {
        lock(&self.shared.records).insert(key.to_string(), value);
    }
}

#[async_trait]
impl PrimaryBackend for MemoryBackend {
    async fn open(&self, _collection: &str) -> Result<Arc<dyn PrimaryConnection>, BackendError> {
        if self.shared.fail_open.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("open refused".to_string()));
        }
        self.shared.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemoryConnection {
            shared: Arc::clone(&self.shared),
            epoch: self.shared.epoch.load(Ordering::SeqCst),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemoryConnection {
    shared: Arc<MemoryShared>,
    epoch: usize,
    closed: AtomicBool,
}

impl MemoryConnection {
    fn check(&self) -> Result<(), BackendError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BackendError::Closed);
        }
        let current = self.shared.epoch.load(Ordering::SeqCst);
        if current != self.epoch {
            return Err(BackendError::VersionChange {
                found: current as u32,
                expected: self.epoch as u32,
            });
        }
        if self.shared.fail_ops.load(Ordering::SeqCst) {
            return Err(BackendError::Transaction("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PrimaryConnection for MemoryConnection {
    async fn get(&self, key: &str) -> Result<Option<Value>, BackendError> {
        self.check()?;
        Ok(lock(&self.shared.records).get(key).cloned())
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), BackendError> {
        self.check()?;
        lock(&self.shared.records).insert(key.to_string(), value);
        self.shared.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        self.check()?;
        lock(&self.shared.records).remove(key);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Fallback store held in memory. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryKvStore {
    items: Arc<Mutex<HashMap<String, String>>>,
    fail: Arc<AtomicBool>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), BackendError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("storage disabled".to_string()));
        }
        Ok(())
    }
}

impl FallbackStore for MemoryKvStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, BackendError> {
        self.check()?;
        Ok(lock(&self.items).get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), BackendError> {
        self.check()?;
        lock(&self.items).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), BackendError> {
        self.check()?;
        lock(&self.items).remove(key);
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
