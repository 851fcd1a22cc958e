//! Two-tier persistent store for overlay state
//!
//! One record per page key. Writes are debounced: a newer `save` replaces the
//! pending one before its timer fires, so only the latest state in a window is
//! written. `get` does not flush pending writes, so a read may lag the last
//! `save` by up to the debounce interval.
//!
//! The primary backend is preferred. Any primary failure falls back to the
//! simple store, and the next operation re-opens the primary.

use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::backend::{FallbackStore, PrimaryBackend, PrimaryConnection, StoreBackend};
use super::record::{OverlayStateRecord, ToolbarState, now_millis};
use crate::config::HawkeyeConfig;
use crate::constants::storage;
use crate::context::ExecutionContext;
use crate::error::{BackendError, StoreError};

/// Record key for a page path
pub fn state_key_for_path(path: &str) -> String {
    format!("{}{}", storage::STATE_KEY_PREFIX, path)
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreOptions {
    pub key: String,
    pub toolbar_key: String,
    pub debounce: Duration,
    pub operation_timeout: Option<Duration>,
}

impl StoreOptions {
    pub fn for_path(path: &str) -> Self {
        Self {
            key: state_key_for_path(path),
            toolbar_key: storage::TOOLBAR_KEY.to_string(),
            debounce: Duration::from_millis(storage::DEBOUNCE_MS),
            operation_timeout: None,
        }
    }

    pub fn from_config(config: &HawkeyeConfig, context: &ExecutionContext) -> Self {
        Self {
            key: config
                .storage_keys
                .state
                .clone()
                .unwrap_or_else(|| state_key_for_path(&context.path)),
            toolbar_key: config.storage_keys.toolbar.clone(),
            debounce: config.storage.debounce(),
            operation_timeout: config.storage.operation_timeout(),
        }
    }
}

enum StoreState {
    Uninitialized,
    PrimaryReady(Arc<dyn PrimaryConnection>),
    FallbackOnly,
    Destroyed,
}

struct PendingWrite {
    id: u64,
    handle: JoinHandle<()>,
}

struct StoreInner {
    key: String,
    toolbar_key: String,
    debounce: Duration,
    operation_timeout: Option<Duration>,
    primary: Arc<dyn PrimaryBackend>,
    fallback: Arc<dyn FallbackStore>,
    state: tokio::sync::Mutex<StoreState>,
    pending: Mutex<Option<PendingWrite>>,
    /// Id of the most recent accepted save
    latest_write: AtomicU64,
}

/// Persistent overlay state store. Clones share the same store.
#[derive(Clone)]
pub struct PersistentStore {
    inner: Arc<StoreInner>,
}

impl PersistentStore {
    pub fn new(
        options: StoreOptions,
        primary: Arc<dyn PrimaryBackend>,
        fallback: Arc<dyn FallbackStore>,
    ) -> Self {
        debug!(key = %options.key, debounce = ?options.debounce, "Creating state store");
        Self {
            inner: Arc::new(StoreInner {
                key: options.key,
                toolbar_key: options.toolbar_key,
                debounce: options.debounce,
                operation_timeout: options.operation_timeout,
                primary,
                fallback,
                state: tokio::sync::Mutex::new(StoreState::Uninitialized),
                pending: Mutex::new(None),
                latest_write: AtomicU64::new(0),
            }),
        }
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Open the primary backend. No-op once ready; also revives a destroyed store.
    pub async fn initialize(&self) -> Result<(), StoreError> {
        let mut state = self.inner.state.lock().await;
        if matches!(*state, StoreState::PrimaryReady(_)) {
            return Ok(());
        }
        self.inner
            .open_primary(&mut state)
            .await
            .map(|_| ())
            .map_err(StoreError::Init)
    }

    /// Tier that will serve the next operation
    pub async fn backend(&self) -> StoreBackend {
        match *self.inner.state.lock().await {
            StoreState::PrimaryReady(_) => StoreBackend::Primary,
            _ => StoreBackend::Fallback,
        }
    }

    /// Debounced save. Resolves once the write lands, or immediately with `Ok`
    /// when a later save supersedes this one.
    ///
    /// Invalid records are logged and skipped without touching the pending write.
    pub async fn save(&self, record: OverlayStateRecord) -> Result<(), StoreError> {
        if let Err(e) = record.validate() {
            warn!(key = %self.inner.key, error = %e, "Invalid state, skipping save");
            return Ok(());
        }
        if self.inner.is_destroyed().await {
            return Err(StoreError::Destroyed);
        }

        let id = self.inner.latest_write.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = oneshot::channel();
        let inner = Arc::clone(&self.inner);

        {
            // Hold the slot while spawning so the task can't claim before it is registered
            let mut slot = lock(&self.inner.pending);
            let handle = tokio::spawn(async move {
                tokio::time::sleep(inner.debounce).await;
                if !inner.claim_pending(id) {
                    return;
                }
                let result = inner.commit(id, record).await;
                let _ = tx.send(result);
            });
            if let Some(previous) = slot.replace(PendingWrite { id, handle }) {
                previous.handle.abort();
                debug!(superseded = previous.id, by = id, "Replaced pending write");
            }
        }

        rx.await.unwrap_or(Ok(()))
    }

    /// Schema-check untyped state (as handed over by the UI layer) and save it
    pub async fn save_json(&self, value: Value) -> Result<(), StoreError> {
        match OverlayStateRecord::from_value(value) {
            Ok(record) => self.save(record).await,
            Err(e) => {
                warn!(key = %self.inner.key, error = %e, "Invalid state structure, skipping save");
                Ok(())
            }
        }
    }

    /// Read the record for this page. Primary first, then fallback; a fallback hit
    /// is copied back into the primary in the background.
    pub async fn get(&self) -> Option<OverlayStateRecord> {
        let inner = &self.inner;
        if inner.is_destroyed().await {
            warn!(key = %inner.key, "get() on destroyed store");
            return None;
        }

        let key = inner.key.clone();
        match inner.with_primary(move |conn| async move { conn.get(&key).await }).await {
            Ok(Some(value)) => match OverlayStateRecord::from_value(value) {
                Ok(record) => return Some(record),
                Err(e) => warn!(key = %inner.key, error = %e, "Stored state failed validation"),
            },
            Ok(None) => debug!(key = %inner.key, "No state in primary, checking fallback"),
            Err(e) => {
                warn!(key = %inner.key, error = %e, "Primary read failed, using fallback");
                return inner.read_fallback();
            }
        }

        let record = inner.read_fallback()?;
        self.spawn_resync(record.clone());
        Some(record)
    }

    /// Delete the record from both tiers.
    ///
    /// A failed primary transaction is returned to the caller after the fallback
    /// copy has been removed. When the primary cannot be opened at all the fallback
    /// is the only copy and its removal decides the result.
    pub async fn clear(&self) -> Result<(), StoreError> {
        let inner = &self.inner;
        if inner.is_destroyed().await {
            return Err(StoreError::Destroyed);
        }
        inner.cancel_pending();

        let conn = match inner.connection().await {
            Ok(conn) => conn,
            Err(primary) => {
                warn!(key = %inner.key, error = %primary, "Primary unavailable, clearing fallback only");
                return inner
                    .fallback
                    .remove_item(&inner.key)
                    .map_err(|fallback| StoreError::BothFailed { primary, fallback });
            }
        };

        let key = inner.key.clone();
        let result = inner
            .with_connection(conn, move |conn| async move { conn.delete(&key).await })
            .await;

        if let Err(e) = inner.fallback.remove_item(&inner.key) {
            warn!(key = %inner.key, error = %e, "Failed to remove fallback state");
        }

        match result {
            Ok(()) => {
                info!(key = %inner.key, "Cleared state");
                Ok(())
            }
            Err(e) => {
                error!(key = %inner.key, error = %e, "Failed to clear state");
                Err(StoreError::Primary(e))
            }
        }
    }

    /// Cancel the pending write and release the connection
    pub async fn destroy(&self) {
        self.inner.cancel_pending();
        let mut state = self.inner.state.lock().await;
        if let StoreState::PrimaryReady(conn) = &*state {
            conn.close();
        }
        *state = StoreState::Destroyed;
        info!(key = %self.inner.key, "State store destroyed");
    }

    /// Toolbar placement goes straight to the fallback store
    pub fn save_toolbar_state(&self, toolbar: &ToolbarState) {
        let stamped = ToolbarState {
            timestamp: now_millis(),
            ..toolbar.clone()
        };
        let result = serde_json::to_string(&stamped)
            .map_err(BackendError::from)
            .and_then(|json| self.inner.fallback.set_item(&self.inner.toolbar_key, &json));
        if let Err(e) = result {
            error!(key = %self.inner.toolbar_key, error = %e, "Failed to save toolbar state");
        }
    }

    pub fn get_toolbar_state(&self) -> Option<ToolbarState> {
        let raw = match self.inner.fallback.get_item(&self.inner.toolbar_key) {
            Ok(raw) => raw?,
            Err(e) => {
                error!(key = %self.inner.toolbar_key, error = %e, "Failed to read toolbar state");
                return None;
            }
        };
        serde_json::from_str(&raw)
            .inspect_err(|e| warn!(error = %e, "Toolbar state is not valid JSON"))
            .ok()
    }

    fn spawn_resync(&self, record: OverlayStateRecord) {
        let inner = Arc::clone(&self.inner);
        let seen = inner.latest_write.load(Ordering::SeqCst);
        tokio::spawn(async move {
            // A save issued after the read owns the primary copy now
            if inner.latest_write.load(Ordering::SeqCst) != seen {
                return;
            }
            let value = match serde_json::to_value(&record) {
                Ok(value) => value,
                Err(e) => {
                    warn!(error = %e, "Failed to encode state for resync");
                    return;
                }
            };
            let key = inner.key.clone();
            match inner.with_primary(move |conn| async move { conn.put(&key, value).await }).await {
                Ok(()) => info!(key = %inner.key, "Re-synchronized fallback state into primary"),
                Err(e) => debug!(key = %inner.key, error = %e, "Resync to primary skipped"),
            }
        });
    }
}

impl StoreInner {
    async fn open_primary(
        &self,
        state: &mut StoreState,
    ) -> Result<Arc<dyn PrimaryConnection>, BackendError> {
        match self.timed(self.primary.open(storage::COLLECTION)).await {
            Ok(conn) => {
                *state = StoreState::PrimaryReady(Arc::clone(&conn));
                info!(key = %self.key, "Primary backend ready");
                Ok(conn)
            }
            Err(e) => {
                warn!(key = %self.key, error = %e, "Primary backend unavailable, using fallback");
                *state = StoreState::FallbackOnly;
                Err(e)
            }
        }
    }

    /// Current connection, re-opening the primary if it was lost or never opened
    async fn connection(&self) -> Result<Arc<dyn PrimaryConnection>, BackendError> {
        let mut state = self.state.lock().await;
        match &*state {
            StoreState::PrimaryReady(conn) => return Ok(Arc::clone(conn)),
            StoreState::Destroyed => return Err(BackendError::Closed),
            StoreState::Uninitialized | StoreState::FallbackOnly => {}
        }
        self.open_primary(&mut state).await
    }

    async fn with_primary<T, F, Fut>(&self, op: F) -> Result<T, BackendError>
    where
        F: FnOnce(Arc<dyn PrimaryConnection>) -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let conn = self.connection().await?;
        self.with_connection(conn, op).await
    }

    async fn with_connection<T, F, Fut>(
        &self,
        conn: Arc<dyn PrimaryConnection>,
        op: F,
    ) -> Result<T, BackendError>
    where
        F: FnOnce(Arc<dyn PrimaryConnection>) -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let result = self.timed(op(Arc::clone(&conn))).await;
        if let Err(e) = &result {
            if e.invalidates_connection() {
                self.invalidate(&conn).await;
            }
        }
        result
    }

    async fn timed<T>(
        &self,
        fut: impl Future<Output = Result<T, BackendError>>,
    ) -> Result<T, BackendError> {
        match self.operation_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .unwrap_or_else(|_| Err(BackendError::Timeout(limit))),
            None => fut.await,
        }
    }

    /// Drop a connection that reported a version change or closure
    async fn invalidate(&self, failed: &Arc<dyn PrimaryConnection>) {
        let mut state = self.state.lock().await;
        if let StoreState::PrimaryReady(current) = &*state {
            if Arc::ptr_eq(current, failed) {
                current.close();
                *state = StoreState::Uninitialized;
                warn!(key = %self.key, "Primary connection invalidated, will reopen");
            }
        }
    }

    async fn is_destroyed(&self) -> bool {
        matches!(*self.state.lock().await, StoreState::Destroyed)
    }

    fn claim_pending(&self, id: u64) -> bool {
        let mut slot = lock(&self.pending);
        if slot.as_ref().is_some_and(|pending| pending.id == id) {
            slot.take();
            true
        } else {
            false
        }
    }

    fn cancel_pending(&self) {
        if let Some(pending) = lock(&self.pending).take() {
            pending.handle.abort();
            debug!(id = pending.id, "Cancelled pending write");
        }
    }

    async fn commit(&self, id: u64, record: OverlayStateRecord) -> Result<(), StoreError> {
        let stamped = record.stamped(now_millis());
        let value = serde_json::to_value(&stamped).map_err(|e| StoreError::Primary(e.into()))?;

        let key = self.key.clone();
        let primary = match self.with_primary(move |conn| async move { conn.put(&key, value).await }).await {
            Ok(()) => {
                debug!(key = %self.key, timestamp = stamped.timestamp, "Saved state to primary");
                return Ok(());
            }
            Err(e) => e,
        };

        if self.latest_write.load(Ordering::SeqCst) > id {
            warn!(key = %self.key, error = %primary, "Primary write failed, newer state pending; skipping fallback");
            return Ok(());
        }

        warn!(key = %self.key, error = %primary, "Primary write failed, saving to fallback");
        serde_json::to_string(&stamped)
            .map_err(BackendError::from)
            .and_then(|json| self.fallback.set_item(&self.key, &json))
            .map_err(|fallback| {
                error!(key = %self.key, error = %fallback, "Fallback write failed");
                StoreError::BothFailed { primary, fallback }
            })
    }

    fn read_fallback(&self) -> Option<OverlayStateRecord> {
        let raw = match self.fallback.get_item(&self.key) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(key = %self.key, error = %e, "Failed to read fallback state");
                return None;
            }
        };
        let value: Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %self.key, error = %e, "Fallback state is not valid JSON");
                return None;
            }
        };
        OverlayStateRecord::from_value(value)
            .inspect_err(|e| warn!(key = %self.key, error = %e, "Fallback state failed validation"))
            .ok()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
