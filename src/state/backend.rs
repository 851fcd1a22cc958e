//! Storage backend seams
//!
//! The primary tier is transactional and asynchronous. The fallback tier is a
//! small synchronous key-value store that is almost always available.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::error::BackendError;

/// Factory for primary connections
#[async_trait]
pub trait PrimaryBackend: Send + Sync {
    /// Open the database, creating `collection` if it does not exist yet
    async fn open(&self, collection: &str) -> Result<Arc<dyn PrimaryConnection>, BackendError>;
}

/// An open primary connection. Each call is its own transaction.
#[async_trait]
pub trait PrimaryConnection: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, BackendError>;

    async fn put(&self, key: &str, value: Value) -> Result<(), BackendError>;

    async fn delete(&self, key: &str) -> Result<(), BackendError>;

    /// Release the connection. Later calls fail with `BackendError::Closed`.
    fn close(&self);
}

/// Simple string key-value store
pub trait FallbackStore: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, BackendError>;

    fn set_item(&self, key: &str, value: &str) -> Result<(), BackendError>;

    fn remove_item(&self, key: &str) -> Result<(), BackendError>;
}

/// Which tier served the last operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Primary,
    Fallback,
}
