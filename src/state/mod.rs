//! Overlay state persistence
//!
//! - **record**: the persisted record shape and its schema check
//! - **backend**: primary/fallback backend traits
//! - **file** / **memory**: backend implementations
//! - **store**: the debounced two-tier store

pub mod backend;
pub mod file;
pub mod memory;
pub mod record;
pub mod store;

pub use backend::{FallbackStore, PrimaryBackend, PrimaryConnection, StoreBackend};
pub use file::{FileBackend, FileKvStore};
pub use memory::{MemoryBackend, MemoryKvStore};
pub use record::{OverlayStateRecord, Position, ToolbarState, sanitize_opacity, sanitize_scale};
pub use store::{PersistentStore, StoreOptions, state_key_for_path};
