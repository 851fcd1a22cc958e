//! Hawkeye core: visibility gating and persistent overlay state.
//!
//! The gate decides once per page load whether the overlay may run. When it
//! does, a [`PersistentStore`] keeps one overlay state record per page path in a
//! primary transactional backend, falling back to a simple key-value store.

#![forbid(unsafe_code)]

pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod gate;
pub mod matcher;
pub mod session;
pub mod state;

pub use config::{GatingConfig, HawkeyeConfig, PmsConfig, RuleTable};
pub use context::ExecutionContext;
pub use error::{BackendError, ConfigError, StoreError, ValidationError};
pub use gate::{GatingDecision, GatingReason, VisibilityGate};
pub use matcher::RuleMatcher;
pub use session::{Backends, Session};
pub use state::{OverlayStateRecord, PersistentStore, StoreBackend, ToolbarState};
