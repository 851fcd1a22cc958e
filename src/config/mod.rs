//! Configuration management for Hawkeye
//!
//! This module provides two layers:
//! - **gating**: GatingConfig with ordered rule tables, consumed by the visibility gate
//! - **settings**: HawkeyeConfig wrapping gating plus storage keys and tuning (JSON file)

pub mod gating;
pub mod settings;

// Re-export commonly used types
pub use gating::{GatingConfig, PmsConfig, RuleTable};
pub use settings::{HawkeyeConfig, StorageKeys, StorageSettings};
