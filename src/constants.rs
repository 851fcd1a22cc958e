//! Application-wide constants
//!
//! This module contains all magic numbers and string literals used throughout
//! the crate, providing a single source of truth for constant values.

/// Development environment detection
pub mod dev {
    /// Hostnames that always bypass gating
    pub const HOSTS: [&str; 2] = ["localhost", "127.0.0.1"];

    /// Hostname suffix for mDNS / local development machines
    pub const LOCAL_SUFFIX: &str = ".local";

    /// Port used by the local dev server
    pub const PORT: &str = "8080";
}

/// Pattern matching limits
pub mod pattern {
    /// Longest accepted glob pattern (characters)
    pub const MAX_LEN: usize = 256;

    /// Compiled regex size limit in bytes
    pub const REGEX_SIZE_LIMIT: usize = 64 * 1024;

    /// Pattern that matches everything
    pub const MATCH_ALL: &str = "*";
}

/// Branch extraction from hosted repository URLs
pub mod pms {
    /// Path segment that precedes the branch name: /<group>/<project>/files/<branch>/...
    pub const FILES_SEGMENT: &str = "files";
}

/// Storage naming
pub mod storage {
    /// Database directory of the primary backend
    pub const DB_NAME: &str = "hawkeyeDB";

    /// Single record collection inside the database
    pub const COLLECTION: &str = "states";

    /// Schema version written by this build
    pub const SCHEMA_VERSION: u32 = 1;

    /// Prefix of the page-scoped record key
    pub const STATE_KEY_PREFIX: &str = "hawkeye_";

    /// Fallback-only key for toolbar placement
    pub const TOOLBAR_KEY: &str = "hawkeyeToolbarState";

    /// Debounce window for state writes (milliseconds)
    pub const DEBOUNCE_MS: u64 = 300;

    /// Maximum size of a single fallback value (5 MiB, browser-like quota)
    pub const FALLBACK_MAX_VALUE_BYTES: usize = 5 * 1024 * 1024;

    /// Longest encoded key used verbatim as a fallback file name
    pub const FALLBACK_MAX_NAME_BYTES: usize = 200;
}

/// Default overlay state values
pub mod overlay {
    pub const DEFAULT_OPACITY: f64 = 0.5;
    pub const DEFAULT_SCALE: f64 = 1.0;
}

/// Configuration file location
pub mod config {
    /// Directory under the platform config/data dir
    pub const APP_DIR: &str = "hawkeye";

    /// Config file name
    pub const FILENAME: &str = "config.json";
}
