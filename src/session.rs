//! Startup sequence for a page: validate config, gate once, open the store,
//! restore the last saved state.

use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{HawkeyeConfig, StorageSettings};
use crate::context::ExecutionContext;
use crate::error::ConfigError;
use crate::gate::{GatingDecision, VisibilityGate};
use crate::state::{
    FallbackStore, FileBackend, FileKvStore, MemoryBackend, MemoryKvStore, OverlayStateRecord,
    PersistentStore, PrimaryBackend, StoreOptions,
};

/// Fallback items live in this subdirectory of the data dir
const FALLBACK_DIR: &str = "fallback";

/// Backend pair handed to the store
#[derive(Clone)]
pub struct Backends {
    pub primary: Arc<dyn PrimaryBackend>,
    pub fallback: Arc<dyn FallbackStore>,
}

impl Backends {
    pub fn filesystem(settings: &StorageSettings) -> Self {
        let root = settings.resolve_data_dir();
        Self {
            primary: Arc::new(FileBackend::new(&root)),
            fallback: Arc::new(FileKvStore::new(root.join(FALLBACK_DIR))),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            primary: Arc::new(MemoryBackend::new()),
            fallback: Arc::new(MemoryKvStore::new()),
        }
    }
}

pub struct Session {
    decision: GatingDecision,
    store: PersistentStore,
    restored: Option<OverlayStateRecord>,
}

impl Session {
    /// Returns `Ok(None)` when the gate denies the page. Only configuration
    /// errors are surfaced; storage problems degrade to the fallback store.
    pub async fn start(
        config: &HawkeyeConfig,
        context: &ExecutionContext,
        backends: Backends,
    ) -> Result<Option<Session>, ConfigError> {
        config.validate()?;

        let decision = VisibilityGate::new(&config.gating, context).evaluate();
        if !decision.allowed {
            info!(reason = %decision.reason, "Visibility conditions not met, tool will not run");
            return Ok(None);
        }

        let store = PersistentStore::new(
            StoreOptions::from_config(config, context),
            backends.primary,
            backends.fallback,
        );
        if let Err(e) = store.initialize().await {
            warn!(error = %e, "Continuing with fallback storage");
        }

        let restored = store.get().await;
        info!(key = %store.key(), restored = restored.is_some(), "Session started");
        Ok(Some(Session {
            decision,
            store,
            restored,
        }))
    }

    pub fn decision(&self) -> GatingDecision {
        self.decision
    }

    pub fn store(&self) -> &PersistentStore {
        &self.store
    }

    pub fn restored_state(&self) -> Option<&OverlayStateRecord> {
        self.restored.as_ref()
    }

    /// Restored state, or the defaults for a fresh page
    pub fn initial_state(&self) -> OverlayStateRecord {
        self.restored.clone().unwrap_or_default()
    }

    pub async fn shutdown(self) {
        self.store.destroy().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::GatingReason;
    use crate::state::Position;

    fn context() -> ExecutionContext {
        ExecutionContext::new("qa.example.com", "/checkout.html", None)
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_page_has_no_session() {
        let mut config = HawkeyeConfig::default();
        config.gating.domains.insert("example.com", false);
        let session = Session::start(&config, &context(), Backends::in_memory()).await.unwrap();
        assert!(session.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_config_is_surfaced() {
        let mut config = HawkeyeConfig::default();
        config.gating.pms.enabled = true;
        let result = Session::start(&config, &context(), Backends::in_memory()).await;
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_restores_saved_state() {
        let config = HawkeyeConfig::default();
        let backends = Backends::in_memory();

        let first = Session::start(&config, &context(), backends.clone()).await.unwrap().unwrap();
        assert_eq!(first.decision().reason, GatingReason::Allowed);
        assert_eq!(first.initial_state(), OverlayStateRecord::default());

        let saved = OverlayStateRecord {
            position: Position::new(12.0, 34.0),
            ..OverlayStateRecord::default()
        };
        first.store().save(saved).await.unwrap();
        first.shutdown().await;

        let second = Session::start(&config, &context(), backends).await.unwrap().unwrap();
        assert_eq!(second.restored_state().map(|r| r.position), Some(Position::new(12.0, 34.0)));
    }
}
