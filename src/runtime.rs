//! Composition root: the single place where process-wide state is wired.

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use crate::cache_gate::CacheGate;
use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::local_db_state::LocalStore;
use crate::orchestrator::{SyncOrchestrator, SyncOutcome};
use crate::transport::HttpTransport;

pub struct SyncRuntime {
    config: SyncConfig,
    orchestrator: SyncOrchestrator<HttpTransport, LocalStore>,
}

impl SyncRuntime {
    pub fn start(config: SyncConfig) -> SyncResult<Self> {
        Self::start_with_clock(config, Arc::new(SystemClock))
    }

    pub fn start_with_clock(config: SyncConfig, clock: Arc<dyn Clock>) -> SyncResult<Self> {
        let store = Arc::new(LocalStore::open(&config.db_path, config.map_size)?);
        if !store.init() {
            return Err(SyncError::Storage(format!("Store at {} is not usable", store.path())));
        }
        let transport = Arc::new(HttpTransport::new(&config.remote_url, config.request_timeout)?);
        let gate = CacheGate::new(Arc::clone(&store), clock)?;

        info!("Sync runtime started for {}", config.remote_url);
        Ok(Self {
            config,
            orchestrator: SyncOrchestrator::new(transport, store, gate),
        })
    }

    /// Read path for the rest of the application.
    pub fn store(&self) -> &LocalStore {
        self.orchestrator.store().as_ref()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Syncs using the configured throttle interval.
    pub fn sync(&self) -> SyncResult<SyncOutcome> {
        self.orchestrator.sync_if_needed(self.config.min_check_interval)
    }

    pub fn sync_if_needed(&self, min_interval: Duration) -> SyncResult<SyncOutcome> {
        self.orchestrator.sync_if_needed(min_interval)
    }

    pub fn cleanup_orphaned_batches(&self, valid_ids: &[String]) -> SyncResult<usize> {
        self.orchestrator.cleanup_orphaned_batches(valid_ids)
    }

    pub fn shutdown(self) -> SyncResult<()> {
        let result = self.store().close();
        if let Err(e) = &result {
            warn!("Store did not close cleanly: {e}");
        }
        result
    }
}
