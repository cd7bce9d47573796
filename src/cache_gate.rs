//! Throttle for remote checks.
//!
//! Entries are loaded once from the [`FreshnessLedger`] and kept in memory, so
//! [`CacheGate::should_check_remote`] is a pure time comparison. Writes go
//! through to the ledger. Nothing here is consulted for dedup decisions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::debug;

use crate::clock::Clock;
use crate::error::SyncResult;
use crate::local_db_model::FreshnessEntry;
use crate::storage::FreshnessLedger;

pub struct CacheGate<L: FreshnessLedger> {
    ledger: Arc<L>,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, FreshnessEntry>>,
}

impl<L: FreshnessLedger> CacheGate<L> {
    pub fn new(ledger: Arc<L>, clock: Arc<dyn Clock>) -> SyncResult<Self> {
        let entries = ledger
            .load_freshness_entries()?
            .into_iter()
            .map(|entry| (entry.key.clone(), entry))
            .collect();
        Ok(Self {
            ledger,
            clock,
            entries: Mutex::new(entries),
        })
    }

    /// `false` only when `key` was checked less than `min_interval` ago.
    pub fn should_check_remote(&self, key: &str, min_interval: Duration) -> bool {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = entries.get(key) else {
            return true;
        };
        let elapsed = self.clock.now().signed_duration_since(entry.last_checked_at);
        match elapsed.to_std() {
            Ok(elapsed) => elapsed >= min_interval,
            // The clock went backwards; do not let that suppress checks.
            Err(_) => true,
        }
    }

    /// Stamps `key` with the current time and the observed remote token.
    pub fn record_check(&self, key: &str, remote_token: Option<&str>) -> SyncResult<()> {
        let entry = FreshnessEntry {
            key: key.to_string(),
            last_checked_at: self.clock.now(),
            last_token: remote_token.map(str::to_string),
        };
        self.ledger.save_freshness_entry(&entry)?;
        debug!("Recorded freshness for {key}: {:?}", entry.last_token);
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), entry);
        Ok(())
    }

    pub fn entry(&self, key: &str) -> Option<FreshnessEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn token(&self, key: &str) -> Option<String> {
        self.entry(key).and_then(|entry| entry.last_token)
    }
}
