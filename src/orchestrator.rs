//! Coordinated synchronization of the latest remote batch.
//!
//! One call to [`SyncOrchestrator::sync_if_needed`] performs at most one
//! metadata probe, one download and one atomic import. Retries belong to the
//! caller. At most one sync (or orphan cleanup) runs at a time; callers that
//! arrive while a sync is in flight wait for it and share its outcome.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;

use crate::cache_gate::CacheGate;
use crate::error::{SyncError, SyncResult};
use crate::local_db_model::{ImportResult, RemoteBatchDescriptor};
use crate::resolver::resolve;
use crate::storage::{FreshnessLedger, ProblemStore};
use crate::transport::BatchSource;

/// Last completed remote probe.
pub const CHECK_KEY: &str = "latest-batch-check";
/// Remote token whose import (or skip) last completed.
pub const SETTLED_KEY: &str = "latest-batch-settled";
const NO_REMOTE_TOKEN: &str = "none";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncStatus {
    /// Throttled; no network call was made.
    NoCheckPerformed,
    /// The remote has no published batch.
    RemoteEmpty,
    Completed(ImportResult),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub did_change: bool,
    pub status: SyncStatus,
}

impl SyncOutcome {
    fn unchanged(status: SyncStatus) -> Self {
        Self {
            did_change: false,
            status,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flight {
    Idle,
    Syncing,
    Pruning,
}

struct FlightState {
    current: Flight,
    generation: u64,
    last: Option<SyncResult<SyncOutcome>>,
}

/// Resets the flight state when a run finishes, including by panic.
struct Landing<'a> {
    state: &'a Mutex<FlightState>,
    landed: &'a Condvar,
    outcome: Option<SyncResult<SyncOutcome>>,
    records_outcome: bool,
}

impl Drop for Landing<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.current = Flight::Idle;
        state.generation = state.generation.wrapping_add(1);
        if self.records_outcome {
            state.last = self.outcome.take();
        }
        self.landed.notify_all();
    }
}

pub struct SyncOrchestrator<T, S>
where
    T: BatchSource,
    S: ProblemStore + FreshnessLedger,
{
    transport: Arc<T>,
    store: Arc<S>,
    gate: CacheGate<S>,
    state: Mutex<FlightState>,
    landed: Condvar,
}

impl<T, S> SyncOrchestrator<T, S>
where
    T: BatchSource,
    S: ProblemStore + FreshnessLedger,
{
    pub fn new(transport: Arc<T>, store: Arc<S>, gate: CacheGate<S>) -> Self {
        Self {
            transport,
            store,
            gate,
            state: Mutex::new(FlightState {
                current: Flight::Idle,
                generation: 0,
                last: None,
            }),
            landed: Condvar::new(),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn gate(&self) -> &CacheGate<S> {
        &self.gate
    }

    /// Runs one sync attempt, or joins the one already in flight.
    pub fn sync_if_needed(&self, min_interval: Duration) -> SyncResult<SyncOutcome> {
        let mut state = self.lock_state();
        loop {
            let current = state.current;
            match current {
                Flight::Idle => break,
                Flight::Syncing => {
                    debug!("Sync already in flight, waiting for its outcome");
                    let generation = state.generation;
                    while state.generation == generation {
                        state = self.wait(state);
                    }
                    if let Some(outcome) = state.last.clone() {
                        return outcome;
                    }
                }
                Flight::Pruning => state = self.wait(state),
            }
        }
        state.current = Flight::Syncing;
        drop(state);
        self.fly(min_interval)
    }

    /// Like [`sync_if_needed`](Self::sync_if_needed) but rejects instead of waiting.
    pub fn try_sync_if_needed(&self, min_interval: Duration) -> SyncResult<SyncOutcome> {
        let mut state = self.lock_state();
        if state.current != Flight::Idle {
            return Err(SyncError::SyncInProgress);
        }
        state.current = Flight::Syncing;
        drop(state);
        self.fly(min_interval)
    }

    /// Removes every local batch the remote no longer lists.
    pub fn cleanup_orphaned_batches(&self, valid_ids: &[String]) -> SyncResult<usize> {
        let mut state = self.lock_state();
        while state.current != Flight::Idle {
            state = self.wait(state);
        }
        state.current = Flight::Pruning;
        drop(state);

        let _landing = Landing {
            state: &self.state,
            landed: &self.landed,
            outcome: None,
            records_outcome: false,
        };
        self.store.cleanup_orphaned_batches(valid_ids)
    }

    fn fly(&self, min_interval: Duration) -> SyncResult<SyncOutcome> {
        let mut landing = Landing {
            state: &self.state,
            landed: &self.landed,
            outcome: None,
            records_outcome: true,
        };
        let outcome = self.run_once(min_interval);
        landing.outcome = Some(outcome.clone());
        outcome
    }

    fn run_once(&self, min_interval: Duration) -> SyncResult<SyncOutcome> {
        if !self.check_due(min_interval) {
            debug!("Remote check not due yet");
            return Ok(SyncOutcome::unchanged(SyncStatus::NoCheckPerformed));
        }

        let latest = match self.transport.check_latest() {
            Ok(latest) => latest,
            Err(err @ SyncError::Network(_)) => {
                warn!("Latest batch check failed: {err}");
                return Err(err);
            }
            Err(err) => {
                warn!("Latest batch check returned unusable data: {err}");
                self.gate.record_check(CHECK_KEY, None)?;
                return Err(err);
            }
        };

        let token = latest
            .as_ref()
            .map(RemoteBatchDescriptor::token)
            .unwrap_or_else(|| NO_REMOTE_TOKEN.to_string());
        self.gate.record_check(CHECK_KEY, Some(&token))?;

        let Some(descriptor) = latest else {
            self.settle(&token);
            return Ok(SyncOutcome::unchanged(SyncStatus::RemoteEmpty));
        };

        let local = self.store.get_batch_view(&descriptor.batch_id)?;
        let resolution = resolve(&descriptor, local.as_ref());
        if !resolution.needs_payload() {
            debug!("Batch {} is already current", descriptor.batch_id);
            self.settle(&token);
            return Ok(SyncOutcome::unchanged(SyncStatus::Completed(ImportResult::SkippedExisting)));
        }

        info!(
            "Fetching batch {} ({} problems) for {:?}",
            descriptor.batch_id,
            descriptor.problem_count,
            resolution.result()
        );
        let imported = self
            .transport
            .fetch_batch(&descriptor)
            .and_then(|payload| self.store.import_problem_batch(&descriptor, &payload.problems));
        let result = match imported {
            Ok(result) => result,
            Err(err) if rejects_batch(&err) => {
                // Corrupt remote data waits for the next throttled check.
                warn!("Batch {} rejected: {err}", descriptor.batch_id);
                self.settle(&token);
                return Err(err);
            }
            Err(err) => return Err(err),
        };
        self.settle(&token);

        Ok(SyncOutcome {
            did_change: result.changed(),
            status: SyncStatus::Completed(result),
        })
    }

    /// Due when the throttle elapsed, or when the last probe saw a batch whose
    /// import never completed.
    fn check_due(&self, min_interval: Duration) -> bool {
        if self.gate.should_check_remote(CHECK_KEY, min_interval) {
            return true;
        }
        match self.gate.token(CHECK_KEY) {
            Some(checked) if checked != NO_REMOTE_TOKEN => {
                let pending = self.gate.token(SETTLED_KEY).as_deref() != Some(checked.as_str());
                if pending {
                    debug!("Previous import of {checked} did not complete, checking again");
                }
                pending
            }
            _ => false,
        }
    }

    /// Marks `token` as handled. A failure here only costs one extra check,
    /// which resolves to a skip once the import is committed.
    fn settle(&self, token: &str) {
        if let Err(err) = self.gate.record_check(SETTLED_KEY, Some(token)) {
            warn!("Cannot record settled batch {token}: {err}");
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, FlightState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, FlightState>) -> MutexGuard<'a, FlightState> {
        self.landed.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }
}

/// Errors that condemn the published batch itself rather than this attempt.
fn rejects_batch(err: &SyncError) -> bool {
    matches!(
        err,
        SyncError::MalformedResponse(_) | SyncError::SizeMismatch { .. } | SyncError::InvalidInput(_)
    )
}
