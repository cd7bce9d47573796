//! Data model definitions for batch and problem storage.
//!
//! Records persisted by [`LocalStore`](crate::local_db_state::LocalStore) are
//! stored as JSON values inside LMDB. Wire types coming from the remote batch
//! source ([`RemoteBatchDescriptor`], [`RemoteProblem`]) use camelCase field
//! names, matching the publishing endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// A versioned collection of problems published together.
///
/// Once imported, `problem_count` equals the number of [`Problem`] records
/// whose `batch_id` references this batch.
///
/// ```rust
/// use problem_sync_core::local_db_model::ProblemBatch;
/// use chrono::{TimeZone, Utc};
///
/// let batch = ProblemBatch {
///     id: "b1".to_string(),
///     generation_date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
///     problem_count: 10,
///     imported_at: Utc::now(),
/// };
/// assert_eq!(batch.problem_count, 10);
/// ```
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ProblemBatch {
    /// Stable identity, unique across every batch an installation has seen.
    pub id: String,
    /// Remote-assigned logical timestamp. Replacement only happens when it advances.
    pub generation_date: DateTime<Utc>,
    /// Declared size of the batch.
    pub problem_count: usize,
    /// Local wall-clock time of the successful import.
    pub imported_at: DateTime<Utc>,
}

/// A single practice problem owned by exactly one batch.
///
/// The `payload` is opaque to the sync core; only the progress fields are
/// mutable after import.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Problem {
    pub id: String,
    pub batch_id: String,
    /// Position inside the owning batch, as published.
    pub ordinal: usize,
    pub payload: JsonValue,
    #[serde(default)]
    pub solved: bool,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub correct_attempts: u32,
    #[serde(default)]
    pub last_answer: Option<String>,
    #[serde(default)]
    pub last_attempted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub solved_at: Option<DateTime<Utc>>,
}

impl Problem {
    /// Builds a fresh, unattempted row from a remote record.
    pub fn from_remote(batch_id: &str, ordinal: usize, remote: &RemoteProblem) -> Self {
        Self {
            id: remote.id.clone(),
            batch_id: batch_id.to_string(),
            ordinal,
            payload: JsonValue::Object(remote.payload.clone()),
            solved: false,
            attempts: 0,
            correct_attempts: 0,
            last_answer: None,
            last_attempted_at: None,
            solved_at: None,
        }
    }
}

/// Partial update of a problem's progress state. `None` fields are left as is.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
pub struct ProblemUpdate {
    pub solved: Option<bool>,
    pub attempts: Option<u32>,
    pub correct_attempts: Option<u32>,
    pub last_answer: Option<String>,
}

/// Metadata returned by the remote "latest batch" probe.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteBatchDescriptor {
    pub batch_id: String,
    pub generation_date: DateTime<Utc>,
    pub problem_count: usize,
    /// Where the full problem array can be downloaded. May be relative.
    pub location: String,
}

impl RemoteBatchDescriptor {
    /// Identity/version token recorded in the freshness ledger.
    pub fn token(&self) -> String {
        format!("{}@{}", self.batch_id, self.generation_date.to_rfc3339())
    }
}

/// A problem record as published remotely: an `id` plus opaque fields.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RemoteProblem {
    pub id: String,
    #[serde(flatten)]
    pub payload: Map<String, JsonValue>,
}

/// A complete, size-validated batch body.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBatchPayload {
    pub problems: Vec<RemoteProblem>,
}

/// Outcome of one import attempt for a given batch identity.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportResult {
    SkippedExisting,
    ReplacedExisting,
    ImportedNew,
}

impl ImportResult {
    /// Whether stored rows were written.
    pub fn changed(&self) -> bool {
        !matches!(self, ImportResult::SkippedExisting)
    }
}

/// Aggregate counts for diagnostics. Never consulted for dedup decisions.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatistics {
    pub total_batches: usize,
    pub total_problems: usize,
    pub completed_problems: usize,
    pub oldest_batch: Option<DateTime<Utc>>,
    pub newest_batch: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccuracyStatistics {
    pub total_attempts: u64,
    pub correct_attempts: u64,
    /// `correct_attempts / total_attempts`, or `0.0` with no attempts.
    pub accuracy: f64,
}

/// Advisory record of the last remote check for a logical resource.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct FreshnessEntry {
    pub key: String,
    pub last_checked_at: DateTime<Utc>,
    pub last_token: Option<String>,
}
