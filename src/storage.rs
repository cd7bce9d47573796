//! Storage capability traits.
//!
//! The core batch/problem surface, the diagnostics surface and the freshness
//! ledger are separate traits so each can be implemented (or faked)
//! independently. [`LocalStore`](crate::local_db_state::LocalStore) implements
//! all three.

use crate::error::SyncResult;
use crate::local_db_model::{
    AccuracyStatistics, BatchStatistics, FreshnessEntry, ImportResult, Problem, ProblemBatch,
    ProblemUpdate, RemoteBatchDescriptor, RemoteProblem,
};
use crate::resolver::LocalBatchView;

/// Mandatory storage surface for batches and problems.
pub trait ProblemStore: Send + Sync {
    fn get_latest_batch(&self) -> SyncResult<Option<ProblemBatch>>;
    fn get_all_batches(&self) -> SyncResult<Vec<ProblemBatch>>;
    fn get_batch_by_id(&self, id: &str) -> SyncResult<Option<ProblemBatch>>;

    /// Resolves and commits one import as a single atomic unit.
    fn import_problem_batch(
        &self,
        descriptor: &RemoteBatchDescriptor,
        problems: &[RemoteProblem],
    ) -> SyncResult<ImportResult>;

    fn delete_problem_batch(&self, id: &str) -> SyncResult<()>;
    fn delete_problem_batches(&self, ids: &[String]) -> SyncResult<usize>;
    /// Removes every batch whose id is not in `valid_ids`, with its problems.
    fn cleanup_orphaned_batches(&self, valid_ids: &[String]) -> SyncResult<usize>;

    /// A batch and its problem ids, read from one snapshot.
    fn get_batch_view(&self, id: &str) -> SyncResult<Option<LocalBatchView>>;

    fn get_problems_by_batch(&self, batch_id: &str) -> SyncResult<Vec<Problem>>;
    fn get_unsolved_problems(&self, batch_id: &str, limit: Option<usize>) -> SyncResult<Vec<Problem>>;
    fn get_problem_by_id(&self, id: &str) -> SyncResult<Option<Problem>>;
    fn update_problem(&self, id: &str, update: &ProblemUpdate) -> SyncResult<()>;
    fn get_next_problem(&self) -> SyncResult<Option<Problem>>;
    fn submit_answer(&self, problem_id: &str, user_answer: &str, is_correct: bool) -> SyncResult<()>;
}

/// Optional diagnostics capability.
pub trait StatisticsStore {
    fn get_batch_statistics(&self) -> SyncResult<BatchStatistics>;
    fn get_accuracy_statistics(&self) -> SyncResult<AccuracyStatistics>;
}

/// Persistence for the advisory freshness ledger.
pub trait FreshnessLedger: Send + Sync {
    fn load_freshness_entries(&self) -> SyncResult<Vec<FreshnessEntry>>;
    fn save_freshness_entry(&self, entry: &FreshnessEntry) -> SyncResult<()>;
}
