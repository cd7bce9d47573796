//! Dedup policy for incoming batches.
//!
//! [`resolve`] is the only place that decides whether an incoming batch is
//! new, a duplicate or a replacement. It performs no I/O; callers hand it the
//! local view of the batch identity and act on the returned variant.

use chrono::{DateTime, Utc};

use crate::local_db_model::{ImportResult, Problem, ProblemBatch, RemoteBatchDescriptor, RemoteProblem};

/// What the store currently knows about one batch identity.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalBatchView {
    pub batch: ProblemBatch,
    /// Ids of every problem currently owned by `batch`.
    pub problem_ids: Vec<String>,
}

/// Decision for an incoming descriptor, before its payload is downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    SkipExisting,
    ImportNew,
    /// Same identity with a newer generation; `to_delete` lists the superseded rows.
    ReplaceExisting { to_delete: Vec<String> },
}

/// A write ready to be committed: the decision plus its write set.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportPlan {
    New {
        batch: ProblemBatch,
        to_write: Vec<Problem>,
    },
    Replace {
        batch: ProblemBatch,
        to_delete: Vec<String>,
        to_write: Vec<Problem>,
    },
}

/// Classifies `incoming` against the local batch with the same identity.
///
/// Equal generation dates resolve to [`Resolution::SkipExisting`] even when
/// the declared sizes differ: a batch is never overwritten unless its
/// generation marker has advanced.
pub fn resolve(incoming: &RemoteBatchDescriptor, local: Option<&LocalBatchView>) -> Resolution {
    match local {
        None => Resolution::ImportNew,
        Some(view) if incoming.generation_date <= view.batch.generation_date => {
            Resolution::SkipExisting
        }
        Some(view) => Resolution::ReplaceExisting {
            to_delete: view.problem_ids.clone(),
        },
    }
}

impl Resolution {
    pub fn result(&self) -> ImportResult {
        match self {
            Resolution::SkipExisting => ImportResult::SkippedExisting,
            Resolution::ImportNew => ImportResult::ImportedNew,
            Resolution::ReplaceExisting { .. } => ImportResult::ReplacedExisting,
        }
    }

    pub fn needs_payload(&self) -> bool {
        !matches!(self, Resolution::SkipExisting)
    }

    /// Attaches the downloaded problems, producing the write set.
    ///
    /// Returns `None` for [`Resolution::SkipExisting`], which writes nothing.
    pub fn into_plan(
        self,
        incoming: &RemoteBatchDescriptor,
        problems: &[RemoteProblem],
        imported_at: DateTime<Utc>,
    ) -> Option<ImportPlan> {
        let batch = ProblemBatch {
            id: incoming.batch_id.clone(),
            generation_date: incoming.generation_date,
            problem_count: problems.len(),
            imported_at,
        };
        let to_write = problems
            .iter()
            .enumerate()
            .map(|(ordinal, remote)| Problem::from_remote(&incoming.batch_id, ordinal, remote))
            .collect();

        match self {
            Resolution::SkipExisting => None,
            Resolution::ImportNew => Some(ImportPlan::New { batch, to_write }),
            Resolution::ReplaceExisting { to_delete } => Some(ImportPlan::Replace {
                batch,
                to_delete,
                to_write,
            }),
        }
    }
}

impl ImportPlan {
    pub fn result(&self) -> ImportResult {
        match self {
            ImportPlan::New { .. } => ImportResult::ImportedNew,
            ImportPlan::Replace { .. } => ImportResult::ReplacedExisting,
        }
    }

    pub fn batch(&self) -> &ProblemBatch {
        match self {
            ImportPlan::New { batch, .. } | ImportPlan::Replace { batch, .. } => batch,
        }
    }

    pub fn to_delete(&self) -> &[String] {
        match self {
            ImportPlan::New { .. } => &[],
            ImportPlan::Replace { to_delete, .. } => to_delete,
        }
    }

    pub fn to_write(&self) -> &[Problem] {
        match self {
            ImportPlan::New { to_write, .. } | ImportPlan::Replace { to_write, .. } => to_write,
        }
    }
}
