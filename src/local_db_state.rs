//! LMDB-backed local store for batches, problems and the freshness ledger.
//!
//! Every mutation runs inside a single `RwTransaction`; returning early with
//! an error drops the transaction, which aborts it. Readers therefore only
//! ever observe fully committed imports.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use chrono::Utc;
use lmdb::{Cursor, Database, DatabaseFlags, Environment, RwTransaction, Transaction, WriteFlags};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{SyncError, SyncResult};
use crate::local_db_model::{
    AccuracyStatistics, BatchStatistics, FreshnessEntry, ImportResult, Problem, ProblemBatch,
    ProblemUpdate, RemoteBatchDescriptor, RemoteProblem,
};
use crate::resolver::{resolve, ImportPlan, LocalBatchView};
use crate::storage::{FreshnessLedger, ProblemStore, StatisticsStore};

const BATCHES_DB: &str = "batches";
const PROBLEMS_DB: &str = "problems";
const BATCH_INDEX_DB: &str = "batch_index";
const FRESHNESS_DB: &str = "freshness";

const INDEX_SEPARATOR: char = '\u{1f}';

pub struct LocalStore {
    env: Environment,
    batches: Database,
    problems: Database,
    batch_index: Database,
    freshness: Database,
    path: String,
}

impl LocalStore {
    /// Opens (or creates) the environment at `<name>.lmdb`.
    pub fn open(name: &str, map_size: usize) -> SyncResult<Self> {
        let path = format!("{name}.lmdb");
        fs::create_dir_all(&path)
            .map_err(|e| SyncError::Storage(format!("Cannot create {path}: {e}")))?;

        let env = Environment::new()
            .set_max_dbs(4)
            .set_map_size(map_size)
            .open(Path::new(&path))?;

        let batches = env.create_db(Some(BATCHES_DB), DatabaseFlags::empty())?;
        let problems = env.create_db(Some(PROBLEMS_DB), DatabaseFlags::empty())?;
        let batch_index = env.create_db(Some(BATCH_INDEX_DB), DatabaseFlags::empty())?;
        let freshness = env.create_db(Some(FRESHNESS_DB), DatabaseFlags::empty())?;

        info!("Opened problem store at {path}");
        Ok(Self {
            env,
            batches,
            problems,
            batch_index,
            freshness,
            path,
        })
    }

    /// Returns `true` when the environment accepts transactions.
    pub fn init(&self) -> bool {
        match self.env.begin_ro_txn() {
            Ok(_) => true,
            Err(e) => {
                warn!("Problem store at {} is not usable: {e}", self.path);
                false
            }
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Flushes all committed data to disk.
    pub fn close(&self) -> SyncResult<()> {
        self.env.sync(true)?;
        info!("Problem store at {} synced and closed", self.path);
        Ok(())
    }

    fn local_view<T: Transaction>(&self, txn: &T, batch_id: &str) -> SyncResult<Option<LocalBatchView>> {
        let batch: Option<ProblemBatch> = read_json(txn, self.batches, batch_id)?;
        match batch {
            None => Ok(None),
            Some(batch) => {
                let problem_ids = self
                    .index_entries(txn, batch_id)?
                    .into_iter()
                    .map(|(_, problem_id)| problem_id)
                    .collect();
                Ok(Some(LocalBatchView { batch, problem_ids }))
            }
        }
    }

    /// `(index key, problem id)` pairs for a batch, in ordinal order.
    fn index_entries<T: Transaction>(&self, txn: &T, batch_id: &str) -> SyncResult<Vec<(Vec<u8>, String)>> {
        let prefix = index_prefix(batch_id);
        let mut cursor = txn.open_ro_cursor(self.batch_index)?;
        let mut entries = Vec::new();
        // `iter_from` panics when no key sorts at or after the prefix.
        let from_prefix = cursor.iter().skip_while(|&(key, _)| key < prefix.as_bytes());
        for (key, value) in from_prefix {
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            let problem_id = String::from_utf8(value.to_vec())
                .map_err(|e| SyncError::Storage(format!("Invalid problem id in index: {e}")))?;
            entries.push((key.to_vec(), problem_id));
        }
        Ok(entries)
    }

    fn problems_for_batch<T: Transaction>(&self, txn: &T, batch_id: &str) -> SyncResult<Vec<Problem>> {
        let mut problems = Vec::new();
        for (_, problem_id) in self.index_entries(txn, batch_id)? {
            match read_json::<_, Problem>(txn, self.problems, &problem_id)? {
                Some(problem) => problems.push(problem),
                None => warn!("Index for batch {batch_id} points at missing problem {problem_id}"),
            }
        }
        Ok(problems)
    }

    fn batches_newest_first<T: Transaction>(&self, txn: &T) -> SyncResult<Vec<ProblemBatch>> {
        let mut batches: Vec<ProblemBatch> = scan_json(txn, self.batches)?;
        batches.sort_by(|a, b| {
            b.generation_date
                .cmp(&a.generation_date)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(batches)
    }

    /// Deletes a batch row, its problems and its index entries.
    ///
    /// Returns whether the batch row existed.
    fn remove_batch(&self, txn: &mut RwTransaction, batch_id: &str) -> SyncResult<bool> {
        let entries = self.index_entries(&*txn, batch_id)?;
        for (index_key, problem_id) in &entries {
            del_if_present(txn, self.problems, problem_id.as_bytes())?;
            del_if_present(txn, self.batch_index, index_key)?;
        }
        let existed = del_if_present(txn, self.batches, batch_id.as_bytes())?;
        debug!("Removed batch {batch_id} ({} problems)", entries.len());
        Ok(existed)
    }

    fn apply_plan(&self, txn: &mut RwTransaction, plan: &ImportPlan) -> SyncResult<()> {
        let batch = plan.batch();

        if !plan.to_delete().is_empty() {
            for (index_key, problem_id) in self.index_entries(&*txn, &batch.id)? {
                if plan.to_delete().contains(&problem_id) {
                    del_if_present(txn, self.problems, problem_id.as_bytes())?;
                }
                del_if_present(txn, self.batch_index, &index_key)?;
            }
        }

        let mut seen = HashSet::with_capacity(plan.to_write().len());
        for problem in plan.to_write() {
            validate_id(&problem.id, "problem")?;
            if !seen.insert(problem.id.as_str()) {
                return Err(SyncError::InvalidInput(format!(
                    "Problem {} appears twice in batch {}",
                    problem.id, batch.id
                )));
            }
            if let Some(existing) = read_json::<_, Problem>(&*txn, self.problems, &problem.id)? {
                if existing.batch_id != batch.id {
                    return Err(SyncError::Storage(format!(
                        "Problem {} already belongs to batch {}",
                        problem.id, existing.batch_id
                    )));
                }
            }
            write_json(txn, self.problems, &problem.id, problem)?;
            txn.put(
                self.batch_index,
                &index_key(&batch.id, problem.ordinal),
                &problem.id,
                WriteFlags::empty(),
            )?;
        }

        write_json(txn, self.batches, &batch.id, batch)
    }

    fn modify_problem<F>(&self, id: &str, apply: F) -> SyncResult<()>
    where
        F: FnOnce(&mut Problem),
    {
        let mut txn = self.env.begin_rw_txn()?;
        let mut problem: Problem = read_json(&txn, self.problems, id)?
            .ok_or_else(|| SyncError::NotFound(format!("No problem found with id: {id}")))?;
        apply(&mut problem);
        write_json(&mut txn, self.problems, id, &problem)?;
        txn.commit()?;
        Ok(())
    }
}

impl ProblemStore for LocalStore {
    fn get_latest_batch(&self) -> SyncResult<Option<ProblemBatch>> {
        let txn = self.env.begin_ro_txn()?;
        Ok(self.batches_newest_first(&txn)?.into_iter().next())
    }

    fn get_all_batches(&self) -> SyncResult<Vec<ProblemBatch>> {
        let txn = self.env.begin_ro_txn()?;
        self.batches_newest_first(&txn)
    }

    fn get_batch_by_id(&self, id: &str) -> SyncResult<Option<ProblemBatch>> {
        let txn = self.env.begin_ro_txn()?;
        read_json(&txn, self.batches, id)
    }

    fn import_problem_batch(
        &self,
        descriptor: &RemoteBatchDescriptor,
        problems: &[RemoteProblem],
    ) -> SyncResult<ImportResult> {
        validate_id(&descriptor.batch_id, "batch")?;
        if descriptor.problem_count != problems.len() {
            return Err(SyncError::SizeMismatch {
                declared: descriptor.problem_count,
                actual: problems.len(),
            });
        }

        let mut txn = self.env.begin_rw_txn()?;
        let local = self.local_view(&txn, &descriptor.batch_id)?;
        let resolution = resolve(descriptor, local.as_ref());

        let plan = match resolution.into_plan(descriptor, problems, Utc::now()) {
            Some(plan) => plan,
            None => {
                info!("Batch {} already stored, skipping import", descriptor.batch_id);
                return Ok(ImportResult::SkippedExisting);
            }
        };

        self.apply_plan(&mut txn, &plan)?;
        txn.commit()?;

        info!(
            "Batch {} committed as {:?}: {} removed, {} written",
            descriptor.batch_id,
            plan.result(),
            plan.to_delete().len(),
            plan.to_write().len()
        );
        Ok(plan.result())
    }

    fn delete_problem_batch(&self, id: &str) -> SyncResult<()> {
        let mut txn = self.env.begin_rw_txn()?;
        self.remove_batch(&mut txn, id)?;
        txn.commit()?;
        Ok(())
    }

    fn delete_problem_batches(&self, ids: &[String]) -> SyncResult<usize> {
        let mut txn = self.env.begin_rw_txn()?;
        let mut removed = 0;
        for id in ids {
            if self.remove_batch(&mut txn, id)? {
                removed += 1;
            }
        }
        txn.commit()?;
        Ok(removed)
    }

    fn cleanup_orphaned_batches(&self, valid_ids: &[String]) -> SyncResult<usize> {
        let valid: HashSet<&str> = valid_ids.iter().map(String::as_str).collect();
        let mut txn = self.env.begin_rw_txn()?;
        let orphans: Vec<String> = scan_json::<_, ProblemBatch>(&txn, self.batches)?
            .into_iter()
            .filter(|batch| !valid.contains(batch.id.as_str()))
            .map(|batch| batch.id)
            .collect();

        for id in &orphans {
            self.remove_batch(&mut txn, id)?;
        }
        txn.commit()?;

        if !orphans.is_empty() {
            info!("Removed {} orphaned batches: {:?}", orphans.len(), orphans);
        }
        Ok(orphans.len())
    }

    fn get_batch_view(&self, id: &str) -> SyncResult<Option<LocalBatchView>> {
        let txn = self.env.begin_ro_txn()?;
        self.local_view(&txn, id)
    }

    fn get_problems_by_batch(&self, batch_id: &str) -> SyncResult<Vec<Problem>> {
        let txn = self.env.begin_ro_txn()?;
        self.problems_for_batch(&txn, batch_id)
    }

    fn get_unsolved_problems(&self, batch_id: &str, limit: Option<usize>) -> SyncResult<Vec<Problem>> {
        let txn = self.env.begin_ro_txn()?;
        let unsolved = self
            .problems_for_batch(&txn, batch_id)?
            .into_iter()
            .filter(|problem| !problem.solved)
            .take(limit.unwrap_or(usize::MAX))
            .collect();
        Ok(unsolved)
    }

    fn get_problem_by_id(&self, id: &str) -> SyncResult<Option<Problem>> {
        let txn = self.env.begin_ro_txn()?;
        read_json(&txn, self.problems, id)
    }

    fn update_problem(&self, id: &str, update: &ProblemUpdate) -> SyncResult<()> {
        let now = Utc::now();
        self.modify_problem(id, |problem| {
            if let Some(solved) = update.solved {
                if solved && !problem.solved {
                    problem.solved_at = Some(now);
                } else if !solved {
                    problem.solved_at = None;
                }
                problem.solved = solved;
            }
            if let Some(attempts) = update.attempts {
                problem.attempts = attempts;
            }
            if let Some(correct) = update.correct_attempts {
                problem.correct_attempts = correct;
            }
            if let Some(answer) = &update.last_answer {
                problem.last_answer = Some(answer.clone());
            }
        })
    }

    fn get_next_problem(&self) -> SyncResult<Option<Problem>> {
        let txn = self.env.begin_ro_txn()?;
        for batch in self.batches_newest_first(&txn)? {
            let next = self
                .problems_for_batch(&txn, &batch.id)?
                .into_iter()
                .find(|problem| !problem.solved);
            if next.is_some() {
                return Ok(next);
            }
        }
        Ok(None)
    }

    fn submit_answer(&self, problem_id: &str, user_answer: &str, is_correct: bool) -> SyncResult<()> {
        let now = Utc::now();
        self.modify_problem(problem_id, |problem| {
            problem.attempts = problem.attempts.saturating_add(1);
            problem.last_answer = Some(user_answer.to_string());
            problem.last_attempted_at = Some(now);
            if is_correct {
                problem.correct_attempts = problem.correct_attempts.saturating_add(1);
                if !problem.solved {
                    problem.solved = true;
                    problem.solved_at = Some(now);
                }
            }
        })
    }
}

impl StatisticsStore for LocalStore {
    fn get_batch_statistics(&self) -> SyncResult<BatchStatistics> {
        let txn = self.env.begin_ro_txn()?;
        let batches: Vec<ProblemBatch> = scan_json(&txn, self.batches)?;
        let problems: Vec<Problem> = scan_json(&txn, self.problems)?;

        Ok(BatchStatistics {
            total_batches: batches.len(),
            total_problems: problems.len(),
            completed_problems: problems.iter().filter(|p| p.solved).count(),
            oldest_batch: batches.iter().map(|b| b.generation_date).min(),
            newest_batch: batches.iter().map(|b| b.generation_date).max(),
        })
    }

    fn get_accuracy_statistics(&self) -> SyncResult<AccuracyStatistics> {
        let txn = self.env.begin_ro_txn()?;
        let problems: Vec<Problem> = scan_json(&txn, self.problems)?;
        let total_attempts: u64 = problems.iter().map(|p| u64::from(p.attempts)).sum();
        let correct_attempts: u64 = problems.iter().map(|p| u64::from(p.correct_attempts)).sum();
        let accuracy = if total_attempts == 0 {
            0.0
        } else {
            correct_attempts as f64 / total_attempts as f64
        };
        Ok(AccuracyStatistics {
            total_attempts,
            correct_attempts,
            accuracy,
        })
    }
}

impl FreshnessLedger for LocalStore {
    fn load_freshness_entries(&self) -> SyncResult<Vec<FreshnessEntry>> {
        let txn = self.env.begin_ro_txn()?;
        scan_json(&txn, self.freshness)
    }

    fn save_freshness_entry(&self, entry: &FreshnessEntry) -> SyncResult<()> {
        let mut txn = self.env.begin_rw_txn()?;
        write_json(&mut txn, self.freshness, &entry.key, entry)?;
        txn.commit()?;
        Ok(())
    }
}

fn validate_id(id: &str, kind: &str) -> SyncResult<()> {
    if id.is_empty() {
        return Err(SyncError::InvalidInput(format!("Empty {kind} id")));
    }
    if id.contains(INDEX_SEPARATOR) {
        return Err(SyncError::InvalidInput(format!("{kind} id {id:?} contains a reserved character")));
    }
    Ok(())
}

fn index_prefix(batch_id: &str) -> String {
    format!("{batch_id}{INDEX_SEPARATOR}")
}

fn index_key(batch_id: &str, ordinal: usize) -> String {
    format!("{batch_id}{INDEX_SEPARATOR}{ordinal:010}")
}

fn read_json<T: Transaction, V: DeserializeOwned>(txn: &T, db: Database, key: &str) -> SyncResult<Option<V>> {
    match txn.get(db, &key) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(bytes)?)),
        Err(lmdb::Error::NotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_json<V: Serialize>(txn: &mut RwTransaction, db: Database, key: &str, value: &V) -> SyncResult<()> {
    let bytes = serde_json::to_vec(value)?;
    txn.put(db, &key, &bytes, WriteFlags::empty())?;
    Ok(())
}

fn scan_json<T: Transaction, V: DeserializeOwned>(txn: &T, db: Database) -> SyncResult<Vec<V>> {
    let mut cursor = txn.open_ro_cursor(db)?;
    let mut values = Vec::new();
    for (_, bytes) in cursor.iter() {
        values.push(serde_json::from_slice(bytes)?);
    }
    Ok(values)
}

fn del_if_present(txn: &mut RwTransaction, db: Database, key: &[u8]) -> SyncResult<bool> {
    match txn.del(db, &key, None) {
        Ok(()) => Ok(true),
        Err(lmdb::Error::NotFound) => Ok(false),
        Err(e) => Err(e.into()),
    }
}
