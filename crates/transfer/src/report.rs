//! Final report of a transfer run.

use serde::Serialize;

use crate::{CollectionPath, Decision, FailedWrite, JobRunId, RecordKey, SkippedRow, Timestamp};

/// Counts and details of one run.
///
/// `written + failed == planned` when the decision was [`Decision::Apply`];
/// `written == 0` for a dry run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferReport {
    /// Identifier of the run.
    pub run_id: JobRunId,
    /// Source label.
    pub source: String,
    /// Target label.
    pub target: String,
    /// Target collection.
    pub collection: CollectionPath,
    /// Whether writes were applied.
    pub decision: Decision,
    /// Key column used, if any.
    pub key_column: Option<String>,
    /// Rows read from the source, including rejected ones.
    pub rows_read: usize,
    /// Records that would be / were written.
    pub planned: usize,
    /// Records written successfully.
    pub written: usize,
    /// Rows excluded before writing.
    pub skipped: usize,
    /// Records whose write failed.
    pub failed: usize,
    /// Keys of the planned writes. Only populated for dry runs.
    pub planned_keys: Vec<RecordKey>,
    /// Documents already in the collection before any write, when counted.
    pub existing_count: Option<u64>,
    /// Details of every skipped row.
    pub skipped_rows: Vec<SkippedRow>,
    /// Details of every failed write.
    pub failed_writes: Vec<FailedWrite>,
    /// Document count of the collection after writing, when verification ran.
    pub verified_count: Option<u64>,
    /// When the run started.
    pub started_at: Timestamp,
    /// When the run finished.
    pub finished_at: Timestamp,
}

impl TransferReport {
    /// Returns `true` for a dry run.
    pub fn is_dry_run(&self) -> bool {
        self.decision == Decision::DryRun
    }

    /// Returns `true` if every planned write succeeded (trivially true for dry runs).
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }

    /// Document paths of the first `limit` planned keys, and how many more
    /// were left out.
    pub fn planned_paths(&self, limit: usize) -> (Vec<String>, usize) {
        let shown = self
            .planned_keys
            .iter()
            .take(limit)
            .map(|k| self.collection.document_path(k))
            .collect();
        (shown, self.planned_keys.len().saturating_sub(limit))
    }

    /// One-line human summary.
    pub fn summary(&self) -> String {
        if self.is_dry_run() {
            let existing = match self.existing_count {
                Some(n) => format!(" ({n} already there)"),
                None => String::new(),
            };
            format!(
                "dry run: {} read, {} would be written to /{}{}, {} skipped",
                self.rows_read, self.planned, self.collection, existing, self.skipped
            )
        } else {
            format!(
                "{} read, {} written to /{}, {} skipped, {} failed",
                self.rows_read, self.written, self.collection, self.skipped, self.failed
            )
        }
    }
}
