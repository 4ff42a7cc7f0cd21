//! The transfer executor.

use std::time::Duration;

use tracing::Instrument;
use transfer::{
    CollectionPath, ConfirmationGate, Decision, DocumentSink, FailedWrite, JobRunId, MappedBatch,
    Record, RecordMapper, RetryPolicy, RowSource, Timestamp, TransferError, TransferReport,
};

/// Tunables of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOptions {
    /// Attempts per record before the write is recorded as failed. At least 1.
    pub max_write_attempts: u32,
    /// Base back-off between attempts, multiplied by the attempt number.
    /// Ignored when the sink supplies a `Retry-After` delay.
    pub retry_backoff: Duration,
    /// Upper bound on any single retry delay, including `Retry-After`.
    pub max_retry_delay: Duration,
    /// Count the collection after writing.
    pub verify: bool,
    /// Records shown in the dry-run preview.
    pub preview_records: usize,
    /// Fields shown per previewed record.
    pub preview_fields: usize,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            max_write_attempts: 3,
            retry_backoff: Duration::from_millis(500),
            max_retry_delay: Duration::from_secs(30),
            verify: true,
            preview_records: 3,
            preview_fields: 5,
        }
    }
}

/// Moves every row of a source into one target collection.
///
/// Runs strictly sequentially: one request in flight at a time.
#[derive(Debug, Clone)]
pub struct TransferJob {
    mapper: RecordMapper,
    collection: CollectionPath,
    options: JobOptions,
}

impl TransferJob {
    /// Creates a job writing to `collection`.
    pub fn new(mapper: RecordMapper, collection: CollectionPath, options: JobOptions) -> Self {
        Self {
            mapper,
            collection,
            options,
        }
    }

    /// Runs the job.
    ///
    /// Fatal errors (target preparation, source fetch) abort before any write.
    /// Per-row and per-record problems are counted in the report instead. The
    /// source is closed on every path.
    pub async fn run(
        &self,
        source: &mut dyn RowSource,
        sink: &dyn DocumentSink,
        gate: &dyn ConfirmationGate,
    ) -> Result<TransferReport, TransferError> {
        let run_id = JobRunId::new_random();
        let span = tracing::info_span!(
            "transfer",
            %run_id,
            source = %source.label(),
            target = %sink.label(),
            collection = %self.collection,
        );

        let outcome = self
            .execute(run_id, &mut *source, sink, gate)
            .instrument(span.clone())
            .await;
        source.close().instrument(span).await;

        if let Err(e) = &outcome {
            tracing::error!(%run_id, error = %e, "transfer aborted");
        }
        outcome
    }

    async fn execute(
        &self,
        run_id: JobRunId,
        source: &mut dyn RowSource,
        sink: &dyn DocumentSink,
        gate: &dyn ConfirmationGate,
    ) -> Result<TransferReport, TransferError> {
        let started_at = Timestamp::now();

        sink.prepare(&self.collection)
            .await
            .map_err(TransferError::Target)?;
        tracing::info!("target ready");

        let batch = source.fetch().await?;
        tracing::info!(
            rows = batch.rows.len(),
            rejected = batch.rejected.len(),
            columns = batch.columns.len(),
            "source rows fetched"
        );

        let plan = self.mapper.map_batch(batch);
        tracing::info!(
            records = plan.records.len(),
            skipped = plan.skipped.len(),
            key_column = plan.key_column.as_deref().unwrap_or("<none>"),
            "rows mapped"
        );

        let mut existing_count = None;
        let decision = if plan.records.is_empty() {
            tracing::warn!("no records to write");
            Decision::Apply
        } else {
            existing_count = self.count_existing(sink).await;
            gate.confirm(&self.collection, &plan, existing_count).await
        };

        let mut written = 0;
        let mut failed_writes = Vec::new();
        let mut planned_keys = Vec::new();
        let mut verified_count = None;

        match decision {
            Decision::DryRun => {
                self.log_preview(&plan);
                planned_keys = plan.records.iter().map(|r| r.key.clone()).collect();
            }
            Decision::Apply => {
                for record in &plan.records {
                    match self.write_with_retry(sink, record).await {
                        Ok(()) => written += 1,
                        Err(failure) => failed_writes.push(failure),
                    }
                }
                tracing::info!(written, failed = failed_writes.len(), "writes finished");

                if self.options.verify && !plan.records.is_empty() {
                    match sink.count(&self.collection).await {
                        Ok(n) => {
                            tracing::info!(documents = n, "collection verified");
                            verified_count = Some(n);
                        }
                        Err(e) => tracing::warn!(error = %e, "collection count failed"),
                    }
                }
            }
        }

        let report = TransferReport {
            run_id,
            source: source.label(),
            target: sink.label(),
            collection: self.collection.clone(),
            decision,
            key_column: plan.key_column.clone(),
            rows_read: plan.rows_read,
            planned: plan.records.len(),
            written,
            skipped: plan.skipped.len(),
            failed: failed_writes.len(),
            planned_keys,
            existing_count,
            skipped_rows: plan.skipped,
            failed_writes,
            verified_count,
            started_at,
            finished_at: Timestamp::now(),
        };
        tracing::info!(summary = %report.summary(), "transfer finished");
        Ok(report)
    }

    async fn write_with_retry(
        &self,
        sink: &dyn DocumentSink,
        record: &Record,
    ) -> Result<(), FailedWrite> {
        let max_attempts = self.options.max_write_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match sink.upsert(&self.collection, record).await {
                Ok(()) => {
                    tracing::debug!(key = %record.key, attempt, "record written");
                    return Ok(());
                }
                Err(err) => err,
            };

            match err.retry_policy() {
                RetryPolicy::Retryable { after } if attempt < max_attempts => {
                    let delay = self.retry_delay(after, attempt);
                    tracing::warn!(
                        key = %record.key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "write failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                _ => {
                    tracing::error!(key = %record.key, attempt, error = %err, "write failed");
                    return Err(FailedWrite {
                        key: record.key.clone(),
                        attempts: attempt,
                        message: err.to_string(),
                    });
                }
            }
        }
    }

    fn retry_delay(&self, after: Option<Duration>, attempt: u32) -> Duration {
        after
            .unwrap_or(self.options.retry_backoff * attempt)
            .min(self.options.max_retry_delay)
    }

    async fn count_existing(&self, sink: &dyn DocumentSink) -> Option<u64> {
        match sink.count(&self.collection).await {
            Ok(n) => {
                tracing::info!(documents = n, "existing documents counted");
                Some(n)
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot count existing documents");
                None
            }
        }
    }

    fn log_preview(&self, plan: &MappedBatch) {
        tracing::info!(
            records = plan.records.len(),
            collection = %self.collection,
            "dry run: no writes will be applied"
        );
        for (key, fields) in plan.preview(self.options.preview_records, self.options.preview_fields)
        {
            tracing::info!(
                path = %self.collection.document_path(&key),
                fields = ?fields,
                "would write"
            );
        }
    }
}
