//! End-to-end behaviour of `TransferJob` against in-memory fakes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use job::{FixedDecision, JobOptions, TransferJob};
use transfer::{
    CollectionPath, Decision, DocumentSink, FieldValue, Record, RecordMapper, RetryPolicy, Row,
    RowDefect, RowSource, SinkError, SourceBatch, SourceError, TransferError,
};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

struct VecSource {
    batch: Option<SourceBatch>,
    fail_fetch: bool,
    fetches: usize,
    closes: usize,
}

impl VecSource {
    fn new(batch: SourceBatch) -> Self {
        Self {
            batch: Some(batch),
            fail_fetch: false,
            fetches: 0,
            closes: 0,
        }
    }
}

#[async_trait]
impl RowSource for VecSource {
    fn label(&self) -> String {
        "memory".to_string()
    }

    async fn fetch(&mut self) -> Result<SourceBatch, SourceError> {
        self.fetches += 1;
        if self.fail_fetch {
            return Err(SourceError::Unavailable {
                message: "tunnel refused".to_string(),
            });
        }
        Ok(self.batch.clone().unwrap_or_default())
    }

    async fn close(&mut self) {
        self.closes += 1;
    }
}

#[derive(Default)]
struct MemorySink {
    documents: Mutex<BTreeMap<String, serde_json::Value>>,
    upserts: Mutex<usize>,
    fail_prepare: bool,
    always_fail: Vec<String>,
    transient_failures: Mutex<HashMap<String, u32>>,
    retry_after: Option<Duration>,
}

impl MemorySink {
    fn snapshot(&self) -> BTreeMap<String, serde_json::Value> {
        self.documents.lock().unwrap().clone()
    }

    fn upserts(&self) -> usize {
        *self.upserts.lock().unwrap()
    }
}

#[async_trait]
impl DocumentSink for MemorySink {
    fn label(&self) -> String {
        "memory".to_string()
    }

    async fn prepare(&self, _collection: &CollectionPath) -> Result<(), SinkError> {
        if self.fail_prepare {
            return Err(SinkError::Unauthenticated {
                message: "invalid_grant".to_string(),
            });
        }
        Ok(())
    }

    async fn upsert(&self, collection: &CollectionPath, record: &Record) -> Result<(), SinkError> {
        *self.upserts.lock().unwrap() += 1;
        let key = record.key.to_string();

        if self.always_fail.contains(&key) {
            return Err(SinkError::Request {
                message: "400 Bad Request".to_string(),
                retry: RetryPolicy::NonRetryable,
            });
        }
        if let Some(remaining) = self.transient_failures.lock().unwrap().get_mut(&key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SinkError::Request {
                    message: "503 Service Unavailable".to_string(),
                    retry: RetryPolicy::Retryable {
                        after: self.retry_after,
                    },
                });
            }
        }

        self.documents
            .lock()
            .unwrap()
            .insert(collection.document_path(&record.key), record.to_json());
        Ok(())
    }

    async fn count(&self, _collection: &CollectionPath) -> Result<u64, SinkError> {
        Ok(self.documents.lock().unwrap().len() as u64)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn issues(rows: Vec<Vec<(&str, FieldValue)>>) -> SourceBatch {
    SourceBatch {
        columns: vec!["id".into(), "title".into(), "status".into()],
        rows: rows
            .into_iter()
            .enumerate()
            .map(|(i, fields)| Row::new(i + 1, fields))
            .collect(),
        rejected: Vec::new(),
    }
}

fn issue(id: FieldValue, title: &str) -> Vec<(&'static str, FieldValue)> {
    vec![
        ("id", id),
        ("title", FieldValue::Text(title.to_string())),
        ("status", FieldValue::Text("open".to_string())),
    ]
}

fn job() -> TransferJob {
    TransferJob::new(
        RecordMapper::default(),
        CollectionPath::new("issues").unwrap(),
        JobOptions {
            retry_backoff: Duration::ZERO,
            ..JobOptions::default()
        },
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_three_rows_one_missing_key_writes_two() {
    let mut source = VecSource::new(issues(vec![
        issue(FieldValue::Integer(1), "Login broken"),
        issue(FieldValue::Null, "No id"),
        issue(FieldValue::Integer(3), "Slow search"),
    ]));
    let sink = MemorySink::default();

    let report = job()
        .run(&mut source, &sink, &FixedDecision(Decision::Apply))
        .await
        .unwrap();

    assert_eq!(report.rows_read, 3);
    assert_eq!(report.written, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.verified_count, Some(2));
    assert_eq!(
        report.skipped_rows[0].reason,
        RowDefect::MissingKey { column: "id".into() }
    );

    let docs = sink.snapshot();
    assert_eq!(
        docs["issues/1"],
        serde_json::json!({"status": "open", "title": "Login broken"})
    );
    assert!(docs.contains_key("issues/3"));
    assert_eq!(source.closes, 1);
}

#[tokio::test]
async fn test_dry_run_performs_zero_writes() {
    let rows = (1..=500)
        .map(|i| issue(FieldValue::Integer(i), "bulk"))
        .collect();
    let mut source = VecSource::new(issues(rows));
    let sink = MemorySink::default();

    let report = job()
        .run(&mut source, &sink, &FixedDecision(Decision::DryRun))
        .await
        .unwrap();

    assert!(report.is_dry_run());
    assert_eq!(sink.upserts(), 0);
    assert_eq!(report.written, 0);
    assert_eq!(report.planned, 500);
    assert_eq!(report.planned_keys.len(), 500);
    assert_eq!(report.verified_count, None);
    assert_eq!(source.closes, 1);
}

#[tokio::test]
async fn test_rerun_produces_no_diff() {
    let batch = issues(vec![
        issue(FieldValue::Integer(1), "a"),
        issue(FieldValue::Text("ABC-2".into()), "b"),
    ]);
    let sink = MemorySink::default();

    let mut first = VecSource::new(batch.clone());
    job()
        .run(&mut first, &sink, &FixedDecision(Decision::Apply))
        .await
        .unwrap();
    let after_first = sink.snapshot();

    let mut second = VecSource::new(batch);
    let report = job()
        .run(&mut second, &sink, &FixedDecision(Decision::Apply))
        .await
        .unwrap();

    assert_eq!(report.written, 2);
    assert_eq!(sink.snapshot(), after_first);
}

#[tokio::test]
async fn test_write_failure_is_counted_and_job_continues() {
    let mut source = VecSource::new(issues(vec![
        issue(FieldValue::Integer(1), "a"),
        issue(FieldValue::Integer(2), "b"),
        issue(FieldValue::Integer(3), "c"),
    ]));
    let sink = MemorySink {
        always_fail: vec!["2".to_string()],
        ..MemorySink::default()
    };

    let report = job()
        .run(&mut source, &sink, &FixedDecision(Decision::Apply))
        .await
        .unwrap();

    assert_eq!(report.written, 2);
    assert_eq!(report.failed, 1);
    assert!(!report.is_clean());
    assert_eq!(report.failed_writes[0].key.as_str(), "2");
    // Non-retryable: one attempt only.
    assert_eq!(report.failed_writes[0].attempts, 1);
    assert!(sink.snapshot().contains_key("issues/3"));
}

#[tokio::test]
async fn test_retryable_failure_is_retried() {
    let mut source = VecSource::new(issues(vec![issue(FieldValue::Integer(7), "flaky")]));
    let sink = MemorySink::default();
    sink.transient_failures
        .lock()
        .unwrap()
        .insert("7".to_string(), 2);

    let report = job()
        .run(&mut source, &sink, &FixedDecision(Decision::Apply))
        .await
        .unwrap();

    assert_eq!(report.written, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(sink.upserts(), 3);
}

#[tokio::test]
async fn test_retry_budget_is_bounded() {
    let mut source = VecSource::new(issues(vec![issue(FieldValue::Integer(7), "down")]));
    let sink = MemorySink::default();
    sink.transient_failures
        .lock()
        .unwrap()
        .insert("7".to_string(), 10);

    let report = job()
        .run(&mut source, &sink, &FixedDecision(Decision::Apply))
        .await
        .unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.failed_writes[0].attempts, 3);
    assert_eq!(sink.upserts(), 3);
}

#[tokio::test]
async fn test_target_failure_aborts_before_fetch() {
    let mut source = VecSource::new(issues(vec![issue(FieldValue::Integer(1), "a")]));
    let sink = MemorySink {
        fail_prepare: true,
        ..MemorySink::default()
    };

    let err = job()
        .run(&mut source, &sink, &FixedDecision(Decision::Apply))
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::Target(_)));
    assert_eq!(source.fetches, 0);
    assert_eq!(sink.upserts(), 0);
    assert_eq!(source.closes, 1);
}

#[tokio::test]
async fn test_source_failure_is_fatal_and_releases_source() {
    let mut source = VecSource::new(SourceBatch::default());
    source.fail_fetch = true;
    let sink = MemorySink::default();

    let err = job()
        .run(&mut source, &sink, &FixedDecision(Decision::Apply))
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::Source(SourceError::Unavailable { .. })));
    assert_eq!(sink.upserts(), 0);
    assert_eq!(source.closes, 1);
}

#[tokio::test]
async fn test_empty_source_writes_nothing() {
    let mut source = VecSource::new(issues(Vec::new()));
    let sink = MemorySink::default();

    let report = job()
        .run(&mut source, &sink, &FixedDecision(Decision::DryRun))
        .await
        .unwrap();

    assert_eq!(report.rows_read, 0);
    assert_eq!(report.written, 0);
    assert_eq!(sink.upserts(), 0);
}

#[tokio::test]
async fn test_dry_run_reports_existing_documents() {
    let sink = MemorySink::default();
    for key in ["issues/90", "issues/91"] {
        sink.documents
            .lock()
            .unwrap()
            .insert(key.to_string(), serde_json::json!({"title": "old"}));
    }
    let mut source = VecSource::new(issues(vec![
        issue(FieldValue::Integer(1), "a"),
        issue(FieldValue::Integer(2), "b"),
        issue(FieldValue::Integer(3), "c"),
    ]));

    let report = job()
        .run(&mut source, &sink, &FixedDecision(Decision::DryRun))
        .await
        .unwrap();

    assert_eq!(report.existing_count, Some(2));
    assert_eq!(report.planned, 3);
    assert!(report.summary().contains("(2 already there)"));
    assert_eq!(sink.upserts(), 0);
}

#[tokio::test]
async fn test_retry_after_is_capped() {
    let mut source = VecSource::new(issues(vec![issue(FieldValue::Integer(7), "throttled")]));
    let sink = MemorySink {
        retry_after: Some(Duration::from_secs(86_400)),
        ..MemorySink::default()
    };
    sink.transient_failures
        .lock()
        .unwrap()
        .insert("7".to_string(), 1);
    let job = TransferJob::new(
        RecordMapper::default(),
        CollectionPath::new("issues").unwrap(),
        JobOptions {
            max_retry_delay: Duration::from_millis(10),
            ..JobOptions::default()
        },
    );

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        job.run(&mut source, &sink, &FixedDecision(Decision::Apply)),
    )
    .await
    .expect("retry delay exceeded the cap")
    .unwrap();

    assert_eq!(report.written, 1);
    assert_eq!(sink.upserts(), 2);
}
