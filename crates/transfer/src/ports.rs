//! Port traits implemented by infrastructure crates.
//!
//! The job in the `job` crate talks only to these traits. Sources
//! (`relational`, `flatfile`, `warehouse`) implement [`RowSource`]; the
//! `firebase` crate implements [`DocumentSink`]; the CLI implements the
//! interactive [`ConfirmationGate`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{CollectionPath, MappedBatch, Record, SinkError, SourceBatch, SourceError};

/// A readable tabular source.
///
/// Implementations own their connection (and tunnel, if any) for the lifetime
/// of the run; [`RowSource::close`] releases it.
#[async_trait]
pub trait RowSource: Send {
    /// Short human-readable label, e.g. `"mysql:issues"` or `"csv:data.csv"`.
    fn label(&self) -> String;

    /// Reads every row of the source.
    async fn fetch(&mut self) -> Result<SourceBatch, SourceError>;

    /// Releases connections and tunnels. Safe to call more than once.
    async fn close(&mut self);
}

/// A writable document/key store.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    /// Short human-readable label, e.g. `"firestore:my-project"`.
    fn label(&self) -> String;

    /// Validates credentials and the target collection before any write.
    async fn prepare(&self, collection: &CollectionPath) -> Result<(), SinkError>;

    /// Creates or fully replaces the document at `/<collection>/<record.key>`.
    async fn upsert(&self, collection: &CollectionPath, record: &Record) -> Result<(), SinkError>;

    /// Counts the documents currently stored under `collection`.
    async fn count(&self, collection: &CollectionPath) -> Result<u64, SinkError>;
}

/// Outcome of the confirmation gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Perform the writes.
    Apply,
    /// List the intended writes without applying them.
    DryRun,
}

/// Decides whether a mapped batch is written.
#[async_trait]
pub trait ConfirmationGate: Send + Sync {
    /// Called once per run, after mapping and before any write.
    ///
    /// `existing` is the number of documents already in the collection, when
    /// the target could count them.
    async fn confirm(
        &self,
        collection: &CollectionPath,
        plan: &MappedBatch,
        existing: Option<u64>,
    ) -> Decision;
}
