//! Error and retry-policy types for the transfer domain.
//!
//! [`TransferError`] covers conditions that abort a run before or instead of
//! writing. [`RowDefect`] and [`SinkError`] describe per-row and per-record
//! problems that are counted and reported while the run continues.
//!
//! Adapter crates define their own error enums and convert them into
//! [`SourceError`] / [`SinkError`] at the port boundary.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::RecordKey;

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// Returned by sink errors to let the job decide whether to re-issue a write
/// before recording it as failed.
///
/// - `Retryable` errors: transport timeouts, HTTP 429 and 5xx responses.
/// - `NonRetryable` errors: rejected credentials, invalid documents, 4xx.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    ///
    /// `after` optionally specifies the minimum delay before retrying (e.g.
    /// derived from a `Retry-After` response header).
    Retryable {
        /// Minimum back-off before the next attempt. `None` means apply the
        /// caller's own back-off schedule.
        after: Option<Duration>,
    },
    /// The operation must not be retried.
    NonRetryable,
}

impl RetryPolicy {
    /// Returns `true` for [`RetryPolicy::Retryable`].
    pub fn is_retryable(&self) -> bool {
        matches!(self, RetryPolicy::Retryable { .. })
    }
}

// ---------------------------------------------------------------------------
// Per-row defects
// ---------------------------------------------------------------------------

/// Why a source row was excluded from the target.
///
/// Never fatal: the row is skipped, counted, and listed in the report.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowDefect {
    /// No key column could be resolved, or the key cell is null / blank.
    #[error("row has no value for key column '{column}'")]
    MissingKey {
        /// The key column that was looked up (`"<none>"` if none resolved).
        column: String,
    },

    /// The key cell holds a value that cannot be used as a document id.
    #[error("key value {value:?} cannot be used as a document id")]
    MalformedKey {
        /// Rendering of the offending key value.
        value: String,
    },

    /// A previous row in the same run already used this key.
    #[error("key '{key}' already used by row {first_position}")]
    DuplicateKey {
        /// The repeated key.
        key: String,
        /// Position of the row that claimed the key first.
        first_position: usize,
    },

    /// A cell of the row could not be decoded into a field value.
    #[error("column '{column}' could not be decoded: {message}")]
    MalformedValue {
        /// Column of the offending cell.
        column: String,
        /// Decoder message.
        message: String,
    },

    /// The source could not decode the row at all.
    #[error("row could not be decoded: {message}")]
    Unreadable {
        /// Decoder message.
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Port errors
// ---------------------------------------------------------------------------

/// Failure of a [`crate::RowSource`]. Always fatal to the run.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The source could not be reached or refused the credentials.
    #[error("source unavailable: {message}")]
    Unavailable {
        /// Description of the connection problem.
        message: String,
    },

    /// The source was reachable but the read itself failed.
    #[error("source read failed: {message}")]
    ReadFailed {
        /// Description of the failure.
        message: String,
    },
}

/// Failure of a [`crate::DocumentSink`] operation.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Authentication against the target store failed.
    #[error("target authentication failed: {message}")]
    Unauthenticated {
        /// Description of the failure.
        message: String,
    },

    /// The target store could not be reached or answered with an error.
    #[error("target request failed: {message}")]
    Request {
        /// Description of the failure, including the HTTP status if any.
        message: String,
        /// Whether the request may be re-issued.
        retry: RetryPolicy,
    },

    /// The record or collection cannot be represented in the target store.
    #[error("target rejected input: {message}")]
    Rejected {
        /// Description of the problem.
        message: String,
    },
}

impl SinkError {
    /// Returns the retry policy for this error.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            SinkError::Request { retry, .. } => retry.clone(),
            SinkError::Unauthenticated { .. } | SinkError::Rejected { .. } => {
                RetryPolicy::NonRetryable
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Run-level errors
// ---------------------------------------------------------------------------

/// Errors that abort a transfer run.
///
/// Connection failures surface here before any write is attempted; per-row and
/// per-record problems never do.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The row source could not be opened or read.
    #[error("source failed: {0}")]
    Source(#[from] SourceError),

    /// The target store could not be prepared (e.g. credentials rejected).
    #[error("target unavailable: {0}")]
    Target(#[source] SinkError),
}

/// A write that still failed after every permitted attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedWrite {
    /// Key of the record that could not be written.
    pub key: RecordKey,
    /// Number of attempts made.
    pub attempts: u32,
    /// Message of the last error.
    pub message: String,
}
