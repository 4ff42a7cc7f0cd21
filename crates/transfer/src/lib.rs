//! Core transfer domain for firesync.
//!
//! This crate contains every domain concept used to move tabular rows into a
//! document store: identifiers, cell values, row → record mapping, error types,
//! and the port traits that sources, sinks, and confirmation gates implement.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; infrastructure crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`RecordKey`, `CollectionPath`, `JobRunId`) |
//! | [`types`] | Value types (`FieldValue`, `Row`, `Record`, `SourceBatch`, `Timestamp`) |
//! | [`mapping`] | Key resolution and row → record mapping |
//! | [`ports`] | `RowSource`, `DocumentSink`, `ConfirmationGate` |
//! | [`report`] | Final run report |
//! | [`errors`] | Port, run-level, and retry-policy types |

pub mod errors;
pub mod identifiers;
pub mod mapping;
pub mod ports;
pub mod report;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use errors::{FailedWrite, RetryPolicy, RowDefect, SinkError, SourceError, TransferError};
pub use identifiers::{is_valid_key_segment, CollectionPath, JobRunId, RecordKey, MAX_KEY_BYTES};
pub use mapping::{
    record_key_from_value, KeySelector, MappedBatch, MappingOptions, RecordMapper,
    DATA_SOURCE_FIELD, DEFAULT_KEY_CANDIDATES,
};
pub use ports::{ConfirmationGate, Decision, DocumentSink, RowSource};
pub use report::TransferReport;
pub use types::{FieldValue, Fields, Record, Row, SkippedRow, SourceBatch, Timestamp};
