//! firesync CSV row source.
//!
//! Implements [`transfer::RowSource`] for delimited text files with a header
//! row. Cell types are inferred per cell (see [`infer_value`]).
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** File access and CSV decoding live here. The
//! [`transfer`] crate sees only [`transfer::RowSource`] and
//! [`transfer::SourceBatch`].
//!
//! ## Malformed lines
//!
//! A line with the wrong number of fields or invalid UTF-8 does not abort the
//! read; it is reported as a rejected row and the remaining lines are read.
//! An I/O error, or a file that cannot be opened, is fatal.

mod infer;
mod source;

pub use infer::{infer_value, NULL_MARKERS};
pub use source::{read_batch, CsvSource, CsvSourceConfig, CsvSourceError};
