//! [`CsvSource`]: a whole CSV file read as one batch.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use transfer::{FieldValue, Row, RowDefect, RowSource, SkippedRow, SourceBatch, SourceError};

use crate::infer_value;

/// Errors raised while reading a CSV file.
#[derive(Debug, Error)]
pub enum CsvSourceError {
    /// The file could not be opened.
    #[error("cannot open {path}: {source}")]
    Open {
        /// Path that was opened.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: csv::Error,
    },

    /// The header row or a record could not be read from disk.
    #[error("cannot read {path}: {source}")]
    Read {
        /// Path being read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: csv::Error,
    },

    /// The blocking reader task did not complete.
    #[error("reader task failed: {0}")]
    Task(String),
}

impl From<CsvSourceError> for SourceError {
    fn from(e: CsvSourceError) -> Self {
        match e {
            CsvSourceError::Open { .. } => SourceError::Unavailable {
                message: e.to_string(),
            },
            CsvSourceError::Read { .. } | CsvSourceError::Task(_) => SourceError::ReadFailed {
                message: e.to_string(),
            },
        }
    }
}

/// Settings of a [`CsvSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvSourceConfig {
    /// File to read.
    pub path: PathBuf,
    /// Field delimiter byte.
    pub delimiter: u8,
    /// Infer cell types; when `false` every non-empty cell is text.
    pub infer_types: bool,
}

impl CsvSourceConfig {
    /// Comma-delimited file with type inference.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            delimiter: b',',
            infer_types: true,
        }
    }
}

/// Reads every row of a CSV file.
#[derive(Debug, Clone)]
pub struct CsvSource {
    config: CsvSourceConfig,
}

impl CsvSource {
    /// Creates a source; the file is opened on [`RowSource::fetch`].
    pub fn new(config: CsvSourceConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl RowSource for CsvSource {
    fn label(&self) -> String {
        format!("csv:{}", self.config.path.display())
    }

    #[tracing::instrument(level = "info", skip(self), fields(path = %self.config.path.display()))]
    async fn fetch(&mut self) -> Result<SourceBatch, SourceError> {
        let config = self.config.clone();
        let batch = tokio::task::spawn_blocking(move || read_batch(&config))
            .await
            .map_err(|e| CsvSourceError::Task(e.to_string()))??;
        tracing::info!(
            rows = batch.rows.len(),
            rejected = batch.rejected.len(),
            columns = ?batch.columns,
            "csv file read"
        );
        Ok(batch)
    }

    async fn close(&mut self) {}
}

/// Reads `config.path` synchronously.
pub fn read_batch(config: &CsvSourceConfig) -> Result<SourceBatch, CsvSourceError> {
    let path = config.path.as_path();
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(config.delimiter)
        .has_headers(true)
        .from_path(path)
        .map_err(|source| CsvSourceError::Open {
            path: path.to_path_buf(),
            source,
        })?;

    let columns: Vec<String> = reader
        .headers()
        .map_err(|source| read_error(path, source))?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    let mut batch = SourceBatch {
        columns,
        ..SourceBatch::default()
    };

    for (i, result) in reader.records().enumerate() {
        let position = i + 1;
        match result {
            Ok(record) => {
                let mut row = Row::new(position, std::iter::empty::<(String, FieldValue)>());
                for (column, raw) in batch.columns.iter().zip(record.iter()) {
                    let value = if config.infer_types {
                        infer_value(raw)
                    } else if raw.trim().is_empty() {
                        FieldValue::Null
                    } else {
                        FieldValue::Text(raw.to_string())
                    };
                    if !matches!(value, FieldValue::Null | FieldValue::Text(_)) {
                        row.source_text.insert(column.clone(), raw.to_string());
                    }
                    row.fields.insert(column.clone(), value);
                }
                batch.rows.push(row);
            }
            Err(e) if e.is_io_error() => return Err(read_error(path, e)),
            Err(e) => {
                tracing::warn!(position, error = %e, "unreadable csv record");
                batch.rejected.push(SkippedRow {
                    position,
                    reason: RowDefect::Unreadable {
                        message: e.to_string(),
                    },
                });
            }
        }
    }

    Ok(batch)
}

fn read_error(path: &Path, source: csv::Error) -> CsvSourceError {
    CsvSourceError::Read {
        path: path.to_path_buf(),
        source,
    }
}
