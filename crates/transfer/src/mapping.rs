//! Row → record mapping.
//!
//! [`RecordMapper`] turns a [`SourceBatch`] into keyed [`Record`]s. Rows it
//! cannot key are returned as [`SkippedRow`]s; nothing here is fatal.
//!
//! Mapping is deterministic and never adds time-varying fields, so mapping the
//! same source rows twice yields identical records.

use std::collections::{BTreeMap, HashMap};

use crate::{FieldValue, Fields, Record, RecordKey, Row, RowDefect, SkippedRow, SourceBatch};

/// Key columns probed, in order, when no key column is configured.
pub const DEFAULT_KEY_CANDIDATES: [&str; 4] = ["id", "issue_id", "ID", "ISSUE_ID"];

/// Name of the constant provenance field added by [`MappingOptions::data_source_tag`].
pub const DATA_SOURCE_FIELD: &str = "data_source";

// Integral floats at or beyond 2^53 lose precision; they are not usable as keys.
const MAX_EXACT_FLOAT_KEY: f64 = 9_007_199_254_740_992.0;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// How the key column of a batch is chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySelector {
    /// Use this column.
    Column(String),
    /// Use the first of these candidates present in the batch.
    Detect(Vec<String>),
}

impl Default for KeySelector {
    fn default() -> Self {
        KeySelector::Detect(DEFAULT_KEY_CANDIDATES.iter().map(|c| c.to_string()).collect())
    }
}

impl KeySelector {
    /// Resolves the key column against `columns`.
    ///
    /// Exact matches win; otherwise the first case-insensitive match is used.
    pub fn resolve<'a>(&self, columns: &'a [String]) -> Option<&'a str> {
        let wanted: Vec<&str> = match self {
            KeySelector::Column(c) => vec![c.as_str()],
            KeySelector::Detect(candidates) => candidates.iter().map(String::as_str).collect(),
        };
        wanted
            .iter()
            .find_map(|w| columns.iter().find(|c| c.as_str() == *w))
            .or_else(|| {
                wanted
                    .iter()
                    .find_map(|w| columns.iter().find(|c| c.eq_ignore_ascii_case(w)))
            })
            .map(String::as_str)
    }
}

/// Options controlling how rows become documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingOptions {
    /// Key column selection.
    pub key: KeySelector,
    /// Keep the key column inside the document body.
    pub keep_key_field: bool,
    /// Lowercase and trim column names before key resolution.
    pub lowercase_columns: bool,
    /// Trim leading/trailing whitespace from text values.
    pub trim_text: bool,
    /// When set, every document gets a `data_source` field with this value.
    pub data_source_tag: Option<String>,
}

impl Default for MappingOptions {
    fn default() -> Self {
        Self {
            key: KeySelector::default(),
            keep_key_field: false,
            lowercase_columns: false,
            trim_text: true,
            data_source_tag: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Mapper
// ---------------------------------------------------------------------------

/// Result of mapping one batch: the records to write and the rows left out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappedBatch {
    /// Key column used, if one could be resolved.
    pub key_column: Option<String>,
    /// Rows read from the source, including rejected ones.
    pub rows_read: usize,
    /// Keyed records, in source order.
    pub records: Vec<Record>,
    /// Rows excluded from the target, in source order.
    pub skipped: Vec<SkippedRow>,
}

impl MappedBatch {
    /// Returns up to `max_records` records with at most `max_fields` rendered fields each.
    pub fn preview(&self, max_records: usize, max_fields: usize) -> Vec<(RecordKey, Vec<String>)> {
        self.records
            .iter()
            .take(max_records)
            .map(|r| {
                let fields = r
                    .fields
                    .iter()
                    .take(max_fields)
                    .map(|(k, v)| format!("{k}: {v}"))
                    .collect();
                (r.key.clone(), fields)
            })
            .collect()
    }
}

/// Maps source rows to keyed records.
#[derive(Debug, Clone, Default)]
pub struct RecordMapper {
    options: MappingOptions,
}

impl RecordMapper {
    /// Creates a mapper with the given options.
    pub fn new(options: MappingOptions) -> Self {
        Self { options }
    }

    /// Maps every row of `batch`.
    ///
    /// Rows the source already rejected are carried over as skipped. Skipped
    /// rows are reported in source order.
    pub fn map_batch(&self, batch: SourceBatch) -> MappedBatch {
        let rows_read = batch.rows_read();
        let columns: Vec<String> = batch
            .columns
            .iter()
            .map(|c| self.column_name(c))
            .collect();
        let key_column = self.options.key.resolve(&columns).map(str::to_string);

        for (name, originals) in self.colliding_columns(&batch.columns) {
            tracing::warn!(
                column = %name,
                sources = ?originals,
                "columns collapse to the same name; only one value per row is kept"
            );
        }

        if key_column.is_none() && !batch.rows.is_empty() {
            tracing::warn!(
                columns = ?columns,
                selector = ?self.options.key,
                "no key column found; every row will be skipped"
            );
        }

        let mut records = Vec::with_capacity(batch.rows.len());
        let mut skipped = batch.rejected;
        let mut seen: HashMap<RecordKey, usize> = HashMap::new();

        for row in batch.rows {
            let position = row.position;
            match self.map_row(row, key_column.as_deref()) {
                Ok(record) => {
                    if let Some(first_position) = seen.get(&record.key) {
                        skipped.push(SkippedRow {
                            position,
                            reason: RowDefect::DuplicateKey {
                                key: record.key.to_string(),
                                first_position: *first_position,
                            },
                        });
                        continue;
                    }
                    seen.insert(record.key.clone(), position);
                    records.push(record);
                }
                Err(reason) => skipped.push(SkippedRow { position, reason }),
            }
        }

        skipped.sort_by_key(|s| s.position);
        for s in &skipped {
            tracing::warn!(position = s.position, reason = %s.reason, "skipping row");
        }

        MappedBatch {
            key_column,
            rows_read,
            records,
            skipped,
        }
    }

    fn map_row(&self, row: Row, key_column: Option<&str>) -> Result<Record, RowDefect> {
        let mut fields = self.normalise(row.fields);
        let source_text: HashMap<String, String> = row
            .source_text
            .into_iter()
            .map(|(name, text)| (self.column_name(&name), text))
            .collect();

        let Some(key_column) = key_column else {
            return Err(RowDefect::MissingKey {
                column: "<none>".to_string(),
            });
        };

        let key_value = if self.options.keep_key_field {
            fields.get(key_column).cloned()
        } else {
            fields.remove(key_column)
        };
        let key = match key_value {
            Some(value) => {
                let from_text = source_text.get(key_column).and_then(|t| record_key_from_text(t));
                match from_text {
                    Some(key) => key,
                    None => record_key_from_value(&value, key_column)?,
                }
            }
            None => {
                return Err(RowDefect::MissingKey {
                    column: key_column.to_string(),
                })
            }
        };

        if let Some(tag) = &self.options.data_source_tag {
            fields.insert(DATA_SOURCE_FIELD.to_string(), FieldValue::Text(tag.clone()));
        }

        Ok(Record { key, fields })
    }

    fn normalise(&self, fields: Fields) -> Fields {
        fields
            .into_iter()
            .map(|(name, value)| {
                let value = match value {
                    FieldValue::Text(s) if self.options.trim_text => {
                        FieldValue::Text(s.trim().to_string())
                    }
                    FieldValue::Float(f) if !f.is_finite() => FieldValue::Null,
                    other => other,
                };
                (self.column_name(&name), value)
            })
            .collect()
    }

    /// Normalised names shared by more than one source column.
    fn colliding_columns(&self, columns: &[String]) -> Vec<(String, Vec<String>)> {
        let mut by_name: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for c in columns {
            by_name.entry(self.column_name(c)).or_default().push(c.clone());
        }
        by_name.into_iter().filter(|(_, v)| v.len() > 1).collect()
    }

    fn column_name(&self, name: &str) -> String {
        if self.options.lowercase_columns {
            name.trim().to_lowercase()
        } else {
            name.to_string()
        }
    }
}

/// Uses a source's own rendering of a key cell verbatim (trimmed), if it is a
/// valid key.
fn record_key_from_text(text: &str) -> Option<RecordKey> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    RecordKey::new(trimmed)
}

/// Derives a document key from a key cell.
///
/// Integers and integral floats render without a fractional part; text is
/// trimmed. Null or blank cells are a missing key; anything else that breaks
/// the key rules is malformed.
pub fn record_key_from_value(value: &FieldValue, column: &str) -> Result<RecordKey, RowDefect> {
    let missing = || RowDefect::MissingKey {
        column: column.to_string(),
    };
    let malformed = |v: String| RowDefect::MalformedKey { value: v };

    let rendered = match value {
        FieldValue::Null => return Err(missing()),
        FieldValue::Integer(i) => i.to_string(),
        FieldValue::Float(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < MAX_EXACT_FLOAT_KEY => {
            (*f as i64).to_string()
        }
        FieldValue::Text(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Err(missing());
            }
            trimmed.to_string()
        }
        other => return Err(malformed(other.to_string())),
    };

    RecordKey::new(rendered.clone()).ok_or_else(|| malformed(rendered))
}
