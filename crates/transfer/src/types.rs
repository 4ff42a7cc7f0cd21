//! Shared value types for the transfer domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! the data that flows through a run: the cell values read from a source, the
//! rows they form, and the keyed records written to the target.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::{RecordKey, RowDefect};

// ---------------------------------------------------------------------------
// Cell values
// ---------------------------------------------------------------------------

/// A single scalar (or nested JSON) value read from a source column.
///
/// Serialises to the plain JSON representation stored in the Realtime
/// Database: timestamps become RFC 3339 strings and non-finite floats become
/// `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// SQL `NULL`, an empty CSV cell, or a value that could not be represented.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed 64-bit integer.
    Integer(i64),
    /// Double-precision float.
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// A point in time, normalised to UTC.
    Timestamp(Timestamp),
    /// Structured value from a JSON / VARIANT column.
    Json(serde_json::Value),
}

impl FieldValue {
    /// Returns `true` for [`FieldValue::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Converts the value to its JSON representation.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Null => serde_json::Value::Null,
            FieldValue::Bool(b) => serde_json::Value::Bool(*b),
            FieldValue::Integer(i) => serde_json::Value::from(*i),
            FieldValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            FieldValue::Text(s) => serde_json::Value::String(s.clone()),
            FieldValue::Timestamp(ts) => serde_json::Value::String(ts.to_string()),
            FieldValue::Json(v) => v.clone(),
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Null => write!(f, "null"),
            FieldValue::Bool(b) => write!(f, "{b}"),
            FieldValue::Integer(i) => write!(f, "{i}"),
            FieldValue::Float(x) => write!(f, "{x}"),
            FieldValue::Text(s) => write!(f, "{s}"),
            FieldValue::Timestamp(ts) => write!(f, "{ts}"),
            FieldValue::Json(v) => write!(f, "{v}"),
        }
    }
}

/// Column name → value mapping. Ordered so documents serialise deterministically.
pub type Fields = BTreeMap<String, FieldValue>;

// ---------------------------------------------------------------------------
// Rows and records
// ---------------------------------------------------------------------------

/// One row as read from a source, before key extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// 1-based position of the row within the source result.
    pub position: usize,
    /// Column values of the row.
    pub fields: Fields,
    /// The source's own text for cells it converted to a typed value.
    ///
    /// Key resolution prefers this text, so `007` and ids wider than `i64`
    /// keep their identity even though the field value is numeric.
    pub source_text: BTreeMap<String, String>,
}

impl Row {
    /// Creates a row at `position` from `(column, value)` pairs.
    pub fn new(
        position: usize,
        fields: impl IntoIterator<Item = (impl Into<String>, FieldValue)>,
    ) -> Self {
        Self {
            position,
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            source_text: BTreeMap::new(),
        }
    }

    /// Records the original text of `column`.
    pub fn with_source_text(mut self, column: impl Into<String>, text: impl Into<String>) -> Self {
        self.source_text.insert(column.into(), text.into());
        self
    }
}

/// A row the mapper (or the source itself) refused, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedRow {
    /// 1-based position of the row within the source result.
    pub position: usize,
    /// Why the row was excluded.
    pub reason: RowDefect,
}

/// Everything a [`crate::RowSource`] produced in one fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceBatch {
    /// Column names in source order.
    pub columns: Vec<String>,
    /// Successfully decoded rows.
    pub rows: Vec<Row>,
    /// Rows the source could not decode (e.g. malformed CSV lines).
    pub rejected: Vec<SkippedRow>,
}

impl SourceBatch {
    /// Total number of rows encountered, decoded or not.
    pub fn rows_read(&self) -> usize {
        self.rows.len() + self.rejected.len()
    }
}

/// A keyed record ready to be written to `/<collection>/<key>`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    /// Primary key; becomes the document id.
    pub key: RecordKey,
    /// Document body.
    pub fields: Fields,
}

impl Record {
    /// Returns the document body as a JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly; the underlying representation can change without affecting the
/// domain API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn non_finite_float_serialises_as_null() {
        assert_eq!(FieldValue::Float(f64::NAN).to_json(), serde_json::Value::Null);
        assert_eq!(FieldValue::Float(1.5).to_json(), serde_json::json!(1.5));
    }

    #[test]
    fn timestamp_serialises_as_rfc3339_utc() {
        let ts = Timestamp::from_utc(Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap());
        assert_eq!(
            FieldValue::Timestamp(ts).to_json(),
            serde_json::json!("2024-03-01T12:30:00Z")
        );
    }

    #[test]
    fn record_body_is_a_json_object() {
        let record = Record {
            key: RecordKey::new("42").unwrap(),
            fields: Row::new(
                1,
                [
                    ("title", FieldValue::Text("Broken build".into())),
                    ("votes", FieldValue::Integer(3)),
                    ("closed", FieldValue::Null),
                ],
            )
            .fields,
        };
        assert_eq!(
            record.to_json(),
            serde_json::json!({"closed": null, "title": "Broken build", "votes": 3})
        );
    }
}
