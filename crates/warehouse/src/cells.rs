//! Conversion of SQL API cell strings to field values.
//!
//! The API returns every cell as a string (or `null`); the column's `rowType`
//! says how to read it.

use chrono::{DateTime, NaiveDate, NaiveTime};
use transfer::{FieldValue, Timestamp};

use crate::ColumnType;

const NANOS_PER_SECOND: i128 = 1_000_000_000;

/// Converts one cell according to its column type.
///
/// A cell that does not parse as its declared type is kept as text.
pub fn convert_cell(column: &ColumnType, raw: Option<&str>) -> FieldValue {
    let Some(raw) = raw else {
        return FieldValue::Null;
    };
    let text = || FieldValue::Text(raw.to_string());

    match column.kind.to_ascii_lowercase().as_str() {
        "fixed" => {
            if column.scale.unwrap_or(0) == 0 {
                if let Ok(i) = raw.parse::<i64>() {
                    return FieldValue::Integer(i);
                }
            }
            finite_float(raw).unwrap_or_else(text)
        }
        "real" | "float" | "double" => finite_float(raw).unwrap_or_else(text),
        "boolean" => match raw {
            "true" | "1" | "TRUE" => FieldValue::Bool(true),
            "false" | "0" | "FALSE" => FieldValue::Bool(false),
            _ => text(),
        },
        // Days since the epoch.
        "date" => raw
            .parse::<i64>()
            .ok()
            .and_then(|days| {
                NaiveDate::from_ymd_opt(1970, 1, 1)?
                    .checked_add_signed(chrono::Duration::try_days(days)?)
            })
            .map(|d| FieldValue::Text(d.format("%Y-%m-%d").to_string()))
            .unwrap_or_else(text),
        // Seconds since midnight with a fractional part.
        "time" => epoch_nanos(raw)
            .and_then(|n| {
                let secs = u32::try_from(n.div_euclid(NANOS_PER_SECOND)).ok()?;
                let nanos = u32::try_from(n.rem_euclid(NANOS_PER_SECOND)).ok()?;
                NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
            })
            .map(|t| FieldValue::Text(t.to_string()))
            .unwrap_or_else(text),
        // `timestamp_tz` appends the offset after a space; the epoch part is UTC.
        "timestamp_ntz" | "timestamp_ltz" | "timestamp_tz" => raw
            .split_whitespace()
            .next()
            .and_then(epoch_nanos)
            .and_then(|n| {
                let secs = i64::try_from(n.div_euclid(NANOS_PER_SECOND)).ok()?;
                let nanos = u32::try_from(n.rem_euclid(NANOS_PER_SECOND)).ok()?;
                DateTime::from_timestamp(secs, nanos)
            })
            .map(|dt| FieldValue::Timestamp(Timestamp::from_utc(dt)))
            .unwrap_or_else(text),
        "variant" | "object" | "array" => serde_json::from_str(raw)
            .map(FieldValue::Json)
            .unwrap_or_else(|_| text()),
        _ => text(),
    }
}

fn finite_float(raw: &str) -> Option<FieldValue> {
    raw.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(FieldValue::Float)
}

/// Parses `"<seconds>[.<fraction>]"` into nanoseconds.
fn epoch_nanos(raw: &str) -> Option<i128> {
    let (negative, digits) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };
    let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));
    if whole.is_empty() || fraction.len() > 9 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let seconds = whole.parse::<i128>().ok()?;
    let nanos = if fraction.is_empty() {
        0
    } else {
        format!("{fraction:0<9}").parse::<i128>().ok()?
    };
    let total = seconds * NANOS_PER_SECOND + nanos;
    Some(if negative { -total } else { total })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(kind: &str, scale: Option<i64>) -> ColumnType {
        ColumnType::new("C", kind, scale)
    }

    #[test]
    fn null_cell_is_null_for_every_type() {
        for kind in ["fixed", "text", "timestamp_ntz", "variant"] {
            assert_eq!(convert_cell(&col(kind, None), None), FieldValue::Null);
        }
    }

    #[test]
    fn fixed_uses_scale() {
        assert_eq!(convert_cell(&col("fixed", Some(0)), Some("42")), FieldValue::Integer(42));
        assert_eq!(
            convert_cell(&col("fixed", Some(2)), Some("1250000.50")),
            FieldValue::Float(1_250_000.5)
        );
        // Beyond i64: keep the magnitude as a float.
        assert_eq!(
            convert_cell(&col("fixed", Some(0)), Some("99999999999999999999")),
            FieldValue::Float(1e20)
        );
    }

    #[test]
    fn booleans_and_text() {
        assert_eq!(convert_cell(&col("boolean", None), Some("true")), FieldValue::Bool(true));
        assert_eq!(
            convert_cell(&col("text", None), Some(" MSFT ")),
            FieldValue::Text(" MSFT ".into())
        );
    }

    #[test]
    fn date_is_days_since_epoch() {
        assert_eq!(
            convert_cell(&col("date", None), Some("19723")),
            FieldValue::Text("2024-01-01".into())
        );
    }

    #[test]
    fn time_is_seconds_since_midnight() {
        assert_eq!(
            convert_cell(&col("time", None), Some("45296.500000000")),
            FieldValue::Text("12:34:56.500".into())
        );
    }

    #[test]
    fn timestamps_are_epoch_seconds() {
        let expected = FieldValue::Timestamp(Timestamp::from_utc(
            DateTime::from_timestamp(1_704_067_200, 250_000_000).unwrap(),
        ));
        assert_eq!(
            convert_cell(&col("timestamp_ntz", None), Some("1704067200.250000000")),
            expected
        );
        assert_eq!(
            convert_cell(&col("timestamp_tz", None), Some("1704067200.250000000 1500")),
            expected
        );
    }

    #[test]
    fn negative_epoch_keeps_sub_second_sign() {
        assert_eq!(epoch_nanos("-1.5"), Some(-1_500_000_000));
        let value = convert_cell(&col("timestamp_ntz", None), Some("-1.500000000"));
        assert_eq!(
            value,
            FieldValue::Timestamp(Timestamp::from_utc(
                DateTime::from_timestamp(-2, 500_000_000).unwrap()
            ))
        );
    }

    #[test]
    fn variant_is_json_when_it_parses() {
        assert_eq!(
            convert_cell(&col("object", None), Some(r#"{"a":1}"#)),
            FieldValue::Json(serde_json::json!({"a": 1}))
        );
        assert_eq!(
            convert_cell(&col("variant", None), Some("not json")),
            FieldValue::Text("not json".into())
        );
    }

    #[test]
    fn unparseable_cell_falls_back_to_text() {
        assert_eq!(
            convert_cell(&col("real", None), Some("n/a")),
            FieldValue::Text("n/a".into())
        );
    }
}
