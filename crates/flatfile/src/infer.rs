//! Type inference for CSV cells.

use transfer::FieldValue;

/// Cell contents read as null, in addition to empty / whitespace-only cells.
pub const NULL_MARKERS: [&str; 10] = [
    "NA", "N/A", "n/a", "NaN", "nan", "NULL", "null", "None", "#N/A", "<NA>",
];

/// Infers a typed value from one CSV cell.
///
/// Order: null markers, `i64`, finite `f64`, `true`/`false` (any case), text.
/// Text keeps its original whitespace; trimming is a mapping option.
pub fn infer_value(raw: &str) -> FieldValue {
    let t = raw.trim();
    if t.is_empty() || NULL_MARKERS.contains(&t) {
        return FieldValue::Null;
    }
    if let Ok(i) = t.parse::<i64>() {
        return FieldValue::Integer(i);
    }
    if let Ok(f) = t.parse::<f64>() {
        // "inf" and friends parse as f64 but are words, not numbers.
        if f.is_finite() {
            return FieldValue::Float(f);
        }
    }
    if t.eq_ignore_ascii_case("true") {
        return FieldValue::Bool(true);
    }
    if t.eq_ignore_ascii_case("false") {
        return FieldValue::Bool(false);
    }
    FieldValue::Text(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_scalars() {
        assert_eq!(infer_value("42"), FieldValue::Integer(42));
        assert_eq!(infer_value(" -7 "), FieldValue::Integer(-7));
        assert_eq!(infer_value("1250000.50"), FieldValue::Float(1_250_000.5));
        assert_eq!(infer_value("TRUE"), FieldValue::Bool(true));
        assert_eq!(infer_value("false"), FieldValue::Bool(false));
    }

    #[test]
    fn null_markers_and_blanks_are_null() {
        for raw in ["", "   ", "NA", "NaN", "null", "None"] {
            assert_eq!(infer_value(raw), FieldValue::Null, "{raw:?}");
        }
    }

    #[test]
    fn words_that_parse_as_floats_stay_text() {
        assert_eq!(infer_value("inf"), FieldValue::Text("inf".into()));
        assert_eq!(infer_value("Infinity"), FieldValue::Text("Infinity".into()));
    }

    #[test]
    fn text_keeps_original_whitespace() {
        assert_eq!(infer_value(" MSFT "), FieldValue::Text(" MSFT ".into()));
    }
}
