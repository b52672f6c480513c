use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::document::Document;
use crate::error::ReconcileError;

/// Field whose value is normalized to an instant before hashing.
pub const DATE_FIELD: &str = "date";

const KEY_SEPARATOR: char = '\u{1f}';
const MISSING_TOKEN: &str = "\u{0}missing";

/// Composite grouping key of `document` over `key_fields`, in field order.
///
/// Absent and `null` fields contribute a fixed missing token, so documents
/// lacking the same fields still collide with each other.
pub fn hash_document(document: &Document, key_fields: &[&str]) -> Result<String, ReconcileError> {
    if key_fields.is_empty() {
        return Err(ReconcileError::InvalidConfiguration(
            "duplicate detection requires at least one key field".to_string(),
        ));
    }

    let mut key = String::new();
    for (index, field) in key_fields.iter().enumerate() {
        if index > 0 {
            key.push(KEY_SEPARATOR);
        }
        match document.get(field) {
            None | Some(Value::Null) => key.push_str(MISSING_TOKEN),
            Some(value) if *field == DATE_FIELD => key.push_str(&normalize_date(value)),
            Some(value) => key.push_str(&render_value(value)),
        }
    }
    Ok(key)
}

/// Canonical UTC instant for a date value. Integers are epoch milliseconds;
/// unparseable text is kept as-is.
pub fn normalize_date(value: &Value) -> String {
    match value {
        Value::String(text) => parse_instant(text.trim())
            .map(render_instant)
            .unwrap_or_else(|| text.clone()),
        Value::Number(number) => number
            .as_i64()
            .and_then(DateTime::from_timestamp_millis)
            .map(render_instant)
            .unwrap_or_else(|| render_value(value)),
        other => render_value(other),
    }
}

fn render_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_instant(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(text, format) {
            return Some(parsed.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc())
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Number(number) => {
            if let Some(integer) = number.as_i64() {
                return integer.to_string();
            }
            if let Some(integer) = number.as_u64() {
                return integer.to_string();
            }
            match number.as_f64() {
                Some(float) if float.is_finite() && float.fract() == 0.0 && float.abs() < 1e15 => {
                    format!("{}", float as i64)
                }
                Some(float) => float.to_string(),
                None => number.to_string(),
            }
        }
        Value::Bool(flag) => flag.to_string(),
        Value::Null => MISSING_TOKEN.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}
