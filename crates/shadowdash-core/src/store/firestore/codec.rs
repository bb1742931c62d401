//! Firestore REST typed-value JSON codec.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};

use crate::models::{FieldValue, Fields};
use crate::store::{StoreError, StoreResult};

/// Decode a Firestore `fields` object.
///
/// Values of types this client does not model (arrays, references, bytes,
/// geo points) are skipped.
pub fn decode_fields(raw: &Map<String, Value>) -> StoreResult<Fields> {
    let mut fields = Fields::new();
    for (key, value) in raw {
        if let Some(decoded) = decode_value(value)? {
            fields.insert(key.clone(), decoded);
        } else {
            tracing::trace!("Skipping unsupported Firestore value for field {}", key);
        }
    }
    Ok(fields)
}

fn decode_value(raw: &Value) -> StoreResult<Option<FieldValue>> {
    let Some(object) = raw.as_object() else {
        return Err(StoreError::InvalidPayload(format!(
            "expected typed value object, got {raw}"
        )));
    };
    let Some((kind, value)) = object.iter().next() else {
        return Err(StoreError::InvalidPayload("empty typed value".to_string()));
    };

    let decoded = match kind.as_str() {
        "nullValue" => FieldValue::Null,
        "booleanValue" => FieldValue::Bool(value.as_bool().ok_or_else(|| invalid(kind, value))?),
        // Firestore sends 64-bit integers as decimal strings.
        "integerValue" => {
            let parsed = match value {
                Value::String(text) => text.parse::<i64>().ok(),
                Value::Number(number) => number.as_i64(),
                _ => None,
            };
            FieldValue::Integer(parsed.ok_or_else(|| invalid(kind, value))?)
        }
        "doubleValue" => FieldValue::Double(value.as_f64().ok_or_else(|| invalid(kind, value))?),
        "stringValue" => {
            FieldValue::String(value.as_str().ok_or_else(|| invalid(kind, value))?.to_string())
        }
        "timestampValue" => {
            let text = value.as_str().ok_or_else(|| invalid(kind, value))?;
            FieldValue::Timestamp(parse_timestamp(text)?)
        }
        "mapValue" => {
            let nested = value
                .get("fields")
                .and_then(Value::as_object)
                .map(decode_fields)
                .transpose()?
                .unwrap_or_default();
            FieldValue::Map(nested)
        }
        _ => return Ok(None),
    };
    Ok(Some(decoded))
}

pub fn parse_timestamp(text: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| StoreError::InvalidPayload(format!("invalid timestamp '{text}': {error}")))
}

fn invalid(kind: &str, value: &Value) -> StoreError {
    StoreError::InvalidPayload(format!("invalid {kind}: {value}"))
}

/// Encode fields for a write, returning the encoded `fields` object and the
/// dotted paths of every server-timestamp sentinel (which Firestore expects as
/// field transforms rather than values).
pub fn encode_fields(fields: &Fields) -> (Map<String, Value>, Vec<String>) {
    let mut transforms = Vec::new();
    let encoded = encode_fields_at(fields, "", &mut transforms);
    (encoded, transforms)
}

fn encode_fields_at(fields: &Fields, prefix: &str, transforms: &mut Vec<String>) -> Map<String, Value> {
    let mut encoded = Map::new();
    for (key, value) in fields {
        let path = join_path(prefix, key);
        match value {
            FieldValue::ServerTimestamp => transforms.push(path),
            FieldValue::Map(nested) => {
                let nested = encode_fields_at(nested, &path, transforms);
                encoded.insert(key.clone(), json!({ "mapValue": { "fields": nested } }));
            }
            other => {
                encoded.insert(key.clone(), encode_scalar(other));
            }
        }
    }
    encoded
}

fn encode_scalar(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null | FieldValue::ServerTimestamp | FieldValue::Map(_) => {
            json!({ "nullValue": null })
        }
        FieldValue::Bool(value) => json!({ "booleanValue": value }),
        FieldValue::Integer(value) => json!({ "integerValue": value.to_string() }),
        FieldValue::Double(value) => json!({ "doubleValue": value }),
        FieldValue::String(value) => json!({ "stringValue": value }),
        FieldValue::Timestamp(value) => json!({
            "timestampValue": value.to_rfc3339_opts(SecondsFormat::Micros, true)
        }),
    }
}

/// Leaf field paths written by a merge, excluding server-timestamp fields.
///
/// Nested maps contribute their leaves so sibling fields survive the merge.
pub fn merge_mask(fields: &Fields) -> Vec<String> {
    let mut mask = Vec::new();
    collect_mask(fields, "", &mut mask);
    mask
}

fn collect_mask(fields: &Fields, prefix: &str, mask: &mut Vec<String>) {
    for (key, value) in fields {
        let path = join_path(prefix, key);
        match value {
            FieldValue::ServerTimestamp => {}
            FieldValue::Map(nested) if !nested.is_empty() => collect_mask(nested, &path, mask),
            _ => mask.push(path),
        }
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    let segment = quote_segment(key);
    if prefix.is_empty() {
        segment
    } else {
        format!("{prefix}.{segment}")
    }
}

fn quote_segment(key: &str) -> String {
    let simple = key
        .chars()
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && key
            .chars()
            .all(|character| character.is_ascii_alphanumeric() || character == '_');
    if simple {
        key.to_string()
    } else {
        format!("`{}`", key.replace('\\', "\\\\").replace('`', "\\`"))
    }
}
