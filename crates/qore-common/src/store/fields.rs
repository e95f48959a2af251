//! Typed-field wire codec for the document store.
//!
//! The store's REST API tags every value with its type
//! (`stringValue`, `integerValue`, ...). This module translates between that
//! representation and plain JSON records. Integers travel as strings on the
//! wire; the tag is what distinguishes them from doubles on the way back.

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FieldCodecError {
    #[error("unsupported value shape at `{0}`")]
    Unsupported(String),
    #[error("unrecognized wire value: {0}")]
    UnknownTag(String),
    #[error("invalid integer literal on wire: {0}")]
    BadInteger(String),
}

/// Encode a plain record into the store's `fields` map.
pub fn encode_fields(record: &Map<String, Value>) -> Result<Map<String, Value>, FieldCodecError> {
    let mut fields = Map::with_capacity(record.len());
    for (name, value) in record {
        fields.insert(name.clone(), encode_value(value, name)?);
    }
    Ok(fields)
}

/// Decode the store's `fields` map back into a plain record.
pub fn decode_fields(fields: &Map<String, Value>) -> Result<Map<String, Value>, FieldCodecError> {
    let mut record = Map::with_capacity(fields.len());
    for (name, wire) in fields {
        record.insert(name.clone(), decode_value(wire)?);
    }
    Ok(record)
}

fn encode_value(value: &Value, path: &str) -> Result<Value, FieldCodecError> {
    let wire = match value {
        Value::Null => serde_json::json!({ "nullValue": null }),
        Value::Bool(b) => serde_json::json!({ "booleanValue": b }),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                serde_json::json!({ "integerValue": i.to_string() })
            } else if let Some(f) = n.as_f64() {
                serde_json::json!({ "doubleValue": f })
            } else {
                return Err(FieldCodecError::Unsupported(path.to_string()));
            }
        }
        Value::String(s) => serde_json::json!({ "stringValue": s }),
        Value::Array(items) => {
            let mut values = Vec::with_capacity(items.len());
            for (idx, item) in items.iter().enumerate() {
                if item.is_array() {
                    // The store rejects directly nested arrays.
                    return Err(FieldCodecError::Unsupported(format!("{path}[{idx}]")));
                }
                values.push(encode_value(item, &format!("{path}[{idx}]"))?);
            }
            serde_json::json!({ "arrayValue": { "values": values } })
        }
        Value::Object(map) => {
            serde_json::json!({ "mapValue": { "fields": encode_fields(map)? } })
        }
    };
    Ok(wire)
}

fn decode_value(wire: &Value) -> Result<Value, FieldCodecError> {
    let map = wire
        .as_object()
        .ok_or_else(|| FieldCodecError::UnknownTag(wire.to_string()))?;
    let (tag, inner) = map
        .iter()
        .next()
        .ok_or_else(|| FieldCodecError::UnknownTag(wire.to_string()))?;

    match tag.as_str() {
        "nullValue" => Ok(Value::Null),
        "booleanValue" => inner
            .as_bool()
            .map(Value::Bool)
            .ok_or_else(|| FieldCodecError::UnknownTag(wire.to_string())),
        "integerValue" => {
            let literal = match inner {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                other => return Err(FieldCodecError::BadInteger(other.to_string())),
            };
            literal
                .parse::<i64>()
                .map(|i| Value::Number(i.into()))
                .map_err(|_| FieldCodecError::BadInteger(literal))
        }
        "doubleValue" => inner
            .as_f64()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| FieldCodecError::UnknownTag(wire.to_string())),
        "stringValue" | "timestampValue" | "referenceValue" => inner
            .as_str()
            .map(|s| Value::String(s.to_string()))
            .ok_or_else(|| FieldCodecError::UnknownTag(wire.to_string())),
        "arrayValue" => {
            let values = inner
                .get("values")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let decoded = values
                .iter()
                .map(decode_value)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Array(decoded))
        }
        "mapValue" => {
            let fields = inner
                .get("fields")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            Ok(Value::Object(decode_fields(&fields)?))
        }
        other => Err(FieldCodecError::UnknownTag(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("record literal")
    }

    #[test]
    fn round_trips_all_supported_shapes() {
        let original = record(json!({
            "job_id": "01JB7S9M4T",
            "attempt_count": 2,
            "score": 0.75,
            "done": false,
            "response": null,
            "tags": ["identity", "core"],
            "history": [
                { "role": "user", "content": "hello" },
                { "role": "model", "content": "hi" }
            ],
            "nested": { "inner": { "count": 7 } }
        }));

        let encoded = encode_fields(&original).unwrap();
        let decoded = decode_fields(&encoded).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn integers_and_doubles_keep_their_tags() {
        let encoded = encode_fields(&record(json!({ "count": 3, "ratio": 2.5 }))).unwrap();

        assert_eq!(encoded["count"], json!({ "integerValue": "3" }));
        assert_eq!(encoded["ratio"], json!({ "doubleValue": 2.5 }));

        let decoded = decode_fields(&encoded).unwrap();
        assert!(decoded["count"].is_i64());
        assert!(decoded["ratio"].is_f64());
    }

    #[test]
    fn wire_integers_may_arrive_as_bare_numbers() {
        let fields = record(json!({ "count": { "integerValue": 12 } }));
        let decoded = decode_fields(&fields).unwrap();
        assert_eq!(decoded["count"], json!(12));
    }

    #[test]
    fn timestamps_decode_to_strings() {
        let fields = record(json!({
            "created_at": { "timestampValue": "2025-08-05T12:00:00Z" }
        }));
        let decoded = decode_fields(&fields).unwrap();
        assert_eq!(decoded["created_at"], json!("2025-08-05T12:00:00Z"));
    }

    #[test]
    fn nested_arrays_are_rejected() {
        let err = encode_fields(&record(json!({ "grid": [[1, 2]] }))).unwrap_err();
        assert!(matches!(err, FieldCodecError::Unsupported(path) if path == "grid[0]"));
    }

    #[test]
    fn unknown_wire_tags_are_rejected() {
        let fields = record(json!({ "blob": { "bytesValue": "AAEC" } }));
        let err = decode_fields(&fields).unwrap_err();
        assert!(matches!(err, FieldCodecError::UnknownTag(tag) if tag.contains("bytesValue")));
    }

    #[test]
    fn bad_integer_literal_is_rejected() {
        let fields = record(json!({ "count": { "integerValue": "twelve" } }));
        let err = decode_fields(&fields).unwrap_err();
        assert!(matches!(err, FieldCodecError::BadInteger(_)));
    }
}
