//! Open-schema JSON messages
//!
//! Payloads are validated by flattening them: nested keys are joined with
//! [`SEPARATOR`], and a key that already contains the separator or equals
//! one of the [`RESERVED_KEYS`] is rejected at any depth. Stored payloads
//! are the nested form, `parse_flat(flatten(x))`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{validate_format, Envelope};
use crate::error::{Result, StoreError};
use crate::path::JsonPath;

/// Path separator used by flattened payload keys
pub const SEPARATOR: char = '/';

/// Top-level message fields a payload key may not shadow
pub const RESERVED_KEYS: [&str; 4] = ["publisher", "protocol", "subtopic", "channel"];

/// A JSON message as stored in its format table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JsonMessage {
    /// Format (table) this message belongs to
    pub format: String,
    pub publisher: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subtopic: String,
    pub protocol: String,
    /// Nanoseconds since the Unix epoch, assigned on reception
    pub created: i64,
    pub payload: Map<String, Value>,
}

/// Flatten a nested payload into single-level keys joined by [`SEPARATOR`]
///
/// Empty nested objects are kept as leaf values so that the conversion
/// stays lossless.
pub fn flatten(nested: &Map<String, Value>) -> Result<Map<String, Value>> {
    let mut flat = Map::new();
    flatten_into(&mut flat, None, nested)?;
    Ok(flat)
}

fn flatten_into(flat: &mut Map<String, Value>, prefix: Option<&str>, nested: &Map<String, Value>) -> Result<()> {
    for (key, value) in nested {
        check_key(key)?;
        let full = match prefix {
            Some(p) => format!("{}{}{}", p, SEPARATOR, key),
            None => key.clone(),
        };
        match value {
            Value::Object(inner) if !inner.is_empty() => flatten_into(flat, Some(&full), inner)?,
            other => {
                flat.insert(full, other.clone());
            }
        }
    }
    Ok(())
}

fn check_key(key: &str) -> Result<()> {
    if key.contains(SEPARATOR) {
        return Err(StoreError::InvalidKey(format!(
            "key {:?} contains separator {:?}",
            key, SEPARATOR
        )));
    }
    if RESERVED_KEYS.contains(&key) {
        return Err(StoreError::InvalidKey(format!("key {:?} is reserved", key)));
    }
    Ok(())
}

/// Inverse of [`flatten`]
pub fn parse_flat(flat: &Map<String, Value>) -> Map<String, Value> {
    let mut nested = Map::new();
    for (key, value) in flat {
        let segments: Vec<&str> = key.split(SEPARATOR).collect();
        insert_at(&mut nested, &segments, value.clone());
    }
    nested
}

fn insert_at(target: &mut Map<String, Value>, segments: &[&str], value: Value) {
    match segments {
        [] => {}
        [last] => {
            target.insert((*last).to_string(), value);
        }
        [head, rest @ ..] => {
            let entry = target
                .entry((*head).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(inner) = entry {
                insert_at(inner, rest, value);
            }
        }
    }
}

/// Set `value` at `path` inside a nested payload, creating intermediate objects
pub fn set_path(payload: &mut Map<String, Value>, path: &JsonPath, value: Value) {
    let segments: Vec<&str> = path.segments().iter().map(String::as_str).collect();
    insert_at(payload, &segments, value);
}

/// Read the value at `path` inside a nested payload
pub fn get_path<'a>(payload: &'a Map<String, Value>, path: &JsonPath) -> Option<&'a Value> {
    let (last, parents) = path.segments().split_last()?;
    let mut current = payload;
    for segment in parents {
        current = current.get(segment)?.as_object()?;
    }
    current.get(last)
}

/// Decode a raw JSON payload (one object or an array of objects) into messages
pub fn transform(payload: &[u8], envelope: &Envelope, format: &str) -> Result<Vec<JsonMessage>> {
    validate_format(format)?;

    let objects = match serde_json::from_slice::<Value>(payload)? {
        Value::Object(obj) => vec![obj],
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(obj) => Ok(obj),
                other => Err(StoreError::invalid_message(format!(
                    "JSON array items must be objects, got {}",
                    json_type(&other)
                ))),
            })
            .collect::<Result<Vec<_>>>()?,
        other => {
            return Err(StoreError::invalid_message(format!(
                "JSON payload must be an object or an array, got {}",
                json_type(&other)
            )))
        }
    };

    if objects.is_empty() {
        return Err(StoreError::invalid_message("empty JSON batch"));
    }

    // Validate every object before producing any message
    let flattened = objects.iter().map(flatten).collect::<Result<Vec<_>>>()?;

    Ok(flattened
        .iter()
        .map(|flat| JsonMessage {
            format: format.to_string(),
            publisher: envelope.publisher.clone(),
            subtopic: envelope.subtopic.clone(),
            protocol: envelope.protocol.clone(),
            created: envelope.received,
            payload: parse_flat(flat),
        })
        .collect())
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_flatten_joins_nested_keys() {
        let nested = obj(json!({"a": {"b": {"c": 1}, "d": true}, "e": "x"}));
        let flat = flatten(&nested).unwrap();

        assert_eq!(flat.get("a/b/c"), Some(&json!(1)));
        assert_eq!(flat.get("a/d"), Some(&json!(true)));
        assert_eq!(flat.get("e"), Some(&json!("x")));
        assert_eq!(flat.len(), 3);
    }

    #[test]
    fn test_parse_flat_inverts_flatten() {
        let payloads = [
            json!({"temperature": 25.5, "humidity": 60.0}),
            json!({"a": {"b": {"c": [1, 2, 3]}, "empty": {}}, "n": null}),
            json!({"deep": {"er": {"est": {"x": "y"}}}, "list": [{"k": 1}]}),
            json!({}),
        ];
        for payload in payloads {
            let nested = obj(payload);
            let flat = flatten(&nested).unwrap();
            assert_eq!(parse_flat(&flat), nested);
        }
    }

    #[test]
    fn test_flatten_rejects_bad_keys_at_any_depth() {
        for payload in [
            json!({"a/b": 1}),
            json!({"publisher": "x"}),
            json!({"outer": {"channel": 1}}),
            json!({"outer": {"inner": {"x/y": 1}}}),
            json!({"outer": {"inner": {"subtopic": 1}}}),
        ] {
            let err = flatten(&obj(payload)).unwrap_err();
            assert!(matches!(err, StoreError::InvalidKey(_)));
        }

        // Reserved names are only reserved as whole keys
        assert!(flatten(&obj(json!({"publisher_id": 1, "protocols": 2}))).is_ok());
    }

    #[test]
    fn test_path_helpers() {
        let mut payload = obj(json!({"a": {"b": 1}}));
        let path = JsonPath::parse("a.c.d").unwrap();
        set_path(&mut payload, &path, json!(2.5));

        assert_eq!(get_path(&payload, &path), Some(&json!(2.5)));
        assert_eq!(get_path(&payload, &JsonPath::parse("a.b").unwrap()), Some(&json!(1)));
        assert_eq!(get_path(&payload, &JsonPath::parse("a.b.x").unwrap()), None);
    }

    #[test]
    fn test_transform_array_is_all_or_nothing() {
        let env = Envelope::new("p2", "http", 42);
        let msgs = transform(br#"[{"t": 1}, {"t": {"x": 2}}]"#, &env, "weather").unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[1].payload, obj(json!({"t": {"x": 2}})));
        assert_eq!(msgs[0].created, 42);
        assert_eq!(msgs[0].format, "weather");

        assert!(transform(br#"[{"t": 1}, {"protocol": 2}]"#, &env, "weather").is_err());
        assert!(transform(br#"[{"t": 1}, 3]"#, &env, "weather").is_err());
        assert!(transform(br#"42"#, &env, "weather").is_err());
        assert!(transform(br#"{"t": 1}"#, &env, "senml").is_err());
    }
}
