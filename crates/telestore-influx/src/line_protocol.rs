//! Line protocol encoding
//!
//! ```text
//! measurement,tag1=val1,tag2=val2 field1=val1,field2=val2 timestamp_ns
//! ```
//!
//! SenML records go to the `senml` measurement; JSON messages go to a
//! measurement named after their format, one field per flattened payload
//! key. Publisher, subtopic and protocol are tags on both, so they can be
//! used by the delete API.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use telestore_core::message::json::flatten;
use telestore_core::message::SENML_FORMAT;
use telestore_core::{validate_format, JsonMessage, Result, SenMLMessage, StoreError};

/// A value stored in a field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    String(String),
    Boolean(bool),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Integer(v) => write!(f, "{}i", v),
            FieldValue::String(v) => write!(f, "\"{}\"", v.replace('\\', "\\\\").replace('"', "\\\"")),
            FieldValue::Boolean(v) => write!(f, "{}", v),
        }
    }
}

impl FieldValue {
    pub fn kind(&self) -> &'static str {
        match self {
            FieldValue::Float(_) => "float",
            FieldValue::Integer(_) => "integer",
            FieldValue::String(_) => "string",
            FieldValue::Boolean(_) => "boolean",
        }
    }
}

/// One point, ready to be encoded
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: String,
    pub tags: Vec<(&'static str, String)>,
    pub fields: Vec<(String, FieldValue)>,
    /// Nanoseconds
    pub time: i64,
}

impl Point {
    fn new(measurement: &str, time: i64) -> Self {
        Self {
            measurement: measurement.to_string(),
            tags: Vec::new(),
            fields: Vec::new(),
            time,
        }
    }

    /// Empty tag values cannot be encoded; the tag is left out instead
    fn tag(mut self, key: &'static str, value: &str) -> Self {
        if !value.is_empty() {
            self.tags.push((key, value.to_string()));
        }
        self
    }

    fn field(mut self, key: &str, value: Option<FieldValue>) -> Self {
        if let Some(value) = value {
            self.fields.push((key.to_string(), value));
        }
        self
    }

    pub fn to_line(&self) -> String {
        let mut line = escape_measurement(&self.measurement);

        let mut tags: Vec<_> = self.tags.iter().collect();
        tags.sort_by_key(|(k, _)| *k);
        for (key, value) in tags {
            line.push(',');
            line.push_str(&escape_key(key));
            line.push('=');
            line.push_str(&escape_key(value));
        }

        line.push(' ');
        let fields: Vec<String> = self
            .fields
            .iter()
            .map(|(key, value)| format!("{}={}", escape_key(key), value))
            .collect();
        line.push_str(&fields.join(","));

        line.push(' ');
        line.push_str(&self.time.to_string());
        line
    }
}

/// Encode a batch, one point per line
pub fn encode(points: &[Point]) -> String {
    points
        .iter()
        .map(Point::to_line)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Reject a batch that gives one measurement field two value types
///
/// The server would store the points written before the conflicting one
/// and reject the rest.
pub fn check_field_types(points: &[Point]) -> Result<()> {
    let mut kinds: HashMap<(&str, &str), &'static str> = HashMap::new();
    for point in points {
        for (key, value) in &point.fields {
            let kind = value.kind();
            match kinds.insert((point.measurement.as_str(), key.as_str()), kind) {
                Some(previous) if previous != kind => {
                    return Err(StoreError::invalid_message(format!(
                        "field {:?} of {:?} is both {} and {} in one batch",
                        key, point.measurement, previous, kind
                    )));
                }
                _ => {}
            }
        }
    }
    Ok(())
}

pub fn senml_point(message: &SenMLMessage) -> Result<Point> {
    message.validate()?;
    Ok(Point::new(SENML_FORMAT, message.time)
        .tag("publisher", &message.publisher)
        .tag("subtopic", &message.subtopic)
        .tag("protocol", &message.protocol)
        .tag("name", &message.name)
        .field("unit", Some(FieldValue::String(message.unit.clone())))
        .field("value", message.value.map(FieldValue::Float))
        .field("string_value", message.string_value.clone().map(FieldValue::String))
        .field("bool_value", message.bool_value.map(FieldValue::Boolean))
        .field("data_value", message.data_value.clone().map(FieldValue::String))
        .field("sum", message.sum.map(FieldValue::Float))
        .field("update_time", Some(FieldValue::Integer(message.update_time))))
}

/// Every payload leaf becomes a field keyed by its flattened path
///
/// Numbers are stored as floats so a key keeps one field type across
/// writes. Arrays and empty objects are stored as JSON text; nulls are
/// dropped.
pub fn json_point(message: &JsonMessage) -> Result<Point> {
    validate_format(&message.format)?;
    let flat = flatten(&message.payload)?;

    let mut point = Point::new(&message.format, message.created)
        .tag("publisher", &message.publisher)
        .tag("subtopic", &message.subtopic)
        .tag("protocol", &message.protocol);
    for (key, value) in &flat {
        if key.starts_with('_') || key == "time" {
            return Err(StoreError::InvalidKey(format!(
                "key {:?} is reserved by the time-series store",
                key
            )));
        }
        point = point.field(key, field_value(value)?);
    }
    if point.fields.is_empty() {
        return Err(StoreError::invalid_message("JSON payload has no storable values"));
    }
    Ok(point)
}

fn field_value(value: &Value) -> Result<Option<FieldValue>> {
    Ok(match value {
        Value::Null => None,
        Value::Bool(b) => Some(FieldValue::Boolean(*b)),
        Value::Number(n) => n.as_f64().map(FieldValue::Float),
        Value::String(s) => Some(FieldValue::String(s.clone())),
        Value::Array(_) | Value::Object(_) => Some(FieldValue::String(serde_json::to_string(value)?)),
    })
}

/// Spaces and commas must be escaped
fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

/// Commas, equals signs and spaces must be escaped
fn escape_key(s: &str) -> String {
    s.replace(',', "\\,").replace('=', "\\=").replace(' ', "\\ ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_value_encoding() {
        assert_eq!(FieldValue::Float(3.15).to_string(), "3.15");
        assert_eq!(FieldValue::Integer(42).to_string(), "42i");
        assert_eq!(FieldValue::Boolean(false).to_string(), "false");
        assert_eq!(
            FieldValue::String("say \"hi\"".into()).to_string(),
            "\"say \\\"hi\\\"\""
        );
    }

    #[test]
    fn test_senml_point() {
        let message = SenMLMessage {
            publisher: "dev 1".into(),
            protocol: "mqtt".into(),
            name: "temp".into(),
            unit: "Cel".into(),
            time: 1_000_000_000,
            value: Some(23.5),
            ..Default::default()
        };
        let line = senml_point(&message).unwrap().to_line();
        assert_eq!(
            line,
            "senml,name=temp,protocol=mqtt,publisher=dev\\ 1 \
             unit=\"Cel\",value=23.5,update_time=0i 1000000000"
        );
    }

    #[test]
    fn test_json_point_flattens_payload() {
        let message = JsonMessage {
            format: "weather".into(),
            publisher: "p".into(),
            subtopic: "roof".into(),
            protocol: "http".into(),
            created: 7,
            payload: json!({"humidity": 60, "station": {"ok": true, "tags": ["a"]}, "gone": null})
                .as_object()
                .cloned()
                .unwrap(),
        };
        let point = json_point(&message).unwrap();
        assert_eq!(point.measurement, "weather");
        assert_eq!(point.fields.len(), 3);
        assert!(point
            .fields
            .contains(&("station/ok".to_string(), FieldValue::Boolean(true))));
        assert!(point
            .fields
            .contains(&("station/tags".to_string(), FieldValue::String("[\"a\"]".into()))));
        assert!(point.to_line().starts_with("weather,protocol=http,publisher=p,subtopic=roof "));
    }

    #[test]
    fn test_json_point_rejects_reserved_keys() {
        let message = JsonMessage {
            format: "weather".into(),
            payload: json!({"_value": 1}).as_object().cloned().unwrap(),
            ..Default::default()
        };
        assert_eq!(json_point(&message).unwrap_err().error_code(), "INVALID_KEY");

        let empty = JsonMessage {
            format: "weather".into(),
            ..Default::default()
        };
        assert_eq!(json_point(&empty).unwrap_err().error_code(), "INVALID_MESSAGE");
    }

    #[test]
    fn test_encode_joins_lines() {
        let a = Point::new("m", 1).field("v", Some(FieldValue::Integer(1)));
        let b = Point::new("m", 2).field("v", Some(FieldValue::Integer(2)));
        assert_eq!(encode(&[a, b]), "m v=1i 1\nm v=2i 2");
    }

    #[test]
    fn test_conflicting_field_types_are_rejected() {
        let number = Point::new("weather", 1).field("v", Some(FieldValue::Float(1.0)));
        let text = Point::new("weather", 2).field("v", Some(FieldValue::String("x".into())));
        let err = check_field_types(&[number.clone(), text]).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_MESSAGE");

        let other = Point::new("other", 2).field("v", Some(FieldValue::Boolean(true)));
        assert!(check_field_types(&[number.clone(), other]).is_ok());
        assert!(check_field_types(&[number.clone(), number]).is_ok());
    }

    #[test]
    fn test_json_batch_with_mixed_types_fails_before_encoding() {
        let messages: Vec<JsonMessage> = [json!({"v": 1}), json!({"v": "x"})]
            .iter()
            .map(|payload| JsonMessage {
                format: "weather".into(),
                payload: payload.as_object().cloned().unwrap(),
                ..Default::default()
            })
            .collect();
        let points: Vec<Point> = messages.iter().map(|m| json_point(m).unwrap()).collect();
        assert!(check_field_types(&points).is_err());
    }
}
