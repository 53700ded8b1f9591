//! Dotted paths into nested JSON payloads

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, StoreError};
use crate::message::json::SEPARATOR;

/// A dotted field path such as `sensor.temperature`
///
/// Used both for filter predicates and for aggregated fields, so the two
/// always agree on the path syntax.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JsonPath {
    segments: Vec<String>,
}

impl JsonPath {
    pub fn parse(path: &str) -> Result<Self> {
        let segments: Vec<String> = path.split('.').map(str::to_string).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(StoreError::InvalidQuery(format!("invalid JSON path {:?}", path)));
        }
        if segments.iter().any(|s| s.contains(SEPARATOR)) {
            return Err(StoreError::InvalidQuery(format!(
                "JSON path {:?} contains {:?}",
                path, SEPARATOR
            )));
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Key of this path in a flattened payload
    pub fn flat_key(&self) -> String {
        self.segments.join(&SEPARATOR.to_string())
    }
}

impl FromStr for JsonPath {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for JsonPath {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<JsonPath> for String {
    fn from(path: JsonPath) -> Self {
        path.to_string()
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}
