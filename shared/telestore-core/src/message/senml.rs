//! SenML records
//!
//! Wire packs follow RFC 8428 (JSON array of records with base fields).
//! [`normalize`] resolves base fields and relative times into flat
//! [`SenMLMessage`] values. This is the only place where SenML float
//! seconds are converted into canonical nanoseconds.

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};

use super::Envelope;
use crate::error::{Result, StoreError};

const NANOS_PER_SEC: f64 = 1e9;

/// Times below 2^28 seconds are relative to the reception time (RFC 8428 §4.5.3)
const RELATIVE_TIME_THRESHOLD: f64 = 268_435_456.0;

/// A normalized SenML record as stored
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SenMLMessage {
    pub publisher: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subtopic: String,
    pub protocol: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub unit: String,
    /// Nanoseconds since the Unix epoch
    pub time: i64,
    /// Nanoseconds
    #[serde(default)]
    pub update_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bool_value: Option<bool>,
    /// Base64 encoded binary value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sum: Option<f64>,
}

impl SenMLMessage {
    /// Number of value-kind fields set; valid records have at most one
    pub fn value_kinds(&self) -> usize {
        [
            self.value.is_some(),
            self.string_value.is_some(),
            self.bool_value.is_some(),
            self.data_value.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count()
    }

    /// Check the storage invariants of an already-normalized record
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(StoreError::invalid_message("SenML record without a name"));
        }
        if self.value_kinds() > 1 {
            return Err(StoreError::invalid_message(format!(
                "SenML record {} carries more than one value",
                self.name
            )));
        }
        if self.value_kinds() == 0 && self.sum.is_none() {
            return Err(StoreError::invalid_message(format!(
                "SenML record {} carries neither a value nor a sum",
                self.name
            )));
        }
        if let Some(data) = &self.data_value {
            decode_data_value(data)?;
        }
        Ok(())
    }
}

/// A SenML record as it appears on the wire
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SenMLRecord {
    #[serde(rename = "bn", default, skip_serializing_if = "Option::is_none")]
    pub base_name: Option<String>,
    #[serde(rename = "bt", default, skip_serializing_if = "Option::is_none")]
    pub base_time: Option<f64>,
    #[serde(rename = "bu", default, skip_serializing_if = "Option::is_none")]
    pub base_unit: Option<String>,
    #[serde(rename = "bver", default, skip_serializing_if = "Option::is_none")]
    pub base_version: Option<u32>,
    #[serde(rename = "bv", default, skip_serializing_if = "Option::is_none")]
    pub base_value: Option<f64>,
    #[serde(rename = "bs", default, skip_serializing_if = "Option::is_none")]
    pub base_sum: Option<f64>,
    #[serde(rename = "n", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "u", default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(rename = "t", default, skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
    #[serde(rename = "ut", default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<f64>,
    #[serde(rename = "v", default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(rename = "vs", default, skip_serializing_if = "Option::is_none")]
    pub string_value: Option<String>,
    #[serde(rename = "vb", default, skip_serializing_if = "Option::is_none")]
    pub bool_value: Option<bool>,
    #[serde(rename = "vd", default, skip_serializing_if = "Option::is_none")]
    pub data_value: Option<String>,
    #[serde(rename = "s", default, skip_serializing_if = "Option::is_none")]
    pub sum: Option<f64>,
}

/// Base fields carried from one record to the following ones
#[derive(Debug, Default)]
struct BaseFields {
    name: String,
    time: f64,
    unit: Option<String>,
    value: f64,
    sum: f64,
}

impl BaseFields {
    fn absorb(&mut self, record: &SenMLRecord) {
        if let Some(bn) = &record.base_name {
            self.name = bn.clone();
        }
        if let Some(bt) = record.base_time {
            self.time = bt;
        }
        if let Some(bu) = &record.base_unit {
            self.unit = Some(bu.clone());
        }
        if let Some(bv) = record.base_value {
            self.value = bv;
        }
        if let Some(bs) = record.base_sum {
            self.sum = bs;
        }
    }
}

/// Decode a JSON SenML pack and normalize it
pub fn parse(payload: &[u8], envelope: &Envelope) -> Result<Vec<SenMLMessage>> {
    let records: Vec<SenMLRecord> = serde_json::from_slice(payload)?;
    normalize(records, envelope)
}

/// Resolve base fields and times of a pack into stored records
///
/// The whole pack is rejected if any record is invalid.
pub fn normalize(records: Vec<SenMLRecord>, envelope: &Envelope) -> Result<Vec<SenMLMessage>> {
    if records.is_empty() {
        return Err(StoreError::invalid_message("empty SenML pack"));
    }

    let mut base = BaseFields::default();
    let mut messages = Vec::with_capacity(records.len());

    for record in records {
        base.absorb(&record);

        let name = format!("{}{}", base.name, record.name.as_deref().unwrap_or(""));
        validate_name(&name)?;

        let message = SenMLMessage {
            publisher: envelope.publisher.clone(),
            subtopic: envelope.subtopic.clone(),
            protocol: envelope.protocol.clone(),
            unit: record
                .unit
                .clone()
                .or_else(|| base.unit.clone())
                .unwrap_or_default(),
            time: resolve_time(base.time + record.time.unwrap_or(0.0), envelope.received),
            update_time: record.update_time.map(seconds_to_nanos).unwrap_or(0),
            value: record.value.map(|v| base.value + v),
            string_value: record.string_value,
            bool_value: record.bool_value,
            data_value: record.data_value,
            sum: record.sum.map(|s| base.sum + s),
            name,
        };
        message.validate()?;
        messages.push(message);
    }

    Ok(messages)
}

fn resolve_time(seconds: f64, received: i64) -> i64 {
    if seconds == 0.0 {
        received
    } else if seconds.abs() < RELATIVE_TIME_THRESHOLD {
        received.saturating_add(seconds_to_nanos(seconds))
    } else {
        seconds_to_nanos(seconds)
    }
}

fn seconds_to_nanos(seconds: f64) -> i64 {
    (seconds * NANOS_PER_SEC).round() as i64
}

fn validate_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() => {}
        _ => {
            return Err(StoreError::invalid_message(format!(
                "invalid SenML name {:?}",
                name
            )))
        }
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | ':' | '.' | '/' | '_')) {
        return Err(StoreError::invalid_message(format!(
            "invalid SenML name {:?}",
            name
        )));
    }
    Ok(())
}

/// Decode a `vd` field; RFC 8428 uses unpadded base64url, padded standard base64 is tolerated
pub fn decode_data_value(data: &str) -> Result<Vec<u8>> {
    general_purpose::URL_SAFE_NO_PAD
        .decode(data)
        .or_else(|_| general_purpose::STANDARD.decode(data))
        .map_err(|e| StoreError::invalid_message_from("data value is not base64", e))
}
