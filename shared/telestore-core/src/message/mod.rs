//! Canonical message shapes
//!
//! Two kinds of messages are stored:
//! - SenML records: fixed-schema numeric telemetry (name/unit/value/time)
//! - JSON messages: open-schema nested payloads, one table per format
//!
//! All timestamps are nanoseconds since the Unix epoch.

pub mod json;
pub mod senml;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, StoreError};

pub use json::JsonMessage;
pub use senml::SenMLMessage;

/// Name of the fixed SenML table/measurement; never a valid JSON format
pub const SENML_FORMAT: &str = "senml";

const MAX_FORMAT_LEN: usize = 63;

/// Message kind, used to route batches and to check restores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    SenML,
    Json,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SenML => write!(f, "senml"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// A single decoded message of either kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Message {
    SenML(SenMLMessage),
    Json(JsonMessage),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::SenML(_) => MessageKind::SenML,
            Self::Json(_) => MessageKind::Json,
        }
    }

    /// Sort/bucket key in nanoseconds
    pub fn time(&self) -> i64 {
        match self {
            Self::SenML(m) => m.time,
            Self::Json(m) => m.created,
        }
    }

    pub fn as_senml(&self) -> Option<&SenMLMessage> {
        match self {
            Self::SenML(m) => Some(m),
            Self::Json(_) => None,
        }
    }

    pub fn as_json(&self) -> Option<&JsonMessage> {
        match self {
            Self::Json(m) => Some(m),
            Self::SenML(_) => None,
        }
    }
}

impl From<SenMLMessage> for Message {
    fn from(m: SenMLMessage) -> Self {
        Self::SenML(m)
    }
}

impl From<JsonMessage> for Message {
    fn from(m: JsonMessage) -> Self {
        Self::Json(m)
    }
}

/// A batch handed to a consumer by the delivery mechanism
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBatch {
    SenML(Vec<SenMLMessage>),
    Json(Vec<JsonMessage>),
}

impl MessageBatch {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::SenML(_) => MessageKind::SenML,
            Self::Json(_) => MessageKind::Json,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::SenML(msgs) => msgs.len(),
            Self::Json(msgs) => msgs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Transport metadata attached to every raw message on reception
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    pub publisher: String,
    pub subtopic: String,
    pub protocol: String,
    /// Reception time in nanoseconds
    pub received: i64,
}

impl Envelope {
    pub fn new(publisher: impl Into<String>, protocol: impl Into<String>, received: i64) -> Self {
        Self {
            publisher: publisher.into(),
            subtopic: String::new(),
            protocol: protocol.into(),
            received,
        }
    }

    pub fn with_subtopic(mut self, subtopic: impl Into<String>) -> Self {
        self.subtopic = subtopic.into();
        self
    }
}

/// Check that a JSON format name can be used as a table or measurement name
pub fn validate_format(format: &str) -> Result<()> {
    if format.is_empty() || format.len() > MAX_FORMAT_LEN {
        return Err(StoreError::invalid_message(format!(
            "format name must be 1..={} characters",
            MAX_FORMAT_LEN
        )));
    }
    if format.eq_ignore_ascii_case(SENML_FORMAT) {
        return Err(StoreError::invalid_message("format name `senml` is reserved"));
    }
    if !format
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(StoreError::invalid_message(format!(
            "format name {:?} contains unsupported characters",
            format
        )));
    }
    Ok(())
}

/// Current time in nanoseconds since the Unix epoch
pub fn now_nanos() -> i64 {
    chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or(i64::MAX)
}
