//! Page queries and result pages
//!
//! Every filter is optional; `Some(0.0)`, `Some(false)` and `Some("")` are
//! real filters, only `None` means "no filter".

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, StoreError};
use crate::message::{validate_format, Message};
use crate::path::JsonPath;

/// Sort direction on the time column
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    Asc,
    #[default]
    Desc,
}

impl Order {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Comparator applied to the SenML numeric value filter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparator {
    #[default]
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl FromStr for Comparator {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "eq" => Ok(Self::Eq),
            "lt" => Ok(Self::Lt),
            "lte" => Ok(Self::Lte),
            "gt" => Ok(Self::Gt),
            "gte" => Ok(Self::Gte),
            other => Err(StoreError::InvalidQuery(format!("unknown comparator {:?}", other))),
        }
    }
}

/// Aggregate function computed per bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFn {
    Min,
    Max,
    Avg,
    Count,
}

impl AggregateFn {
    /// MIN and MAX pick an existing row; AVG and COUNT synthesize one
    pub fn selects_source_row(&self) -> bool {
        matches!(self, Self::Min | Self::Max)
    }
}

impl FromStr for AggregateFn {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "avg" => Ok(Self::Avg),
            "count" => Ok(Self::Count),
            other => Err(StoreError::InvalidQuery(format!(
                "unknown aggregation {:?}",
                other
            ))),
        }
    }
}

impl fmt::Display for AggregateFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Min => "min",
            Self::Max => "max",
            Self::Avg => "avg",
            Self::Count => "count",
        };
        write!(f, "{}", name)
    }
}

/// Calendar unit of a bucket width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl TimeUnit {
    /// Fixed length in seconds; months are 30 days and years 365 days
    pub fn seconds(&self) -> i64 {
        match self {
            Self::Minute => 60,
            Self::Hour => 3_600,
            Self::Day => 86_400,
            Self::Week => 604_800,
            Self::Month => 2_592_000,
            Self::Year => 31_536_000,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
        }
    }
}

impl FromStr for TimeUnit {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        let unit = s.trim().to_ascii_lowercase();
        match unit.trim_end_matches('s') {
            "minute" | "min" => Ok(Self::Minute),
            "hour" => Ok(Self::Hour),
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            "year" => Ok(Self::Year),
            _ => Err(StoreError::InvalidQuery(format!("unknown time unit {:?}", s))),
        }
    }
}

/// Width of an aggregation bucket, e.g. `5 hours`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketWidth {
    pub value: u32,
    pub unit: TimeUnit,
}

impl BucketWidth {
    pub fn new(value: u32, unit: TimeUnit) -> Result<Self> {
        if value == 0 {
            return Err(StoreError::InvalidQuery("bucket width must be positive".into()));
        }
        Ok(Self { value, unit })
    }

    pub fn seconds(&self) -> i64 {
        i64::from(self.value) * self.unit.seconds()
    }

    pub fn nanos(&self) -> i64 {
        self.seconds() * 1_000_000_000
    }

    /// Single-unit widths can use a native calendar truncation
    pub fn is_unit(&self) -> bool {
        self.value == 1
    }
}

impl FromStr for BucketWidth {
    type Err = StoreError;

    /// Parses `"5 hours"`, `"1 day"` or a bare unit such as `"hour"`
    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some(value), Some(unit), None) => {
                let value = value
                    .parse::<u32>()
                    .map_err(|_| StoreError::InvalidQuery(format!("invalid bucket width {:?}", s)))?;
                Self::new(value, unit.parse()?)
            }
            (Some(unit), None, None) => Self::new(1, unit.parse()?),
            _ => Err(StoreError::InvalidQuery(format!("invalid bucket width {:?}", s))),
        }
    }
}

impl fmt::Display for BucketWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit.as_str())
    }
}

/// Requested time-bucket aggregation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    pub func: AggregateFn,
    pub width: BucketWidth,
    /// Aggregated payload fields; ignored for SenML, which aggregates `value`
    #[serde(default)]
    pub fields: Vec<JsonPath>,
}

impl Aggregation {
    pub fn new(func: AggregateFn, width: BucketWidth) -> Self {
        Self {
            func,
            width,
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: JsonPath) -> Self {
        self.fields.push(field);
        self
    }
}

/// Query over the SenML table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SenMLPageMetadata {
    pub offset: u64,
    /// 0 means unbounded
    pub limit: u64,
    pub subtopic: Option<String>,
    pub publisher: Option<String>,
    pub protocol: Option<String>,
    pub name: Option<String>,
    pub value: Option<f64>,
    pub comparator: Option<Comparator>,
    pub bool_value: Option<bool>,
    pub string_value: Option<String>,
    pub data_value: Option<String>,
    /// Inclusive lower bound, nanoseconds
    pub from: Option<i64>,
    /// Inclusive upper bound, nanoseconds
    pub to: Option<i64>,
    pub aggregation: Option<Aggregation>,
    #[serde(default)]
    pub dir: Order,
}

impl SenMLPageMetadata {
    pub fn validate(&self) -> Result<()> {
        validate_range(self.from, self.to)
    }

    /// Same filter with no limit, used for backups
    pub fn unbounded(&self) -> Self {
        Self {
            limit: 0,
            ..self.clone()
        }
    }
}

/// Query over one JSON format table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JsonPageMetadata {
    pub offset: u64,
    /// 0 means unbounded
    pub limit: u64,
    pub format: String,
    pub subtopic: Option<String>,
    pub publisher: Option<String>,
    pub protocol: Option<String>,
    /// Only messages whose payload has a value at this path
    pub filter: Option<JsonPath>,
    /// Inclusive lower bound, nanoseconds
    pub from: Option<i64>,
    /// Inclusive upper bound, nanoseconds
    pub to: Option<i64>,
    pub aggregation: Option<Aggregation>,
    #[serde(default)]
    pub dir: Order,
}

impl JsonPageMetadata {
    pub fn for_format(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_format(&self.format).map_err(|e| StoreError::InvalidQuery(e.to_string()))?;
        validate_range(self.from, self.to)?;
        if let Some(agg) = &self.aggregation {
            if agg.fields.is_empty() {
                return Err(StoreError::InvalidQuery(
                    "JSON aggregation needs at least one field".into(),
                ));
            }
        }
        Ok(())
    }

    /// Same filter with no limit, used for backups
    pub fn unbounded(&self) -> Self {
        Self {
            limit: 0,
            ..self.clone()
        }
    }
}

fn validate_range(from: Option<i64>, to: Option<i64>) -> Result<()> {
    match (from, to) {
        (Some(from), Some(to)) if from > to => Err(StoreError::InvalidQuery(format!(
            "time range is empty: from {} > to {}",
            from, to
        ))),
        _ => Ok(()),
    }
}

/// One page of decoded messages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessagesPage {
    /// Matches for the filter, independent of limit and offset
    pub total: u64,
    pub messages: Vec<Message>,
}

impl MessagesPage {
    pub fn empty() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_width_parse() {
        let width: BucketWidth = "5 hours".parse().unwrap();
        assert_eq!(width.value, 5);
        assert_eq!(width.unit, TimeUnit::Hour);
        assert_eq!(width.seconds(), 18_000);
        assert!(!width.is_unit());

        let width: BucketWidth = "day".parse().unwrap();
        assert!(width.is_unit());
        assert_eq!(width.to_string(), "1 day");

        assert!("0 hours".parse::<BucketWidth>().is_err());
        assert!("5 fortnights".parse::<BucketWidth>().is_err());
        assert!("".parse::<BucketWidth>().is_err());
    }

    #[test]
    fn test_aggregate_fn_parse() {
        assert_eq!("AVG".parse::<AggregateFn>().unwrap(), AggregateFn::Avg);
        assert!(AggregateFn::Max.selects_source_row());
        assert!(!AggregateFn::Count.selects_source_row());
        assert!("sum".parse::<AggregateFn>().is_err());
    }

    #[test]
    fn test_validate_json_page() {
        let mut page = JsonPageMetadata::for_format("weather");
        assert!(page.validate().is_ok());

        page.aggregation = Some(Aggregation::new(
            AggregateFn::Avg,
            BucketWidth::new(1, TimeUnit::Hour).unwrap(),
        ));
        assert!(page.validate().is_err());

        page.aggregation = page
            .aggregation
            .take()
            .map(|agg| agg.with_field(JsonPath::parse("humidity").unwrap()));
        assert!(page.validate().is_ok());

        page.from = Some(10);
        page.to = Some(5);
        assert!(page.validate().is_err());

        assert!(JsonPageMetadata::for_format("bad name").validate().is_err());
    }

    #[test]
    fn test_unbounded_keeps_filters() {
        let page = SenMLPageMetadata {
            limit: 10,
            offset: 3,
            publisher: Some("p".into()),
            ..Default::default()
        };
        let all = page.unbounded();
        assert_eq!(all.limit, 0);
        assert_eq!(all.offset, 3);
        assert_eq!(all.publisher.as_deref(), Some("p"));
    }
}
