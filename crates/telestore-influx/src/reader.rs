//! Flux-backed repositories

use async_trait::async_trait;
use chrono::{SecondsFormat, TimeZone, Utc};
use serde_json::{Map, Number, Value};
use tracing::{info, instrument};

use telestore_core::message::json::parse_flat;
use telestore_core::message::SENML_FORMAT;
use telestore_core::{
    ensure_kind, AggregateFn, Conditions, JsonMessage, JsonPageMetadata, Message, MessageKind,
    MessageRepository, MessagesPage, Result, SenMLMessage, SenMLPageMetadata, StoreError,
};

use crate::annotated::{self, Cell, Record};
use crate::client::{InfluxClient, InfluxError};
use crate::flux::Plan;
use crate::writer::InfluxConsumer;

/// Columns added by Flux or carried as tags, never payload fields
const SYSTEM_COLUMNS: [&str; 9] = [
    "result",
    "table",
    "_start",
    "_stop",
    "_time",
    "_measurement",
    "publisher",
    "subtopic",
    "protocol",
];

#[derive(Clone)]
pub struct InfluxSenMLRepository {
    client: InfluxClient,
    writer: InfluxConsumer,
}

impl InfluxSenMLRepository {
    pub fn new(client: InfluxClient, writer: InfluxConsumer) -> Self {
        Self { client, writer }
    }
}

#[async_trait]
impl MessageRepository for InfluxSenMLRepository {
    type Page = SenMLPageMetadata;

    #[instrument(skip(self, page), fields(limit = page.limit, offset = page.offset))]
    async fn list(&self, page: &SenMLPageMetadata) -> Result<MessagesPage> {
        page.validate()?;
        let plan = Plan::new(SENML_FORMAT, &Conditions::for_senml(page))?;
        let bucket = self.client.bucket();
        let value = ["value".to_string()];

        let (list, count) = match &page.aggregation {
            Some(aggregation) => (
                plan.aggregate_list(bucket, aggregation, &value, page.limit, page.offset, page.dir)?,
                plan.aggregate_count(bucket, aggregation, &value)?,
            ),
            None => (
                plan.list(bucket, page.limit, page.offset, page.dir),
                plan.count(bucket),
            ),
        };

        let func = page.aggregation.as_ref().map(|a| a.func);
        let messages = query(&self.client, &list)
            .await?
            .iter()
            .map(|record| Message::SenML(decode_senml(record, func)))
            .collect();
        let total = total(&query(&self.client, &count).await?);
        Ok(MessagesPage { total, messages })
    }

    #[instrument(skip(self, messages), fields(count = messages.len()))]
    async fn restore(&self, messages: Vec<Message>) -> Result<()> {
        ensure_kind(MessageKind::SenML, &messages)?;
        let records: Vec<SenMLMessage> = messages
            .into_iter()
            .filter_map(|m| match m {
                Message::SenML(record) => Some(record),
                Message::Json(_) => None,
            })
            .collect();
        self.writer.save_senml(&records).await
    }

    #[instrument(skip(self, page))]
    async fn remove(&self, page: &SenMLPageMetadata) -> Result<()> {
        page.validate()?;
        let plan = Plan::new(SENML_FORMAT, &Conditions::for_senml(page))?;
        delete(&self.client, &plan).await
    }
}

#[derive(Clone)]
pub struct InfluxJsonRepository {
    client: InfluxClient,
    writer: InfluxConsumer,
}

impl InfluxJsonRepository {
    pub fn new(client: InfluxClient, writer: InfluxConsumer) -> Self {
        Self { client, writer }
    }
}

#[async_trait]
impl MessageRepository for InfluxJsonRepository {
    type Page = JsonPageMetadata;

    #[instrument(skip(self, page), fields(format = %page.format, limit = page.limit, offset = page.offset))]
    async fn list(&self, page: &JsonPageMetadata) -> Result<MessagesPage> {
        page.validate()?;
        let plan = Plan::new(&page.format, &Conditions::for_json(page))?;
        let bucket = self.client.bucket();

        let (list, count) = match &page.aggregation {
            Some(aggregation) => {
                let fields: Vec<String> = aggregation.fields.iter().map(|f| f.flat_key()).collect();
                (
                    plan.aggregate_list(bucket, aggregation, &fields, page.limit, page.offset, page.dir)?,
                    plan.aggregate_count(bucket, aggregation, &fields)?,
                )
            }
            None => (
                plan.list(bucket, page.limit, page.offset, page.dir),
                plan.count(bucket),
            ),
        };

        let messages = query(&self.client, &list)
            .await?
            .iter()
            .map(|record| Message::Json(decode_json(record, &page.format)))
            .collect();
        let total = total(&query(&self.client, &count).await?);
        Ok(MessagesPage { total, messages })
    }

    #[instrument(skip(self, messages), fields(count = messages.len()))]
    async fn restore(&self, messages: Vec<Message>) -> Result<()> {
        ensure_kind(MessageKind::Json, &messages)?;
        let records: Vec<JsonMessage> = messages
            .into_iter()
            .filter_map(|m| match m {
                Message::Json(record) => Some(record),
                Message::SenML(_) => None,
            })
            .collect();
        self.writer.save_json(&records).await
    }

    #[instrument(skip(self, page), fields(format = %page.format))]
    async fn remove(&self, page: &JsonPageMetadata) -> Result<()> {
        page.validate()?;
        let plan = Plan::new(&page.format, &Conditions::for_json(page))?;
        delete(&self.client, &plan).await
    }
}

async fn query(client: &InfluxClient, flux: &str) -> Result<Vec<Record>> {
    let body = client.query(flux).await.map_err(read_error)?;
    annotated::decode(&body).map_err(read_error)
}

async fn delete(client: &InfluxClient, plan: &Plan) -> Result<()> {
    let predicate = plan.delete_predicate()?;
    let (start, stop) = plan.delete_range();
    client
        .delete(&rfc3339(start), &rfc3339(stop), &predicate)
        .await
        .map_err(StoreError::delete)?;
    info!(predicate = %predicate, "Removed points");
    Ok(())
}

fn read_error(err: InfluxError) -> StoreError {
    if err.is_rejected() {
        StoreError::InvalidQuery(err.to_string())
    } else {
        StoreError::read(err)
    }
}

/// Sum of the count column over every result table
fn total(records: &[Record]) -> u64 {
    records
        .iter()
        .filter_map(|r| r.get("_measurement").and_then(Cell::as_i64))
        .map(|n| u64::try_from(n).unwrap_or(0))
        .sum()
}

fn rfc3339(nanos: i64) -> String {
    Utc.timestamp_nanos(nanos)
        .to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn text(record: &Record, column: &str) -> String {
    record
        .get(column)
        .and_then(Cell::as_str)
        .unwrap_or_default()
        .to_string()
}

fn decode_senml(record: &Record, aggregate: Option<AggregateFn>) -> SenMLMessage {
    let time = record.get("_time").and_then(Cell::as_i64).unwrap_or_default();
    let value = record.get("value").and_then(Cell::as_f64);
    let message = SenMLMessage {
        publisher: text(record, "publisher"),
        subtopic: text(record, "subtopic"),
        protocol: text(record, "protocol"),
        name: text(record, "name"),
        unit: text(record, "unit"),
        time,
        value,
        ..SenMLMessage::default()
    };
    if aggregate.is_some() {
        return message;
    }
    SenMLMessage {
        update_time: record.get("update_time").and_then(Cell::as_i64).unwrap_or_default(),
        string_value: record.get("string_value").and_then(Cell::as_str).map(str::to_string),
        bool_value: record.get("bool_value").and_then(Cell::as_bool),
        data_value: record.get("data_value").and_then(Cell::as_str).map(str::to_string),
        sum: record.get("sum").and_then(Cell::as_f64),
        ..message
    }
}

fn decode_json(record: &Record, format: &str) -> JsonMessage {
    let mut flat = Map::new();
    for (column, cell) in record {
        if SYSTEM_COLUMNS.contains(&column.as_str()) {
            continue;
        }
        if let Some(value) = cell_value(cell) {
            flat.insert(column.clone(), value);
        }
    }
    JsonMessage {
        format: format.to_string(),
        publisher: text(record, "publisher"),
        subtopic: text(record, "subtopic"),
        protocol: text(record, "protocol"),
        created: record.get("_time").and_then(Cell::as_i64).unwrap_or_default(),
        payload: parse_flat(&flat),
    }
}

fn cell_value(cell: &Cell) -> Option<Value> {
    match cell {
        Cell::Null => None,
        Cell::String(s) => Some(Value::String(s.clone())),
        Cell::Double(v) => Number::from_f64(*v).map(Value::Number),
        Cell::Long(v) | Cell::Time(v) => Some(Value::Number((*v).into())),
        Cell::Unsigned(v) => Some(Value::Number((*v).into())),
        Cell::Bool(b) => Some(Value::Bool(*b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(cells: &[(&str, Cell)]) -> Record {
        cells
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_decode_senml_record() {
        let r = record(&[
            ("_time", Cell::Time(5)),
            ("_measurement", Cell::String("senml".into())),
            ("publisher", Cell::String("p".into())),
            ("name", Cell::String("temp".into())),
            ("unit", Cell::String("Cel".into())),
            ("value", Cell::Double(1.5)),
            ("update_time", Cell::Long(3)),
        ]);
        let message = decode_senml(&r, None);
        assert_eq!(message.publisher, "p");
        assert_eq!(message.subtopic, "");
        assert_eq!(message.time, 5);
        assert_eq!(message.value, Some(1.5));
        assert_eq!(message.update_time, 3);

        let counted = record(&[("_time", Cell::Time(0)), ("value", Cell::Long(4))]);
        assert_eq!(decode_senml(&counted, Some(AggregateFn::Count)).value, Some(4.0));
    }

    #[test]
    fn test_decode_json_record_nests_payload() {
        let r = record(&[
            ("result", Cell::String("_result".into())),
            ("table", Cell::Long(0)),
            ("_time", Cell::Time(9)),
            ("_measurement", Cell::String("weather".into())),
            ("publisher", Cell::String("p".into())),
            ("station/temp", Cell::Double(20.5)),
            ("station/ok", Cell::Bool(true)),
            ("humidity", Cell::Null),
        ]);
        let message = decode_json(&r, "weather");
        assert_eq!(message.created, 9);
        assert_eq!(
            Value::Object(message.payload),
            serde_json::json!({"station": {"temp": 20.5, "ok": true}})
        );
    }

    #[test]
    fn test_total_and_time_format() {
        let counts = vec![record(&[("_measurement", Cell::Long(7))])];
        assert_eq!(total(&counts), 7);
        assert_eq!(total(&[]), 0);
        assert_eq!(rfc3339(1_500_000_000), "1970-01-01T00:00:01.500000000Z");
    }
}
