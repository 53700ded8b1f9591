//! JSON repository, one table per format

use async_trait::async_trait;
use serde_json::Value;
use tokio_postgres::Row;
use tracing::{info, instrument};

use telestore_core::message::json::set_path;
use telestore_core::{
    ensure_kind, Aggregation, Conditions, JsonMessage, JsonPageMetadata, Message, MessageKind,
    MessageRepository, MessagesPage, Result, StoreError,
};

use super::{aggregate_value, bucket_time, column, number, Reader};
use crate::sql::aggregate;
use crate::sql::select::{self, Source};
use crate::writer::PostgresConsumer;

/// List, backup, restore and remove over the format tables
#[derive(Clone)]
pub struct PostgresJsonRepository {
    reader: Reader,
    writer: PostgresConsumer,
}

impl PostgresJsonRepository {
    pub(crate) fn new(reader: Reader, writer: PostgresConsumer) -> Self {
        Self { reader, writer }
    }

    async fn list_plain(&self, page: &JsonPageMetadata, conditions: &Conditions) -> Result<MessagesPage> {
        let source = Source::Json(page.format.clone());
        let rows = self
            .reader
            .rows(&select::list(&source, conditions, page.limit, page.offset, page.dir))
            .await?;
        let total = self.reader.count(&select::count(&source, conditions)).await?;

        let messages = rows
            .iter()
            .map(|row| decode(row, &page.format).map(Message::Json))
            .collect::<Result<Vec<_>>>()?;
        Ok(MessagesPage { total, messages })
    }

    async fn list_aggregated(
        &self,
        page: &JsonPageMetadata,
        conditions: &Conditions,
        aggregation: &Aggregation,
    ) -> Result<MessagesPage> {
        let source = Source::Json(page.format.clone());
        let dialect = self.reader.dialect();
        let rows = self
            .reader
            .rows(&aggregate::list(
                &source,
                dialect,
                conditions,
                aggregation,
                page.limit,
                page.offset,
                page.dir,
            )?)
            .await?;
        let total = self
            .reader
            .count(&aggregate::count(&source, dialect, conditions, aggregation)?)
            .await?;

        let messages = rows
            .iter()
            .map(|row| decode_aggregated(row, &page.format, aggregation).map(Message::Json))
            .collect::<Result<Vec<_>>>()?;
        Ok(MessagesPage { total, messages })
    }
}

#[async_trait]
impl MessageRepository for PostgresJsonRepository {
    type Page = JsonPageMetadata;

    #[instrument(skip(self, page), fields(format = %page.format, limit = page.limit, offset = page.offset))]
    async fn list(&self, page: &JsonPageMetadata) -> Result<MessagesPage> {
        page.validate()?;
        let conditions = Conditions::for_json(page);
        match &page.aggregation {
            Some(aggregation) => self.list_aggregated(page, &conditions, aggregation).await,
            None => self.list_plain(page, &conditions).await,
        }
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
        let conditions = Conditions::for_json(page);
        let deleted = self
            .reader
            .delete(&select::delete(&Source::Json(page.format.clone()), &conditions))
            .await?;
        info!(deleted, "Removed JSON messages");
        Ok(())
    }
}

fn decode(row: &Row, format: &str) -> Result<JsonMessage> {
    let payload = match column::<Value>(row, "payload")? {
        Value::Object(map) => map,
        other => {
            return Err(StoreError::read(format!(
                "stored payload is not an object: {}",
                other
            )))
        }
    };
    Ok(JsonMessage {
        format: format.to_string(),
        publisher: column(row, "publisher")?,
        subtopic: column(row, "subtopic")?,
        protocol: column(row, "protocol")?,
        created: column(row, "created")?,
        payload,
    })
}

/// Merge each field's bucket aggregate into the representative payload
///
/// AVG/COUNT rows are moved to the bucket start; MIN/MAX rows keep the time
/// of the record that holds the first field's extreme.
fn decode_aggregated(row: &Row, format: &str, aggregation: &Aggregation) -> Result<JsonMessage> {
    let mut message = decode(row, format)?;
    for (i, field) in aggregation.fields.iter().enumerate() {
        set_path(&mut message.payload, field, number(aggregate_value(row, i)?));
    }
    if !aggregation.func.selects_source_row() {
        message.created = bucket_time(row)?;
    }
    Ok(message)
}
