//! SenML repository

use async_trait::async_trait;
use tokio_postgres::Row;
use tracing::{info, instrument};

use telestore_core::{
    ensure_kind, AggregateFn, Aggregation, Conditions, Message, MessageKind, MessageRepository,
    MessagesPage, Result, SenMLMessage, SenMLPageMetadata,
};

use super::{aggregate_value, bucket_time, column, Reader};
use crate::sql::select::{self, Source};
use crate::sql::aggregate;
use crate::writer::PostgresConsumer;

/// List, backup, restore and remove over the `senml` table
#[derive(Clone)]
pub struct PostgresSenMLRepository {
    reader: Reader,
    writer: PostgresConsumer,
}

impl PostgresSenMLRepository {
    pub(crate) fn new(reader: Reader, writer: PostgresConsumer) -> Self {
        Self { reader, writer }
    }

    async fn list_plain(&self, page: &SenMLPageMetadata, conditions: &Conditions) -> Result<MessagesPage> {
        let rows = self
            .reader
            .rows(&select::list(&Source::SenML, conditions, page.limit, page.offset, page.dir))
            .await?;
        let total = self.reader.count(&select::count(&Source::SenML, conditions)).await?;

        let messages = rows
            .iter()
            .map(|row| decode(row).map(Message::SenML))
            .collect::<Result<Vec<_>>>()?;
        Ok(MessagesPage { total, messages })
    }

    async fn list_aggregated(
        &self,
        page: &SenMLPageMetadata,
        conditions: &Conditions,
        aggregation: &Aggregation,
    ) -> Result<MessagesPage> {
        let dialect = self.reader.dialect();
        let rows = self
            .reader
            .rows(&aggregate::list(
                &Source::SenML,
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
            .count(&aggregate::count(&Source::SenML, dialect, conditions, aggregation)?)
            .await?;

        let messages = rows
            .iter()
            .map(|row| decode_aggregated(row, aggregation.func).map(Message::SenML))
            .collect::<Result<Vec<_>>>()?;
        Ok(MessagesPage { total, messages })
    }
}

#[async_trait]
impl MessageRepository for PostgresSenMLRepository {
    type Page = SenMLPageMetadata;

    #[instrument(skip(self, page), fields(limit = page.limit, offset = page.offset))]
    async fn list(&self, page: &SenMLPageMetadata) -> Result<MessagesPage> {
        page.validate()?;
        let conditions = Conditions::for_senml(page);
        match &page.aggregation {
            Some(aggregation) => self.list_aggregated(page, &conditions, aggregation).await,
            None => self.list_plain(page, &conditions).await,
        }
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
        let conditions = Conditions::for_senml(page);
        let deleted = self
            .reader
            .delete(&select::delete(&Source::SenML, &conditions))
            .await?;
        info!(deleted, "Removed SenML messages");
        Ok(())
    }
}

fn decode(row: &Row) -> Result<SenMLMessage> {
    Ok(SenMLMessage {
        subtopic: column(row, "subtopic")?,
        publisher: column(row, "publisher")?,
        protocol: column(row, "protocol")?,
        name: column(row, "name")?,
        unit: column(row, "unit")?,
        value: column(row, "value")?,
        string_value: column(row, "string_value")?,
        bool_value: column(row, "bool_value")?,
        data_value: column(row, "data_value")?,
        sum: column(row, "sum")?,
        time: column(row, "time")?,
        update_time: column(row, "update_time")?,
    })
}

/// Merge the bucket aggregate into the representative row
///
/// MIN/MAX rows are real records whose value is the aggregate. AVG/COUNT
/// rows keep only the metadata of the latest record in the bucket and
/// carry the aggregate at the bucket start.
fn decode_aggregated(row: &Row, func: AggregateFn) -> Result<SenMLMessage> {
    let mut message = decode(row)?;
    let value = aggregate_value(row, 0)?;
    if func.selects_source_row() {
        message.value = value;
        return Ok(message);
    }
    Ok(SenMLMessage {
        value,
        string_value: None,
        bool_value: None,
        data_value: None,
        sum: None,
        time: bucket_time(row)?,
        update_time: 0,
        ..message
    })
}
