//! Transactional batch writer
//!
//! Every batch is inserted inside one transaction. JSON batches whose
//! format table is missing get the table created and are retried once.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use deadpool_postgres::Transaction;
use serde_json::Value;
use tokio_postgres::Statement;
use tracing::{debug, info, instrument, warn};

use telestore_core::message::json::flatten;
use telestore_core::{
    validate_format, Consumer, JsonMessage, MessageBatch, Result, SenMLMessage, StoreError,
};

use crate::error::{classify, finish, Op};
use crate::pool::PgPool;
use crate::schema::SchemaManager;
use crate::sql::select::{self, Source};

/// Writes SenML and JSON batches
#[derive(Clone)]
pub struct PostgresConsumer {
    pool: PgPool,
    schema: SchemaManager,
}

impl PostgresConsumer {
    pub fn new(pool: PgPool, schema: SchemaManager) -> Self {
        Self { pool, schema }
    }

    /// Insert SenML records atomically
    #[instrument(skip(self, messages), fields(count = messages.len()))]
    pub async fn save_senml(&self, messages: &[SenMLMessage]) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        for message in messages {
            message.validate()?;
        }

        let mut conn = self.pool.get(StoreError::SaveFailed).await?;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| classify(e, Op::Save, None))?;
        let result = insert_senml(&tx, messages).await;
        finish(tx, result, Op::Save).await?;

        debug!(count = messages.len(), "SenML batch saved");
        Ok(())
    }

    /// Insert JSON messages atomically, creating missing format tables once
    #[instrument(skip(self, messages), fields(count = messages.len()))]
    pub async fn save_json(&self, messages: &[JsonMessage]) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        for message in messages {
            validate_format(&message.format)?;
            flatten(&message.payload)?;
        }

        match self.insert_json_tx(messages).await {
            Err(StoreError::SchemaMissing { format, .. }) => {
                info!(format = %format, "Format table missing, creating it");
                for format in formats(messages) {
                    self.schema.ensure_table(format).await?;
                }
                self.insert_json_tx(messages).await.map_err(|e| {
                    warn!(error = %e, "Insert failed after creating format tables");
                    e
                })
            }
            other => other,
        }?;

        debug!(count = messages.len(), "JSON batch saved");
        Ok(())
    }

    async fn insert_json_tx(&self, messages: &[JsonMessage]) -> Result<()> {
        let mut conn = self.pool.get(StoreError::SaveFailed).await?;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| classify(e, Op::Save, None))?;
        let result = insert_json(&tx, messages).await;
        finish(tx, result, Op::Save).await
    }
}

#[async_trait]
impl Consumer for PostgresConsumer {
    async fn consume(&self, batch: MessageBatch) -> Result<()> {
        match batch {
            MessageBatch::SenML(messages) => self.save_senml(&messages).await,
            MessageBatch::Json(messages) => self.save_json(&messages).await,
        }
    }
}

/// Distinct formats of a batch, in a stable order
fn formats(messages: &[JsonMessage]) -> BTreeSet<&str> {
    messages.iter().map(|m| m.format.as_str()).collect()
}

async fn insert_senml(tx: &Transaction<'_>, messages: &[SenMLMessage]) -> Result<()> {
    let statement = tx
        .prepare_cached(&select::insert(&Source::SenML))
        .await
        .map_err(|e| classify(e, Op::Save, None))?;

    for m in messages {
        tx.execute(
            &statement,
            &[
                &m.subtopic,
                &m.publisher,
                &m.protocol,
                &m.name,
                &m.unit,
                &m.value,
                &m.string_value,
                &m.bool_value,
                &m.data_value,
                &m.sum,
                &m.time,
                &m.update_time,
            ],
        )
        .await
        .map_err(|e| classify(e, Op::Save, None))?;
    }
    Ok(())
}

async fn insert_json(tx: &Transaction<'_>, messages: &[JsonMessage]) -> Result<()> {
    let mut statements: HashMap<&str, Statement> = HashMap::new();

    for m in messages {
        let format = m.format.as_str();
        let statement = match statements.get(format) {
            Some(statement) => statement.clone(),
            None => {
                let statement = tx
                    .prepare_cached(&select::insert(&Source::Json(m.format.clone())))
                    .await
                    .map_err(|e| classify(e, Op::Save, Some(format)))?;
                statements.insert(format, statement.clone());
                statement
            }
        };

        let payload = Value::Object(m.payload.clone());
        tx.execute(
            &statement,
            &[&m.created, &m.subtopic, &m.publisher, &m.protocol, &payload],
        )
        .await
        .map_err(|e| classify(e, Op::Save, Some(format)))?;
    }
    Ok(())
}
