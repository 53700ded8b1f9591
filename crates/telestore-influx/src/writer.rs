//! Batch writer
//!
//! A batch is validated and encoded completely before one write request is
//! sent, so an invalid record keeps the whole batch out of the store. A
//! field that carries two value types within the batch is rejected here,
//! since the server would accept the points before the conflict.

use async_trait::async_trait;
use tracing::{debug, instrument};

use telestore_core::{Consumer, JsonMessage, MessageBatch, Result, SenMLMessage, StoreError};

use crate::client::{InfluxClient, InfluxError};
use crate::line_protocol::{check_field_types, encode, json_point, senml_point};

#[derive(Clone)]
pub struct InfluxConsumer {
    client: InfluxClient,
}

impl InfluxConsumer {
    pub fn new(client: InfluxClient) -> Self {
        Self { client }
    }

    #[instrument(skip(self, messages), fields(count = messages.len()))]
    pub async fn save_senml(&self, messages: &[SenMLMessage]) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let points = messages.iter().map(senml_point).collect::<Result<Vec<_>>>()?;
        check_field_types(&points)?;
        self.client.write(encode(&points)).await.map_err(write_error)?;
        debug!(count = points.len(), "SenML batch written");
        Ok(())
    }

    #[instrument(skip(self, messages), fields(count = messages.len()))]
    pub async fn save_json(&self, messages: &[JsonMessage]) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let points = messages.iter().map(json_point).collect::<Result<Vec<_>>>()?;
        check_field_types(&points)?;
        self.client.write(encode(&points)).await.map_err(write_error)?;
        debug!(count = points.len(), "JSON batch written");
        Ok(())
    }
}

#[async_trait]
impl Consumer for InfluxConsumer {
    async fn consume(&self, batch: MessageBatch) -> Result<()> {
        match batch {
            MessageBatch::SenML(messages) => self.save_senml(&messages).await,
            MessageBatch::Json(messages) => self.save_json(&messages).await,
        }
    }
}

fn write_error(err: InfluxError) -> StoreError {
    if err.is_rejected() {
        StoreError::invalid_message_from("points rejected by the time-series store", err)
    } else {
        StoreError::save(err)
    }
}
