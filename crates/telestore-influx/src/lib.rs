//! Telestore InfluxDB backend
//!
//! Time-series backend speaking the InfluxDB v2 HTTP API.
//! Provides:
//! - line-protocol batch writes
//! - Flux queries decoded from annotated CSV
//! - windowed aggregation with `aggregateWindow`
//! - predicate deletes
//!
//! Aggregation windows are computed per series, so a bucket holds one row
//! per distinct tag set rather than one row overall.
//!
//! JSON arrays and empty objects are stored as JSON text and read back as
//! strings, so a backup/restore round trip does not keep their shape.
//!
//! Field types are checked within a batch only. A batch whose field type
//! conflicts with points already stored is partially written by the server
//! and reported as `InvalidMessage`.

mod annotated;
mod client;
mod config;
mod flux;
mod line_protocol;
mod reader;
mod writer;

use tracing::info;

use telestore_core::Result;

pub use client::{InfluxClient, InfluxError};
pub use config::InfluxConfig;
pub use reader::{InfluxJsonRepository, InfluxSenMLRepository};
pub use writer::InfluxConsumer;

/// An HTTP client bound to one bucket, with its writer and repositories
#[derive(Clone)]
pub struct InfluxStore {
    client: InfluxClient,
    consumer: InfluxConsumer,
    senml: InfluxSenMLRepository,
    json: InfluxJsonRepository,
}

impl InfluxStore {
    /// Build the client; no request is sent until first use
    pub fn connect(config: &InfluxConfig) -> Result<Self> {
        let client = InfluxClient::new(config)?;
        let consumer = InfluxConsumer::new(client.clone());
        let senml = InfluxSenMLRepository::new(client.clone(), consumer.clone());
        let json = InfluxJsonRepository::new(client.clone(), consumer.clone());

        info!(url = %config.url, bucket = %config.bucket, "Influx store ready");

        Ok(Self {
            client,
            consumer,
            senml,
            json,
        })
    }

    pub fn consumer(&self) -> InfluxConsumer {
        self.consumer.clone()
    }

    pub fn senml(&self) -> InfluxSenMLRepository {
        self.senml.clone()
    }

    pub fn json(&self) -> InfluxJsonRepository {
        self.json.clone()
    }

    pub async fn is_healthy(&self) -> bool {
        self.client.is_healthy().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_sends_nothing() {
        let config = InfluxConfig {
            url: "http://127.0.0.1:9".into(),
            ..InfluxConfig::default()
        };
        let store = InfluxStore::connect(&config).unwrap();
        assert!(!tokio_test::block_on(store.is_healthy()));
    }
}
