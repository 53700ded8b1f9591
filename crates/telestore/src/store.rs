//! Backend selection and wiring

use std::sync::Arc;

use tracing::info;

use telestore_core::{
    Consumer, JsonPageMetadata, JsonRepository, MessageRepository, PageQuery, Result,
    SenMLPageMetadata, SenMLRepository,
};
use telestore_influx::InfluxStore;
use telestore_postgres::PostgresStore;

use crate::config::{Backend, StoreConfig};
use crate::middleware::{
    LoggingConsumer, LoggingRepository, MeteredConsumer, MeteredRepository, Metrics,
};

#[derive(Clone)]
enum Health {
    Postgres(PostgresStore),
    Influx(InfluxStore),
    Unchecked,
}

/// The consumer and both repositories of one backend, with logging and
/// metrics on every call
#[derive(Clone)]
pub struct Store {
    consumer: Arc<dyn Consumer>,
    senml: Arc<SenMLRepository>,
    json: Arc<JsonRepository>,
    metrics: Metrics,
    health: Health,
}

impl Store {
    /// Connect to the configured backend; row stores are migrated first
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        info!(backend = %config.backend, "Connecting message store");

        let store = match config.backend {
            Backend::Postgres | Backend::Timescale => {
                let dialect = config.backend.dialect().unwrap_or_default();
                let pg = PostgresStore::connect(&config.postgres, dialect).await?;
                Self::wrap(
                    Arc::new(pg.consumer()),
                    Arc::new(pg.senml()),
                    Arc::new(pg.json()),
                    Health::Postgres(pg),
                )
            }
            Backend::Influx => {
                let influx = InfluxStore::connect(&config.influx)?;
                Self::wrap(
                    Arc::new(influx.consumer()),
                    Arc::new(influx.senml()),
                    Arc::new(influx.json()),
                    Health::Influx(influx),
                )
            }
        };
        Ok(store)
    }

    /// Wrap components of any backend
    pub fn from_parts(
        consumer: Arc<dyn Consumer>,
        senml: Arc<SenMLRepository>,
        json: Arc<JsonRepository>,
    ) -> Self {
        Self::wrap(consumer, senml, json, Health::Unchecked)
    }

    fn wrap(
        consumer: Arc<dyn Consumer>,
        senml: Arc<SenMLRepository>,
        json: Arc<JsonRepository>,
        health: Health,
    ) -> Self {
        let metrics = Metrics::new();
        let consumer: Arc<dyn Consumer> = Arc::new(MeteredConsumer::new(
            Arc::new(LoggingConsumer::new(consumer)),
            metrics.clone(),
        ));
        Self {
            consumer,
            senml: decorate::<SenMLPageMetadata>(senml, &metrics),
            json: decorate::<JsonPageMetadata>(json, &metrics),
            metrics,
            health,
        }
    }

    pub fn consumer(&self) -> Arc<dyn Consumer> {
        self.consumer.clone()
    }

    pub fn senml(&self) -> Arc<SenMLRepository> {
        self.senml.clone()
    }

    pub fn json(&self) -> Arc<JsonRepository> {
        self.json.clone()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub async fn is_healthy(&self) -> bool {
        match &self.health {
            Health::Postgres(pg) => pg.is_healthy().await,
            Health::Influx(influx) => influx.is_healthy().await,
            Health::Unchecked => true,
        }
    }
}

fn decorate<P: PageQuery>(
    inner: Arc<dyn MessageRepository<Page = P>>,
    metrics: &Metrics,
) -> Arc<dyn MessageRepository<Page = P>> {
    Arc::new(MeteredRepository::new(
        Arc::new(LoggingRepository::new(inner)),
        metrics.clone(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    use telestore_core::{
        ensure_kind, JsonMessage, Message, MessageBatch, MessageKind, MessagesPage, SenMLMessage,
        StoreError,
    };

    /// Keeps every consumed message in memory
    #[derive(Default)]
    struct MemoryBackend {
        messages: Mutex<Vec<Message>>,
    }

    #[async_trait]
    impl Consumer for MemoryBackend {
        async fn consume(&self, batch: MessageBatch) -> Result<()> {
            let mut messages = self.messages.lock();
            match batch {
                MessageBatch::SenML(batch) => {
                    for m in &batch {
                        m.validate()?;
                    }
                    messages.extend(batch.into_iter().map(Message::SenML));
                }
                MessageBatch::Json(batch) => messages.extend(batch.into_iter().map(Message::Json)),
            }
            Ok(())
        }
    }

    #[async_trait]
    impl MessageRepository for MemoryBackend {
        type Page = SenMLPageMetadata;

        async fn list(&self, page: &SenMLPageMetadata) -> Result<MessagesPage> {
            page.validate()?;
            let messages: Vec<Message> = self
                .messages
                .lock()
                .iter()
                .filter(|m| m.kind() == MessageKind::SenML)
                .cloned()
                .collect();
            let total = messages.len() as u64;
            let limit = if page.limit == 0 { usize::MAX } else { page.limit as usize };
            Ok(MessagesPage {
                total,
                messages: messages.into_iter().skip(page.offset as usize).take(limit).collect(),
            })
        }

        async fn restore(&self, messages: Vec<Message>) -> Result<()> {
            ensure_kind(MessageKind::SenML, &messages)?;
            self.messages.lock().extend(messages);
            Ok(())
        }

        async fn remove(&self, _page: &SenMLPageMetadata) -> Result<()> {
            self.messages.lock().retain(|m| m.kind() != MessageKind::SenML);
            Ok(())
        }
    }

    struct NoJson;

    #[async_trait]
    impl MessageRepository for NoJson {
        type Page = JsonPageMetadata;

        async fn list(&self, _page: &JsonPageMetadata) -> Result<MessagesPage> {
            Ok(MessagesPage::empty())
        }

        async fn restore(&self, _messages: Vec<Message>) -> Result<()> {
            Err(StoreError::invalid_message("read only"))
        }

        async fn remove(&self, _page: &JsonPageMetadata) -> Result<()> {
            Ok(())
        }
    }

    fn memory_store() -> Store {
        let backend = Arc::new(MemoryBackend::default());
        Store::from_parts(backend.clone(), backend, Arc::new(NoJson))
    }

    fn reading(time: i64) -> SenMLMessage {
        SenMLMessage {
            publisher: "p".into(),
            name: "temp".into(),
            time,
            value: Some(1.0),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_calls_pass_through_middleware() {
        let store = memory_store();
        let batch = MessageBatch::SenML((1..=3).map(reading).collect());
        store.consumer().consume(batch).await.unwrap();

        let page = SenMLPageMetadata {
            limit: 2,
            ..Default::default()
        };
        let listed = store.senml().list(&page).await.unwrap();
        assert_eq!(listed.total, 3);
        assert_eq!(listed.messages.len(), 2);

        let backup = store.senml().backup(&page).await.unwrap();
        assert_eq!(backup.messages.len(), 3);

        store.senml().remove(&page).await.unwrap();
        store.senml().restore(backup.messages).await.unwrap();
        assert_eq!(store.senml().list(&page).await.unwrap().total, 3);

        let snapshot = store.metrics().snapshot();
        assert_eq!(snapshot.calls("consume"), 1);
        assert_eq!(snapshot.calls("list"), 2);
        assert_eq!(snapshot.calls("backup"), 1);
        assert_eq!(snapshot.calls("restore"), 1);
        assert_eq!(snapshot.calls("remove"), 1);
        assert_eq!(snapshot.in_flight, 0);
        assert!(store.is_healthy().await);
    }

    #[tokio::test]
    async fn test_errors_are_counted_and_returned() {
        let store = memory_store();

        let mut invalid = reading(1);
        invalid.name = String::new();
        let err = store
            .consumer()
            .consume(MessageBatch::SenML(vec![invalid]))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_MESSAGE");

        let json = Message::Json(JsonMessage {
            format: "weather".into(),
            payload: json!({"a": 1}).as_object().cloned().unwrap(),
            ..Default::default()
        });
        assert!(store.senml().restore(vec![json.clone()]).await.is_err());
        assert!(store.json().restore(vec![json]).await.is_err());

        let page = SenMLPageMetadata {
            from: Some(10),
            to: Some(1),
            ..Default::default()
        };
        let err = store.senml().list(&page).await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_QUERY");

        let snapshot = store.metrics().snapshot();
        assert_eq!(snapshot.errors("consume"), 1);
        assert_eq!(snapshot.errors("restore"), 2);
        assert_eq!(snapshot.errors("list"), 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let store = memory_store();
        tokio_test::block_on(store.json().list(&JsonPageMetadata::for_format("weather"))).unwrap();

        let value = serde_json::to_value(store.metrics().snapshot()).unwrap();
        assert_eq!(value["in_flight"], json!(0));
        assert_eq!(value["methods"]["list"]["calls"], json!(1));
        assert_eq!(value["methods"]["remove"]["calls"], json!(0));
    }
}
