//! Logging middleware
//!
//! One event per call with the method, message kind, format and elapsed
//! time. Failed calls are logged at `warn` with the error code.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{info, warn};

use telestore_core::{
    Consumer, Message, MessageBatch, MessageKind, MessageRepository, MessagesPage, PageQuery, Result,
};

async fn logged<T>(
    method: &'static str,
    kind: MessageKind,
    format: &str,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    let start = Instant::now();
    let result = call.await;
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    match &result {
        Ok(_) => info!(method, %kind, format, elapsed_ms, "Store call completed"),
        Err(err) => warn!(
            method,
            %kind,
            format,
            elapsed_ms,
            code = err.error_code(),
            error = %err,
            "Store call failed"
        ),
    }
    result
}

/// Format of a batch or restore payload, taken from its first message
fn first_format(messages: &[Message]) -> &str {
    match messages.first() {
        Some(Message::Json(m)) => &m.format,
        Some(Message::SenML(_)) => telestore_core::message::SENML_FORMAT,
        None => "",
    }
}

pub struct LoggingConsumer {
    inner: Arc<dyn Consumer>,
}

impl LoggingConsumer {
    pub fn new(inner: Arc<dyn Consumer>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Consumer for LoggingConsumer {
    async fn consume(&self, batch: MessageBatch) -> Result<()> {
        let kind = batch.kind();
        let format = match &batch {
            MessageBatch::Json(messages) => messages.first().map(|m| m.format.clone()),
            MessageBatch::SenML(_) => Some(telestore_core::message::SENML_FORMAT.to_string()),
        }
        .unwrap_or_default();
        logged("consume", kind, &format, self.inner.consume(batch)).await
    }
}

pub struct LoggingRepository<P: PageQuery> {
    inner: Arc<dyn MessageRepository<Page = P>>,
}

impl<P: PageQuery> LoggingRepository<P> {
    pub fn new(inner: Arc<dyn MessageRepository<Page = P>>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<P: PageQuery> MessageRepository for LoggingRepository<P> {
    type Page = P;

    async fn list(&self, page: &P) -> Result<MessagesPage> {
        logged("list", P::KIND, page.format(), self.inner.list(page)).await
    }

    async fn backup(&self, page: &P) -> Result<MessagesPage> {
        logged("backup", P::KIND, page.format(), self.inner.backup(page)).await
    }

    async fn restore(&self, messages: Vec<Message>) -> Result<()> {
        let format = first_format(&messages).to_string();
        logged("restore", P::KIND, &format, self.inner.restore(messages)).await
    }

    async fn remove(&self, page: &P) -> Result<()> {
        logged("remove", P::KIND, page.format(), self.inner.remove(page)).await
    }
}
