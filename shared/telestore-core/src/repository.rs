//! Contracts every storage backend implements
//!
//! - [`Consumer`]: called by the delivery mechanism with one batch at a time
//! - [`MessageRepository`]: list/backup/restore/remove for one message kind

use async_trait::async_trait;

use crate::error::{Result, StoreError};
use crate::message::{Message, MessageBatch, MessageKind, SENML_FORMAT};
use crate::page::{JsonPageMetadata, MessagesPage, SenMLPageMetadata};

/// Persists batches handed over by the message broker glue
#[async_trait]
pub trait Consumer: Send + Sync + 'static {
    /// Store the whole batch, or nothing
    async fn consume(&self, batch: MessageBatch) -> Result<()>;
}

/// A page query that can be widened to an unbounded dump
pub trait PageQuery: Clone + Send + Sync + 'static {
    const KIND: MessageKind;

    fn unbounded(&self) -> Self;

    /// Table or measurement the query reads
    fn format(&self) -> &str;
}

impl PageQuery for SenMLPageMetadata {
    const KIND: MessageKind = MessageKind::SenML;

    fn unbounded(&self) -> Self {
        SenMLPageMetadata::unbounded(self)
    }

    fn format(&self) -> &str {
        SENML_FORMAT
    }
}

impl PageQuery for JsonPageMetadata {
    const KIND: MessageKind = MessageKind::Json;

    fn unbounded(&self) -> Self {
        JsonPageMetadata::unbounded(self)
    }

    fn format(&self) -> &str {
        &self.format
    }
}

/// Read side of one message kind
#[async_trait]
pub trait MessageRepository: Send + Sync + 'static {
    type Page: PageQuery;

    /// One page of messages matching the filter, plus the total match count
    async fn list(&self, page: &Self::Page) -> Result<MessagesPage>;

    /// Every message matching the filter
    async fn backup(&self, page: &Self::Page) -> Result<MessagesPage> {
        self.list(&page.unbounded()).await
    }

    /// Reinsert exported messages verbatim, atomically
    async fn restore(&self, messages: Vec<Message>) -> Result<()>;

    /// Delete every message matching the filter
    async fn remove(&self, page: &Self::Page) -> Result<()>;
}

pub type SenMLRepository = dyn MessageRepository<Page = SenMLPageMetadata>;
pub type JsonRepository = dyn MessageRepository<Page = JsonPageMetadata>;

/// Fail unless every message is of the repository's kind
pub fn ensure_kind(expected: MessageKind, messages: &[Message]) -> Result<()> {
    match messages.iter().find(|m| m.kind() != expected) {
        Some(m) => Err(StoreError::invalid_message(format!(
            "cannot restore {} message into {} repository",
            m.kind(),
            expected
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{JsonMessage, SenMLMessage};

    #[test]
    fn test_ensure_kind() {
        let messages = vec![
            Message::SenML(SenMLMessage::default()),
            Message::Json(JsonMessage::default()),
        ];
        assert!(ensure_kind(MessageKind::SenML, &messages[..1]).is_ok());
        let err = ensure_kind(MessageKind::SenML, &messages).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_MESSAGE");
        assert!(ensure_kind(MessageKind::Json, &[]).is_ok());
    }
}
