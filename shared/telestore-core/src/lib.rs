//! Telestore Core - message model and storage contracts
//!
//! This crate provides:
//! - The SenML and JSON message shapes and their normalization
//! - Page queries and the backend-neutral condition builder
//! - Error kinds shared by every backend
//! - The consumer and repository traits backends implement

pub mod conditions;
pub mod error;
pub mod message;
pub mod page;
pub mod path;
pub mod repository;

pub use conditions::{Column, Conditions, Field, Operator, ParamValue, Predicate};
pub use error::{BoxError, Result, StoreError};
pub use message::{
    now_nanos, validate_format, Envelope, JsonMessage, Message, MessageBatch, MessageKind,
    SenMLMessage,
};
pub use page::{
    AggregateFn, Aggregation, BucketWidth, Comparator, JsonPageMetadata, MessagesPage, Order,
    SenMLPageMetadata, TimeUnit,
};
pub use path::JsonPath;
pub use repository::{ensure_kind, Consumer, JsonRepository, MessageRepository, PageQuery, SenMLRepository};
