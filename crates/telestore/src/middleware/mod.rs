//! Decorators around the consumer and repository contracts

mod logging;
mod metrics;

pub use logging::{LoggingConsumer, LoggingRepository};
pub use metrics::{MeteredConsumer, MeteredRepository, MethodSnapshot, Metrics, MetricsSnapshot};
