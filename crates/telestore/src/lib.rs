//! Telestore
//!
//! Message store for IoT telemetry: SenML records and free-form JSON
//! messages, stored in Postgres, TimescaleDB or InfluxDB behind one set of
//! contracts.
//!
//! ```no_run
//! # use telestore::MessageRepository;
//! # async fn run() -> telestore::Result<()> {
//! let config = telestore::StoreConfig::from_env()?;
//! let store = telestore::Store::connect(&config).await?;
//! let page = telestore::SenMLPageMetadata {
//!     limit: 10,
//!     ..Default::default()
//! };
//! let latest = store.senml().list(&page).await?;
//! println!("{} of {}", latest.messages.len(), latest.total);
//! # Ok(())
//! # }
//! ```

mod config;
pub mod middleware;
mod store;

pub use config::{Backend, StoreConfig};
pub use middleware::{Metrics, MetricsSnapshot};
pub use store::Store;

pub use telestore_core::*;
pub use telestore_telemetry::init as init_telemetry;
