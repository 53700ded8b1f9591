//! Telestore Postgres backend
//!
//! Row-store backend for plain PostgreSQL and TimescaleDB.
//! Provides:
//! - connection pooling
//! - lazy per-format table creation
//! - transactional batch writes
//! - paginated and time-bucketed reads

mod error;
mod pool;
mod reader;
mod schema;
pub mod sql;
mod writer;

use tracing::info;

use telestore_core::Result;

pub use pool::{PgPool, PoolConfig};
pub use reader::{PostgresJsonRepository, PostgresSenMLRepository};
pub use schema::SchemaManager;
pub use sql::Dialect;
pub use writer::PostgresConsumer;

/// A migrated database with its writer and repositories
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    schema: SchemaManager,
    consumer: PostgresConsumer,
    senml: PostgresSenMLRepository,
    json: PostgresJsonRepository,
}

impl PostgresStore {
    /// Open the pool and run migrations
    pub async fn connect(config: &PoolConfig, dialect: Dialect) -> Result<Self> {
        let pool = PgPool::new(config)?;
        let schema = SchemaManager::new(pool.clone(), dialect);
        schema.migrate().await?;

        let consumer = PostgresConsumer::new(pool.clone(), schema.clone());
        let reader = reader::Reader::new(pool.clone(), dialect);
        let senml = PostgresSenMLRepository::new(reader.clone(), consumer.clone());
        let json = PostgresJsonRepository::new(reader, consumer.clone());

        info!(?dialect, "Postgres store ready");

        Ok(Self {
            pool,
            schema,
            consumer,
            senml,
            json,
        })
    }

    pub fn consumer(&self) -> PostgresConsumer {
        self.consumer.clone()
    }

    pub fn senml(&self) -> PostgresSenMLRepository {
        self.senml.clone()
    }

    pub fn json(&self) -> PostgresJsonRepository {
        self.json.clone()
    }

    pub fn schema(&self) -> &SchemaManager {
        &self.schema
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn is_healthy(&self) -> bool {
        self.pool.is_healthy().await
    }
}
