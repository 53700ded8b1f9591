//! Table management
//!
//! - [`SchemaManager::migrate`] creates the fixed `senml` table at connect
//! - [`SchemaManager::ensure_table`] creates a JSON format table on demand
//!
//! Nothing is cached: format tables are re-derived from failed inserts.

use tracing::{debug, info, instrument};

use telestore_core::{validate_format, Result, StoreError};

use crate::error::{classify, is_duplicate_object, Op};
use crate::pool::PgPool;
use crate::sql::select::SENML_TABLE;
use crate::sql::{quote_ident, quote_literal, Dialect};

/// Chunk width for hypertables, in nanoseconds (one day)
const CHUNK_INTERVAL_NANOS: i64 = 86_400_000_000_000;

/// Postgres truncates identifiers beyond this many bytes
const MAX_IDENT_LEN: usize = 63;

/// Creates and migrates the physical tables
#[derive(Clone)]
pub struct SchemaManager {
    pool: PgPool,
    dialect: Dialect,
}

impl SchemaManager {
    pub fn new(pool: PgPool, dialect: Dialect) -> Self {
        Self { pool, dialect }
    }

    /// Create the SenML table and, on Timescale, the extension
    #[instrument(skip(self), fields(dialect = ?self.dialect))]
    pub async fn migrate(&self) -> Result<()> {
        info!("Running schema migrations");
        self.execute(&migrations(self.dialect)).await
    }

    /// Create the table of `format` if it is missing
    ///
    /// Safe to call concurrently; losing a creation race counts as success.
    #[instrument(skip(self))]
    pub async fn ensure_table(&self, format: &str) -> Result<()> {
        validate_format(format)?;
        debug!(format, "Ensuring format table");
        self.execute(&json_table(self.dialect, format)).await
    }

    async fn execute(&self, statements: &[String]) -> Result<()> {
        let conn = self.pool.get(StoreError::SaveFailed).await?;
        for statement in statements {
            match conn.batch_execute(statement).await {
                Ok(()) => {}
                Err(e) if is_duplicate_object(&e) => {
                    debug!(error = %e, "Object created concurrently");
                }
                Err(e) => return Err(classify(e, Op::Save, None)),
            }
        }
        Ok(())
    }
}

/// Statements creating the fixed schema
pub fn migrations(dialect: Dialect) -> Vec<String> {
    let mut statements = Vec::new();
    if dialect == Dialect::Timescale {
        statements.push("CREATE EXTENSION IF NOT EXISTS timescaledb".to_string());
    }
    statements.push(format!(
        "CREATE TABLE IF NOT EXISTS {} (\
         subtopic TEXT NOT NULL DEFAULT '', \
         publisher TEXT NOT NULL, \
         protocol TEXT NOT NULL, \
         name TEXT NOT NULL, \
         unit TEXT NOT NULL DEFAULT '', \
         value DOUBLE PRECISION, \
         string_value TEXT, \
         bool_value BOOLEAN, \
         data_value TEXT, \
         sum DOUBLE PRECISION, \
         time BIGINT NOT NULL, \
         update_time BIGINT NOT NULL DEFAULT 0)",
        SENML_TABLE
    ));
    statements.push(time_index(SENML_TABLE, "time"));
    if dialect == Dialect::Timescale {
        statements.push(hypertable(SENML_TABLE, "time"));
    }
    statements
}

/// Statements creating the table of one JSON format
pub fn json_table(dialect: Dialect, format: &str) -> Vec<String> {
    let mut statements = vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             created BIGINT NOT NULL, \
             subtopic TEXT NOT NULL DEFAULT '', \
             publisher TEXT NOT NULL, \
             protocol TEXT NOT NULL, \
             payload JSONB NOT NULL)",
            quote_ident(format)
        ),
        time_index(format, "created"),
    ];
    if dialect == Dialect::Timescale {
        statements.push(hypertable(format, "created"));
    }
    statements
}

fn time_index(table: &str, column: &str) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} ({} DESC)",
        quote_ident(&index_name(table, column)),
        quote_ident(table),
        column
    )
}

fn hypertable(table: &str, column: &str) -> String {
    format!(
        "SELECT create_hypertable({}, {}, chunk_time_interval => {}::BIGINT, if_not_exists => TRUE)",
        quote_literal(&quote_ident(table)),
        quote_literal(column),
        CHUNK_INTERVAL_NANOS
    )
}

/// `<table>_<column>_idx`, with the table part shortened to fit an identifier
fn index_name(table: &str, column: &str) -> String {
    let suffix = format!("_{}_idx", column);
    let keep = MAX_IDENT_LEN.saturating_sub(suffix.len()).min(table.len());
    // format names are ASCII
    format!("{}{}", &table[..keep], suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgres_migrations() {
        let statements = migrations(Dialect::Postgres);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("CREATE TABLE IF NOT EXISTS senml (subtopic TEXT"));
        assert!(statements[0].contains("time BIGINT NOT NULL"));
        assert_eq!(
            statements[1],
            "CREATE INDEX IF NOT EXISTS \"senml_time_idx\" ON \"senml\" (time DESC)"
        );
    }

    #[test]
    fn test_timescale_migrations() {
        let statements = migrations(Dialect::Timescale);
        assert_eq!(statements.len(), 4);
        assert_eq!(statements[0], "CREATE EXTENSION IF NOT EXISTS timescaledb");
        assert_eq!(
            statements[3],
            "SELECT create_hypertable('\"senml\"', 'time', \
             chunk_time_interval => 86400000000000::BIGINT, if_not_exists => TRUE)"
        );
    }

    #[test]
    fn test_json_table_is_quoted() {
        let statements = json_table(Dialect::Postgres, "room-1");
        assert!(statements[0].starts_with("CREATE TABLE IF NOT EXISTS \"room-1\" (created BIGINT"));
        assert!(statements[0].contains("payload JSONB NOT NULL"));
        assert_eq!(
            statements[1],
            "CREATE INDEX IF NOT EXISTS \"room-1_created_idx\" ON \"room-1\" (created DESC)"
        );
    }

    #[test]
    fn test_index_name_fits_identifier() {
        let long = "f".repeat(63);
        let name = index_name(&long, "created");
        assert_eq!(name.len(), MAX_IDENT_LEN);
        assert!(name.ends_with("_created_idx"));
        assert_ne!(name, long);
    }
}
