//! Read side: list, backup, restore and remove
//!
//! A format table that was never written reads as empty; deleting from it
//! is a no-op.

mod json;
mod senml;

pub use json::PostgresJsonRepository;
pub use senml::PostgresSenMLRepository;

use serde_json::{Number, Value};
use tokio_postgres::types::FromSql;
use tokio_postgres::Row;
use tracing::debug;

use telestore_core::{Result, StoreError};

use crate::error::{classify, finish, is_undefined_table, Op};
use crate::pool::PgPool;
use crate::sql::aggregate::{agg_column, BUCKET_TIME_COLUMN};
use crate::sql::{Dialect, Query};

/// Executes rendered read and delete queries
#[derive(Clone)]
pub(crate) struct Reader {
    pool: PgPool,
    dialect: Dialect,
}

impl Reader {
    pub(crate) fn new(pool: PgPool, dialect: Dialect) -> Self {
        Self { pool, dialect }
    }

    pub(crate) fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Rows of `query`, or none when the table does not exist
    pub(crate) async fn rows(&self, query: &Query) -> Result<Vec<Row>> {
        let conn = self.pool.get(StoreError::ReadFailed).await?;
        match conn.query(query.sql.as_str(), &query.params.as_refs()).await {
            Ok(rows) => Ok(rows),
            Err(e) if is_undefined_table(&e) => {
                debug!("Table missing, reading as empty");
                Ok(Vec::new())
            }
            Err(e) => Err(classify(e, Op::Read, None)),
        }
    }

    /// Single `COUNT(*)` value of `query`
    pub(crate) async fn count(&self, query: &Query) -> Result<u64> {
        let conn = self.pool.get(StoreError::ReadFailed).await?;
        match conn.query_one(query.sql.as_str(), &query.params.as_refs()).await {
            Ok(row) => {
                let total: i64 = column(&row, "count")?;
                Ok(u64::try_from(total).unwrap_or(0))
            }
            Err(e) if is_undefined_table(&e) => Ok(0),
            Err(e) => Err(classify(e, Op::Read, None)),
        }
    }

    /// Run a `DELETE` in its own transaction, returning the affected rows
    pub(crate) async fn delete(&self, query: &Query) -> Result<u64> {
        let mut conn = self.pool.get(StoreError::DeleteFailed).await?;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| classify(e, Op::Delete, None))?;

        let result = match tx.execute(query.sql.as_str(), &query.params.as_refs()).await {
            Ok(deleted) => Ok(deleted),
            Err(e) if is_undefined_table(&e) => Ok(0),
            Err(e) => Err(classify(e, Op::Delete, None)),
        };
        finish(tx, result, Op::Delete).await
    }
}

/// Typed column access, decoding failures are read failures
pub(crate) fn column<'a, T: FromSql<'a>>(row: &'a Row, name: &str) -> Result<T> {
    row.try_get(name).map_err(StoreError::read)
}

/// `agg_i` of an aggregated row
pub(crate) fn aggregate_value(row: &Row, i: usize) -> Result<Option<f64>> {
    column(row, &agg_column(i))
}

/// Bucket start of an aggregated row, nanoseconds
pub(crate) fn bucket_time(row: &Row) -> Result<i64> {
    column(row, BUCKET_TIME_COLUMN)
}

pub(crate) fn number(value: Option<f64>) -> Value {
    value
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_conversion() {
        assert_eq!(number(Some(60.0)), serde_json::json!(60.0));
        assert_eq!(number(None), Value::Null);
        assert_eq!(number(Some(f64::NAN)), Value::Null);
    }
}
