//! Mapping of Postgres driver errors onto store error kinds

use tokio_postgres::error::SqlState;

use telestore_core::{BoxError, Result, StoreError};

/// Which call path an error surfaced on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    Save,
    Read,
    Delete,
}

impl Op {
    /// Generic failure kind for this call path
    pub(crate) fn wrap(self) -> fn(BoxError) -> StoreError {
        match self {
            Op::Save => StoreError::SaveFailed,
            Op::Read => StoreError::ReadFailed,
            Op::Delete => StoreError::DeleteFailed,
        }
    }
}

pub(crate) fn is_undefined_table(err: &tokio_postgres::Error) -> bool {
    err.code() == Some(&SqlState::UNDEFINED_TABLE)
}

/// Concurrent `CREATE TABLE IF NOT EXISTS` may still lose the race
pub(crate) fn is_duplicate_object(err: &tokio_postgres::Error) -> bool {
    matches!(
        err.code(),
        Some(c) if *c == SqlState::DUPLICATE_TABLE || *c == SqlState::UNIQUE_VIOLATION
    )
}

fn is_uncastable(err: &tokio_postgres::Error) -> bool {
    matches!(
        err.code(),
        Some(c) if *c == SqlState::INVALID_TEXT_REPRESENTATION
            || *c == SqlState::UNTRANSLATABLE_CHARACTER
            || *c == SqlState::DATATYPE_MISMATCH
    )
}

/// Classify a driver error
///
/// `format` is the JSON format being written, if any; only writes turn a
/// missing table into [`StoreError::SchemaMissing`].
pub(crate) fn classify(err: tokio_postgres::Error, op: Op, format: Option<&str>) -> StoreError {
    if is_uncastable(&err) {
        return match op {
            Op::Read => StoreError::InvalidQuery(format!("value cannot be cast: {}", err)),
            Op::Save | Op::Delete => {
                StoreError::invalid_message_from("value cannot be cast to the column type", err)
            }
        };
    }
    if op == Op::Save && is_undefined_table(&err) {
        if let Some(format) = format {
            return StoreError::SchemaMissing {
                format: format.to_string(),
                source: Box::new(err),
            };
        }
    }
    op.wrap()(Box::new(err))
}

/// Commit on success, roll back on failure
///
/// A failed rollback is reported together with the error that caused it.
pub(crate) async fn finish<T>(
    tx: deadpool_postgres::Transaction<'_>,
    result: Result<T>,
    op: Op,
) -> Result<T> {
    match result {
        Ok(value) => {
            tx.commit().await.map_err(|e| classify(e, op, None))?;
            Ok(value)
        }
        Err(original) => match tx.rollback().await {
            Ok(()) => Err(original),
            Err(rollback) => {
                tracing::error!(error = %rollback, "Transaction rollback failed");
                Err(StoreError::TransactionRollbackFailed {
                    original: Box::new(original),
                    rollback: Box::new(rollback),
                })
            }
        },
    }
}
