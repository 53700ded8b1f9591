//! Time-bucket aggregation
//!
//! Aggregated pages are built in three stages, chained as CTEs:
//! 1. `buckets`: distinct truncated times of rows carrying the first
//!    aggregated value, paginated
//! 2. `aggregated`: one aggregate per bucket and field
//! 3. one representative source row per bucket: the row holding the
//!    MIN/MAX value, or for AVG/COUNT the latest row of the bucket
//!
//! Stage 1 only discovers buckets whose first aggregate is non-null, so
//! every paginated bucket survives stage 2 and `count` agrees with `list`.
//!
//! Stage 3 selects the source row's columns plus the aggregates
//! (`agg_0..`) and the bucket start (`bucket_time`, nanoseconds); the
//! reader decides how to merge them into the returned message.

use telestore_core::{Aggregation, Conditions, JsonPath, Order, Result, StoreError};

use super::expr::{self, Dialect};
use super::select::Source;
use super::{pagination, BoundConditions, Query, SqlParams};

pub const BUCKET_TIME_COLUMN: &str = "bucket_time";

/// Name of the aggregate column for the `i`-th value expression
pub fn agg_column(i: usize) -> String {
    format!("agg_{}", i)
}

/// Everything the three stages need to agree on
pub struct Stages<'a> {
    source: &'a Source,
    dialect: Dialect,
    aggregation: &'a Aggregation,
    primary: Option<&'a JsonPath>,
}

impl<'a> Stages<'a> {
    /// Fails when a JSON source has no field to aggregate
    pub fn new(source: &'a Source, dialect: Dialect, aggregation: &'a Aggregation) -> Result<Self> {
        let primary = match source {
            Source::SenML => None,
            Source::Json(_) => Some(aggregation.fields.first().ok_or_else(|| {
                StoreError::InvalidQuery("aggregation needs at least one field".into())
            })?),
        };
        Ok(Self {
            source,
            dialect,
            aggregation,
            primary,
        })
    }

    fn bucket_of(&self, alias: Option<&str>) -> String {
        expr::bucket(
            self.dialect,
            &expr::column(alias, self.source.time_column()),
            &self.aggregation.width,
        )
    }

    /// The value expression that decides which buckets exist and which
    /// row MIN/MAX select
    fn primary_value(&self, alias: Option<&str>) -> String {
        match self.primary {
            Some(path) => expr::json_number(&expr::column(alias, "payload"), path),
            None => expr::column(alias, "value"),
        }
    }

    /// Aggregated value expressions, the primary one first
    pub fn value_exprs(&self, alias: Option<&str>) -> Vec<String> {
        match self.source {
            Source::SenML => vec![self.primary_value(alias)],
            Source::Json(_) => {
                let payload = expr::column(alias, "payload");
                self.aggregation
                    .fields
                    .iter()
                    .map(|f| expr::json_number(&payload, f))
                    .collect()
            }
        }
    }

    /// Stage 1: buckets that contain at least one matching row with a primary value
    pub fn bucket_discovery(&self, bound: &BoundConditions, page: &str, dir: Order) -> String {
        format!(
            "SELECT DISTINCT {} AS bucket FROM {} WHERE {} IS NOT NULL{} ORDER BY bucket {}{}",
            self.bucket_of(None),
            self.source.table(),
            self.primary_value(None),
            bound.and_clause(None),
            dir.as_sql(),
            page,
        )
    }

    /// Stage 2: per-bucket aggregates over the discovered buckets
    pub fn bucket_aggregates(&self, bound: &BoundConditions) -> String {
        let func = self.aggregation.func;
        let columns: Vec<String> = self
            .value_exprs(Some("m"))
            .iter()
            .enumerate()
            .map(|(i, v)| format!("{} AS {}", expr::aggregate(func, v), agg_column(i)))
            .collect();
        let time = self.source.time_column();

        format!(
            "SELECT b.bucket, {}, MAX(m.{}) AS last_time \
             FROM buckets b LEFT JOIN {} m ON {} = b.bucket{} \
             GROUP BY b.bucket HAVING {} IS NOT NULL",
            columns.join(", "),
            time,
            self.source.table(),
            self.bucket_of(Some("m")),
            bound.and_clause(Some("m")),
            expr::aggregate(func, &self.primary_value(Some("m"))),
        )
    }

    /// Stage 3: one source row per surviving bucket
    pub fn representative_rows(&self, bound: &BoundConditions, dir: Order) -> String {
        let time = self.source.time_column();
        let matcher = if self.aggregation.func.selects_source_row() {
            format!("{} = a.{}", self.primary_value(Some("m")), agg_column(0))
        } else {
            format!("m.{} = a.last_time", time)
        };
        let aggs: Vec<String> = (0..self.value_exprs(None).len())
            .map(|i| format!("a.{}", agg_column(i)))
            .collect();

        format!(
            "SELECT DISTINCT ON (a.bucket) {}, {}, {} AS {} \
             FROM aggregated a JOIN {} m ON {} = a.bucket AND {}{} \
             ORDER BY a.bucket {}, m.{} DESC",
            self.source.select_list(Some("m")),
            aggs.join(", "),
            expr::epoch_nanos("a.bucket"),
            BUCKET_TIME_COLUMN,
            self.source.table(),
            self.bucket_of(Some("m")),
            matcher,
            bound.and_clause(Some("m")),
            dir.as_sql(),
            time,
        )
    }
}

/// One page of representative rows, one per bucket
pub fn list(
    source: &Source,
    dialect: Dialect,
    conditions: &Conditions,
    aggregation: &Aggregation,
    limit: u64,
    offset: u64,
    dir: Order,
) -> Result<Query> {
    let stages = Stages::new(source, dialect, aggregation)?;
    let mut params = SqlParams::new();
    let bound = BoundConditions::bind(conditions, &mut params);
    let page = pagination(limit, offset, &mut params);

    let sql = format!(
        "WITH buckets AS ({}), aggregated AS ({}) {}",
        stages.bucket_discovery(&bound, &page, dir),
        stages.bucket_aggregates(&bound),
        stages.representative_rows(&bound, dir),
    );
    Ok(Query { sql, params })
}

/// Number of buckets an unpaginated [`list`] would return
pub fn count(
    source: &Source,
    dialect: Dialect,
    conditions: &Conditions,
    aggregation: &Aggregation,
) -> Result<Query> {
    let stages = Stages::new(source, dialect, aggregation)?;
    let mut params = SqlParams::new();
    let bound = BoundConditions::bind(conditions, &mut params);

    let sql = format!(
        "WITH buckets AS ({}), aggregated AS ({}) SELECT COUNT(*) FROM aggregated",
        stages.bucket_discovery(&bound, "", Order::Desc),
        stages.bucket_aggregates(&bound),
    );
    Ok(Query { sql, params })
}
