//! Expression builders shared by list, count and aggregation queries

use telestore_core::{AggregateFn, BucketWidth, JsonPath};

use super::quote_literal;

/// Flavour of the row store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Dialect {
    /// Plain Postgres: `date_trunc` or manual epoch flooring
    #[default]
    Postgres,
    /// TimescaleDB: native `time_bucket` for any width
    Timescale,
}

/// `alias.name` or `name`
pub fn column(alias: Option<&str>, name: &str) -> String {
    match alias {
        Some(a) => format!("{}.{}", a, name),
        None => name.to_string(),
    }
}

/// Descend into `base` along `path`, extracting the last segment as text
///
/// `a.b.c` becomes `base->'a'->'b'->>'c'`.
pub fn json_text(base: &str, path: &JsonPath) -> String {
    let segments = path.segments();
    let mut expr = base.to_string();
    for (i, segment) in segments.iter().enumerate() {
        let op = if i + 1 == segments.len() { "->>" } else { "->" };
        expr.push_str(op);
        expr.push_str(&quote_literal(segment));
    }
    expr
}

/// Numeric value at `path`, for aggregation
pub fn json_number(base: &str, path: &JsonPath) -> String {
    format!("({})::DOUBLE PRECISION", json_text(base, path))
}

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// `value` rounded down to a multiple of `step`, in BIGINT arithmetic
///
/// Postgres `mod` keeps the dividend's sign, hence the double `mod`.
fn floor_to(value: &str, step: i64) -> String {
    format!(
        "({v} - mod(mod({v}, {s}) + {s}, {s}))",
        v = value,
        s = step
    )
}

/// Nanosecond BIGINT column as whole epoch seconds, rounded down
pub fn epoch_seconds(time_expr: &str) -> String {
    format!("({} / {})", floor_to(time_expr, NANOS_PER_SEC), NANOS_PER_SEC)
}

fn timestamp_at(seconds_expr: &str) -> String {
    format!(
        "(to_timestamp({}::DOUBLE PRECISION) AT TIME ZONE 'UTC')",
        seconds_expr
    )
}

/// Nanosecond BIGINT column as a UTC `timestamp`, truncated to the second
pub fn timestamp_of(time_expr: &str) -> String {
    timestamp_at(&epoch_seconds(time_expr))
}

/// Start of the bucket `time_expr` (nanoseconds) falls into, as a `timestamp`
pub fn bucket(dialect: Dialect, time_expr: &str, width: &BucketWidth) -> String {
    match dialect {
        Dialect::Timescale => format!(
            "time_bucket(INTERVAL '{}', {})",
            width,
            timestamp_of(time_expr)
        ),
        Dialect::Postgres if width.is_unit() => format!(
            "date_trunc('{}', {})",
            width.unit.as_str(),
            timestamp_of(time_expr)
        ),
        // date_trunc only knows single units; floor the epoch for multiples
        Dialect::Postgres => timestamp_at(&floor_to(&epoch_seconds(time_expr), width.seconds())),
    }
}

/// `timestamp` expression back to nanoseconds since the epoch
pub fn epoch_nanos(ts_expr: &str) -> String {
    format!("(EXTRACT(EPOCH FROM {}) * 1e9)::BIGINT", ts_expr)
}

/// Aggregate over `value_expr`, always DOUBLE PRECISION and NULL for empty sets
pub fn aggregate(func: AggregateFn, value_expr: &str) -> String {
    match func {
        AggregateFn::Min => format!("MIN({})", value_expr),
        AggregateFn::Max => format!("MAX({})", value_expr),
        AggregateFn::Avg => format!("AVG({})", value_expr),
        AggregateFn::Count => format!("NULLIF(COUNT({}), 0)::DOUBLE PRECISION", value_expr),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telestore_core::TimeUnit;

    #[test]
    fn test_json_paths() {
        let path = JsonPath::parse("a.b.c").unwrap();
        assert_eq!(json_text("m.payload", &path), "m.payload->'a'->'b'->>'c'");
        assert_eq!(
            json_number("payload", &JsonPath::parse("humidity").unwrap()),
            "(payload->>'humidity')::DOUBLE PRECISION"
        );
    }

    #[test]
    fn test_epoch_seconds_stay_integral() {
        assert_eq!(
            epoch_seconds("time"),
            "((time - mod(mod(time, 1000000000) + 1000000000, 1000000000)) / 1000000000)"
        );
        assert!(!timestamp_of("time").contains("1e9"));
    }

    #[test]
    fn test_bucket_native_truncation() {
        let hour = BucketWidth::new(1, TimeUnit::Hour).unwrap();
        assert_eq!(
            bucket(Dialect::Postgres, "m.time", &hour),
            format!("date_trunc('hour', {})", timestamp_of("m.time"))
        );
        assert!(timestamp_of("m.time").starts_with("(to_timestamp(((m.time - mod(mod(m.time, "));
    }

    #[test]
    fn test_bucket_manual_multiples() {
        let five_hours = BucketWidth::new(5, TimeUnit::Hour).unwrap();
        let expr = bucket(Dialect::Postgres, "time", &five_hours);
        let seconds = epoch_seconds("time");
        assert!(expr.contains(&format!(
            "({s} - mod(mod({s}, 18000) + 18000, 18000))",
            s = seconds
        )));
        assert!(!expr.contains("date_trunc"));
        assert!(!expr.contains("1e9"));
    }

    #[test]
    fn test_bucket_timescale() {
        let five_hours = BucketWidth::new(5, TimeUnit::Hour).unwrap();
        assert_eq!(
            bucket(Dialect::Timescale, "created", &five_hours),
            format!("time_bucket(INTERVAL '5 hour', {})", timestamp_of("created"))
        );
    }

    #[test]
    fn test_aggregate_functions() {
        assert_eq!(aggregate(AggregateFn::Min, "m.value"), "MIN(m.value)");
        assert_eq!(
            aggregate(AggregateFn::Count, "m.value"),
            "NULLIF(COUNT(m.value), 0)::DOUBLE PRECISION"
        );
    }
}
