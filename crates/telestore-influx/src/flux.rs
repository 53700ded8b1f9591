//! Flux query generation
//!
//! Pipelines always start with `range`; tag predicates run before the
//! fields are pivoted into columns, value and payload predicates after.
//!
//! ```text
//! from |> range |> measurement |> tags |> pivot |> group |> fields |> sort |> limit
//! ```
//!
//! Aggregation uses `aggregateWindow` per series before the pivot. Buckets
//! are therefore computed per tag set, and MIN/MAX return the extreme value
//! at the bucket start rather than the source record that held it.

use telestore_core::{
    AggregateFn, Aggregation, BucketWidth, Column, Conditions, Field, Operator, Order, ParamValue,
    Predicate, Result, StoreError, TimeUnit,
};

/// Earliest timestamp the store accepts, nanoseconds
pub const MIN_TIME: i64 = -9_223_372_036_854_775_806;
/// Latest timestamp the store accepts, nanoseconds
pub const MAX_TIME: i64 = 9_223_372_036_854_775_806;

const TAG_COLUMNS: [Column; 4] = [Column::Subtopic, Column::Publisher, Column::Protocol, Column::Name];

/// A Flux pipeline, one stage per `|>`
#[derive(Debug, Clone)]
pub struct Flux {
    stages: Vec<String>,
}

impl Flux {
    pub fn from_bucket(bucket: &str) -> Self {
        Self {
            stages: vec![format!("from(bucket: {})", string(bucket))],
        }
    }

    pub fn pipe(mut self, stage: impl Into<String>) -> Self {
        self.stages.push(stage.into());
        self
    }

    /// `filter` with every predicate ANDed, skipped when there are none
    pub fn filter(self, predicates: &[String]) -> Self {
        if predicates.is_empty() {
            return self;
        }
        self.pipe(format!("filter(fn: (r) => {})", predicates.join(" and ")))
    }

    pub fn render(&self) -> String {
        self.stages.join("\n  |> ")
    }
}

/// Tag equality; an empty value matches series without the tag
#[derive(Debug, Clone, PartialEq)]
struct TagFilter {
    tag: &'static str,
    value: String,
}

impl TagFilter {
    fn render(&self) -> String {
        if self.value.is_empty() {
            format!("not exists {}", column(self.tag))
        } else {
            format!("{} == {}", column(self.tag), string(&self.value))
        }
    }
}

/// Comparison against a field value
#[derive(Debug, Clone, PartialEq)]
struct ValueFilter {
    field: &'static str,
    op: &'static str,
    literal: String,
}

impl ValueFilter {
    fn render(&self) -> String {
        format!("{} {} {}", column(self.field), self.op, self.literal)
    }
}

/// Conditions split by where they apply in a pipeline
#[derive(Debug, Clone, Default)]
pub struct Plan {
    measurement: String,
    from: Option<i64>,
    to: Option<i64>,
    tags: Vec<TagFilter>,
    values: Vec<ValueFilter>,
    /// Flattened payload keys that must be present
    payload: Vec<String>,
}

impl Plan {
    pub fn new(measurement: &str, conditions: &Conditions) -> Result<Self> {
        let mut plan = Self {
            measurement: measurement.to_string(),
            ..Self::default()
        };
        for predicate in conditions.predicates() {
            let param = predicate
                .param
                .as_deref()
                .and_then(|name| conditions.param(name));
            plan.add(predicate, param)?;
        }
        Ok(plan)
    }

    fn add(&mut self, predicate: &Predicate, param: Option<&ParamValue>) -> Result<()> {
        match (&predicate.field, param) {
            (Field::Column(c), Some(ParamValue::Int(t))) if c.is_time() => match predicate.op {
                Operator::Gte => self.from = Some(*t),
                Operator::Lte => self.to = Some(*t),
                op => return Err(unsupported(format!("time operator {:?}", op))),
            },
            (Field::Column(c), Some(ParamValue::Text(v))) if TAG_COLUMNS.contains(c) => {
                self.tags.push(TagFilter {
                    tag: c.name(),
                    value: v.clone(),
                });
            }
            (Field::Column(c), Some(value)) => {
                self.values.push(ValueFilter {
                    field: c.name(),
                    op: operator(predicate.op)?,
                    literal: literal(value),
                });
            }
            (Field::Payload(path), None) if predicate.op == Operator::Exists => {
                self.payload.push(path.flat_key());
            }
            (field, _) => return Err(unsupported(format!("filter on {:?}", field))),
        }
        Ok(())
    }

    /// Inclusive `[from, to]` as Flux's half-open range
    fn range(&self) -> String {
        let start = self.from.unwrap_or(MIN_TIME);
        let stop = self.to.map(|t| t.saturating_add(1)).unwrap_or(MAX_TIME);
        format!("range(start: time(v: {}), stop: time(v: {}))", start, stop)
    }

    /// Points of the measurement that pass the tag predicates
    fn series(&self, bucket: &str) -> Flux {
        Flux::from_bucket(bucket)
            .pipe(self.range())
            .filter(&[format!("r._measurement == {}", string(&self.measurement))])
            .filter(&self.tags.iter().map(TagFilter::render).collect::<Vec<_>>())
    }

    /// One row per point, every field a column, all series merged
    fn rows(&self, bucket: &str) -> Flux {
        let mut field_filters: Vec<String> = self.values.iter().map(ValueFilter::render).collect();
        field_filters.extend(self.payload.iter().map(|key| format!("exists {}", column(key))));
        self.series(bucket)
            .pipe(PIVOT)
            .pipe("group()")
            .filter(&field_filters)
    }

    /// One row per bucket and series, the aggregated fields as columns
    fn windows(&self, bucket: &str, aggregation: &Aggregation, fields: &[String]) -> Result<Flux> {
        if !self.payload.is_empty() {
            return Err(unsupported("payload filters with aggregation".to_string()));
        }
        // only the aggregated value can be filtered before the window
        let mut value_filters = Vec::new();
        for filter in &self.values {
            if filter.field != Column::Value.name() {
                return Err(unsupported(format!("{} filter with aggregation", filter.field)));
            }
            value_filters.push(format!("r._value {} {}", filter.op, filter.literal));
        }
        let selected: Vec<String> = fields
            .iter()
            .map(|f| format!("r._field == {}", string(f)))
            .collect();

        Ok(self
            .series(bucket)
            .filter(&[format!("({})", selected.join(" or "))])
            .filter(&value_filters)
            .pipe(format!(
                "aggregateWindow(every: {}, fn: {}, createEmpty: false, timeSrc: \"_start\")",
                duration(&aggregation.width),
                function(aggregation.func)
            ))
            .pipe(PIVOT)
            .pipe("group()"))
    }

    pub fn list(&self, bucket: &str, limit: u64, offset: u64, dir: Order) -> String {
        paginate(self.rows(bucket), limit, offset, dir).render()
    }

    pub fn count(&self, bucket: &str) -> String {
        self.rows(bucket).pipe(COUNT).render()
    }

    /// `fields` are the flattened field keys to aggregate
    pub fn aggregate_list(
        &self,
        bucket: &str,
        aggregation: &Aggregation,
        fields: &[String],
        limit: u64,
        offset: u64,
        dir: Order,
    ) -> Result<String> {
        Ok(paginate(self.windows(bucket, aggregation, fields)?, limit, offset, dir).render())
    }

    pub fn aggregate_count(&self, bucket: &str, aggregation: &Aggregation, fields: &[String]) -> Result<String> {
        Ok(self.windows(bucket, aggregation, fields)?.pipe(COUNT).render())
    }

    /// Predicate for the delete API: tag equality only
    pub fn delete_predicate(&self) -> Result<String> {
        if !self.values.is_empty() || !self.payload.is_empty() {
            return Err(unsupported("value or payload filters on delete".to_string()));
        }
        let mut parts = vec![format!("_measurement={}", string(&self.measurement))];
        for tag in &self.tags {
            if tag.value.is_empty() {
                return Err(unsupported("empty tag values on delete".to_string()));
            }
            parts.push(format!("{}={}", tag.tag, string(&tag.value)));
        }
        Ok(parts.join(" AND "))
    }

    /// Inclusive delete bounds, nanoseconds
    pub fn delete_range(&self) -> (i64, i64) {
        (self.from.unwrap_or(MIN_TIME), self.to.unwrap_or(MAX_TIME))
    }
}

const PIVOT: &str = "pivot(rowKey: [\"_time\"], columnKey: [\"_field\"], valueColumn: \"_value\")";

const COUNT: &str = "count(column: \"_measurement\")";

fn paginate(flux: Flux, limit: u64, offset: u64, dir: Order) -> Flux {
    let flux = flux.pipe(format!(
        "sort(columns: [\"_time\"], desc: {})",
        dir == Order::Desc
    ));
    match (limit, offset) {
        (0, 0) => flux,
        (0, offset) => flux.pipe(format!("limit(n: {}, offset: {})", i64::MAX, offset)),
        (limit, offset) => flux.pipe(format!("limit(n: {}, offset: {})", limit, offset)),
    }
}

fn unsupported(what: String) -> StoreError {
    StoreError::InvalidQuery(format!("{} not supported by the time-series backend", what))
}

/// Column reference usable for any key, including flattened paths
fn column(name: &str) -> String {
    format!("r[{}]", string(name))
}

/// Double-quoted Flux string literal
pub fn string(value: &str) -> String {
    let escaped = value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace("${", "\\${");
    format!("\"{}\"", escaped)
}

fn literal(value: &ParamValue) -> String {
    match value {
        ParamValue::Text(s) => string(s),
        ParamValue::Bool(b) => b.to_string(),
        ParamValue::Int(i) => i.to_string(),
        ParamValue::Float(f) => float(*f),
    }
}

/// Flux float literals need a decimal point
fn float(value: f64) -> String {
    let s = value.to_string();
    if s.contains('.') || !value.is_finite() {
        s
    } else {
        format!("{}.0", s)
    }
}

fn operator(op: Operator) -> Result<&'static str> {
    Ok(match op {
        Operator::Eq => "==",
        Operator::Lt => "<",
        Operator::Lte => "<=",
        Operator::Gt => ">",
        Operator::Gte => ">=",
        Operator::Exists => return Err(unsupported("existence check on a column".to_string())),
    })
}

fn function(func: AggregateFn) -> &'static str {
    match func {
        AggregateFn::Min => "min",
        AggregateFn::Max => "max",
        AggregateFn::Avg => "mean",
        AggregateFn::Count => "count",
    }
}

fn duration(width: &BucketWidth) -> String {
    let unit = match width.unit {
        TimeUnit::Minute => "m",
        TimeUnit::Hour => "h",
        TimeUnit::Day => "d",
        TimeUnit::Week => "w",
        TimeUnit::Month => "mo",
        TimeUnit::Year => "y",
    };
    format!("{}{}", width.value, unit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use telestore_core::{Comparator, JsonPageMetadata, JsonPath, SenMLPageMetadata};

    fn senml_plan(page: &SenMLPageMetadata) -> Plan {
        Plan::new("senml", &Conditions::for_senml(page)).unwrap()
    }

    #[test]
    fn test_list_pipeline_order() {
        let page = SenMLPageMetadata {
            publisher: Some("p1".into()),
            value: Some(3.0),
            comparator: Some(Comparator::Gt),
            from: Some(10),
            to: Some(20),
            ..Default::default()
        };
        let flux = senml_plan(&page).list("messages", 5, 10, Order::Desc);

        assert_eq!(
            flux,
            "from(bucket: \"messages\")\n  \
             |> range(start: time(v: 10), stop: time(v: 21))\n  \
             |> filter(fn: (r) => r._measurement == \"senml\")\n  \
             |> filter(fn: (r) => r[\"publisher\"] == \"p1\")\n  \
             |> pivot(rowKey: [\"_time\"], columnKey: [\"_field\"], valueColumn: \"_value\")\n  \
             |> group()\n  \
             |> filter(fn: (r) => r[\"value\"] > 3.0)\n  \
             |> sort(columns: [\"_time\"], desc: true)\n  \
             |> limit(n: 5, offset: 10)"
        );
    }

    #[test]
    fn test_count_pipeline() {
        let page = SenMLPageMetadata {
            subtopic: Some(String::new()),
            bool_value: Some(false),
            ..Default::default()
        };
        let flux = senml_plan(&page).count("messages");
        assert!(flux.contains(&format!("range(start: time(v: {}), stop: time(v: {}))", MIN_TIME, MAX_TIME)));
        assert!(flux.contains("filter(fn: (r) => not exists r[\"subtopic\"])"));
        assert!(flux.contains("filter(fn: (r) => r[\"bool_value\"] == false)"));
        assert!(flux.ends_with("|> count(column: \"_measurement\")"));
        assert!(!flux.contains("limit"));
    }

    #[test]
    fn test_json_filter_is_existence() {
        let mut page = JsonPageMetadata::for_format("weather");
        page.filter = Some(JsonPath::parse("station.temp").unwrap());
        let plan = Plan::new("weather", &Conditions::for_json(&page)).unwrap();
        let flux = plan.list("messages", 0, 0, Order::Asc);

        assert!(flux.contains("r._measurement == \"weather\""));
        assert!(flux.contains("filter(fn: (r) => exists r[\"station/temp\"])"));
        assert!(flux.ends_with("sort(columns: [\"_time\"], desc: false)"));
    }

    #[test]
    fn test_aggregate_pipeline() {
        let page = SenMLPageMetadata {
            name: Some("temp".into()),
            value: Some(0.0),
            ..Default::default()
        };
        let aggregation = Aggregation::new(AggregateFn::Avg, BucketWidth::new(5, TimeUnit::Hour).unwrap());
        let flux = senml_plan(&page)
            .aggregate_list("messages", &aggregation, &["value".to_string()], 10, 0, Order::Desc)
            .unwrap();

        assert!(flux.contains("filter(fn: (r) => (r._field == \"value\"))"));
        assert!(flux.contains("filter(fn: (r) => r._value == 0.0)"));
        assert!(flux.contains("aggregateWindow(every: 5h, fn: mean, createEmpty: false, timeSrc: \"_start\")"));
        let window = flux.find("aggregateWindow").unwrap();
        assert!(flux.find("pivot").unwrap() > window);
    }

    #[test]
    fn test_aggregate_rejects_field_filters() {
        let page = SenMLPageMetadata {
            string_value: Some("on".into()),
            ..Default::default()
        };
        let aggregation = Aggregation::new(AggregateFn::Max, BucketWidth::new(1, TimeUnit::Day).unwrap());
        let err = senml_plan(&page)
            .aggregate_count("messages", &aggregation, &["value".to_string()])
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_QUERY");
    }

    #[test]
    fn test_delete_predicate() {
        let page = SenMLPageMetadata {
            publisher: Some("p1".into()),
            name: Some("temp".into()),
            to: Some(99),
            ..Default::default()
        };
        let plan = senml_plan(&page);
        assert_eq!(
            plan.delete_predicate().unwrap(),
            "_measurement=\"senml\" AND publisher=\"p1\" AND name=\"temp\""
        );
        assert_eq!(plan.delete_range(), (MIN_TIME, 99));

        let page = SenMLPageMetadata {
            value: Some(1.0),
            ..Default::default()
        };
        assert!(senml_plan(&page).delete_predicate().is_err());
    }

    #[test]
    fn test_literals() {
        assert_eq!(string("a\"b${c}"), "\"a\\\"b\\${c}\"");
        assert_eq!(float(2.0), "2.0");
        assert_eq!(float(-0.5), "-0.5");
        assert_eq!(duration(&BucketWidth::new(1, TimeUnit::Month).unwrap()), "1mo");
    }
}
