//! SQL generation
//!
//! Queries are assembled from small expression builders instead of string
//! templates so each aggregation stage can be rendered and tested alone.
//! Every value coming from a page query is a bound parameter; identifiers
//! and JSON path segments are quoted.

pub mod aggregate;
pub mod expr;
pub mod select;

use std::collections::HashMap;
use std::fmt;

use tokio_postgres::types::ToSql;

use telestore_core::{Conditions, Field, ParamValue, Predicate};

pub use expr::Dialect;

/// Bound parameters of one statement, numbered `$1..`
#[derive(Default)]
pub struct SqlParams {
    values: Vec<Box<dyn ToSql + Sync + Send>>,
}

impl SqlParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a value and return its placeholder
    pub fn push<T>(&mut self, value: T) -> String
    where
        T: ToSql + Sync + Send + 'static,
    {
        self.values.push(Box::new(value));
        format!("${}", self.values.len())
    }

    pub fn push_param(&mut self, value: &ParamValue) -> String {
        match value {
            ParamValue::Text(s) => self.push(s.clone()),
            ParamValue::Float(f) => self.push(*f),
            ParamValue::Bool(b) => self.push(*b),
            ParamValue::Int(i) => self.push(*i),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_refs(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.values
            .iter()
            .map(|v| v.as_ref() as &(dyn ToSql + Sync))
            .collect()
    }
}

impl fmt::Debug for SqlParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.values.iter()).finish()
    }
}

/// A rendered statement and its parameters
#[derive(Debug)]
pub struct Query {
    pub sql: String,
    pub params: SqlParams,
}

/// Conditions whose parameters are already bound
///
/// The same predicates can be rendered several times against different
/// table aliases while sharing one set of placeholders.
pub struct BoundConditions {
    predicates: Vec<Predicate>,
    placeholders: HashMap<String, String>,
}

impl BoundConditions {
    pub fn bind(conditions: &Conditions, params: &mut SqlParams) -> Self {
        let placeholders = conditions
            .params()
            .iter()
            .map(|(name, value)| (name.clone(), params.push_param(value)))
            .collect();
        Self {
            predicates: conditions.predicates().to_vec(),
            placeholders,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// `a AND b AND ...` against `alias`, or `None` without predicates
    pub fn render(&self, alias: Option<&str>) -> Option<String> {
        if self.predicates.is_empty() {
            return None;
        }
        let parts: Vec<String> = self
            .predicates
            .iter()
            .map(|p| self.render_predicate(p, alias))
            .collect();
        Some(parts.join(" AND "))
    }

    /// ` WHERE ...` or an empty string
    pub fn where_clause(&self, alias: Option<&str>) -> String {
        self.render(alias)
            .map(|c| format!(" WHERE {}", c))
            .unwrap_or_default()
    }

    /// ` AND ...` suffix for join conditions, or an empty string
    pub fn and_clause(&self, alias: Option<&str>) -> String {
        self.render(alias)
            .map(|c| format!(" AND {}", c))
            .unwrap_or_default()
    }

    fn render_predicate(&self, predicate: &Predicate, alias: Option<&str>) -> String {
        let lhs = match &predicate.field {
            Field::Column(c) => expr::column(alias, c.name()),
            Field::Payload(path) => expr::json_text(&expr::column(alias, "payload"), path),
        };
        match predicate
            .param
            .as_ref()
            .and_then(|name| self.placeholders.get(name))
        {
            Some(placeholder) => format!("{} {} {}", lhs, predicate.op.symbol(), placeholder),
            None => format!("{} {}", lhs, predicate.op.symbol()),
        }
    }
}

/// Quote an identifier such as a format table name
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote a string literal
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// ` LIMIT $n OFFSET $m`, omitting parts that are unbounded
pub(crate) fn pagination(limit: u64, offset: u64, params: &mut SqlParams) -> String {
    let mut clause = String::new();
    if limit > 0 {
        clause.push_str(&format!(" LIMIT {}", params.push(to_i64(limit))));
    }
    if offset > 0 {
        clause.push_str(&format!(" OFFSET {}", params.push(to_i64(offset))));
    }
    clause
}

fn to_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use telestore_core::{Comparator, JsonPageMetadata, JsonPath, SenMLPageMetadata};

    #[test]
    fn test_render_senml_conditions() {
        let page = SenMLPageMetadata {
            publisher: Some("p1".into()),
            value: Some(3.5),
            comparator: Some(Comparator::Lt),
            to: Some(99),
            ..Default::default()
        };
        let mut params = SqlParams::new();
        let bound = BoundConditions::bind(&Conditions::for_senml(&page), &mut params);

        assert_eq!(params.len(), 3);
        assert_eq!(
            bound.where_clause(None),
            " WHERE publisher = $1 AND value < $2 AND time <= $3"
        );
        assert_eq!(
            bound.and_clause(Some("m")),
            " AND m.publisher = $1 AND m.value < $2 AND m.time <= $3"
        );
    }

    #[test]
    fn test_render_json_filter() {
        let mut page = JsonPageMetadata::for_format("weather");
        page.filter = Some(JsonPath::parse("station.o'brien.temp").unwrap());
        page.subtopic = Some(String::new());

        let mut params = SqlParams::new();
        let bound = BoundConditions::bind(&Conditions::for_json(&page), &mut params);

        assert_eq!(params.len(), 1);
        assert_eq!(
            bound.render(Some("m")).unwrap(),
            "m.subtopic = $1 AND m.payload->'station'->'o''brien'->>'temp' IS NOT NULL"
        );
    }

    #[test]
    fn test_empty_conditions() {
        let mut params = SqlParams::new();
        let bound = BoundConditions::bind(&Conditions::default(), &mut params);
        assert!(bound.is_empty());
        assert_eq!(bound.where_clause(None), "");
        assert_eq!(bound.and_clause(Some("m")), "");
    }

    #[test]
    fn test_pagination() {
        let mut params = SqlParams::new();
        assert_eq!(pagination(0, 0, &mut params), "");
        assert_eq!(pagination(10, 0, &mut params), " LIMIT $1");
        assert_eq!(pagination(10, 20, &mut params), " LIMIT $2 OFFSET $3");
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_quoting() {
        assert_eq!(quote_ident("room-1"), "\"room-1\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(quote_literal("it's"), "'it''s'");
    }
}
