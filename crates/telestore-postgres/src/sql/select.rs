//! Plain list, count, delete and insert statements

use telestore_core::{Conditions, Order};

use super::{pagination, quote_ident, BoundConditions, Query, SqlParams};

pub const SENML_TABLE: &str = "senml";

pub const SENML_COLUMNS: &[&str] = &[
    "subtopic",
    "publisher",
    "protocol",
    "name",
    "unit",
    "value",
    "string_value",
    "bool_value",
    "data_value",
    "sum",
    "time",
    "update_time",
];

pub const JSON_COLUMNS: &[&str] = &["created", "subtopic", "publisher", "protocol", "payload"];

/// Physical table a query runs against
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    SenML,
    /// One table per format; the name must already be validated
    Json(String),
}

impl Source {
    pub fn table(&self) -> String {
        match self {
            Self::SenML => SENML_TABLE.to_string(),
            Self::Json(format) => quote_ident(format),
        }
    }

    pub fn time_column(&self) -> &'static str {
        match self {
            Self::SenML => "time",
            Self::Json(_) => "created",
        }
    }

    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            Self::SenML => SENML_COLUMNS,
            Self::Json(_) => JSON_COLUMNS,
        }
    }

    /// Comma separated column list, optionally qualified with `alias`
    pub fn select_list(&self, alias: Option<&str>) -> String {
        self.columns()
            .iter()
            .map(|c| super::expr::column(alias, c))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

pub fn list(source: &Source, conditions: &Conditions, limit: u64, offset: u64, dir: Order) -> Query {
    let mut params = SqlParams::new();
    let bound = BoundConditions::bind(conditions, &mut params);
    let sql = format!(
        "SELECT {} FROM {}{} ORDER BY {} {}{}",
        source.select_list(None),
        source.table(),
        bound.where_clause(None),
        source.time_column(),
        dir.as_sql(),
        pagination(limit, offset, &mut params),
    );
    Query { sql, params }
}

pub fn count(source: &Source, conditions: &Conditions) -> Query {
    let mut params = SqlParams::new();
    let bound = BoundConditions::bind(conditions, &mut params);
    let sql = format!(
        "SELECT COUNT(*) FROM {}{}",
        source.table(),
        bound.where_clause(None)
    );
    Query { sql, params }
}

pub fn delete(source: &Source, conditions: &Conditions) -> Query {
    let mut params = SqlParams::new();
    let bound = BoundConditions::bind(conditions, &mut params);
    let sql = format!("DELETE FROM {}{}", source.table(), bound.where_clause(None));
    Query { sql, params }
}

/// Single-row insert with one placeholder per column
pub fn insert(source: &Source) -> String {
    let columns = source.columns();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${}", i)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        source.table(),
        columns.join(", "),
        placeholders.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use telestore_core::{JsonPageMetadata, SenMLPageMetadata};

    #[test]
    fn test_list_senml() {
        let page = SenMLPageMetadata {
            subtopic: Some("topic".into()),
            protocol: Some("http".into()),
            limit: 10,
            ..Default::default()
        };
        let query = list(&Source::SenML, &Conditions::for_senml(&page), page.limit, page.offset, page.dir);

        assert_eq!(
            query.sql,
            "SELECT subtopic, publisher, protocol, name, unit, value, string_value, bool_value, \
             data_value, sum, time, update_time FROM senml WHERE subtopic = $1 AND protocol = $2 \
             ORDER BY time DESC LIMIT $3"
        );
        assert_eq!(query.params.len(), 3);
    }

    #[test]
    fn test_count_has_no_pagination() {
        let page = SenMLPageMetadata {
            publisher: Some("p".into()),
            limit: 10,
            offset: 5,
            ..Default::default()
        };
        let query = count(&Source::SenML, &Conditions::for_senml(&page));
        assert_eq!(query.sql, "SELECT COUNT(*) FROM senml WHERE publisher = $1");
        assert_eq!(query.params.len(), 1);
    }

    #[test]
    fn test_list_json_unbounded_ascending() {
        let mut page = JsonPageMetadata::for_format("weather");
        page.dir = Order::Asc;
        page.offset = 4;
        let source = Source::Json(page.format.clone());
        let query = list(&source, &Conditions::for_json(&page), 0, page.offset, page.dir);

        assert_eq!(
            query.sql,
            "SELECT created, subtopic, publisher, protocol, payload FROM \"weather\" \
             ORDER BY created ASC OFFSET $1"
        );
    }

    #[test]
    fn test_delete_and_insert() {
        let page = JsonPageMetadata {
            publisher: Some("p".into()),
            ..JsonPageMetadata::for_format("weather")
        };
        let source = Source::Json("weather".into());
        assert_eq!(
            delete(&source, &Conditions::for_json(&page)).sql,
            "DELETE FROM \"weather\" WHERE publisher = $1"
        );
        assert_eq!(
            insert(&source),
            "INSERT INTO \"weather\" (created, subtopic, publisher, protocol, payload) \
             VALUES ($1, $2, $3, $4, $5)"
        );
        assert!(insert(&Source::SenML).ends_with("$12)"));
    }
}
