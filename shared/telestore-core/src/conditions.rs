//! Backend-neutral filter predicates
//!
//! A page query becomes a list of [`Predicate`]s, ANDed together, plus the
//! named parameters they bind. Backends render the predicates in their own
//! query language; the semantics stay identical.

use crate::page::{Comparator, JsonPageMetadata, SenMLPageMetadata};
use crate::path::JsonPath;

/// Stored column or tag a predicate can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Subtopic,
    Publisher,
    Protocol,
    Name,
    Value,
    StringValue,
    BoolValue,
    DataValue,
    /// SenML time, nanoseconds
    Time,
    /// JSON message creation time, nanoseconds
    Created,
}

impl Column {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Subtopic => "subtopic",
            Self::Publisher => "publisher",
            Self::Protocol => "protocol",
            Self::Name => "name",
            Self::Value => "value",
            Self::StringValue => "string_value",
            Self::BoolValue => "bool_value",
            Self::DataValue => "data_value",
            Self::Time => "time",
            Self::Created => "created",
        }
    }

    pub fn is_time(&self) -> bool {
        matches!(self, Self::Time | Self::Created)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Field {
    Column(Column),
    /// Path inside the JSON payload
    Payload(JsonPath),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
    /// Field is present and not null; binds no parameter
    Exists,
}

impl Operator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Exists => "IS NOT NULL",
        }
    }
}

impl From<Comparator> for Operator {
    fn from(c: Comparator) -> Self {
        match c {
            Comparator::Eq => Self::Eq,
            Comparator::Lt => Self::Lt,
            Comparator::Lte => Self::Lte,
            Comparator::Gt => Self::Gt,
            Comparator::Gte => Self::Gte,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Text(String),
    Float(f64),
    Bool(bool),
    Int(i64),
}

/// `{field} {operator} :{param}`
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: Field,
    pub op: Operator,
    pub param: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conditions {
    predicates: Vec<Predicate>,
    params: Vec<(String, ParamValue)>,
}

impl Conditions {
    pub fn for_senml(page: &SenMLPageMetadata) -> Self {
        let mut conds = Self::default();
        conds.push_text(Column::Subtopic, &page.subtopic);
        conds.push_text(Column::Publisher, &page.publisher);
        conds.push_text(Column::Protocol, &page.protocol);
        conds.push_text(Column::Name, &page.name);
        if let Some(value) = page.value {
            let op = page.comparator.unwrap_or_default().into();
            conds.push(Field::Column(Column::Value), op, ParamValue::Float(value));
        }
        conds.push_text(Column::StringValue, &page.string_value);
        if let Some(b) = page.bool_value {
            conds.push(Field::Column(Column::BoolValue), Operator::Eq, ParamValue::Bool(b));
        }
        conds.push_text(Column::DataValue, &page.data_value);
        conds.push_range(Column::Time, page.from, page.to);
        conds
    }

    pub fn for_json(page: &JsonPageMetadata) -> Self {
        let mut conds = Self::default();
        conds.push_text(Column::Subtopic, &page.subtopic);
        conds.push_text(Column::Publisher, &page.publisher);
        conds.push_text(Column::Protocol, &page.protocol);
        if let Some(path) = &page.filter {
            conds.predicates.push(Predicate {
                field: Field::Payload(path.clone()),
                op: Operator::Exists,
                param: None,
            });
        }
        conds.push_range(Column::Created, page.from, page.to);
        conds
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn params(&self) -> &[(String, ParamValue)] {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    fn push(&mut self, field: Field, op: Operator, value: ParamValue) {
        let name = match &field {
            Field::Column(c) if c.is_time() && op == Operator::Gte => "from".to_string(),
            Field::Column(c) if c.is_time() && op == Operator::Lte => "to".to_string(),
            Field::Column(c) => c.name().to_string(),
            Field::Payload(path) => path.flat_key(),
        };
        self.predicates.push(Predicate {
            field,
            op,
            param: Some(name.clone()),
        });
        self.params.push((name, value));
    }

    fn push_text(&mut self, column: Column, value: &Option<String>) {
        if let Some(v) = value {
            self.push(Field::Column(column), Operator::Eq, ParamValue::Text(v.clone()));
        }
    }

    fn push_range(&mut self, column: Column, from: Option<i64>, to: Option<i64>) {
        if let Some(from) = from {
            self.push(Field::Column(column), Operator::Gte, ParamValue::Int(from));
        }
        if let Some(to) = to {
            self.push(Field::Column(column), Operator::Lte, ParamValue::Int(to));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_page_has_no_predicates() {
        assert!(Conditions::for_senml(&SenMLPageMetadata::default()).is_empty());
        assert!(Conditions::for_json(&JsonPageMetadata::for_format("x")).is_empty());
    }

    #[test]
    fn test_senml_filters() {
        let page = SenMLPageMetadata {
            subtopic: Some("topic".into()),
            protocol: Some("http".into()),
            value: Some(0.0),
            comparator: Some(Comparator::Gte),
            bool_value: Some(false),
            from: Some(100),
            to: Some(200),
            ..Default::default()
        };
        let conds = Conditions::for_senml(&page);

        let ops: Vec<(Field, Operator)> = conds
            .predicates()
            .iter()
            .map(|p| (p.field.clone(), p.op))
            .collect();
        assert_eq!(
            ops,
            vec![
                (Field::Column(Column::Subtopic), Operator::Eq),
                (Field::Column(Column::Protocol), Operator::Eq),
                (Field::Column(Column::Value), Operator::Gte),
                (Field::Column(Column::BoolValue), Operator::Eq),
                (Field::Column(Column::Time), Operator::Gte),
                (Field::Column(Column::Time), Operator::Lte),
            ]
        );
        assert_eq!(conds.param("value"), Some(&ParamValue::Float(0.0)));
        assert_eq!(conds.param("bool_value"), Some(&ParamValue::Bool(false)));
        assert_eq!(conds.param("from"), Some(&ParamValue::Int(100)));
        assert_eq!(conds.param("to"), Some(&ParamValue::Int(200)));
    }

    #[test]
    fn test_value_defaults_to_equality() {
        let page = SenMLPageMetadata {
            value: Some(21.5),
            ..Default::default()
        };
        let conds = Conditions::for_senml(&page);
        assert_eq!(conds.predicates()[0].op, Operator::Eq);
        assert_eq!(conds.predicates()[0].op.symbol(), "=");
    }

    #[test]
    fn test_json_filter_is_existence_check() {
        let mut page = JsonPageMetadata::for_format("weather");
        page.filter = Some(JsonPath::parse("station.temp").unwrap());
        page.from = Some(5);
        let conds = Conditions::for_json(&page);

        assert_eq!(conds.predicates().len(), 2);
        let filter = &conds.predicates()[0];
        assert_eq!(filter.op, Operator::Exists);
        assert!(filter.param.is_none());
        assert_eq!(conds.predicates()[1].field, Field::Column(Column::Created));
        assert_eq!(conds.params().len(), 1);
    }
}
