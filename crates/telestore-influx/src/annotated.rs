//! Annotated CSV decoding
//!
//! Flux results arrive as one or more tables, each introduced by
//! `#datatype`, `#group` and `#default` annotation rows followed by a header
//! row. Cells are typed with the `#datatype` of their column; empty cells
//! take the `#default` value or become [`Cell::Null`]. The format cannot
//! tell an empty string from a missing value, so both decode as null.

use std::collections::BTreeMap;

use chrono::DateTime;

use crate::client::InfluxError;

/// A typed CSV cell
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    String(String),
    Double(f64),
    Long(i64),
    Unsigned(u64),
    Bool(bool),
    /// Nanoseconds since the Unix epoch
    Time(i64),
}

impl Cell {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric cells as a float; counts come back as integers
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Double(v) => Some(*v),
            Cell::Long(v) => Some(*v as f64),
            Cell::Unsigned(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Cell::Long(v) | Cell::Time(v) => Some(*v),
            Cell::Unsigned(v) => i64::try_from(*v).ok(),
            Cell::Double(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Cell::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// One data row, keyed by column name
pub type Record = BTreeMap<String, Cell>;

#[derive(Default)]
struct Table {
    datatypes: Vec<String>,
    defaults: Vec<String>,
    header: Option<Vec<String>>,
}

/// Decode every data row of every table in `body`
pub fn decode(body: &str) -> Result<Vec<Record>, InfluxError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(body.as_bytes());

    let mut records = Vec::new();
    let mut table = Table::default();

    for row in reader.records() {
        let row = row?;
        let first = row.get(0).unwrap_or_default();
        let cells: Vec<String> = row.iter().map(str::to_string).collect();

        match first {
            "#datatype" => {
                table = Table {
                    datatypes: cells,
                    ..Table::default()
                };
            }
            "#default" => table.defaults = cells,
            "#group" => {}
            _ => match &table.header {
                None => table.header = Some(cells),
                Some(header) => {
                    let record = decode_row(header, &table, &cells)?;
                    if let Some(Cell::String(message)) = record.get("error") {
                        if !message.is_empty() {
                            return Err(InfluxError::Query(message.clone()));
                        }
                    }
                    records.push(record);
                }
            },
        }
    }
    Ok(records)
}

fn decode_row(header: &[String], table: &Table, cells: &[String]) -> Result<Record, InfluxError> {
    let mut record = Record::new();
    for (i, name) in header.iter().enumerate() {
        if name.is_empty() {
            continue;
        }
        let raw = match cells.get(i).map(String::as_str) {
            Some(v) if !v.is_empty() => v,
            _ => table.defaults.get(i).map(String::as_str).unwrap_or_default(),
        };
        let datatype = table.datatypes.get(i).map(String::as_str).unwrap_or("string");
        record.insert(name.clone(), parse_cell(datatype, raw)?);
    }
    Ok(record)
}

fn parse_cell(datatype: &str, raw: &str) -> Result<Cell, InfluxError> {
    if raw.is_empty() {
        return Ok(Cell::Null);
    }
    let invalid =
        |reason: String| InfluxError::Query(format!("invalid {} cell {:?}: {}", datatype, raw, reason));
    Ok(match datatype {
        "double" => Cell::Double(raw.parse().map_err(|e: std::num::ParseFloatError| invalid(e.to_string()))?),
        "long" => Cell::Long(raw.parse().map_err(|e: std::num::ParseIntError| invalid(e.to_string()))?),
        "unsignedLong" => {
            Cell::Unsigned(raw.parse().map_err(|e: std::num::ParseIntError| invalid(e.to_string()))?)
        }
        "boolean" => Cell::Bool(raw == "true"),
        d if d.starts_with("dateTime") => {
            let time = DateTime::parse_from_rfc3339(raw).map_err(|e| invalid(e.to_string()))?;
            Cell::Time(time.timestamp_nanos_opt().ok_or_else(|| invalid(String::new()))?)
        }
        _ => Cell::String(raw.to_string()),
    })
}
