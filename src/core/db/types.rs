/// Type Coercion Module
///
/// Outbound, every parameter gets a bind type and the parameter list is
/// summarized as a type signature (`"isd"` ...). Inbound, each buffered cell
/// is converted according to the driver type code of its column. The decode
/// table is the only place where semantic column types are recovered, since
/// the driver hands every cell over as raw bytes.

use super::driver::{ColumnDescriptor, RawCell};
use crate::core::{DbError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::fmt;
use std::ops::Index;
use tracing::debug;

/// Driver type codes, numbered as in the MySQL client protocol.
pub mod type_codes {
    pub const DECIMAL: u8 = 0;
    pub const TINY: u8 = 1;
    pub const SHORT: u8 = 2;
    pub const LONG: u8 = 3;
    pub const FLOAT: u8 = 4;
    pub const DOUBLE: u8 = 5;
    pub const NULL: u8 = 6;
    pub const TIMESTAMP: u8 = 7;
    pub const LONGLONG: u8 = 8;
    pub const INT24: u8 = 9;
    pub const DATE: u8 = 10;
    pub const TIME: u8 = 11;
    pub const DATETIME: u8 = 12;
    pub const YEAR: u8 = 13;
    pub const VARCHAR: u8 = 15;
    pub const BIT: u8 = 16;
    pub const JSON: u8 = 245;
    pub const NEWDECIMAL: u8 = 246;
    pub const BLOB: u8 = 252;
    pub const VAR_STRING: u8 = 253;
    pub const STRING: u8 = 254;
}

/// A query parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<bool> for Param {
    fn from(v: bool) -> Self {
        Param::Bool(v)
    }
}

impl From<i32> for Param {
    fn from(v: i32) -> Self {
        Param::Integer(v.into())
    }
}

impl From<i64> for Param {
    fn from(v: i64) -> Self {
        Param::Integer(v)
    }
}

impl From<u32> for Param {
    fn from(v: u32) -> Self {
        Param::Integer(v.into())
    }
}

impl From<f64> for Param {
    fn from(v: f64) -> Self {
        Param::Float(v)
    }
}

impl From<&str> for Param {
    fn from(v: &str) -> Self {
        Param::Text(v.to_string())
    }
}

impl From<String> for Param {
    fn from(v: String) -> Self {
        Param::Text(v)
    }
}

impl From<Vec<u8>> for Param {
    fn from(v: Vec<u8>) -> Self {
        Param::Blob(v)
    }
}

impl From<&[u8]> for Param {
    fn from(v: &[u8]) -> Self {
        Param::Blob(v.to_vec())
    }
}

impl<T: Into<Param>> From<Option<T>> for Param {
    fn from(v: Option<T>) -> Self {
        v.map_or(Param::Null, Into::into)
    }
}

/// Wire type a parameter is bound with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindType {
    Integer,
    Float,
    Text,
    Blob,
}

impl BindType {
    /// One-letter symbol used in type signatures.
    pub fn symbol(self) -> char {
        match self {
            BindType::Integer => 'i',
            BindType::Float => 'd',
            BindType::Text => 's',
            BindType::Blob => 'b',
        }
    }
}

impl fmt::Display for BindType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// A parameter paired with the bind type inferred for it.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundParameter {
    pub value: Param,
    pub bind_type: BindType,
}

/// Bind type for a single parameter.
///
/// Empty text is matched before anything else, then null/bool/integer,
/// then float, then any other text.
pub fn infer_type(param: &Param) -> BindType {
    match param {
        Param::Text(s) if s.is_empty() => BindType::Text,
        Param::Null | Param::Bool(_) | Param::Integer(_) => BindType::Integer,
        Param::Float(_) => BindType::Float,
        Param::Text(_) => BindType::Text,
        Param::Blob(_) => BindType::Blob,
    }
}

pub fn infer_types(params: &[Param]) -> Vec<BindType> {
    params.iter().map(infer_type).collect()
}

pub fn type_signature(params: &[Param]) -> String {
    params.iter().map(|p| infer_type(p).symbol()).collect()
}

pub fn bind_parameters(params: &[Param]) -> Vec<BoundParameter> {
    params
        .iter()
        .map(|p| BoundParameter {
            value: p.clone(),
            bind_type: infer_type(p),
        })
        .collect()
}

/// A decoded column value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
    DateTime(NaiveDateTime),
    Date(NaiveDate),
    Time(NaiveTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Value::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    /// Text rendering used for scalar extraction (e.g. server versions).
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(b.to_string()),
            Value::Integer(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Text(s) => Some(s.clone()),
            Value::Blob(b) => Some(String::from_utf8_lossy(b).into_owned()),
            Value::DateTime(dt) => Some(dt.to_string()),
            Value::Date(d) => Some(d.to_string()),
            Value::Time(t) => Some(t.to_string()),
        }
    }
}

/// One decoded row: column name to value, in column order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultRow {
    entries: Vec<(String, Value)>,
}

impl ResultRow {
    pub fn with_capacity(capacity: usize) -> Self {
        ResultRow {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Inserts a value; a repeated name overwrites the earlier value in place.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((name, value));
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn first(&self) -> Option<&Value> {
        self.entries.first().map(|(_, v)| v)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Index<&str> for ResultRow {
    type Output = Value;

    fn index(&self, name: &str) -> &Value {
        match self.get(name) {
            Some(value) => value,
            None => panic!("no column named '{}' in result row", name),
        }
    }
}

impl Serialize for ResultRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// How the cells of a column are decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodePolicy {
    DateTime,
    Date,
    Time,
    Boolean,
    Float,
    Integer,
    Passthrough,
}

impl DecodePolicy {
    /// Fixed decode table. Bit columns are booleans whatever their width.
    pub fn for_type_code(code: u8) -> Self {
        use type_codes::*;
        match code {
            TIMESTAMP | DATETIME => DecodePolicy::DateTime,
            DATE => DecodePolicy::Date,
            TIME => DecodePolicy::Time,
            BIT => DecodePolicy::Boolean,
            FLOAT | DOUBLE | NEWDECIMAL => DecodePolicy::Float,
            TINY | SHORT | LONG | LONGLONG | INT24 | YEAR => DecodePolicy::Integer,
            _ => DecodePolicy::Passthrough,
        }
    }
}

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Reads the date-time spellings SQLite applications store: SQL and ISO
/// forms with or without seconds, RFC 3339 with an offset (normalized to
/// UTC), a bare date (midnight) and integer Unix seconds.
pub fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|dt| dt.naive_utc())
        })
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .or_else(|| {
            text.parse::<i64>()
                .ok()
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
                .map(|dt| dt.naive_utc())
        })
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_datetime(text).map(|dt| dt.date()))
}

fn parse_time(text: &str) -> Option<NaiveTime> {
    ["%H:%M:%S%.f", "%H:%M"]
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(text, format).ok())
        .or_else(|| parse_datetime(text).map(|dt| dt.time()))
}

fn decode_bit(bytes: &[u8]) -> bool {
    if let Ok(text) = std::str::from_utf8(bytes) {
        let text = text.trim();
        if let Ok(n) = text.parse::<i64>() {
            return n != 0;
        }
        if text.eq_ignore_ascii_case("true") {
            return true;
        }
        if text.eq_ignore_ascii_case("false") {
            return false;
        }
    }
    bytes.iter().any(|b| *b != 0)
}

fn passthrough(bytes: &[u8]) -> Value {
    match String::from_utf8(bytes.to_vec()) {
        Ok(text) => Value::Text(text),
        Err(err) => Value::Blob(err.into_bytes()),
    }
}

/// Decodes one cell of `column`. NULL stays NULL for every type code.
///
/// SQLite does not enforce declared types, so a cell that does not read as
/// its column's type is kept as text (or a blob) instead of failing the row.
pub fn decode_value(column: &ColumnDescriptor, raw: &RawCell) -> Result<Value> {
    let Some(bytes) = raw else {
        return Ok(Value::Null);
    };
    let text = std::str::from_utf8(bytes).map(str::trim).unwrap_or("");

    let policy = DecodePolicy::for_type_code(column.type_code);
    let decoded = match policy {
        DecodePolicy::DateTime => parse_datetime(text).map(Value::DateTime),
        DecodePolicy::Date => parse_date(text).map(Value::Date),
        DecodePolicy::Time => parse_time(text).map(Value::Time),
        DecodePolicy::Boolean => Some(Value::Bool(decode_bit(bytes))),
        DecodePolicy::Float => text.parse::<f64>().ok().map(Value::Float),
        DecodePolicy::Integer => text.parse::<i64>().ok().map(Value::Integer),
        DecodePolicy::Passthrough => None,
    };

    Ok(decoded.unwrap_or_else(|| {
        if policy != DecodePolicy::Passthrough {
            debug!(
                column = %column.name,
                ?policy,
                "Keeping undecodable cell as is"
            );
        }
        passthrough(bytes)
    }))
}

/// Decodes a buffered row against its column metadata.
pub fn decode_row(columns: &[ColumnDescriptor], raw: &[RawCell]) -> Result<ResultRow> {
    if columns.len() != raw.len() {
        return Err(DbError::Decode {
            column: String::new(),
            message: format!(
                "row has {} cells for {} columns",
                raw.len(),
                columns.len()
            ),
        });
    }

    let mut row = ResultRow::with_capacity(columns.len());
    for (column, cell) in columns.iter().zip(raw) {
        row.insert(column.name.clone(), decode_value(column, cell)?);
    }
    Ok(row)
}
