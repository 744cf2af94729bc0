//! Record model shared by the loader, the ingestion path and the window.
//!
//! A [`Record`] maps column names to scalar [`Value`]s. Columns are kept in
//! sorted order so iteration (and therefore hashing) is deterministic.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::{Error, Result};

/// A single scalar cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    /// Categorical value.
    Text(String),
    Datetime(DateTime<Utc>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the value, if it has one. NaN counts as missing.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) if !n.is_nan() => Some(*n),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Append a type-tagged, unambiguous byte encoding of this value.
    ///
    /// Used for dataset fingerprints; two values encode identically iff they
    /// compare equal (with all NaNs collapsed to one encoding).
    pub fn write_canonical(&self, out: &mut Vec<u8>) {
        match self {
            Value::Null => out.push(0),
            Value::Bool(b) => {
                out.push(1);
                out.push(u8::from(*b));
            }
            Value::Number(n) => {
                out.push(2);
                let bits = if n.is_nan() {
                    f64::NAN.to_bits()
                } else if *n == 0.0 {
                    0.0f64.to_bits()
                } else {
                    n.to_bits()
                };
                out.extend_from_slice(&bits.to_le_bytes());
            }
            Value::Text(s) => {
                out.push(3);
                out.extend_from_slice(&(s.len() as u64).to_le_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            Value::Datetime(dt) => {
                out.push(4);
                out.extend_from_slice(&dt.timestamp_micros().to_le_bytes());
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(s) => write!(f, "{}", s),
            Value::Datetime(dt) => write!(f, "{}", dt.to_rfc3339()),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Value::Datetime(dt)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => serializer.serialize_f64(*n),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Datetime(dt) => serializer.serialize_str(&dt.to_rfc3339()),
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a scalar (null, bool, number or string)")
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: de::Error>(self) -> std::result::Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> std::result::Result<Value, D::Error> {
        d.deserialize_any(ValueVisitor)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Value, E> {
        Ok(Value::Number(v as f64))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Value, E> {
        Ok(Value::Number(v as f64))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<Value, E> {
        Ok(Value::Number(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Value, E> {
        Ok(Value::Text(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<Value, E> {
        Ok(Value::Text(v))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

/// Parse a timestamp in one of the accepted layouts.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS` and a bare
/// date. Naive timestamps are interpreted as UTC.
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for layout in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, layout) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// One observation: column name → scalar.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(BTreeMap<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(column.into(), value.into());
        self
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(column.into(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Columns in sorted order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn schema(&self) -> Schema {
        Schema(self.0.keys().cloned().collect())
    }

    /// Convert a text cell in `column` into a [`Value::Datetime`].
    ///
    /// Missing columns, nulls and values that are already timestamps are left
    /// alone. Text that does not parse is an error.
    pub fn coerce_datetime(&mut self, column: &str) -> Result<()> {
        if let Some(value) = self.0.get_mut(column) {
            if let Value::Text(text) = value {
                match parse_datetime(text) {
                    Some(dt) => *value = Value::Datetime(dt),
                    None => {
                        return Err(Error::InvalidBatch(format!(
                            "column {} holds {:?}, which is not a timestamp",
                            column, text
                        )))
                    }
                }
            }
        }
        Ok(())
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Record(iter.into_iter().collect())
    }
}

/// The sorted column set of a record or dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema(BTreeSet<String>);

impl Schema {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Schema(columns.into_iter().map(Into::into).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, column: &str) -> bool {
        self.0.contains(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Check that every row has exactly this column set.
    ///
    /// Reports the first offending row with its missing and unexpected
    /// columns.
    pub fn check_rows(&self, rows: &[Record]) -> Result<()> {
        for (row, record) in rows.iter().enumerate() {
            let matches = record.len() == self.0.len()
                && record.columns().zip(self.0.iter()).all(|(a, b)| a == b.as_str());
            if matches {
                continue;
            }
            let missing = self
                .0
                .iter()
                .filter(|c| record.get(c).is_none())
                .cloned()
                .collect();
            let unexpected = record
                .columns()
                .filter(|c| !self.0.contains(*c))
                .map(str::to_string)
                .collect();
            return Err(Error::SchemaMismatch {
                row,
                missing,
                unexpected,
            });
        }
        Ok(())
    }
}

/// Body accepted by the ingestion endpoint.
///
/// Three JSON shapes are recognized, tried in this order:
/// - `[{"a": 1}, {"a": 2}]`: rows
/// - `{"a": [1, 2]}`: columns of equal length
/// - `{"a": 1}`: a single row
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BatchPayload {
    Rows(Vec<Record>),
    Columns(BTreeMap<String, Vec<Value>>),
    Row(Record),
}

impl BatchPayload {
    /// Parse a request body.
    pub fn from_json(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| {
            Error::InvalidBatch(format!(
                "expected rows, a column mapping or a single row: {}",
                e
            ))
        })
    }

    /// Convert into row-major records.
    pub fn into_records(self) -> Result<Vec<Record>> {
        match self {
            BatchPayload::Rows(rows) => Ok(rows),
            BatchPayload::Row(row) => Ok(vec![row]),
            BatchPayload::Columns(columns) => {
                let mut lengths = columns.iter().map(|(name, values)| (name, values.len()));
                let Some((_, len)) = lengths.next() else {
                    return Ok(Vec::new());
                };
                if let Some((name, other)) = lengths.find(|(_, l)| *l != len) {
                    return Err(Error::InvalidBatch(format!(
                        "column {} has {} values, expected {}",
                        name, other, len
                    )));
                }

                let mut rows = vec![Record::new(); len];
                for (name, values) in columns {
                    for (row, value) in rows.iter_mut().zip(values) {
                        row.insert(name.clone(), value);
                    }
                }
                Ok(rows)
            }
        }
    }
}
