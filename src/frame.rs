//! Row/DataFrame bridge for Sluice.
//!
//! Warehouse clients hand back scalar rows in all sorts of shapes; this
//! module defines the common scalar model and converts it to and from
//! polars DataFrames. The write paths use the same model in reverse to
//! render rows as SQL literals or JSON objects.

use crate::error::{Result, SluiceError};
use base64::Engine as _;
use polars::prelude::*;

/// Logical column type used when assembling a DataFrame from rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Bool,
    Int,
    Float,
    String,
    Bytes,
}

/// Metadata about a column in a result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,

    /// Logical type of the column.
    pub kind: ValueKind,
}

impl ColumnInfo {
    /// Creates a new ColumnInfo.
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// A single scalar value from a result row.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
}

/// A row of values, ordered to match the column metadata.
pub type Row = Vec<Value>;

impl Value {
    fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    // Text columns coerce scalars; warehouses routinely return numerics
    // (and timestamps) as text over their JSON APIs.
    fn as_text(&self) -> Option<String> {
        match self {
            Self::String(s) => Some(s.clone()),
            Self::Bool(b) => Some(b.to_string()),
            Self::Int(v) => Some(v.to_string()),
            Self::Float(v) => Some(v.to_string()),
            Self::Null | Self::Bytes(_) => None,
        }
    }

    fn as_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Self::Bytes(b) => Some(b.clone()),
            _ => None,
        }
    }

    /// Renders the value as a SQL literal (Postgres-flavored).
    ///
    /// Strings are quoted with single quotes doubled; bytes render as a
    /// `'\x...'` hex literal. Non-finite floats render as NULL. Backends
    /// with different literal rules (Snowflake) wrap this with their own
    /// rendering.
    pub fn to_sql_literal(&self) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            Self::Int(v) => v.to_string(),
            Self::Float(v) => {
                if v.is_finite() {
                    v.to_string()
                } else {
                    "NULL".to_string()
                }
            }
            Self::String(s) => format!("'{}'", escape_sql_string(s)),
            Self::Bytes(b) => format!("'\\x{}'", hex_encode(b)),
        }
    }

    /// Renders the value for a JSON row payload (BigQuery streaming insert).
    ///
    /// Bytes encode as base64, which is what the BigQuery JSON API expects.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(v) => serde_json::Value::from(*v),
            Self::Float(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Bytes(b) => {
                serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(b))
            }
        }
    }
}

/// Doubles single quotes for embedding in a SQL string literal.
pub fn escape_sql_string(s: &str) -> String {
    s.replace('\'', "''")
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().fold(String::new(), |mut acc, b| {
        use std::fmt::Write;
        let _ = write!(acc, "{b:02x}");
        acc
    })
}

/// Assembles a DataFrame from column metadata and rows.
///
/// Values that do not match the declared column kind become nulls, matching
/// how lossy warehouse JSON transports behave.
pub fn rows_to_dataframe(columns: &[ColumnInfo], rows: Vec<Row>) -> Result<DataFrame> {
    for (i, row) in rows.iter().enumerate() {
        if row.len() != columns.len() {
            return Err(SluiceError::frame(format!(
                "row {i} has {} values, expected {}",
                row.len(),
                columns.len()
            )));
        }
    }

    let mut out: Vec<Column> = Vec::with_capacity(columns.len());

    for (j, info) in columns.iter().enumerate() {
        let name = PlSmallStr::from_str(&info.name);
        let series = match info.kind {
            ValueKind::Bool => {
                let vals: Vec<Option<bool>> = rows.iter().map(|r| r[j].as_bool()).collect();
                Series::new(name, vals)
            }
            ValueKind::Int => {
                let vals: Vec<Option<i64>> = rows.iter().map(|r| r[j].as_i64()).collect();
                Series::new(name, vals)
            }
            ValueKind::Float => {
                let vals: Vec<Option<f64>> = rows.iter().map(|r| r[j].as_f64()).collect();
                Series::new(name, vals)
            }
            ValueKind::String => {
                let vals: Vec<Option<String>> = rows.iter().map(|r| r[j].as_text()).collect();
                Series::new(name, vals)
            }
            ValueKind::Bytes => {
                let vals: Vec<Option<Vec<u8>>> = rows.iter().map(|r| r[j].as_bytes()).collect();
                Series::new(name, vals)
            }
        };
        out.push(series.into_column());
    }

    DataFrame::new(out).map_err(Into::into)
}

/// Flattens a DataFrame into rows of [`Value`]s.
///
/// Types without a scalar mapping (dates, datetimes, decimals) render
/// through their display form as strings, which all write paths accept.
pub fn dataframe_to_rows(df: &DataFrame) -> Result<Vec<Row>> {
    let columns = df.get_columns();
    let mut rows = Vec::with_capacity(df.height());

    for idx in 0..df.height() {
        let mut row = Vec::with_capacity(columns.len());
        for col in columns {
            let av = col.get(idx)?;
            row.push(anyvalue_to_value(av));
        }
        rows.push(row);
    }

    Ok(rows)
}

/// Derives column metadata from a DataFrame's schema.
pub fn infer_columns(df: &DataFrame) -> Vec<ColumnInfo> {
    df.get_columns()
        .iter()
        .map(|col| ColumnInfo::new(col.name().as_str(), kind_for_dtype(col.dtype())))
        .collect()
}

fn kind_for_dtype(dtype: &DataType) -> ValueKind {
    match dtype {
        DataType::Boolean => ValueKind::Bool,
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => ValueKind::Int,
        DataType::Float32 | DataType::Float64 => ValueKind::Float,
        DataType::Binary => ValueKind::Bytes,
        _ => ValueKind::String,
    }
}

fn anyvalue_to_value(av: AnyValue<'_>) -> Value {
    match av {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(b) => Value::Bool(b),
        AnyValue::Int8(v) => Value::Int(v as i64),
        AnyValue::Int16(v) => Value::Int(v as i64),
        AnyValue::Int32(v) => Value::Int(v as i64),
        AnyValue::Int64(v) => Value::Int(v),
        AnyValue::UInt8(v) => Value::Int(v as i64),
        AnyValue::UInt16(v) => Value::Int(v as i64),
        AnyValue::UInt32(v) => Value::Int(v as i64),
        AnyValue::UInt64(v) => Value::Int(v as i64),
        AnyValue::Float32(v) => Value::Float(v as f64),
        AnyValue::Float64(v) => Value::Float(v),
        AnyValue::String(s) => Value::String(s.to_string()),
        AnyValue::StringOwned(s) => Value::String(s.to_string()),
        AnyValue::Binary(b) => Value::Bytes(b.to_vec()),
        AnyValue::BinaryOwned(b) => Value::Bytes(b),
        // Dates, datetimes, decimals: go through the display form.
        other => Value::String(other.to_string()),
    }
}
