//! SQL column types and their document-store counterparts

use chrono::{DateTime, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

use crate::value::{Document, Value};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot convert {from} value {value} to {target:?}")]
pub struct CoercionError {
    pub from: &'static str,
    pub value: String,
    pub target: SqlType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlType {
    // Text
    Varchar,
    Char,
    Text,

    // Numeric
    Integer,
    BigInt,
    Float,
    Real,
    Double,
    Decimal,

    Boolean,

    // Temporal
    Date,
    DateTime,
    Timestamp,

    // Complex
    Json,
    Binary,
    Blob,
}

/// Value kinds as the document store names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentType {
    Null,
    String,
    Int32,
    Int64,
    Double,
    Decimal128,
    Bool,
    Date,
    Object,
    Array,
    Binary,
}

impl DocumentType {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => DocumentType::Null,
            Value::Bool(_) => DocumentType::Bool,
            Value::Int32(_) => DocumentType::Int32,
            Value::Int64(_) => DocumentType::Int64,
            Value::Double(_) => DocumentType::Double,
            Value::Decimal(_) => DocumentType::Decimal128,
            Value::String(_) => DocumentType::String,
            Value::Date(_) => DocumentType::Date,
            Value::Binary(_) => DocumentType::Binary,
            Value::Array(_) => DocumentType::Array,
            Value::Document(_) => DocumentType::Object,
        }
    }
}

impl SqlType {
    /// Resolve a type name such as `VARCHAR(64)`, `int` or `DOUBLE PRECISION`.
    pub fn from_name(name: &str) -> Option<Self> {
        let base = name.split('(').next().unwrap_or(name).trim().to_ascii_uppercase();
        let ty = match base.as_str() {
            "VARCHAR" | "STRING" | "NVARCHAR" => SqlType::Varchar,
            "CHAR" | "CHARACTER" | "NCHAR" => SqlType::Char,
            "TEXT" | "CLOB" => SqlType::Text,
            "INT" | "INTEGER" | "SMALLINT" | "TINYINT" | "INT32" => SqlType::Integer,
            "BIGINT" | "LONG" | "INT64" => SqlType::BigInt,
            "FLOAT" => SqlType::Float,
            "REAL" => SqlType::Real,
            "DOUBLE" | "DOUBLE PRECISION" => SqlType::Double,
            "DECIMAL" | "NUMERIC" | "DEC" => SqlType::Decimal,
            "BOOL" | "BOOLEAN" => SqlType::Boolean,
            "DATE" => SqlType::Date,
            "DATETIME" => SqlType::DateTime,
            "TIMESTAMP" => SqlType::Timestamp,
            "JSON" | "OBJECT" | "ARRAY" => SqlType::Json,
            "BINARY" | "VARBINARY" => SqlType::Binary,
            "BLOB" | "BYTEA" => SqlType::Blob,
            _ => return None,
        };
        Some(ty)
    }

    pub fn name(&self) -> &'static str {
        match self {
            SqlType::Varchar => "VARCHAR",
            SqlType::Char => "CHAR",
            SqlType::Text => "TEXT",
            SqlType::Integer => "INTEGER",
            SqlType::BigInt => "BIGINT",
            SqlType::Float => "FLOAT",
            SqlType::Real => "REAL",
            SqlType::Double => "DOUBLE",
            SqlType::Decimal => "DECIMAL",
            SqlType::Boolean => "BOOLEAN",
            SqlType::Date => "DATE",
            SqlType::DateTime => "DATETIME",
            SqlType::Timestamp => "TIMESTAMP",
            SqlType::Json => "JSON",
            SqlType::Binary => "BINARY",
            SqlType::Blob => "BLOB",
        }
    }

    pub fn document_type(&self) -> DocumentType {
        match self {
            SqlType::Varchar | SqlType::Char | SqlType::Text => DocumentType::String,
            SqlType::Integer => DocumentType::Int32,
            SqlType::BigInt => DocumentType::Int64,
            SqlType::Float | SqlType::Real | SqlType::Double => DocumentType::Double,
            SqlType::Decimal => DocumentType::Decimal128,
            SqlType::Boolean => DocumentType::Bool,
            SqlType::Date | SqlType::DateTime | SqlType::Timestamp => DocumentType::Date,
            SqlType::Json => DocumentType::Object,
            SqlType::Binary | SqlType::Blob => DocumentType::Binary,
        }
    }

    /// Canonical SQL type for a document type. `None` for null.
    pub fn for_document_type(doc_type: DocumentType) -> Option<Self> {
        let ty = match doc_type {
            DocumentType::Null => return None,
            DocumentType::String => SqlType::Varchar,
            DocumentType::Int32 => SqlType::Integer,
            DocumentType::Int64 => SqlType::BigInt,
            DocumentType::Double => SqlType::Double,
            DocumentType::Decimal128 => SqlType::Decimal,
            DocumentType::Bool => SqlType::Boolean,
            DocumentType::Date => SqlType::Timestamp,
            DocumentType::Object | DocumentType::Array => SqlType::Json,
            DocumentType::Binary => SqlType::Binary,
        };
        Some(ty)
    }

    /// Convert a value into this type's document representation. Null stays null.
    pub fn coerce(&self, value: &Value) -> Result<Value, CoercionError> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        let converted = match self.document_type() {
            DocumentType::String => Some(Value::String(to_text(value))),
            DocumentType::Int32 => to_integer(value)
                .and_then(|i| i32::try_from(i).ok())
                .map(Value::Int32),
            DocumentType::Int64 => to_integer(value).map(Value::Int64),
            DocumentType::Double => to_double(value).map(Value::Double),
            DocumentType::Decimal128 => to_decimal(value).map(Value::Decimal),
            DocumentType::Bool => to_bool(value).map(Value::Bool),
            DocumentType::Date => to_date(value).map(|d| {
                if *self == SqlType::Date {
                    Value::Date(truncate_to_day(d))
                } else {
                    Value::Date(d)
                }
            }),
            DocumentType::Object | DocumentType::Array => match value {
                Value::Document(_) | Value::Array(_) => Some(value.clone()),
                Value::String(s) => serde_json::from_str::<serde_json::Value>(s)
                    .ok()
                    .map(Value::from_json),
                _ => None,
            },
            DocumentType::Binary => match value {
                Value::Binary(bytes) => Some(Value::Binary(bytes.clone())),
                Value::String(s) => Some(Value::Binary(s.as_bytes().to_vec())),
                _ => None,
            },
            DocumentType::Null => None,
        };

        converted.ok_or_else(|| CoercionError {
            from: value.type_name(),
            value: value.to_string(),
            target: *self,
        })
    }
}

pub(crate) fn to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Date(d) => d.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        Value::Decimal(d) => d.to_string(),
        other => other.to_json().to_string(),
    }
}

fn to_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Int32(i) => Some(*i as i64),
        Value::Int64(i) => Some(*i),
        Value::Double(f) if f.is_finite() => Some(f.trunc() as i64),
        Value::Decimal(d) => d.trunc().to_i64(),
        Value::Bool(b) => Some(*b as i64),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
        }
        Value::Date(d) => Some(d.timestamp_millis()),
        _ => None,
    }
}

fn to_double(value: &Value) -> Option<f64> {
    match value {
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse().ok(),
        Value::Date(d) => Some(d.timestamp_millis() as f64),
        other => other.as_f64(),
    }
}

fn to_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Int32(i) => Some(Decimal::from(*i)),
        Value::Int64(i) => Some(Decimal::from(*i)),
        Value::Double(f) => Decimal::from_f64(*f),
        Value::Decimal(d) => Some(*d),
        Value::Bool(b) => Some(Decimal::from(*b as i32)),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

fn to_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "1" => Some(true),
            "false" | "f" | "no" | "n" | "0" => Some(false),
            _ => None,
        },
        other => other.as_f64().map(|f| f != 0.0),
    }
}

fn to_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Date(d) => Some(*d),
        Value::String(s) => Value::parse_datetime(s),
        Value::Int32(ms) => DateTime::from_timestamp_millis(*ms as i64),
        Value::Int64(ms) => DateTime::from_timestamp_millis(*ms),
        _ => None,
    }
}

fn truncate_to_day(d: DateTime<Utc>) -> DateTime<Utc> {
    d.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or(d)
}

/// Field-level type map of a document, in key order.
pub fn infer_types(doc: &Document) -> Vec<(String, Option<SqlType>)> {
    doc.iter()
        .map(|(k, v)| (k.clone(), SqlType::for_document_type(DocumentType::of(v))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names() {
        assert_eq!(SqlType::from_name("varchar(255)"), Some(SqlType::Varchar));
        assert_eq!(SqlType::from_name("INT"), Some(SqlType::Integer));
        assert_eq!(SqlType::from_name("numeric(10, 2)"), Some(SqlType::Decimal));
        assert_eq!(SqlType::from_name("geometry"), None);
    }

    #[test]
    fn test_mapping_table() {
        assert_eq!(SqlType::Text.document_type(), DocumentType::String);
        assert_eq!(SqlType::Integer.document_type(), DocumentType::Int32);
        assert_eq!(SqlType::BigInt.document_type(), DocumentType::Int64);
        assert_eq!(SqlType::Real.document_type(), DocumentType::Double);
        assert_eq!(
            SqlType::from_name("NUMERIC").unwrap().document_type(),
            DocumentType::Decimal128
        );
        assert_eq!(SqlType::Timestamp.document_type(), DocumentType::Date);
        assert_eq!(SqlType::Blob.document_type(), DocumentType::Binary);
    }

    #[test]
    fn test_coercions() {
        assert_eq!(SqlType::Integer.coerce(&Value::from("42")).unwrap(), Value::Int32(42));
        assert_eq!(SqlType::Integer.coerce(&Value::Double(3.9)).unwrap(), Value::Int32(3));
        assert_eq!(SqlType::Boolean.coerce(&Value::from("yes")).unwrap(), Value::Bool(true));
        assert_eq!(
            SqlType::Decimal.coerce(&Value::from("19.99")).unwrap(),
            Value::Decimal(Decimal::new(1999, 2))
        );
        assert_eq!(SqlType::Varchar.coerce(&Value::Int32(7)).unwrap(), Value::from("7"));
        assert_eq!(SqlType::Integer.coerce(&Value::Null).unwrap(), Value::Null);
        assert!(SqlType::Integer.coerce(&Value::Int64(i64::MAX)).is_err());
        assert!(SqlType::Date.coerce(&Value::Bool(true)).is_err());
    }

    #[test]
    fn test_date_truncates() {
        let ts = SqlType::Timestamp.coerce(&Value::from("2024-03-01 12:30:00")).unwrap();
        let day = SqlType::Date.coerce(&ts).unwrap();
        assert_eq!(day, Value::Date(Value::parse_datetime("2024-03-01").unwrap()));
    }
}
