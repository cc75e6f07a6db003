//! Typed rows over a store cursor

use chrono::{DateTime, Utc};
use docsql_ir::{lookup_path, Column, Document, SqlType, Value};
use docsql_store::StoreCursor;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::fmt;
use tracing::warn;

use crate::error::{ProgrammingError, Result};

/// A SQL-visible value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Boolean(bool),
    Integer(i32),
    BigInt(i64),
    Double(f64),
    Decimal(Decimal),
    Text(String),
    Timestamp(DateTime<Utc>),
    Binary(Vec<u8>),
    /// Nested documents and arrays
    Json(serde_json::Value),
}

impl SqlValue {
    /// Convert a document value, coercing to `sql_type` when it is known.
    pub fn from_value(value: &Value, sql_type: Option<SqlType>) -> Self {
        let coerced = match sql_type {
            Some(ty) => ty.coerce(value).ok(),
            None => None,
        };
        match coerced.as_ref().unwrap_or(value) {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Boolean(*b),
            Value::Int32(i) => SqlValue::Integer(*i),
            Value::Int64(i) => SqlValue::BigInt(*i),
            Value::Double(f) => SqlValue::Double(*f),
            Value::Decimal(d) => SqlValue::Decimal(*d),
            Value::String(s) => SqlValue::Text(s.clone()),
            Value::Date(d) => SqlValue::Timestamp(*d),
            Value::Binary(b) => SqlValue::Binary(b.clone()),
            other @ (Value::Array(_) | Value::Document(_)) => SqlValue::Json(other.to_json()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(i) => Some(*i as i64),
            SqlValue::BigInt(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Integer(i) => Some(*i as f64),
            SqlValue::BigInt(i) => Some(*i as f64),
            SqlValue::Double(f) => Some(*f),
            SqlValue::Decimal(d) => Value::Decimal(*d).as_f64(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SqlValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            SqlValue::Null => serde_json::Value::Null,
            SqlValue::Boolean(b) => serde_json::Value::Bool(*b),
            SqlValue::Integer(i) => (*i).into(),
            SqlValue::BigInt(i) => (*i).into(),
            SqlValue::Double(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            SqlValue::Decimal(d) => serde_json::Value::String(d.to_string()),
            SqlValue::Text(s) => serde_json::Value::String(s.clone()),
            SqlValue::Timestamp(d) => Value::Date(*d).to_json(),
            SqlValue::Binary(b) => Value::Binary(b.clone()).to_json(),
            SqlValue::Json(v) => v.clone(),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("NULL"),
            SqlValue::Text(s) => f.write_str(s),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_string())
    }
}

impl From<i32> for SqlValue {
    fn from(i: i32) -> Self {
        SqlValue::Integer(i)
    }
}

impl From<i64> for SqlValue {
    fn from(i: i64) -> Self {
        SqlValue::BigInt(i)
    }
}

impl From<f64> for SqlValue {
    fn from(f: f64) -> Self {
        SqlValue::Double(f)
    }
}

impl From<bool> for SqlValue {
    fn from(b: bool) -> Self {
        SqlValue::Boolean(b)
    }
}

/// Column metadata for a result.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescription {
    pub name: String,
    pub sql_type: Option<SqlType>,
}

impl ColumnDescription {
    /// Declared type name; VARCHAR when the type is unknown.
    pub fn type_name(&self) -> &'static str {
        self.sql_type.map(|t| t.name()).unwrap_or("VARCHAR")
    }
}

/// One result row: ordered `(column, value)` pairs.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    values: Vec<(String, SqlValue)>,
}

impl Row {
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.values.iter().find(|(name, _)| name == column).map(|(_, v)| v)
    }

    pub fn get_index(&self, index: usize) -> Option<&SqlValue> {
        self.values.get(index).map(|(_, v)| v)
    }

    pub fn columns(&self) -> Vec<&str> {
        self.values.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn values(&self) -> Vec<&SqlValue> {
        self.values.iter().map(|(_, v)| v).collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.values
                .iter()
                .map(|(name, value)| (name.clone(), value.to_json()))
                .collect(),
        )
    }
}

impl IntoIterator for Row {
    type Item = (String, SqlValue);
    type IntoIter = std::vec::IntoIter<(String, SqlValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

/// Forward-only rows read lazily from a store cursor.
///
/// A fetch that runs into the end of the data marks the set exhausted and
/// releases the store cursor; any later fetch is a [`ProgrammingError`].
pub struct ResultSet {
    cursor: Option<Box<dyn StoreCursor>>,
    buffer: VecDeque<Document>,
    /// Projected columns; `None` for `SELECT *`.
    columns: Option<Vec<Column>>,
    description: Option<Vec<ColumnDescription>>,
    arraysize: usize,
    rownumber: usize,
    drained: bool,
    exhausted: bool,
    closed: bool,
}

impl ResultSet {
    pub(crate) fn new(cursor: Box<dyn StoreCursor>, columns: Vec<Column>, wildcard: bool, arraysize: usize) -> Self {
        let (columns, description) = if wildcard {
            (None, None)
        } else {
            let description = columns
                .iter()
                .map(|c| ColumnDescription {
                    name: c.name.clone(),
                    sql_type: c.sql_type,
                })
                .collect();
            (Some(columns), Some(description))
        };
        Self {
            cursor: Some(cursor),
            buffer: VecDeque::new(),
            columns,
            description,
            arraysize: arraysize.max(1),
            rownumber: 0,
            drained: false,
            exhausted: false,
            closed: false,
        }
    }

    /// Column metadata. For `SELECT *` this reads ahead to the first document.
    pub fn description(&mut self) -> Result<Option<&[ColumnDescription]>> {
        if self.description.is_none() && !self.closed {
            self.fill(1)?;
            if let Some(first) = self.buffer.front() {
                self.description = Some(
                    first
                        .keys()
                        .map(|name| ColumnDescription {
                            name: name.clone(),
                            sql_type: None,
                        })
                        .collect(),
                );
            }
        }
        Ok(self.description.as_deref())
    }

    /// Rows returned so far
    pub fn rownumber(&self) -> usize {
        self.rownumber
    }

    pub fn arraysize(&self) -> usize {
        self.arraysize
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn fetch_one(&mut self) -> Result<Option<Row>> {
        self.check_open()?;
        self.fill(1)?;
        match self.buffer.pop_front() {
            Some(doc) => {
                self.rownumber += 1;
                Ok(Some(self.row(doc)))
            }
            None => {
                self.finish();
                Ok(None)
            }
        }
    }

    /// Up to `size` rows; `arraysize` when `size` is `None`.
    pub fn fetch_many(&mut self, size: Option<usize>) -> Result<Vec<Row>> {
        self.check_open()?;
        let size = size.unwrap_or(self.arraysize);
        self.fill(size)?;
        let take = size.min(self.buffer.len());
        let docs: Vec<Document> = self.buffer.drain(..take).collect();
        if docs.len() < size {
            self.finish();
        }
        self.rownumber += docs.len();
        Ok(docs.into_iter().map(|d| self.row(d)).collect())
    }

    pub fn fetch_all(&mut self) -> Result<Vec<Row>> {
        self.check_open()?;
        self.fill(usize::MAX)?;
        let docs: Vec<Document> = self.buffer.drain(..).collect();
        self.finish();
        self.rownumber += docs.len();
        Ok(docs.into_iter().map(|d| self.row(d)).collect())
    }

    /// Release the store cursor. Safe to call more than once.
    pub fn close(&mut self) {
        self.release();
        self.buffer.clear();
        self.closed = true;
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(ProgrammingError::ResultSetClosed.into());
        }
        if self.exhausted {
            return Err(ProgrammingError::ResultSetExhausted.into());
        }
        Ok(())
    }

    /// Buffer at least `count` documents unless the cursor runs out first.
    fn fill(&mut self, count: usize) -> Result<()> {
        while self.buffer.len() < count && !self.drained {
            let Some(cursor) = self.cursor.as_mut() else {
                self.drained = true;
                break;
            };
            let batch = cursor.next_batch()?;
            if batch.is_empty() {
                self.drained = true;
                self.release();
            } else {
                self.buffer.extend(batch);
            }
        }
        Ok(())
    }

    fn finish(&mut self) {
        self.exhausted = true;
        self.release();
    }

    fn release(&mut self) {
        if let Some(mut cursor) = self.cursor.take() {
            if let Err(e) = cursor.close() {
                warn!(error = %e, "Failed to close store cursor");
            }
        }
    }

    fn row(&self, doc: Document) -> Row {
        let values = match &self.columns {
            Some(columns) => columns
                .iter()
                .map(|c| {
                    let value = lookup_path(&doc, &c.source)
                        .map(|v| SqlValue::from_value(v, c.sql_type))
                        .unwrap_or(SqlValue::Null);
                    (c.name.clone(), value)
                })
                .collect(),
            None => doc
                .iter()
                .map(|(name, v)| (name.clone(), SqlValue::from_value(v, None)))
                .collect(),
        };
        Row { values }
    }
}

impl Drop for ResultSet {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsql_ir::doc;
    use docsql_store::Result as StoreResult;

    struct VecCursor {
        batches: VecDeque<Vec<Document>>,
        closed: bool,
    }

    impl StoreCursor for VecCursor {
        fn next_batch(&mut self) -> StoreResult<Vec<Document>> {
            Ok(self.batches.pop_front().unwrap_or_default())
        }

        fn close(&mut self) -> StoreResult<()> {
            self.closed = true;
            Ok(())
        }
    }

    fn result_set(docs: Vec<Document>, columns: Vec<Column>, wildcard: bool) -> ResultSet {
        let cursor = VecCursor {
            batches: docs.chunks(2).map(|c| c.to_vec()).collect(),
            closed: false,
        };
        ResultSet::new(Box::new(cursor), columns, wildcard, 2)
    }

    #[test]
    fn test_projected_columns_and_missing_fields() {
        let docs = vec![
            doc! { "_id" => 1, "name" => "ann", "address" => doc! { "city" => "Oslo" } },
            doc! { "_id" => 2, "name" => "bo" },
        ];
        let columns = vec![
            Column::new("name", "name"),
            Column::new("city", "address.city"),
            Column::new("n", "_id").typed(Some(SqlType::BigInt)),
        ];
        let mut rs = result_set(docs, columns, false);
        let rows = rs.fetch_all().unwrap();
        assert_eq!(rows[0].get("city"), Some(&SqlValue::from("Oslo")));
        assert_eq!(rows[1].get("city"), Some(&SqlValue::Null));
        assert_eq!(rows[1].get("n"), Some(&SqlValue::BigInt(2)));
        assert_eq!(rows[0].columns(), vec!["name", "city", "n"]);
    }

    #[test]
    fn test_fetch_after_exhaustion_fails() {
        let docs = vec![doc! { "a" => 1 }, doc! { "a" => 2 }, doc! { "a" => 3 }];
        let mut rs = result_set(docs, Vec::new(), true);
        assert_eq!(rs.fetch_many(None).unwrap().len(), 2);
        assert!(rs.fetch_one().unwrap().is_some());
        assert!(rs.fetch_one().unwrap().is_none());
        assert!(matches!(
            rs.fetch_one(),
            Err(crate::Error::Programming(ProgrammingError::ResultSetExhausted))
        ));
        assert_eq!(rs.rownumber(), 3);
    }

    #[test]
    fn test_wildcard_description_reads_ahead() {
        let docs = vec![doc! { "_id" => 1, "b" => 2, "a" => 3 }];
        let mut rs = result_set(docs, Vec::new(), true);
        let names: Vec<String> = rs
            .description()
            .unwrap()
            .unwrap()
            .iter()
            .map(|c| c.name.clone())
            .collect();
        assert_eq!(names, vec!["_id", "b", "a"]);
        assert_eq!(rs.fetch_all().unwrap().len(), 1);
    }

    #[test]
    fn test_nested_values_surface_as_json() {
        let value = Value::from(doc! { "k" => vec![Value::Int32(1)] });
        assert_eq!(
            SqlValue::from_value(&value, None),
            SqlValue::Json(serde_json::json!({"k": [1]}))
        );
    }
}
