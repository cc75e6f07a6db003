//! Translated statements

use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::expr::AggExpr;
use crate::filter::Filter;
use crate::pipeline::{Pipeline, Projection, SortSpec};
use crate::types::SqlType;
use crate::value::{Document, Value};

/// Output column of a read statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    /// Name the caller sees (alias when one was given).
    pub name: String,
    /// Path of the value inside each result document.
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_type: Option<SqlType>,
}

impl Column {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            sql_type: None,
        }
    }

    pub fn typed(mut self, sql_type: Option<SqlType>) -> Self {
        self.sql_type = sql_type;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindQuery {
    pub filter: Filter,
    pub projection: Option<Projection>,
    pub sort: Option<SortSpec>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertCommand {
    pub documents: Vec<Document>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateSpec {
    /// `{$set: {...}}` with constant values
    Set(Vec<(String, Value)>),
    /// `[{$set: {...}}]` with values computed from the matched document
    Pipeline(Vec<(String, AggExpr)>),
}

impl UpdateSpec {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            UpdateSpec::Set(fields) => {
                let body: serde_json::Map<_, _> = fields
                    .iter()
                    .map(|(path, v)| (path.clone(), v.to_json()))
                    .collect();
                json!({ "$set": body })
            }
            UpdateSpec::Pipeline(fields) => {
                let body: serde_json::Map<_, _> = fields
                    .iter()
                    .map(|(path, e)| (path.clone(), e.to_json()))
                    .collect();
                json!([{ "$set": body }])
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateCommand {
    pub filter: Filter,
    pub update: UpdateSpec,
    pub multi: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteCommand {
    pub filter: Filter,
    pub multi: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Find(FindQuery),
    Aggregate(Pipeline),
    Insert(InsertCommand),
    Update(UpdateCommand),
    Delete(DeleteCommand),
}

impl Operation {
    pub fn command_name(&self) -> &'static str {
        match self {
            Operation::Find(_) => "find",
            Operation::Aggregate(_) => "aggregate",
            Operation::Insert(_) => "insert",
            Operation::Update(_) => "update",
            Operation::Delete(_) => "delete",
        }
    }
}

/// A statement translated into a document-store command.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(into = "serde_json::Value")]
pub struct TranslatedQuery {
    pub collection: String,
    pub operation: Operation,
    /// Declared output columns, in SELECT-list order. Empty for writes.
    pub columns: Vec<Column>,
    /// `SELECT *`: columns come from each document's own key order.
    pub wildcard: bool,
}

impl TranslatedQuery {
    pub fn is_read(&self) -> bool {
        matches!(self.operation, Operation::Find(_) | Operation::Aggregate(_))
    }

    pub fn is_write(&self) -> bool {
        !self.is_read()
    }

    pub fn find(&self) -> Option<&FindQuery> {
        match &self.operation {
            Operation::Find(find) => Some(find),
            _ => None,
        }
    }

    pub fn pipeline(&self) -> Option<&Pipeline> {
        match &self.operation {
            Operation::Aggregate(pipeline) => Some(pipeline),
            _ => None,
        }
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Render as the store command document.
    pub fn to_mql(&self) -> serde_json::Value {
        let mut cmd = serde_json::Map::new();
        cmd.insert(
            self.operation.command_name().to_string(),
            json!(self.collection),
        );
        match &self.operation {
            Operation::Find(find) => {
                cmd.insert("filter".to_string(), find.filter.to_json());
                if let Some(projection) = &find.projection {
                    cmd.insert("projection".to_string(), projection.to_json());
                }
                if let Some(sort) = &find.sort {
                    cmd.insert("sort".to_string(), sort.to_json());
                }
                if let Some(skip) = find.skip {
                    cmd.insert("skip".to_string(), json!(skip));
                }
                if let Some(limit) = find.limit {
                    cmd.insert("limit".to_string(), json!(limit));
                }
            }
            Operation::Aggregate(pipeline) => {
                cmd.insert("pipeline".to_string(), pipeline.to_json());
            }
            Operation::Insert(insert) => {
                let docs = insert
                    .documents
                    .iter()
                    .map(crate::value::document_to_json)
                    .collect();
                cmd.insert("documents".to_string(), serde_json::Value::Array(docs));
            }
            Operation::Update(update) => {
                cmd.insert("filter".to_string(), update.filter.to_json());
                cmd.insert("update".to_string(), update.update.to_json());
                cmd.insert("multi".to_string(), json!(update.multi));
            }
            Operation::Delete(delete) => {
                cmd.insert("filter".to_string(), delete.filter.to_json());
                cmd.insert("multi".to_string(), json!(delete.multi));
            }
        }
        serde_json::Value::Object(cmd)
    }

    /// Calculate fingerprint (SHA-256) of the command and its output columns
    pub fn fingerprint(&self) -> String {
        let canonical = json!({
            "command": self.to_mql(),
            "columns": self.columns,
            "wildcard": self.wildcard,
        });
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

impl From<TranslatedQuery> for serde_json::Value {
    fn from(query: TranslatedQuery) -> Self {
        query.to_mql()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{Clause, FieldOp, Predicate};
    use crate::pipeline::SortDirection;

    fn users_query(limit: u64) -> TranslatedQuery {
        TranslatedQuery {
            collection: "users".to_string(),
            operation: Operation::Find(FindQuery {
                filter: Filter::single(Clause::field(
                    "age",
                    Predicate::Ops(vec![FieldOp::Gt(Value::from(25))]),
                )),
                projection: Some(Projection::include(["name", "age"])),
                sort: Some(SortSpec {
                    keys: vec![("age".to_string(), SortDirection::Ascending)],
                }),
                skip: None,
                limit: Some(limit),
            }),
            columns: vec![Column::new("name", "name"), Column::new("age", "age")],
            wildcard: false,
        }
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let query1 = users_query(10);
        let query2 = query1.clone();

        assert_eq!(query1.fingerprint(), query2.fingerprint());
        assert_ne!(query1.fingerprint(), users_query(11).fingerprint());
    }

    #[test]
    fn test_find_command_shape() {
        assert_eq!(
            users_query(10).to_mql(),
            json!({
                "find": "users",
                "filter": { "age": { "$gt": 25 } },
                "projection": { "name": 1, "age": 1 },
                "sort": { "age": 1 },
                "limit": 10
            })
        );
    }
}
