//! Query filters
//!
//! A [`Filter`] is a filter document: an implicit conjunction of clauses,
//! each keyed by a field path or by a logical operator.

use serde::Serialize;
use serde_json::json;

use crate::expr::AggExpr;
use crate::value::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(into = "serde_json::Value")]
pub struct Filter {
    pub clauses: Vec<Clause>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Field { path: String, predicate: Predicate },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Nor(Vec<Filter>),
    Expr(AggExpr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `{path: value}`
    Eq(Value),
    /// `{path: {$op: value, ...}}`
    Ops(Vec<FieldOp>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Regex { pattern: String, options: String },
    NotRegex { pattern: String, options: String },
    Exists(bool),
}

impl FieldOp {
    pub fn key(&self) -> &'static str {
        match self {
            FieldOp::Eq(_) => "$eq",
            FieldOp::Ne(_) => "$ne",
            FieldOp::Gt(_) => "$gt",
            FieldOp::Gte(_) => "$gte",
            FieldOp::Lt(_) => "$lt",
            FieldOp::Lte(_) => "$lte",
            FieldOp::In(_) => "$in",
            FieldOp::Nin(_) => "$nin",
            FieldOp::Regex { .. } => "$regex",
            FieldOp::NotRegex { .. } => "$not",
            FieldOp::Exists(_) => "$exists",
        }
    }

    fn write_json(&self, out: &mut serde_json::Map<String, serde_json::Value>) {
        let list = |values: &[Value]| serde_json::Value::Array(values.iter().map(Value::to_json).collect());
        match self {
            FieldOp::Eq(v) | FieldOp::Ne(v) | FieldOp::Gt(v) | FieldOp::Gte(v) | FieldOp::Lt(v) | FieldOp::Lte(v) => {
                out.insert(self.key().to_string(), v.to_json());
            }
            FieldOp::In(values) | FieldOp::Nin(values) => {
                out.insert(self.key().to_string(), list(values));
            }
            FieldOp::Regex { pattern, options } => {
                out.insert("$regex".to_string(), json!(pattern));
                if !options.is_empty() {
                    out.insert("$options".to_string(), json!(options));
                }
            }
            FieldOp::NotRegex { pattern, options } => {
                let mut inner = json!({ "$regex": pattern });
                if !options.is_empty() {
                    inner["$options"] = json!(options);
                }
                out.insert("$not".to_string(), inner);
            }
            FieldOp::Exists(flag) => {
                out.insert("$exists".to_string(), json!(flag));
            }
        }
    }
}

impl Clause {
    pub fn field(path: impl Into<String>, predicate: Predicate) -> Self {
        Clause::Field {
            path: path.into(),
            predicate,
        }
    }

    /// Key this clause occupies in the filter document.
    pub fn key(&self) -> &str {
        match self {
            Clause::Field { path, .. } => path,
            Clause::And(_) => "$and",
            Clause::Or(_) => "$or",
            Clause::Nor(_) => "$nor",
            Clause::Expr(_) => "$expr",
        }
    }

    fn value_json(&self) -> serde_json::Value {
        let list = |filters: &[Filter]| serde_json::Value::Array(filters.iter().map(Filter::to_json).collect());
        match self {
            Clause::Field { predicate, .. } => predicate.to_json(),
            Clause::And(filters) | Clause::Or(filters) | Clause::Nor(filters) => list(filters),
            Clause::Expr(expr) => expr.to_json(),
        }
    }
}

impl Predicate {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            // Documents compared by equality must not be read as operator documents.
            Predicate::Eq(v @ Value::Document(_)) => json!({ "$eq": v.to_json() }),
            Predicate::Eq(v) => v.to_json(),
            Predicate::Ops(ops) => {
                let mut out = serde_json::Map::new();
                for op in ops {
                    op.write_json(&mut out);
                }
                serde_json::Value::Object(out)
            }
        }
    }
}

impl Filter {
    pub fn new(clauses: Vec<Clause>) -> Self {
        Self { clauses }
    }

    /// Filter matching every document.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn single(clause: Clause) -> Self {
        Self {
            clauses: vec![clause],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn keys(&self) -> Vec<&str> {
        self.clauses.iter().map(Clause::key).collect()
    }

    /// Combine filters conjunctively.
    ///
    /// Clauses land side by side in one document when their keys are
    /// distinct. Operator predicates on the same path merge when they use
    /// different operators. Anything else falls back to `$and`.
    pub fn conjunction(filters: Vec<Filter>) -> Filter {
        let filters: Vec<Filter> = filters.into_iter().filter(|f| !f.is_empty()).collect();
        if filters.len() <= 1 {
            return filters.into_iter().next().unwrap_or_default();
        }

        let mut merged: Vec<Clause> = Vec::new();
        let mut flat = true;
        for clause in filters.iter().flat_map(|f| f.clauses.iter()) {
            match merged.iter_mut().find(|c| c.key() == clause.key()) {
                None => merged.push(clause.clone()),
                Some(existing) => {
                    if !merge_ops(existing, clause) {
                        flat = false;
                        break;
                    }
                }
            }
        }
        if flat {
            Filter::new(merged)
        } else {
            Filter::single(Clause::And(filters))
        }
    }

    /// Combine filters disjunctively.
    pub fn disjunction(filters: Vec<Filter>) -> Filter {
        if filters.len() == 1 {
            return filters.into_iter().next().unwrap_or_default();
        }
        Filter::single(Clause::Or(filters))
    }

    pub fn negate(filter: Filter) -> Filter {
        Filter::single(Clause::Nor(vec![filter]))
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.clauses
                .iter()
                .map(|c| (c.key().to_string(), c.value_json()))
                .collect(),
        )
    }
}

fn merge_ops(existing: &mut Clause, incoming: &Clause) -> bool {
    match (existing, incoming) {
        (
            Clause::Field {
                predicate: Predicate::Ops(ours),
                ..
            },
            Clause::Field {
                predicate: Predicate::Ops(theirs),
                ..
            },
        ) => {
            let clash = theirs
                .iter()
                .any(|t| ours.iter().any(|o| o.key() == t.key()));
            if clash {
                return false;
            }
            ours.extend(theirs.iter().cloned());
            true
        }
        _ => false,
    }
}

impl From<Filter> for serde_json::Value {
    fn from(filter: Filter) -> Self {
        filter.to_json()
    }
}
