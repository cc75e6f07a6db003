//! Query and pipeline execution over materialized documents

use docsql_ir::{
    lookup_path, set_path, Accumulator, AccumulatorOp, Document, ExprOp, FindQuery, GroupKey, GroupStage,
    IndexMap, Pipeline, ProjectField, Projection, SortDirection, SortSpec, Stage, Value,
};
use std::cmp::Ordering;

use super::compare::{compare, identity_key};
use super::eval::{apply, evaluate};
use super::matcher::matches;
use crate::error::Result;

pub(crate) fn run_find(docs: Vec<Document>, query: &FindQuery) -> Result<Vec<Document>> {
    let mut out = filter(docs, &query.filter)?;
    if let Some(sort) = &query.sort {
        sort_documents(&mut out, sort);
    }
    let out = page(out, query.skip, query.limit);
    match &query.projection {
        Some(projection) => out.iter().map(|d| project(d, projection)).collect(),
        None => Ok(out),
    }
}

pub(crate) fn run_pipeline(docs: Vec<Document>, pipeline: &Pipeline) -> Result<Vec<Document>> {
    let mut current = docs;
    for stage in pipeline.stages() {
        current = match stage {
            Stage::Match(f) => filter(current, f)?,
            Stage::Group(group) => run_group(&current, group)?,
            Stage::Sort(spec) => {
                sort_documents(&mut current, spec);
                current
            }
            Stage::Skip(n) => page(current, Some(*n), None),
            Stage::Limit(n) => page(current, None, Some(*n)),
            Stage::Project(projection) => current
                .iter()
                .map(|d| project(d, projection))
                .collect::<Result<Vec<_>>>()?,
        };
    }
    Ok(current)
}

pub(crate) fn filter(docs: Vec<Document>, f: &docsql_ir::Filter) -> Result<Vec<Document>> {
    if f.is_empty() {
        return Ok(docs);
    }
    let mut out = Vec::with_capacity(docs.len());
    for doc in docs {
        if matches(f, &doc)? {
            out.push(doc);
        }
    }
    Ok(out)
}

fn page(docs: Vec<Document>, skip: Option<u64>, limit: Option<u64>) -> Vec<Document> {
    let skip = skip.unwrap_or(0) as usize;
    let limit = limit.map(|l| l as usize).unwrap_or(usize::MAX);
    docs.into_iter().skip(skip).take(limit).collect()
}

fn sort_documents(docs: &mut [Document], spec: &SortSpec) {
    // Stable, so ties keep their input order.
    docs.sort_by(|a, b| {
        for (path, direction) in &spec.keys {
            let left = lookup_path(a, path).unwrap_or(&Value::Null);
            let right = lookup_path(b, path).unwrap_or(&Value::Null);
            let ord = match direction {
                SortDirection::Ascending => compare(left, right),
                SortDirection::Descending => compare(right, left),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

fn project(doc: &Document, projection: &Projection) -> Result<Document> {
    let inclusion = projection
        .fields
        .iter()
        .any(|(name, field)| name != "_id" && *field != ProjectField::Exclude);

    if !inclusion {
        let mut out = doc.clone();
        for (path, _) in &projection.fields {
            remove_path(&mut out, path);
        }
        return Ok(out);
    }

    let mut out = Document::new();
    if projection.keeps_id() {
        if let Some(id) = doc.get("_id") {
            out.insert("_id".to_string(), id.clone());
        }
    }
    for (path, field) in &projection.fields {
        match field {
            ProjectField::Include => {
                if let Some(value) = lookup_path(doc, path) {
                    set_path(&mut out, path, value.clone());
                }
            }
            ProjectField::Computed(expr) => {
                let value = evaluate(expr, doc)?;
                set_path(&mut out, path, value);
            }
            ProjectField::Exclude => {}
        }
    }
    Ok(out)
}

fn remove_path(doc: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            doc.shift_remove(path);
        }
        Some((head, rest)) => {
            if let Some(Value::Document(inner)) = doc.get_mut(head) {
                remove_path(inner, rest);
            }
        }
    }
}

struct GroupState {
    key: Value,
    accumulators: Vec<AccumulatorState>,
}

enum AccumulatorState {
    Sum(Value),
    Avg { sum: Value, count: i64 },
    Min(Option<Value>),
    Max(Option<Value>),
}

impl AccumulatorState {
    fn new(acc: &Accumulator) -> Self {
        match acc.op {
            AccumulatorOp::Sum => AccumulatorState::Sum(Value::Int32(0)),
            AccumulatorOp::Avg => AccumulatorState::Avg {
                sum: Value::Int32(0),
                count: 0,
            },
            AccumulatorOp::Min => AccumulatorState::Min(None),
            AccumulatorOp::Max => AccumulatorState::Max(None),
        }
    }

    // Sum and avg skip non-numeric input; min and max skip nulls.
    fn add(&mut self, value: Value) -> Result<()> {
        match self {
            AccumulatorState::Sum(total) => {
                if value.is_number() {
                    *total = apply(ExprOp::Add, vec![total.clone(), value])?;
                }
            }
            AccumulatorState::Avg { sum, count } => {
                if value.is_number() {
                    *sum = apply(ExprOp::Add, vec![sum.clone(), value])?;
                    *count += 1;
                }
            }
            AccumulatorState::Min(current) => {
                if !value.is_null() && current.as_ref().map_or(true, |c| compare(&value, c) == Ordering::Less) {
                    *current = Some(value);
                }
            }
            AccumulatorState::Max(current) => {
                if !value.is_null() && current.as_ref().map_or(true, |c| compare(&value, c) == Ordering::Greater) {
                    *current = Some(value);
                }
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<Value> {
        match self {
            AccumulatorState::Sum(total) => Ok(total),
            AccumulatorState::Avg { count: 0, .. } => Ok(Value::Null),
            AccumulatorState::Avg { sum, count } => {
                apply(ExprOp::Divide, vec![sum, Value::Double(count as f64)])
            }
            AccumulatorState::Min(v) | AccumulatorState::Max(v) => Ok(v.unwrap_or(Value::Null)),
        }
    }
}

fn group_key(key: &GroupKey, doc: &Document) -> Result<Value> {
    match key {
        GroupKey::Null => Ok(Value::Null),
        GroupKey::Expr(expr) => evaluate(expr, doc),
        GroupKey::Compound(parts) => {
            let mut out = Document::new();
            for (name, expr) in parts {
                out.insert(name.clone(), evaluate(expr, doc)?);
            }
            Ok(Value::Document(out))
        }
    }
}

fn run_group(docs: &[Document], stage: &GroupStage) -> Result<Vec<Document>> {
    // Groups come out in order of first appearance.
    let mut groups: IndexMap<String, GroupState> = IndexMap::new();
    for doc in docs {
        let key = group_key(&stage.key, doc)?;
        let state = groups.entry(identity_key(&key)).or_insert_with(|| GroupState {
            key,
            accumulators: stage.accumulators.iter().map(|(_, a)| AccumulatorState::new(a)).collect(),
        });
        for ((_, acc), acc_state) in stage.accumulators.iter().zip(state.accumulators.iter_mut()) {
            acc_state.add(evaluate(&acc.arg, doc)?)?;
        }
    }

    // A whole-input group still yields one row over empty input.
    if groups.is_empty() && stage.key == GroupKey::Null {
        groups.insert(
            identity_key(&Value::Null),
            GroupState {
                key: Value::Null,
                accumulators: stage.accumulators.iter().map(|(_, a)| AccumulatorState::new(a)).collect(),
            },
        );
    }

    let mut out = Vec::with_capacity(groups.len());
    for (_, state) in groups {
        let mut doc = Document::new();
        doc.insert("_id".to_string(), state.key);
        for ((name, _), acc_state) in stage.accumulators.iter().zip(state.accumulators) {
            doc.insert(name.clone(), acc_state.finish()?);
        }
        out.push(doc);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsql_ir::{doc, AggExpr, Clause, Filter, Predicate};

    fn users() -> Vec<Document> {
        vec![
            doc! { "_id" => 1, "name" => "ann", "age" => 30 },
            doc! { "_id" => 2, "name" => "bob", "age" => 25 },
            doc! { "_id" => 3, "name" => "cy", "age" => 30 },
            doc! { "_id" => 4, "name" => "dee" },
        ]
    }

    #[test]
    fn test_find_sort_limit_project() {
        let query = FindQuery {
            filter: Filter::all(),
            projection: Some(Projection::include(["name"])),
            sort: Some(SortSpec {
                keys: vec![("age".to_string(), SortDirection::Descending)],
            }),
            skip: Some(1),
            limit: Some(2),
        };
        let out = run_find(users(), &query).unwrap();
        assert_eq!(out, vec![doc! { "_id" => 3, "name" => "cy" }, doc! { "_id" => 2, "name" => "bob" }]);
    }

    #[test]
    fn test_group_counts_and_averages() {
        let group = GroupStage {
            key: GroupKey::Expr(AggExpr::field("age")),
            accumulators: vec![
                ("cnt".to_string(), Accumulator::count()),
                ("avg_id".to_string(), Accumulator::new(AccumulatorOp::Avg, AggExpr::field("_id"))),
            ],
        };
        let having = Filter::single(Clause::field(
            "cnt",
            Predicate::Ops(vec![docsql_ir::FieldOp::Gt(Value::Int32(1))]),
        ));
        let pipeline = Pipeline::new(vec![Stage::Group(group), Stage::Match(having)]).unwrap();
        let out = run_pipeline(users(), &pipeline).unwrap();
        assert_eq!(out, vec![doc! { "_id" => 30, "cnt" => 2, "avg_id" => 2.0 }]);
    }

    #[test]
    fn test_group_over_empty_input() {
        let group = GroupStage {
            key: GroupKey::Null,
            accumulators: vec![("count_star".to_string(), Accumulator::count())],
        };
        let pipeline = Pipeline::new(vec![Stage::Group(group)]).unwrap();
        let out = run_pipeline(Vec::new(), &pipeline).unwrap();
        assert_eq!(out, vec![doc! { "_id" => Value::Null, "count_star" => 0 }]);
    }
}
