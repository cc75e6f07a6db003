//! Filter matching

use docsql_ir::{Clause, Document, FieldOp, Filter, Predicate, Value};
use std::cmp::Ordering;

use super::compare::{bracket, compare, values_equal};
use super::eval::{compile_regex, evaluate, truthy};
use crate::error::Result;

pub(crate) fn matches(filter: &Filter, doc: &Document) -> Result<bool> {
    for clause in &filter.clauses {
        if !clause_matches(clause, doc)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn clause_matches(clause: &Clause, doc: &Document) -> Result<bool> {
    match clause {
        Clause::Field { path, predicate } => {
            let found = candidates(doc, path);
            match predicate {
                Predicate::Eq(value) => Ok(any_equal(&found, value)),
                Predicate::Ops(ops) => {
                    for op in ops {
                        if !op_matches(op, &found)? {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                }
            }
        }
        Clause::And(filters) => {
            for filter in filters {
                if !matches(filter, doc)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Clause::Or(filters) => {
            for filter in filters {
                if matches(filter, doc)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Clause::Nor(filters) => {
            for filter in filters {
                if matches(filter, doc)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Clause::Expr(expr) => Ok(truthy(&evaluate(expr, doc)?)),
    }
}

fn op_matches(op: &FieldOp, found: &[&Value]) -> Result<bool> {
    let matched = match op {
        FieldOp::Eq(value) => any_equal(found, value),
        FieldOp::Ne(value) => !any_equal(found, value),
        FieldOp::Gt(value) => any_ordered(found, value, |o| o == Ordering::Greater),
        FieldOp::Gte(value) => any_ordered(found, value, |o| o != Ordering::Less),
        FieldOp::Lt(value) => any_ordered(found, value, |o| o == Ordering::Less),
        FieldOp::Lte(value) => any_ordered(found, value, |o| o != Ordering::Greater),
        FieldOp::In(values) => values.iter().any(|v| any_equal(found, v)),
        FieldOp::Nin(values) => !values.iter().any(|v| any_equal(found, v)),
        FieldOp::Regex { pattern, options } => regex_matches(found, pattern, options)?,
        FieldOp::NotRegex { pattern, options } => !regex_matches(found, pattern, options)?,
        FieldOp::Exists(expected) => found.is_empty() != *expected,
    };
    Ok(matched)
}

// A missing field matches nothing, not even null.
fn any_equal(found: &[&Value], value: &Value) -> bool {
    found.iter().any(|v| values_equal(v, value))
}

// Range operators only compare values of the same type bracket.
fn any_ordered(found: &[&Value], value: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    found
        .iter()
        .any(|v| bracket(v) == bracket(value) && !v.is_null() && accept(compare(v, value)))
}

fn regex_matches(found: &[&Value], pattern: &str, options: &str) -> Result<bool> {
    let re = compile_regex(pattern, options)?;
    Ok(found
        .iter()
        .any(|v| v.as_str().map(|s| re.is_match(s)).unwrap_or(false)))
}

/// Values reachable at `path`. Arrays along the way are traversed element by
/// element; an array at the end contributes itself and its elements.
pub(crate) fn candidates<'a>(doc: &'a Document, path: &str) -> Vec<&'a Value> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    if let Some((first, rest)) = segments.split_first() {
        if let Some(value) = doc.get(*first) {
            collect(value, rest, &mut out);
        }
    }
    out
}

fn collect<'a>(value: &'a Value, segments: &[&str], out: &mut Vec<&'a Value>) {
    let Some((segment, rest)) = segments.split_first() else {
        out.push(value);
        if let Value::Array(items) = value {
            out.extend(items.iter());
        }
        return;
    };
    match value {
        Value::Document(inner) => {
            if let Some(next) = inner.get(*segment) {
                collect(next, rest, out);
            }
        }
        Value::Array(items) => {
            if let Some(next) = segment.parse::<usize>().ok().and_then(|i| items.get(i)) {
                collect(next, rest, out);
            }
            for item in items {
                if let Value::Document(_) = item {
                    collect(item, segments, out);
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsql_ir::doc;

    fn field(path: &str, predicate: Predicate) -> Filter {
        Filter::single(Clause::field(path, predicate))
    }

    #[test]
    fn test_explicit_null() {
        let filter = field("email", Predicate::Eq(Value::Null));
        assert!(matches(&filter, &doc! { "email" => Value::Null }).unwrap());
        assert!(!matches(&filter, &doc! { "name" => "x" }).unwrap());
    }

    #[test]
    fn test_range_stays_in_bracket() {
        let filter = field("age", Predicate::Ops(vec![FieldOp::Gt(Value::Int32(25))]));
        assert!(matches(&filter, &doc! { "age" => 30.5 }).unwrap());
        assert!(!matches(&filter, &doc! { "age" => "99" }).unwrap());
        assert!(!matches(&filter, &doc! { "age" => Value::Null }).unwrap());
    }

    #[test]
    fn test_array_traversal() {
        let d = doc! {
            "tags" => vec![Value::from("a"), Value::from("b")],
            "items" => vec![Value::from(doc! { "sku" => "x1" }), Value::from(doc! { "sku" => "x2" })],
        };
        assert!(matches(&field("tags", Predicate::Eq(Value::from("b"))), &d).unwrap());
        assert!(matches(&field("items.sku", Predicate::Eq(Value::from("x2"))), &d).unwrap());
        assert!(matches(&field("items.0.sku", Predicate::Eq(Value::from("x1"))), &d).unwrap());
    }

    #[test]
    fn test_nor_and_regex() {
        let d = doc! { "name" => "Alice" };
        let regex = field(
            "name",
            Predicate::Ops(vec![FieldOp::Regex {
                pattern: "^al".to_string(),
                options: "i".to_string(),
            }]),
        );
        assert!(matches(&regex, &d).unwrap());
        let nor = Filter::negate(regex);
        assert!(!matches(&nor, &d).unwrap());
    }
}
