//! Aggregation expression evaluation

use docsql_ir::{lookup_path, AggExpr, Document, ExprOp, SqlType, Value};
use regex::RegexBuilder;
use rust_decimal::Decimal;
use std::cmp::Ordering;

use super::compare::{compare, decimal_to_f64, to_decimal, values_equal};
use crate::error::{codes, Result, StoreError};

/// Truthiness of an expression result: false, null, missing and zero are false.
pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Int32(i) => *i != 0,
        Value::Int64(i) => *i != 0,
        Value::Double(f) => *f != 0.0,
        Value::Decimal(d) => !d.is_zero(),
        _ => true,
    }
}

pub(crate) fn evaluate(expr: &AggExpr, doc: &Document) -> Result<Value> {
    match expr {
        AggExpr::Field(path) => Ok(lookup_path(doc, path).cloned().unwrap_or(Value::Null)),
        AggExpr::Literal(value) => Ok(value.clone()),
        AggExpr::Call { op, args } => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(evaluate(arg, doc)?);
            }
            apply(*op, values)
        }
    }
}

fn bad_value(message: impl Into<String>) -> StoreError {
    StoreError::command(codes::BAD_VALUE, message)
}

fn arg(values: &[Value], index: usize) -> &Value {
    values.get(index).unwrap_or(&Value::Null)
}

pub(crate) fn apply(op: ExprOp, values: Vec<Value>) -> Result<Value> {
    let a = arg(&values, 0);
    let b = arg(&values, 1);
    let result = match op {
        ExprOp::Add | ExprOp::Subtract | ExprOp::Multiply | ExprOp::Divide | ExprOp::Mod => {
            return arithmetic(op, &values)
        }
        ExprOp::Abs => match a {
            Value::Null => Value::Null,
            Value::Int32(i) => Value::integer((*i as i64).abs()),
            Value::Int64(i) => match i.checked_abs() {
                Some(abs) => Value::Int64(abs),
                None => Value::Double((*i as f64).abs()),
            },
            Value::Double(f) => Value::Double(f.abs()),
            Value::Decimal(d) => Value::Decimal(d.abs()),
            other => return Err(bad_value(format!("$abs only supports numeric types, not {}", other.type_name()))),
        },
        ExprOp::Eq => Value::Bool(values_equal(a, b)),
        ExprOp::Ne => Value::Bool(!values_equal(a, b)),
        ExprOp::Gt => Value::Bool(compare(a, b) == Ordering::Greater),
        ExprOp::Gte => Value::Bool(compare(a, b) != Ordering::Less),
        ExprOp::Lt => Value::Bool(compare(a, b) == Ordering::Less),
        ExprOp::Lte => Value::Bool(compare(a, b) != Ordering::Greater),
        ExprOp::In => match b {
            Value::Array(items) => Value::Bool(items.iter().any(|item| values_equal(a, item))),
            other => return Err(bad_value(format!("$in requires an array, found {}", other.type_name()))),
        },
        ExprOp::And => Value::Bool(values.iter().all(truthy)),
        ExprOp::Or => Value::Bool(values.iter().any(truthy)),
        ExprOp::Not => Value::Bool(!truthy(a)),
        ExprOp::Cond => {
            if truthy(a) {
                b.clone()
            } else {
                arg(&values, 2).clone()
            }
        }
        ExprOp::IfNull => values
            .iter()
            .find(|v| !v.is_null())
            .cloned()
            .unwrap_or(Value::Null),
        ExprOp::Concat => {
            let mut out = String::new();
            for value in &values {
                match value {
                    Value::Null => return Ok(Value::Null),
                    Value::String(s) => out.push_str(s),
                    other => {
                        return Err(bad_value(format!(
                            "$concat only supports strings, not {}",
                            other.type_name()
                        )))
                    }
                }
            }
            Value::String(out)
        }
        ExprOp::ToUpper => Value::String(text(a).to_uppercase()),
        ExprOp::ToLower => Value::String(text(a).to_lowercase()),
        ExprOp::Trim => match a {
            Value::Null => Value::Null,
            other => Value::String(text(other).trim().to_string()),
        },
        ExprOp::Substr => {
            let chars: Vec<char> = text(a).chars().collect();
            let start = b.as_i64().unwrap_or(0).max(0) as usize;
            let len = arg(&values, 2).as_i64().unwrap_or(i64::MAX).max(0) as usize;
            Value::String(chars.iter().skip(start).take(len).collect())
        }
        ExprOp::ReplaceAll => match (a, b, arg(&values, 2)) {
            (Value::Null, _, _) | (_, Value::Null, _) | (_, _, Value::Null) => Value::Null,
            (Value::String(input), Value::String(find), Value::String(replacement)) => {
                Value::String(input.replace(find.as_str(), replacement))
            }
            _ => return Err(bad_value("$replaceAll requires string arguments")),
        },
        ExprOp::StrLen => match a {
            Value::String(s) => Value::integer(s.chars().count() as i64),
            other => {
                return Err(bad_value(format!(
                    "$strLenCP requires a string argument, found {}",
                    other.type_name()
                )))
            }
        },
        ExprOp::RegexMatch => match (a, b) {
            (Value::String(input), Value::String(pattern)) => {
                let options = arg(&values, 2).as_str().unwrap_or_default();
                Value::Bool(compile_regex(pattern, options)?.is_match(input))
            }
            (Value::Null, _) => Value::Bool(false),
            _ => return Err(bad_value("$regexMatch needs string input and regex")),
        },
        ExprOp::ToString => convert(SqlType::Varchar, a)?,
        ExprOp::ToInt => convert(SqlType::Integer, a)?,
        ExprOp::ToLong => convert(SqlType::BigInt, a)?,
        ExprOp::ToDouble => convert(SqlType::Double, a)?,
        ExprOp::ToDecimal => convert(SqlType::Decimal, a)?,
        ExprOp::ToBool => convert(SqlType::Boolean, a)?,
        ExprOp::ToDate => convert(SqlType::Timestamp, a)?,
    };
    Ok(result)
}

fn text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn convert(target: SqlType, value: &Value) -> Result<Value> {
    target
        .coerce(value)
        .map_err(|e| StoreError::command(codes::CONVERSION_FAILURE, e.to_string()))
}

pub(crate) fn compile_regex(pattern: &str, options: &str) -> Result<regex::Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .ignore_whitespace(options.contains('x'))
        .build()
        .map_err(|e| bad_value(format!("invalid regular expression: {}", e)))
}

enum Numeric {
    Int(i64),
    Double(f64),
    Decimal(Decimal),
}

fn arithmetic(op: ExprOp, values: &[Value]) -> Result<Value> {
    if values.iter().any(Value::is_null) {
        return Ok(Value::Null);
    }
    let name = op.operator();
    if let [Value::Date(date), offset] = values {
        if matches!(op, ExprOp::Add | ExprOp::Subtract) {
            let millis = offset
                .as_i64()
                .ok_or_else(|| bad_value(format!("{} of a date needs milliseconds", name)))?;
            let shifted = chrono::TimeDelta::try_milliseconds(millis).and_then(|delta| {
                if op == ExprOp::Add {
                    date.checked_add_signed(delta)
                } else {
                    date.checked_sub_signed(delta)
                }
            });
            return shifted
                .map(Value::Date)
                .ok_or_else(|| bad_value(format!("{} of a date is out of range", name)));
        }
    }

    let mut numbers = Vec::with_capacity(values.len());
    for value in values {
        numbers.push(match value {
            Value::Int32(i) => Numeric::Int(*i as i64),
            Value::Int64(i) => Numeric::Int(*i),
            Value::Double(f) => Numeric::Double(*f),
            Value::Decimal(d) => Numeric::Decimal(*d),
            other => {
                return Err(bad_value(format!(
                    "{} only supports numeric types, not {}",
                    name,
                    other.type_name()
                )))
            }
        });
    }
    let widest_int64 = values.iter().any(|v| matches!(v, Value::Int64(_)));

    let mut iter = numbers.into_iter();
    let mut acc = match iter.next() {
        Some(first) => first,
        None => return Ok(Value::Int32(0)),
    };
    for next in iter {
        acc = combine(op, acc, next)?;
    }
    Ok(match acc {
        Numeric::Int(i) if widest_int64 => Value::Int64(i),
        Numeric::Int(i) => Value::integer(i),
        Numeric::Double(f) => Value::Double(f),
        Numeric::Decimal(d) => Value::Decimal(d),
    })
}

fn combine(op: ExprOp, a: Numeric, b: Numeric) -> Result<Numeric> {
    let zero_divisor = match &b {
        Numeric::Int(i) => *i == 0,
        Numeric::Double(f) => *f == 0.0,
        Numeric::Decimal(d) => d.is_zero(),
    };
    if zero_divisor && matches!(op, ExprOp::Divide | ExprOp::Mod) {
        return Err(bad_value(format!("can't {} by zero", op.operator())));
    }

    match (a, b) {
        (Numeric::Int(x), Numeric::Int(y)) => {
            let int = match op {
                ExprOp::Add => x.checked_add(y),
                ExprOp::Subtract => x.checked_sub(y),
                ExprOp::Multiply => x.checked_mul(y),
                ExprOp::Mod => x.checked_rem(y),
                _ => None,
            };
            match int {
                Some(i) => Ok(Numeric::Int(i)),
                None => combine_f64(op, x as f64, y as f64),
            }
        }
        (Numeric::Decimal(x), other) => combine_decimal(op, x, other),
        (other, Numeric::Decimal(y)) => {
            let x = match other {
                Numeric::Int(i) => Decimal::from(i),
                Numeric::Double(f) => to_decimal(&Value::Double(f)).unwrap_or_default(),
                Numeric::Decimal(d) => d,
            };
            combine_decimal(op, x, Numeric::Decimal(y))
        }
        (x, y) => combine_f64(op, as_f64(&x), as_f64(&y)),
    }
}

fn as_f64(n: &Numeric) -> f64 {
    match n {
        Numeric::Int(i) => *i as f64,
        Numeric::Double(f) => *f,
        Numeric::Decimal(d) => decimal_to_f64(d),
    }
}

fn combine_f64(op: ExprOp, x: f64, y: f64) -> Result<Numeric> {
    Ok(Numeric::Double(match op {
        ExprOp::Add => x + y,
        ExprOp::Subtract => x - y,
        ExprOp::Multiply => x * y,
        ExprOp::Divide => x / y,
        ExprOp::Mod => x % y,
        _ => return Err(bad_value(format!("{} is not arithmetic", op.operator()))),
    }))
}

fn combine_decimal(op: ExprOp, x: Decimal, y: Numeric) -> Result<Numeric> {
    let y = match y {
        Numeric::Int(i) => Decimal::from(i),
        Numeric::Double(f) => to_decimal(&Value::Double(f)).unwrap_or_default(),
        Numeric::Decimal(d) => d,
    };
    let result = match op {
        ExprOp::Add => x.checked_add(y),
        ExprOp::Subtract => x.checked_sub(y),
        ExprOp::Multiply => x.checked_mul(y),
        ExprOp::Divide => x.checked_div(y),
        ExprOp::Mod => x.checked_rem(y),
        _ => None,
    };
    result
        .map(Numeric::Decimal)
        .ok_or_else(|| bad_value(format!("decimal overflow in {}", op.operator())))
}
