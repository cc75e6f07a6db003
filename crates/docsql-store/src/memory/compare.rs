//! Total ordering over document values

use docsql_ir::Value;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::cmp::Ordering;

/// Type bracket. Values compare by bracket first; within the number
/// bracket all numeric types compare by value.
pub(crate) fn bracket(value: &Value) -> u8 {
    match value {
        Value::Null => 1,
        Value::Int32(_) | Value::Int64(_) | Value::Double(_) | Value::Decimal(_) => 2,
        Value::String(_) => 3,
        Value::Document(_) => 4,
        Value::Array(_) => 5,
        Value::Binary(_) => 6,
        Value::Bool(_) => 8,
        Value::Date(_) => 9,
    }
}

pub(crate) fn compare(a: &Value, b: &Value) -> Ordering {
    let (ba, bb) = (bracket(a), bracket(b));
    if ba != bb {
        return ba.cmp(&bb);
    }
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Date(x), Value::Date(y)) => x.cmp(y),
        (Value::Binary(x), Value::Binary(y)) => x.len().cmp(&y.len()).then_with(|| x.cmp(y)),
        (Value::Array(x), Value::Array(y)) => compare_seq(x.iter(), y.iter()),
        (Value::Document(x), Value::Document(y)) => {
            for ((ka, va), (kb, vb)) in x.iter().zip(y.iter()) {
                let ord = compare(va, vb).then_with(|| ka.cmp(kb));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => compare_numbers(a, b),
    }
}

fn compare_seq<'a>(x: impl Iterator<Item = &'a Value>, y: impl Iterator<Item = &'a Value>) -> Ordering {
    let mut x = x;
    let mut y = y;
    loop {
        match (x.next(), y.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(a), Some(b)) => {
                let ord = compare(a, b);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

fn compare_numbers(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Int32(_) | Value::Int64(_), Value::Int32(_) | Value::Int64(_)) => {
            a.as_i64().cmp(&b.as_i64())
        }
        (Value::Decimal(_), _) | (_, Value::Decimal(_)) => match (to_decimal(a), to_decimal(b)) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => compare_f64(a.as_f64(), b.as_f64()),
        },
        _ => compare_f64(a.as_f64(), b.as_f64()),
    }
}

// NaN sorts below every other number.
fn compare_f64(a: Option<f64>, b: Option<f64>) -> Ordering {
    let a = a.unwrap_or(f64::NAN);
    let b = b.unwrap_or(f64::NAN);
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

pub(crate) fn to_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Int32(i) => Some(Decimal::from(*i)),
        Value::Int64(i) => Some(Decimal::from(*i)),
        Value::Double(f) => Decimal::from_f64(*f),
        Value::Decimal(d) => Some(*d),
        _ => None,
    }
}

pub(crate) fn decimal_to_f64(d: &Decimal) -> f64 {
    d.to_f64().unwrap_or(f64::NAN)
}

pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    compare(a, b) == Ordering::Equal
}

/// Key that is equal for values the store treats as the same `_id` or
/// group key.
pub(crate) fn identity_key(value: &Value) -> String {
    match value {
        Value::Int32(_) | Value::Int64(_) | Value::Double(_) | Value::Decimal(_) => match value.as_i64() {
            Some(i) => format!("n:{}", i),
            None => format!("n:{}", value),
        },
        Value::Document(doc) => {
            let parts: Vec<String> = doc
                .iter()
                .map(|(k, v)| format!("{}={}", k, identity_key(v)))
                .collect();
            format!("o:{{{}}}", parts.join(","))
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(identity_key).collect();
            format!("a:[{}]", parts.join(","))
        }
        other => format!("{}:{}", other.type_name(), other.to_json()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbers_compare_across_types() {
        assert_eq!(compare(&Value::Int32(3), &Value::Double(2.5)), Ordering::Greater);
        assert_eq!(compare(&Value::Int64(7), &Value::Decimal(Decimal::from(7))), Ordering::Equal);
        assert!(values_equal(&Value::Int32(1), &Value::Int64(1)));
    }

    #[test]
    fn test_brackets() {
        assert_eq!(compare(&Value::Null, &Value::Int32(0)), Ordering::Less);
        assert_eq!(compare(&Value::from("a"), &Value::Int32(100)), Ordering::Greater);
        assert_eq!(compare(&Value::Bool(false), &Value::from("z")), Ordering::Greater);
    }

    #[test]
    fn test_identity_key() {
        assert_eq!(identity_key(&Value::Int32(5)), identity_key(&Value::Double(5.0)));
        assert_ne!(identity_key(&Value::Int32(5)), identity_key(&Value::from("5")));
    }
}
