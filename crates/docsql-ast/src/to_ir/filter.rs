//! WHERE and HAVING clauses to filter documents

use docsql_ir::{Clause, FieldOp, Filter, Predicate, Value};

use super::expr::{field_path, like_to_regex, to_agg, Scope};
use super::Context;
use crate::ast::*;
use crate::error::TranslationError;

/// Translate a boolean expression into a filter.
///
/// Comparisons between a field and a constant become field clauses so the
/// store can use them directly; everything else is wrapped in `$expr`.
pub(crate) fn translate_filter(
    ctx: &Context<'_>,
    scope: &Scope<'_>,
    expr: &Expr,
) -> Result<Filter, TranslationError> {
    match expr {
        Expr::BooleanOp { op: BoolOp::And, .. } => {
            let mut terms = Vec::new();
            collect_terms(expr, BoolOp::And, &mut terms);
            let filters = terms
                .into_iter()
                .map(|t| translate_filter(ctx, scope, t))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Filter::conjunction(filters))
        }
        Expr::BooleanOp { op: BoolOp::Or, .. } => {
            let mut terms = Vec::new();
            collect_terms(expr, BoolOp::Or, &mut terms);
            let filters = terms
                .into_iter()
                .map(|t| translate_filter(ctx, scope, t))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Filter::disjunction(filters))
        }
        Expr::Not(inner) => Ok(Filter::negate(translate_filter(ctx, scope, inner)?)),
        Expr::Comparison { op, left, right } => comparison(ctx, scope, expr, *op, left, right),
        Expr::Like {
            expr: target,
            pattern,
            negated,
        } => {
            let path = field_path(ctx, scope, target)?;
            let pattern = match ctx.constant(pattern)? {
                Some(Value::String(p)) => Some(p),
                _ => None,
            };
            match (path, pattern) {
                (Some(path), Some(p)) => {
                    let pattern = like_to_regex(&p);
                    let op = if *negated {
                        FieldOp::NotRegex {
                            pattern,
                            options: String::new(),
                        }
                    } else {
                        FieldOp::Regex {
                            pattern,
                            options: String::new(),
                        }
                    };
                    Ok(field_ops(path, vec![op]))
                }
                _ => expression(ctx, scope, expr),
            }
        }
        Expr::InList {
            expr: target,
            list,
            negated,
        } => {
            let path = field_path(ctx, scope, target)?;
            let values = constants(ctx, list)?;
            match (path, values) {
                (Some(path), Some(values)) => {
                    let op = if *negated {
                        FieldOp::Nin(values)
                    } else {
                        FieldOp::In(values)
                    };
                    Ok(field_ops(path, vec![op]))
                }
                _ => expression(ctx, scope, expr),
            }
        }
        Expr::Between {
            expr: target,
            low,
            high,
            negated,
        } => {
            let path = field_path(ctx, scope, target)?;
            let bounds = (ctx.constant(low)?, ctx.constant(high)?);
            match (path, bounds) {
                (Some(path), (Some(low), Some(high))) => {
                    let within = field_ops(path, vec![FieldOp::Gte(low), FieldOp::Lte(high)]);
                    Ok(if *negated { Filter::negate(within) } else { within })
                }
                _ => expression(ctx, scope, expr),
            }
        }
        Expr::IsNull {
            expr: target,
            negated,
        } => match field_path(ctx, scope, target)? {
            Some(path) if *negated => Ok(field_ops(
                path,
                vec![FieldOp::Exists(true), FieldOp::Ne(Value::Null)],
            )),
            Some(path) => Ok(Filter::single(Clause::field(path, Predicate::Eq(Value::Null)))),
            None => expression(ctx, scope, expr),
        },
        Expr::Column(_) => match field_path(ctx, scope, expr)? {
            Some(path) => Ok(Filter::single(Clause::field(path, Predicate::Eq(Value::Bool(true))))),
            None => expression(ctx, scope, expr),
        },
        Expr::Subquery(_) | Expr::InSubquery { .. } | Expr::Exists { .. } => {
            Err(TranslationError::unsupported("subquery"))
        }
        _ => match ctx.constant(expr)? {
            Some(Value::Bool(true)) => Ok(Filter::all()),
            _ => expression(ctx, scope, expr),
        },
    }
}

fn comparison(
    ctx: &Context<'_>,
    scope: &Scope<'_>,
    expr: &Expr,
    op: ComparisonOp,
    left: &Expr,
    right: &Expr,
) -> Result<Filter, TranslationError> {
    if let (Some(path), Some(value)) = (field_path(ctx, scope, left)?, ctx.constant(right)?) {
        return Ok(field_comparison(path, op, value));
    }
    if let (Some(value), Some(path)) = (ctx.constant(left)?, field_path(ctx, scope, right)?) {
        return Ok(field_comparison(path, op.flip(), value));
    }
    expression(ctx, scope, expr)
}

fn field_comparison(path: String, op: ComparisonOp, value: Value) -> Filter {
    let op = match op {
        ComparisonOp::Eq => {
            return Filter::single(Clause::field(path, Predicate::Eq(value)));
        }
        ComparisonOp::Ne => FieldOp::Ne(value),
        ComparisonOp::Lt => FieldOp::Lt(value),
        ComparisonOp::Le => FieldOp::Lte(value),
        ComparisonOp::Gt => FieldOp::Gt(value),
        ComparisonOp::Ge => FieldOp::Gte(value),
    };
    field_ops(path, vec![op])
}

fn field_ops(path: String, ops: Vec<FieldOp>) -> Filter {
    Filter::single(Clause::field(path, Predicate::Ops(ops)))
}

fn expression(ctx: &Context<'_>, scope: &Scope<'_>, expr: &Expr) -> Result<Filter, TranslationError> {
    Ok(Filter::single(Clause::Expr(to_agg(ctx, scope, expr)?)))
}

fn constants(ctx: &Context<'_>, list: &[Expr]) -> Result<Option<Vec<Value>>, TranslationError> {
    let mut values = Vec::with_capacity(list.len());
    for item in list {
        match ctx.constant(item)? {
            Some(v) => values.push(v),
            None => return Ok(None),
        }
    }
    Ok(Some(values))
}

/// Flatten a left- or right-nested chain of the same boolean operator.
fn collect_terms<'a>(expr: &'a Expr, op: BoolOp, out: &mut Vec<&'a Expr>) {
    match expr {
        Expr::BooleanOp {
            op: inner,
            left,
            right,
        } if *inner == op => {
            collect_terms(left, op, out);
            collect_terms(right, op, out);
        }
        other => out.push(other),
    }
}
