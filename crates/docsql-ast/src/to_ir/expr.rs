//! Aggregation-expression lowering and column scopes

use docsql_ir::{AggExpr, ExprOp, SqlType, Value};
use docsql_registry::FunctionKind;

use super::Context;
use crate::ast::*;
use crate::error::TranslationError;

/// How column references resolve.
pub(crate) enum Scope<'g> {
    /// Against the stored documents.
    Document,
    /// Against `$group` output.
    Grouped(&'g Grouping),
}

pub(crate) struct GroupKeyField {
    pub expr: Expr,
    /// Path of the key in `$group` output (`_id` or `_id.<name>`).
    pub path: String,
}

pub(crate) struct GroupedAggregate {
    pub call: FunctionCall,
    pub name: String,
}

#[derive(Default)]
pub(crate) struct Grouping {
    pub keys: Vec<GroupKeyField>,
    pub aggregates: Vec<GroupedAggregate>,
}

impl Grouping {
    pub fn key_for(&self, ctx: &Context<'_>, expr: &Expr) -> Option<&GroupKeyField> {
        self.keys.iter().find(|k| same_expr(ctx, &k.expr, expr))
    }

    pub fn aggregate_for(&self, call: &FunctionCall) -> Option<&GroupedAggregate> {
        self.aggregates.iter().find(|a| &a.call == call)
    }
}

/// Structural equality, with columns compared by resolved path.
pub(crate) fn same_expr(ctx: &Context<'_>, a: &Expr, b: &Expr) -> bool {
    match (a, b) {
        (Expr::Column(x), Expr::Column(y)) => ctx.path(x) == ctx.path(y),
        _ => a == b,
    }
}

pub(crate) fn is_aggregate_call(ctx: &Context<'_>, call: &FunctionCall) -> bool {
    call.over.is_none() && ctx.registry.is_aggregate(&call.name)
}

/// Path an expression reads directly, if it is field-like in this scope.
pub(crate) fn field_path(
    ctx: &Context<'_>,
    scope: &Scope<'_>,
    expr: &Expr,
) -> Result<Option<String>, TranslationError> {
    match scope {
        Scope::Document => match expr {
            Expr::Column(col) => Ok(Some(ctx.path(col))),
            _ => Ok(None),
        },
        Scope::Grouped(grouping) => {
            if let Some(key) = grouping.key_for(ctx, expr) {
                return Ok(Some(key.path.clone()));
            }
            match expr {
                Expr::Column(col) => Err(TranslationError::NotGrouped(ctx.display_path(col))),
                Expr::FunctionCall(call) if is_aggregate_call(ctx, call) => grouping
                    .aggregate_for(call)
                    .map(|a| Some(a.name.clone()))
                    .ok_or_else(|| TranslationError::MisplacedAggregate(call.name.to_uppercase())),
                _ => Ok(None),
            }
        }
    }
}

/// Lower an expression into an aggregation expression.
pub(crate) fn to_agg(ctx: &Context<'_>, scope: &Scope<'_>, expr: &Expr) -> Result<AggExpr, TranslationError> {
    if !matches!(expr, Expr::Column(_)) {
        if let Some(value) = ctx.constant(expr)? {
            return Ok(AggExpr::Literal(value));
        }
    }
    if let Some(path) = field_path(ctx, scope, expr)? {
        return Ok(AggExpr::Field(path));
    }

    let binary = |op: ExprOp, left: &Expr, right: &Expr| -> Result<AggExpr, TranslationError> {
        Ok(AggExpr::call(op, vec![to_agg(ctx, scope, left)?, to_agg(ctx, scope, right)?]))
    };
    let negate = |inner: AggExpr, negated: bool| {
        if negated {
            AggExpr::call(ExprOp::Not, vec![inner])
        } else {
            inner
        }
    };

    match expr {
        Expr::Column(_) | Expr::Literal(_) | Expr::Placeholder(_) => {
            Err(TranslationError::InvalidValue(format!("{:?}", expr)))
        }
        Expr::Comparison { op, left, right } => binary(comparison_op(*op), left, right),
        Expr::BooleanOp { op, left, right } => {
            let op = match op {
                BoolOp::And => ExprOp::And,
                BoolOp::Or => ExprOp::Or,
            };
            binary(op, left, right)
        }
        Expr::Not(inner) => Ok(AggExpr::call(ExprOp::Not, vec![to_agg(ctx, scope, inner)?])),
        Expr::Arithmetic { op, left, right } => {
            let op = match op {
                ArithOp::Add => ExprOp::Add,
                ArithOp::Sub => ExprOp::Subtract,
                ArithOp::Mul => ExprOp::Multiply,
                ArithOp::Div => ExprOp::Divide,
                ArithOp::Mod => ExprOp::Mod,
                ArithOp::Concat => ExprOp::Concat,
            };
            binary(op, left, right)
        }
        Expr::Negate(inner) => Ok(AggExpr::call(
            ExprOp::Multiply,
            vec![to_agg(ctx, scope, inner)?, AggExpr::literal(-1)],
        )),
        Expr::Like {
            expr,
            pattern,
            negated,
        } => {
            let regex = match ctx.constant(pattern)? {
                Some(Value::String(p)) => like_to_regex(&p),
                _ => return Err(TranslationError::unsupported("LIKE with a non-constant pattern")),
            };
            let matched = AggExpr::call(
                ExprOp::RegexMatch,
                vec![to_agg(ctx, scope, expr)?, AggExpr::literal(regex)],
            );
            Ok(negate(matched, *negated))
        }
        Expr::InList { expr, list, negated } => {
            let target = to_agg(ctx, scope, expr)?;
            let constants: Option<Vec<Value>> = list
                .iter()
                .map(|e| ctx.constant(e))
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .collect();
            let matched = match constants {
                Some(values) => AggExpr::call(ExprOp::In, vec![target, AggExpr::Literal(Value::Array(values))]),
                None => {
                    let mut alternatives = Vec::with_capacity(list.len());
                    for item in list {
                        alternatives.push(AggExpr::call(ExprOp::Eq, vec![target.clone(), to_agg(ctx, scope, item)?]));
                    }
                    AggExpr::call(ExprOp::Or, alternatives)
                }
            };
            Ok(negate(matched, *negated))
        }
        Expr::Between {
            expr,
            low,
            high,
            negated,
        } => {
            let target = to_agg(ctx, scope, expr)?;
            let within = AggExpr::call(
                ExprOp::And,
                vec![
                    AggExpr::call(ExprOp::Gte, vec![target.clone(), to_agg(ctx, scope, low)?]),
                    AggExpr::call(ExprOp::Lte, vec![target, to_agg(ctx, scope, high)?]),
                ],
            );
            Ok(negate(within, *negated))
        }
        Expr::IsNull { expr, negated } => {
            let op = if *negated { ExprOp::Ne } else { ExprOp::Eq };
            Ok(AggExpr::call(
                op,
                vec![to_agg(ctx, scope, expr)?, AggExpr::Literal(Value::Null)],
            ))
        }
        Expr::FunctionCall(call) => function_call(ctx, scope, call),
        Expr::Cast { expr, data_type } => {
            let ty = SqlType::from_name(data_type)
                .ok_or_else(|| TranslationError::UnknownType(data_type.clone()))?;
            let op = conversion_op(ty)
                .ok_or_else(|| TranslationError::unsupported(format!("CAST to {}", ty.name())))?;
            Ok(AggExpr::call(op, vec![to_agg(ctx, scope, expr)?]))
        }
        Expr::Subquery(_) | Expr::InSubquery { .. } | Expr::Exists { .. } => {
            Err(TranslationError::unsupported("subquery"))
        }
        Expr::Array(_) | Expr::Object(_) => Err(TranslationError::unsupported(
            "array or document literal with non-constant members",
        )),
    }
}

fn function_call(ctx: &Context<'_>, scope: &Scope<'_>, call: &FunctionCall) -> Result<AggExpr, TranslationError> {
    if call.over.is_some() {
        return Err(TranslationError::unsupported(format!(
            "window function {}",
            call.name.to_uppercase()
        )));
    }
    let sig = ctx.registry.lookup(&call.name, call.args.len())?;
    let op = match sig.kind {
        FunctionKind::Scalar(op) => op,
        // Resolvable aggregates were handled by field_path.
        FunctionKind::Aggregate(_) => {
            return Err(TranslationError::MisplacedAggregate(call.name.to_uppercase()))
        }
    };

    let mut args = Vec::with_capacity(call.args.len());
    for arg in &call.args {
        match arg {
            FunctionArg::Expr(e) => args.push(to_agg(ctx, scope, e)?),
            FunctionArg::Wildcard => {
                return Err(TranslationError::InvalidValue(format!(
                    "{}(*)",
                    call.name.to_uppercase()
                )))
            }
        }
    }

    if op == ExprOp::Substr {
        // SQL positions start at 1, the store's at 0.
        let start = match args.get(1) {
            Some(AggExpr::Literal(v)) if v.as_i64().is_some() => {
                AggExpr::Literal(Value::integer(v.as_i64().unwrap_or(1) - 1))
            }
            Some(other) => AggExpr::call(ExprOp::Subtract, vec![other.clone(), AggExpr::literal(1)]),
            None => AggExpr::literal(0),
        };
        let length = args.get(2).cloned().unwrap_or(AggExpr::literal(i32::MAX));
        let input = args.swap_remove(0);
        return Ok(AggExpr::call(op, vec![input, start, length]));
    }

    Ok(AggExpr::call(op, args))
}

pub(crate) fn comparison_op(op: ComparisonOp) -> ExprOp {
    match op {
        ComparisonOp::Eq => ExprOp::Eq,
        ComparisonOp::Ne => ExprOp::Ne,
        ComparisonOp::Lt => ExprOp::Lt,
        ComparisonOp::Le => ExprOp::Lte,
        ComparisonOp::Gt => ExprOp::Gt,
        ComparisonOp::Ge => ExprOp::Gte,
    }
}

fn conversion_op(ty: SqlType) -> Option<ExprOp> {
    use docsql_ir::DocumentType;
    let op = match ty.document_type() {
        DocumentType::String => ExprOp::ToString,
        DocumentType::Int32 => ExprOp::ToInt,
        DocumentType::Int64 => ExprOp::ToLong,
        DocumentType::Double => ExprOp::ToDouble,
        DocumentType::Decimal128 => ExprOp::ToDecimal,
        DocumentType::Bool => ExprOp::ToBool,
        DocumentType::Date => ExprOp::ToDate,
        _ => return None,
    };
    Some(op)
}

/// Anchored regular expression for a LIKE pattern. `%` matches any run,
/// `_` one character (newlines included), and a backslash escapes the next
/// character.
pub(crate) fn like_to_regex(pattern: &str) -> String {
    let mut out = String::from("(?s)^");
    let mut literal = String::new();
    let mut chars = pattern.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                if let Some(next) = chars.next() {
                    literal.push(next);
                }
            }
            '%' | '_' => {
                out.push_str(&regex::escape(&literal));
                literal.clear();
                out.push_str(if ch == '%' { ".*" } else { "." });
            }
            other => literal.push(other),
        }
    }
    out.push_str(&regex::escape(&literal));
    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_to_regex() {
        assert_eq!(like_to_regex("abc%"), "(?s)^abc.*$");
        assert_eq!(like_to_regex("%a_c%"), "(?s)^.*a.c.*$");
        assert_eq!(like_to_regex("1.5+"), "(?s)^1\\.5\\+$");
        assert_eq!(like_to_regex("100\\%"), "(?s)^100%$");
    }
}
