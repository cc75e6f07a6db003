//! Aggregation expressions
//!
//! Used inside `$expr` filters, computed `$project` fields, `$group`
//! accumulators and pipeline-style updates.

use serde::Serialize;
use serde_json::json;

use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(into = "serde_json::Value")]
pub enum AggExpr {
    /// `"$path"`
    Field(String),
    Literal(Value),
    Call { op: ExprOp, args: Vec<AggExpr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExprOp {
    // Arithmetic
    Add,
    Subtract,
    Multiply,
    Divide,
    Mod,
    Abs,

    // Comparison
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,

    // Logical
    And,
    Or,
    Not,
    Cond,
    IfNull,

    // String
    Concat,
    ToUpper,
    ToLower,
    Trim,
    Substr,
    ReplaceAll,
    StrLen,
    RegexMatch,

    // Conversion
    ToString,
    ToInt,
    ToLong,
    ToDouble,
    ToDecimal,
    ToBool,
    ToDate,
}

impl ExprOp {
    pub fn operator(&self) -> &'static str {
        match self {
            ExprOp::Add => "$add",
            ExprOp::Subtract => "$subtract",
            ExprOp::Multiply => "$multiply",
            ExprOp::Divide => "$divide",
            ExprOp::Mod => "$mod",
            ExprOp::Abs => "$abs",
            ExprOp::Eq => "$eq",
            ExprOp::Ne => "$ne",
            ExprOp::Gt => "$gt",
            ExprOp::Gte => "$gte",
            ExprOp::Lt => "$lt",
            ExprOp::Lte => "$lte",
            ExprOp::In => "$in",
            ExprOp::And => "$and",
            ExprOp::Or => "$or",
            ExprOp::Not => "$not",
            ExprOp::Cond => "$cond",
            ExprOp::IfNull => "$ifNull",
            ExprOp::Concat => "$concat",
            ExprOp::ToUpper => "$toUpper",
            ExprOp::ToLower => "$toLower",
            ExprOp::Trim => "$trim",
            ExprOp::Substr => "$substrCP",
            ExprOp::ReplaceAll => "$replaceAll",
            ExprOp::StrLen => "$strLenCP",
            ExprOp::RegexMatch => "$regexMatch",
            ExprOp::ToString => "$toString",
            ExprOp::ToInt => "$toInt",
            ExprOp::ToLong => "$toLong",
            ExprOp::ToDouble => "$toDouble",
            ExprOp::ToDecimal => "$toDecimal",
            ExprOp::ToBool => "$toBool",
            ExprOp::ToDate => "$toDate",
        }
    }

    /// Operators whose single argument is written without an array wrapper.
    fn is_unary(&self) -> bool {
        matches!(
            self,
            ExprOp::Abs
                | ExprOp::ToUpper
                | ExprOp::ToLower
                | ExprOp::StrLen
                | ExprOp::ToString
                | ExprOp::ToInt
                | ExprOp::ToLong
                | ExprOp::ToDouble
                | ExprOp::ToDecimal
                | ExprOp::ToBool
                | ExprOp::ToDate
        )
    }
}

impl AggExpr {
    pub fn field(path: impl Into<String>) -> Self {
        AggExpr::Field(path.into())
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        AggExpr::Literal(value.into())
    }

    pub fn call(op: ExprOp, args: Vec<AggExpr>) -> Self {
        AggExpr::Call { op, args }
    }

    /// Field paths this expression reads, in first-use order.
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            AggExpr::Field(path) => {
                if !out.contains(&path.as_str()) {
                    out.push(path);
                }
            }
            AggExpr::Literal(_) => {}
            AggExpr::Call { args, .. } => args.iter().for_each(|a| a.collect_fields(out)),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            AggExpr::Field(path) => json!(format!("${}", path)),
            AggExpr::Literal(value) => literal_json(value),
            AggExpr::Call { op, args } => {
                let rendered: Vec<serde_json::Value> = args.iter().map(AggExpr::to_json).collect();
                let body = match op {
                    ExprOp::Trim => json!({ "input": rendered.first() }),
                    ExprOp::ReplaceAll => json!({
                        "input": rendered.first(),
                        "find": rendered.get(1),
                        "replacement": rendered.get(2),
                    }),
                    ExprOp::RegexMatch => {
                        let mut body = json!({
                            "input": rendered.first(),
                            "regex": rendered.get(1),
                        });
                        if let Some(options) = rendered.get(2) {
                            body["options"] = options.clone();
                        }
                        body
                    }
                    op if op.is_unary() && rendered.len() == 1 => rendered[0].clone(),
                    _ => serde_json::Value::Array(rendered),
                };
                json!({ op.operator(): body })
            }
        }
    }
}

/// Literals that could be mistaken for field paths or operators get wrapped.
fn literal_json(value: &Value) -> serde_json::Value {
    let ambiguous = match value {
        Value::String(s) => s.starts_with('$'),
        Value::Document(_) | Value::Array(_) => true,
        _ => false,
    };
    if ambiguous {
        json!({ "$literal": value.to_json() })
    } else {
        value.to_json()
    }
}

impl From<AggExpr> for serde_json::Value {
    fn from(expr: AggExpr) -> Self {
        expr.to_json()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccumulatorOp {
    Sum,
    Avg,
    Min,
    Max,
}

impl AccumulatorOp {
    pub fn operator(&self) -> &'static str {
        match self {
            AccumulatorOp::Sum => "$sum",
            AccumulatorOp::Avg => "$avg",
            AccumulatorOp::Min => "$min",
            AccumulatorOp::Max => "$max",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Accumulator {
    pub op: AccumulatorOp,
    pub arg: AggExpr,
}

impl Accumulator {
    pub fn new(op: AccumulatorOp, arg: AggExpr) -> Self {
        Self { op, arg }
    }

    /// `{$sum: 1}`
    pub fn count() -> Self {
        Self::new(AccumulatorOp::Sum, AggExpr::literal(1))
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({ self.op.operator(): self.arg.to_json() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_call_shapes() {
        let upper = AggExpr::call(ExprOp::ToUpper, vec![AggExpr::field("name")]);
        assert_eq!(upper.to_json(), json!({ "$toUpper": "$name" }));

        let add = AggExpr::call(ExprOp::Add, vec![AggExpr::field("age"), AggExpr::literal(1)]);
        assert_eq!(add.to_json(), json!({ "$add": ["$age", 1] }));

        let trim = AggExpr::call(ExprOp::Trim, vec![AggExpr::field("s")]);
        assert_eq!(trim.to_json(), json!({ "$trim": { "input": "$s" } }));
    }

    #[test]
    fn test_dollar_literal_is_wrapped() {
        let lit = AggExpr::literal("$price");
        assert_eq!(lit.to_json(), json!({ "$literal": "$price" }));
    }

    #[test]
    fn test_count_accumulator() {
        assert_eq!(Accumulator::count().to_json(), json!({ "$sum": 1 }));
    }
}
