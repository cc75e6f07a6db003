//! SQL function registry
//!
//! Maps SQL function names onto document-store accumulators and
//! aggregation-expression operators.

use docsql_ir::{AccumulatorOp, ExprOp, SqlType};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Function not found: {0}")]
    FunctionNotFound(String),

    #[error("Function {func} takes {expected} argument(s), got {actual}")]
    ArityMismatch {
        func: String,
        expected: String,
        actual: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    /// `COUNT` is expressed as a `$sum` of ones.
    pub fn accumulator(&self) -> AccumulatorOp {
        match self {
            AggregateFunction::Count | AggregateFunction::Sum => AccumulatorOp::Sum,
            AggregateFunction::Avg => AccumulatorOp::Avg,
            AggregateFunction::Min => AccumulatorOp::Min,
            AggregateFunction::Max => AccumulatorOp::Max,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FunctionKind {
    Aggregate(AggregateFunction),
    #[serde(skip)]
    Scalar(ExprOp),
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionSignature {
    pub name: String,
    pub min_args: usize,
    /// `None` for variadic functions
    pub max_args: Option<usize>,
    pub return_type: Option<SqlType>,
    pub kind: FunctionKind,
}

impl FunctionSignature {
    pub fn is_aggregate(&self) -> bool {
        matches!(self.kind, FunctionKind::Aggregate(_))
    }

    fn accepts(&self, argc: usize) -> bool {
        argc >= self.min_args && self.max_args.map_or(true, |max| argc <= max)
    }

    fn arity_text(&self) -> String {
        match self.max_args {
            Some(max) if max == self.min_args => max.to_string(),
            Some(max) => format!("{}..{}", self.min_args, max),
            None => format!("at least {}", self.min_args),
        }
    }
}

pub struct FunctionRegistry {
    functions: HashMap<String, FunctionSignature>,
    version: String,
}

impl FunctionRegistry {
    pub fn new(version: impl Into<String>) -> Self {
        let mut registry = Self {
            functions: HashMap::new(),
            version: version.into(),
        };
        registry.register_builtins();
        registry
    }

    /// Shared registry holding the builtin functions.
    pub fn builtin() -> &'static FunctionRegistry {
        static REGISTRY: OnceLock<FunctionRegistry> = OnceLock::new();
        REGISTRY.get_or_init(FunctionRegistry::default)
    }

    fn register_builtins(&mut self) {
        // Standard aggregates
        for (name, func, ret_type) in [
            ("count", AggregateFunction::Count, Some(SqlType::BigInt)),
            ("sum", AggregateFunction::Sum, None),
            ("avg", AggregateFunction::Avg, Some(SqlType::Double)),
            ("min", AggregateFunction::Min, None),
            ("max", AggregateFunction::Max, None),
        ] {
            self.register(FunctionSignature {
                name: name.to_string(),
                min_args: 1,
                max_args: Some(1),
                return_type: ret_type,
                kind: FunctionKind::Aggregate(func),
            });
        }

        // String functions
        self.scalar("upper", ExprOp::ToUpper, 1, Some(1), Some(SqlType::Varchar));
        self.scalar("lower", ExprOp::ToLower, 1, Some(1), Some(SqlType::Varchar));
        self.scalar("trim", ExprOp::Trim, 1, Some(1), Some(SqlType::Varchar));
        self.scalar("substr", ExprOp::Substr, 2, Some(3), Some(SqlType::Varchar));
        self.scalar("substring", ExprOp::Substr, 2, Some(3), Some(SqlType::Varchar));
        self.scalar("replace", ExprOp::ReplaceAll, 3, Some(3), Some(SqlType::Varchar));
        self.scalar("concat", ExprOp::Concat, 1, None, Some(SqlType::Varchar));
        self.scalar("length", ExprOp::StrLen, 1, Some(1), Some(SqlType::Integer));
        self.scalar("char_length", ExprOp::StrLen, 1, Some(1), Some(SqlType::Integer));

        // Conversions
        self.scalar("number", ExprOp::ToDouble, 1, Some(1), Some(SqlType::Double));
        self.scalar("bool", ExprOp::ToBool, 1, Some(1), Some(SqlType::Boolean));
        self.scalar("date", ExprOp::ToDate, 1, Some(1), Some(SqlType::Date));
        self.scalar("datetime", ExprOp::ToDate, 1, Some(1), Some(SqlType::DateTime));
        self.scalar("timestamp", ExprOp::ToDate, 1, Some(1), Some(SqlType::Timestamp));

        // Misc
        self.scalar("abs", ExprOp::Abs, 1, Some(1), None);
        self.scalar("coalesce", ExprOp::IfNull, 2, None, None);
        self.scalar("ifnull", ExprOp::IfNull, 2, Some(2), None);
    }

    fn scalar(
        &mut self,
        name: &str,
        op: ExprOp,
        min_args: usize,
        max_args: Option<usize>,
        return_type: Option<SqlType>,
    ) {
        self.register(FunctionSignature {
            name: name.to_string(),
            min_args,
            max_args,
            return_type,
            kind: FunctionKind::Scalar(op),
        });
    }

    pub fn register(&mut self, sig: FunctionSignature) {
        self.functions.insert(sig.name.to_ascii_lowercase(), sig);
    }

    pub fn get(&self, name: &str) -> Option<&FunctionSignature> {
        self.functions.get(&name.to_ascii_lowercase())
    }

    pub fn lookup(&self, name: &str, argc: usize) -> Result<&FunctionSignature, RegistryError> {
        let sig = self
            .get(name)
            .ok_or_else(|| RegistryError::FunctionNotFound(name.to_string()))?;

        if !sig.accepts(argc) {
            return Err(RegistryError::ArityMismatch {
                func: sig.name.clone(),
                expected: sig.arity_text(),
                actual: argc,
            });
        }
        Ok(sig)
    }

    pub fn is_aggregate(&self, name: &str) -> bool {
        self.get(name).is_some_and(FunctionSignature::is_aggregate)
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new("0.1.0")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup() {
        let registry = FunctionRegistry::default();

        let sig = registry.lookup("UPPER", 1).unwrap();
        assert_eq!(sig.name, "upper");
        assert_eq!(sig.kind, FunctionKind::Scalar(ExprOp::ToUpper));
        assert_eq!(sig.return_type, Some(SqlType::Varchar));
    }

    #[test]
    fn test_aggregate_lookup() {
        let registry = FunctionRegistry::builtin();

        let sig = registry.lookup("count", 1).unwrap();
        assert!(sig.is_aggregate());
        assert_eq!(sig.kind, FunctionKind::Aggregate(AggregateFunction::Count));
        assert!(registry.is_aggregate("Max"));
        assert!(!registry.is_aggregate("lower"));
    }

    #[test]
    fn test_arity_and_unknown() {
        let registry = FunctionRegistry::default();

        assert_eq!(
            registry.lookup("replace", 2).unwrap_err(),
            RegistryError::ArityMismatch {
                func: "replace".to_string(),
                expected: "3".to_string(),
                actual: 2,
            }
        );
        assert!(registry.lookup("substr", 3).is_ok());
        assert!(registry.lookup("concat", 5).is_ok());
        assert_eq!(
            registry.lookup("soundex", 1).unwrap_err(),
            RegistryError::FunctionNotFound("soundex".to_string())
        );
    }
}
