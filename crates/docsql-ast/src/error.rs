//! Parse and translation errors

use docsql_ir::{CoercionError, PipelineError};
use docsql_registry::RegistryError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Location of a token in the source text. Lines and columns start at 1.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Position {
    pub offset: usize,
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Syntax error at {position}: {message}")]
pub struct SyntaxError {
    pub message: String,
    pub position: Position,
    /// Text of the offending token, if any
    pub found: Option<String>,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, position: Position, found: Option<String>) -> Self {
        Self {
            message: message.into(),
            position,
            found,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TranslationError {
    #[error("Unsupported construct: {construct}")]
    Unsupported { construct: String },

    #[error("Ambiguous primary key: statement references both `id` and `_id`")]
    AmbiguousPrimaryKey,

    #[error(transparent)]
    Function(#[from] RegistryError),

    #[error("Aggregate function {0} is not allowed here")]
    MisplacedAggregate(String),

    #[error("Column {0} must appear in GROUP BY or be used in an aggregate")]
    NotGrouped(String),

    #[error("Unknown column or alias in ORDER BY: {0}")]
    UnknownSortKey(String),

    #[error("Missing value for parameter {0}")]
    MissingParameter(String),

    #[error("Statement uses {expected} positional parameter(s) but {actual} were supplied")]
    ParameterCount { expected: usize, actual: usize },

    #[error("Unknown type in CAST: {0}")]
    UnknownType(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error(transparent)]
    Coercion(#[from] CoercionError),

    #[error("Invalid pipeline: {0}")]
    Pipeline(#[from] PipelineError),
}

impl TranslationError {
    pub fn unsupported(construct: impl Into<String>) -> Self {
        TranslationError::Unsupported {
            construct: construct.into(),
        }
    }
}

/// Failure of [`crate::compile`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    #[error(transparent)]
    Translation(#[from] TranslationError),
}
