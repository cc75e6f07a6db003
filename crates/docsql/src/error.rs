//! Driver errors

use docsql_ast::{CompileError, SyntaxError, TranslationError};
use docsql_store::StoreError;
use thiserror::Error;

use crate::config::ConfigError;

/// Every error the driver surfaces.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    #[error(transparent)]
    Translation(#[from] TranslationError),

    #[error(transparent)]
    Operational(#[from] OperationalError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error(transparent)]
    Programming(#[from] ProgrammingError),
}

/// Invalid session or transaction transitions, and store timeouts or
/// network failures. None of these change session state.
#[derive(Debug, Error)]
pub enum OperationalError {
    #[error("no active session")]
    NoSession,

    #[error("a session is already active")]
    SessionActive,

    #[error("no active transaction")]
    NoTransaction,

    #[error("a transaction is already active")]
    TransactionActive,

    #[error("connection is closed")]
    ConnectionClosed,

    #[error("{0}")]
    Store(StoreError),
}

/// Failures reported by the store.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("{0}")]
    Store(StoreError),

    #[error("transaction failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: StoreError },
}

/// API misuse: fetching from closed or exhausted cursors and result sets.
#[derive(Debug, Error)]
pub enum ProgrammingError {
    #[error("cursor is closed")]
    CursorClosed,

    #[error("result set is closed")]
    ResultSetClosed,

    #[error("result set is exhausted")]
    ResultSetExhausted,

    #[error("no result set: the last statement returned no rows")]
    NoResultSet,
}

impl From<CompileError> for Error {
    fn from(err: CompileError) -> Self {
        match err {
            CompileError::Syntax(e) => Error::Syntax(e),
            CompileError::Translation(e) => Error::Translation(e),
        }
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        if err.is_timeout() || err.is_network() {
            Error::Operational(OperationalError::Store(err))
        } else {
            Error::Database(DatabaseError::Store(err))
        }
    }
}

impl Error {
    /// The underlying store error, if this came from the store.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            Error::Operational(OperationalError::Store(e)) => Some(e),
            Error::Database(DatabaseError::Store(e)) => Some(e),
            Error::Database(DatabaseError::RetriesExhausted { last, .. }) => Some(last),
            _ => None,
        }
    }

    /// A store error labelled as a transient transaction error. Exhausted
    /// retries are never transient.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Database(DatabaseError::RetriesExhausted { .. }) => false,
            other => other.store_error().is_some_and(StoreError::is_transient),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_are_classified() {
        assert!(matches!(
            Error::from(StoreError::Timeout),
            Error::Operational(OperationalError::Store(_))
        ));
        assert!(matches!(
            Error::from(StoreError::Network("reset".to_string())),
            Error::Operational(OperationalError::Store(_))
        ));

        let conflict = Error::from(StoreError::write_conflict("users", "u1"));
        assert!(matches!(conflict, Error::Database(DatabaseError::Store(_))));
        assert!(conflict.is_transient());
    }

    #[test]
    fn test_exhausted_is_not_transient() {
        let err = Error::Database(DatabaseError::RetriesExhausted {
            attempts: 4,
            last: StoreError::write_conflict("users", "u1"),
        });
        assert!(!err.is_transient());
        assert_eq!(
            err.to_string(),
            "transaction failed after 4 attempts: Write conflict on users: u1"
        );
    }
}
