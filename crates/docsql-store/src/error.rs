//! Store errors

use thiserror::Error;

/// Label on errors after which the whole transaction may be retried.
pub const TRANSIENT_TRANSACTION_ERROR: &str = "TransientTransactionError";

/// Label on commit errors whose outcome is unknown; the commit may be retried.
pub const UNKNOWN_TRANSACTION_COMMIT_RESULT: &str = "UnknownTransactionCommitResult";

pub mod codes {
    pub const BAD_VALUE: i32 = 2;
    pub const NO_SUCH_TRANSACTION: i32 = 251;
    pub const NO_SUCH_SESSION: i32 = 206;
    pub const WRITE_CONFLICT: i32 = 112;
    pub const DUPLICATE_KEY: i32 = 11000;
    pub const EXCEEDED_TIME_LIMIT: i32 = 50;
    pub const CONVERSION_FAILURE: i32 = 241;
    pub const TRANSACTION_IN_PROGRESS: i32 = 256;
    pub const IMMUTABLE_FIELD: i32 = 66;
    pub const HOST_UNREACHABLE: i32 = 6;
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("Write conflict on {collection}: {key}")]
    WriteConflict {
        collection: String,
        key: String,
        labels: Vec<String>,
    },

    #[error("Duplicate key in {collection}: _id {key}")]
    DuplicateKey { collection: String, key: String },

    #[error("No such session: {0}")]
    NoSuchSession(String),

    #[error("No transaction in progress for session {0}")]
    NoSuchTransaction(String),

    #[error("Transaction already in progress for session {0}")]
    TransactionInProgress(String),

    #[error("Operation exceeded time limit")]
    Timeout,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Command failed ({code}): {message}")]
    Command {
        code: i32,
        message: String,
        labels: Vec<String>,
    },
}

impl StoreError {
    pub fn command(code: i32, message: impl Into<String>) -> Self {
        StoreError::Command {
            code,
            message: message.into(),
            labels: Vec::new(),
        }
    }

    /// A write conflict inside a transaction, labelled transient.
    pub fn write_conflict(collection: impl Into<String>, key: impl Into<String>) -> Self {
        StoreError::WriteConflict {
            collection: collection.into(),
            key: key.into(),
            labels: vec![TRANSIENT_TRANSACTION_ERROR.to_string()],
        }
    }

    /// Copy of this error carrying `label` as well.
    pub fn with_label(self, label: &str) -> Self {
        match self {
            StoreError::WriteConflict {
                collection,
                key,
                mut labels,
            } => {
                push_label(&mut labels, label);
                StoreError::WriteConflict {
                    collection,
                    key,
                    labels,
                }
            }
            StoreError::Command {
                code,
                message,
                mut labels,
            } => {
                push_label(&mut labels, label);
                StoreError::Command {
                    code,
                    message,
                    labels,
                }
            }
            other => {
                let mut labels = other.labels();
                push_label(&mut labels, label);
                StoreError::Command {
                    code: other.code(),
                    message: other.to_string(),
                    labels,
                }
            }
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            StoreError::WriteConflict { .. } => codes::WRITE_CONFLICT,
            StoreError::DuplicateKey { .. } => codes::DUPLICATE_KEY,
            StoreError::NoSuchSession(_) => codes::NO_SUCH_SESSION,
            StoreError::NoSuchTransaction(_) => codes::NO_SUCH_TRANSACTION,
            StoreError::TransactionInProgress(_) => codes::TRANSACTION_IN_PROGRESS,
            StoreError::Timeout => codes::EXCEEDED_TIME_LIMIT,
            StoreError::Network(_) => codes::HOST_UNREACHABLE,
            StoreError::Command { code, .. } => *code,
        }
    }

    pub fn labels(&self) -> Vec<String> {
        match self {
            StoreError::WriteConflict { labels, .. } | StoreError::Command { labels, .. } => labels.clone(),
            _ => Vec::new(),
        }
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels().iter().any(|l| l == label)
    }

    pub fn is_transient(&self) -> bool {
        self.has_label(TRANSIENT_TRANSACTION_ERROR)
    }

    pub fn is_unknown_commit_result(&self) -> bool {
        self.has_label(UNKNOWN_TRANSACTION_COMMIT_RESULT)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, StoreError::Timeout)
    }

    pub fn is_network(&self) -> bool {
        matches!(self, StoreError::Network(_))
    }
}

fn push_label(labels: &mut Vec<String>, label: &str) {
    if !labels.iter().any(|l| l == label) {
        labels.push(label.to_string());
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
