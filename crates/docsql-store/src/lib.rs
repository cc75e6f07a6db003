//! docsql store - the document-store backend seam
//!
//! [`DocumentStore`] is what the driver talks to: sessions, transactions,
//! reads that open a [`StoreCursor`], and write commands. [`MemoryStore`]
//! implements it in process.

mod error;
pub mod memory;

use docsql_ir::{DeleteCommand, Document, FindQuery, InsertCommand, Pipeline, UpdateCommand, Value};
use std::fmt;

pub use error::{codes, Result, StoreError, TRANSIENT_TRANSACTION_ERROR, UNKNOWN_TRANSACTION_COMMIT_RESULT};
pub use memory::{FailCommand, FailMode, MemoryStore, StatsSnapshot};

/// Server-side session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionOptions {
    pub causal_consistency: bool,
}

/// Outcome of a write command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteResult {
    /// Documents matched by the filter (inserted, for inserts)
    pub matched: u64,
    pub modified: u64,
    pub inserted_ids: Vec<Value>,
}

/// An open server-side cursor.
pub trait StoreCursor: Send {
    /// Next batch of documents; empty once the cursor is exhausted.
    fn next_batch(&mut self) -> Result<Vec<Document>>;

    /// Release the cursor. Safe to call more than once.
    fn close(&mut self) -> Result<()>;
}

/// A document database reached by the driver.
///
/// Every read and write takes an optional session; without one the
/// operation runs outside any transaction and applies immediately.
pub trait DocumentStore: Send + Sync {
    fn ping(&self) -> Result<()>;

    fn start_session(&self, options: SessionOptions) -> Result<SessionId>;
    fn end_session(&self, session: &SessionId) -> Result<()>;

    fn start_transaction(&self, session: &SessionId) -> Result<()>;
    fn commit_transaction(&self, session: &SessionId) -> Result<()>;
    fn abort_transaction(&self, session: &SessionId) -> Result<()>;

    fn find(
        &self,
        session: Option<&SessionId>,
        collection: &str,
        query: &FindQuery,
        batch_size: usize,
    ) -> Result<Box<dyn StoreCursor>>;

    fn aggregate(
        &self,
        session: Option<&SessionId>,
        collection: &str,
        pipeline: &Pipeline,
        batch_size: usize,
    ) -> Result<Box<dyn StoreCursor>>;

    fn insert(&self, session: Option<&SessionId>, collection: &str, command: &InsertCommand) -> Result<WriteResult>;
    fn update(&self, session: Option<&SessionId>, collection: &str, command: &UpdateCommand) -> Result<WriteResult>;
    fn delete(&self, session: Option<&SessionId>, collection: &str, command: &DeleteCommand) -> Result<WriteResult>;
}
