//! docsql - a SQL driver over a document store
//!
//! SQL text is compiled to typed store commands (`docsql-ast`, `docsql-ir`)
//! and run against a [`DocumentStore`] through a [`Connection`]:
//!
//! ```ignore
//! use docsql::{params, Connection};
//!
//! let conn = Connection::in_memory()?;
//! conn.execute("INSERT INTO users (name, age) VALUES (?, ?)", params!["ann", 31])?;
//!
//! let mut cursor = conn.execute("SELECT name FROM users WHERE age > ?", params![25])?;
//! for row in cursor.fetch_all()? {
//!     println!("{}", row.to_json());
//! }
//!
//! conn.session_scope(|conn| {
//!     conn.with_transaction(|conn| {
//!         conn.execute("UPDATE users SET age = 32 WHERE name = 'ann'", ())?;
//!         Ok(())
//!     })
//! })?;
//! ```

pub mod config;
pub mod connection;
pub mod cursor;
pub mod error;
pub mod logging;
mod params;
pub mod result_set;
pub mod session;

pub use config::{ConfigError, ConnectionConfig, RetryPolicy};
pub use connection::{Connection, SessionGuard, TransactionGuard};
pub use cursor::Cursor;
pub use error::{DatabaseError, Error, OperationalError, ProgrammingError, Result};
pub use result_set::{ColumnDescription, ResultSet, Row, SqlValue};
pub use session::{SessionState, WriteOp};

pub use docsql_ast::{compile, SyntaxError, TranslationError};
pub use docsql_ir::{doc, Document, IndexMap, Params, SqlType, TranslatedQuery, Value};
pub use docsql_registry::FunctionRegistry;
pub use docsql_store::{DocumentStore, MemoryStore, SessionId, StoreCursor, StoreError};
