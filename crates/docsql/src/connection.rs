//! Connections
//!
//! A [`Connection`] owns one store handle and at most one session. Statements
//! go through [`Cursor`]s; transaction control goes through the session
//! manager, either directly, through the legacy `begin/commit/rollback`
//! calls, or through scopes and guards that tear down on every exit path.
//!
//! A connection is not meant for concurrent use: it is `Send` but not `Sync`.

use docsql_ir::{FindQuery, Params, Pipeline};
use docsql_store::{DocumentStore, MemoryStore, SessionId, SessionOptions, StoreCursor, WriteResult};
use std::cell::{Cell, RefCell};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{ConnectionConfig, RetryPolicy};
use crate::cursor::Cursor;
use crate::error::{DatabaseError, OperationalError, Result};
use crate::session::{SessionManager, SessionState, WriteOp};

pub struct Connection {
    store: Arc<dyn DocumentStore>,
    config: ConnectionConfig,
    sessions: RefCell<SessionManager>,
    closed: Cell<bool>,
}

impl Connection {
    /// Validate `config` and check that the store answers.
    pub fn open(config: ConnectionConfig, store: Arc<dyn DocumentStore>) -> Result<Self> {
        config.validate()?;
        store.ping()?;
        let options = SessionOptions {
            causal_consistency: config.causal_consistency,
        };
        let sessions = SessionManager::new(store.clone(), options, config.retry_policy());
        info!(uri = %config.redacted_uri(), "Connection opened");
        Ok(Self {
            store,
            config,
            sessions: RefCell::new(sessions),
            closed: Cell::new(false),
        })
    }

    pub fn connect(uri: &str, store: Arc<dyn DocumentStore>) -> Result<Self> {
        Self::open(ConnectionConfig::from_uri(uri)?, store)
    }

    /// A connection to a fresh in-process store with default options.
    pub fn in_memory() -> Result<Self> {
        Self::open(ConnectionConfig::default(), Arc::new(MemoryStore::new()))
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.sessions.borrow().policy()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    pub fn cursor(&self) -> Cursor<'_> {
        Cursor::new(self)
    }

    /// Run one statement on a new cursor and hand the cursor back.
    pub fn execute(&self, sql: &str, params: impl Into<Params>) -> Result<Cursor<'_>> {
        let mut cursor = self.cursor();
        cursor.execute(sql, params)?;
        Ok(cursor)
    }

    pub fn state(&self) -> SessionState {
        self.sessions.borrow().state()
    }

    pub fn in_transaction(&self) -> bool {
        self.sessions.borrow().in_transaction()
    }

    /// True unless a transaction is active.
    pub fn autocommit(&self) -> bool {
        !self.in_transaction()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.sessions.borrow().session_id().cloned()
    }

    pub fn start_session(&self) -> Result<()> {
        self.check_open()?;
        self.sessions.borrow_mut().start_session()
    }

    pub fn end_session(&self) -> Result<()> {
        self.sessions.borrow_mut().end_session()
    }

    pub fn start_transaction(&self) -> Result<()> {
        self.check_open()?;
        self.sessions.borrow_mut().start_transaction()
    }

    pub fn commit_transaction(&self) -> Result<()> {
        self.sessions.borrow_mut().commit_transaction()
    }

    pub fn abort_transaction(&self) -> Result<()> {
        self.sessions.borrow_mut().abort_transaction()
    }

    /// Start a transaction, creating a session first when there is none.
    /// The session stays open after the transaction ends.
    pub fn begin(&self) -> Result<()> {
        self.check_open()?;
        let mut sessions = self.sessions.borrow_mut();
        if sessions.state() == SessionState::NoSession {
            sessions.start_session()?;
        }
        sessions.start_transaction()
    }

    /// Commit the active transaction; does nothing without one.
    pub fn commit(&self) -> Result<()> {
        if !self.in_transaction() {
            debug!("commit without an active transaction ignored");
            return Ok(());
        }
        self.commit_transaction()
    }

    /// Abort the active transaction; does nothing without one.
    pub fn rollback(&self) -> Result<()> {
        if !self.in_transaction() {
            debug!("rollback without an active transaction ignored");
            return Ok(());
        }
        self.abort_transaction()
    }

    /// Start a session that ends when the guard is dropped.
    pub fn session(&self) -> Result<SessionGuard<'_>> {
        self.start_session()?;
        Ok(SessionGuard {
            connection: self,
            active: true,
        })
    }

    /// Start a transaction that aborts when the guard is dropped uncommitted.
    pub fn transaction(&self) -> Result<TransactionGuard<'_>> {
        self.start_transaction()?;
        Ok(TransactionGuard {
            connection: self,
            active: true,
        })
    }

    /// Run `f` inside a new session, ending it however `f` returns.
    pub fn session_scope<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let guard = self.session()?;
        let result = f(self);
        let ended = guard.end();
        let value = result?;
        ended?;
        Ok(value)
    }

    /// Run `f` inside a transaction on the active session. Commits when `f`
    /// succeeds; aborts once when it fails.
    pub fn transaction_scope<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let guard = self.transaction()?;
        match f(self) {
            Ok(value) => {
                guard.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(abort_err) = guard.abort() {
                    warn!(error = %abort_err, "Failed to abort transaction after error");
                }
                Err(err)
            }
        }
    }

    /// Run `callback` in a transaction, starting over from scratch when it
    /// fails with a transient error, up to the retry policy's bound.
    pub fn with_transaction<T, F>(&self, mut callback: F) -> Result<T>
    where
        F: FnMut(&Connection) -> Result<T>,
    {
        let policy = self.retry_policy();
        let mut retries = 0;
        loop {
            let err = match self.transaction_scope(&mut callback) {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            let last = match err.store_error() {
                Some(store_err) if err.is_transient() => store_err.clone(),
                _ => return Err(err),
            };
            if retries >= policy.max_retries {
                warn!(attempts = retries + 1, error = %last, "Transaction callback retries exhausted");
                return Err(DatabaseError::RetriesExhausted {
                    attempts: retries + 1,
                    last,
                }
                .into());
            }
            retries += 1;
            warn!(attempt = retries, error = %last, "Retrying transaction callback");
            std::thread::sleep(policy.backoff(retries));
        }
    }

    /// End the session (aborting any transaction) and refuse further work.
    /// Teardown failures are logged; the connection is closed either way.
    pub fn close(&self) {
        if self.closed.replace(true) {
            return;
        }
        let mut sessions = self.sessions.borrow_mut();
        if sessions.state() != SessionState::NoSession {
            if let Err(e) = sessions.end_session() {
                warn!(error = %e, "Failed to end session while closing connection");
            }
        }
        info!("Connection closed");
    }

    pub(crate) fn find(&self, collection: &str, query: &FindQuery, batch_size: usize) -> Result<Box<dyn StoreCursor>> {
        self.check_open()?;
        self.sessions.borrow().find(collection, query, batch_size)
    }

    pub(crate) fn aggregate(
        &self,
        collection: &str,
        pipeline: &Pipeline,
        batch_size: usize,
    ) -> Result<Box<dyn StoreCursor>> {
        self.check_open()?;
        self.sessions.borrow().aggregate(collection, pipeline, batch_size)
    }

    pub(crate) fn write(&self, collection: &str, op: WriteOp) -> Result<WriteResult> {
        self.check_open()?;
        self.sessions.borrow_mut().write(collection, op)
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.get() {
            return Err(OperationalError::ConnectionClosed.into());
        }
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Ends its session on drop.
pub struct SessionGuard<'c> {
    connection: &'c Connection,
    active: bool,
}

impl SessionGuard<'_> {
    pub fn connection(&self) -> &Connection {
        self.connection
    }

    /// End the session now, reporting the outcome. A session already ended
    /// inside the scope is not an error.
    pub fn end(mut self) -> Result<()> {
        self.active = false;
        if self.connection.state() == SessionState::NoSession {
            return Ok(());
        }
        self.connection.end_session()
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if self.active && self.connection.state() != SessionState::NoSession {
            if let Err(e) = self.connection.end_session() {
                warn!(error = %e, "Failed to end session on scope exit");
            }
        }
    }
}

/// Aborts its transaction on drop unless committed or aborted first.
pub struct TransactionGuard<'c> {
    connection: &'c Connection,
    active: bool,
}

impl TransactionGuard<'_> {
    pub fn connection(&self) -> &Connection {
        self.connection
    }

    pub fn commit(mut self) -> Result<()> {
        self.active = false;
        self.connection.commit_transaction()
    }

    pub fn abort(mut self) -> Result<()> {
        self.active = false;
        self.connection.abort_transaction()
    }
}

impl Drop for TransactionGuard<'_> {
    fn drop(&mut self) {
        if self.active && self.connection.in_transaction() {
            if let Err(e) = self.connection.abort_transaction() {
                warn!(error = %e, "Failed to abort transaction on scope exit");
            }
        }
    }
}
