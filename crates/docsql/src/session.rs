//! Session and transaction state machine
//!
//! ```text
//! NoSession --start_session--> SessionActive --start_transaction--> TransactionActive
//!     ^                          |      ^                                  |
//!     +-------end_session--------+      +-------commit / abort-------------+
//! ```
//!
//! The transaction lives inside the session value, so it can never outlive
//! it. Writes made under a transaction are journaled; when a commit fails
//! with a transient error the journal is replayed in a fresh transaction.

use docsql_ir::{DeleteCommand, FindQuery, InsertCommand, Pipeline, UpdateCommand};
use docsql_store::{DocumentStore, SessionId, SessionOptions, StoreCursor, StoreError, WriteResult};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::RetryPolicy;
use crate::error::{DatabaseError, OperationalError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoSession,
    SessionActive,
    TransactionActive,
}

/// A write command bound for one collection.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Insert(InsertCommand),
    Update(UpdateCommand),
    Delete(DeleteCommand),
}

impl WriteOp {
    pub fn name(&self) -> &'static str {
        match self {
            WriteOp::Insert(_) => "insert",
            WriteOp::Update(_) => "update",
            WriteOp::Delete(_) => "delete",
        }
    }
}

#[derive(Debug, Clone)]
struct JournalEntry {
    collection: String,
    op: WriteOp,
}

/// Transaction state attached to a session.
#[derive(Debug, Default)]
pub struct Transaction {
    collections: Vec<String>,
    journal: Vec<JournalEntry>,
    retries: u32,
}

impl Transaction {
    /// Collections written so far, in first-write order
    pub fn collections(&self) -> &[String] {
        &self.collections
    }

    pub fn journal_len(&self) -> usize {
        self.journal.len()
    }

    /// Retries spent by the last commit
    pub fn retries(&self) -> u32 {
        self.retries
    }

    fn record(&mut self, collection: &str, op: WriteOp) {
        if !self.collections.iter().any(|c| c == collection) {
            self.collections.push(collection.to_string());
        }
        self.journal.push(JournalEntry {
            collection: collection.to_string(),
            op,
        });
    }
}

#[derive(Debug)]
pub struct Session {
    id: SessionId,
    causal_consistency: bool,
    transaction: Option<Transaction>,
}

impl Session {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn causal_consistency(&self) -> bool {
        self.causal_consistency
    }

    pub fn transaction(&self) -> Option<&Transaction> {
        self.transaction.as_ref()
    }
}

/// Owns the store session handle and drives its transitions.
pub struct SessionManager {
    store: Arc<dyn DocumentStore>,
    options: SessionOptions,
    policy: RetryPolicy,
    session: Option<Session>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn DocumentStore>, options: SessionOptions, policy: RetryPolicy) -> Self {
        Self {
            store,
            options,
            policy,
            session: None,
        }
    }

    pub fn state(&self) -> SessionState {
        match &self.session {
            None => SessionState::NoSession,
            Some(s) if s.transaction.is_some() => SessionState::TransactionActive,
            Some(_) => SessionState::SessionActive,
        }
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session.as_ref().map(|s| &s.id)
    }

    pub fn in_transaction(&self) -> bool {
        self.state() == SessionState::TransactionActive
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn start_session(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Err(OperationalError::SessionActive.into());
        }
        let id = self.store.start_session(self.options)?;
        info!(session = %id, causal_consistency = self.options.causal_consistency, "Session started");
        self.session = Some(Session {
            id,
            causal_consistency: self.options.causal_consistency,
            transaction: None,
        });
        Ok(())
    }

    /// End the session, aborting an active transaction first. Store failures
    /// are logged; the session is gone afterwards either way.
    pub fn end_session(&mut self) -> Result<()> {
        let session = self.session.take().ok_or(OperationalError::NoSession)?;
        if session.transaction.is_some() {
            if let Err(e) = self.store.abort_transaction(&session.id) {
                warn!(session = %session.id, error = %e, "Failed to abort transaction while ending session");
            }
        }
        if let Err(e) = self.store.end_session(&session.id) {
            warn!(session = %session.id, error = %e, "Failed to end session");
        }
        info!(session = %session.id, "Session ended");
        Ok(())
    }

    pub fn start_transaction(&mut self) -> Result<()> {
        let session = self.session.as_mut().ok_or(OperationalError::NoSession)?;
        if session.transaction.is_some() {
            return Err(OperationalError::TransactionActive.into());
        }
        self.store.start_transaction(&session.id)?;
        session.transaction = Some(Transaction::default());
        debug!(session = %session.id, "Transaction started");
        Ok(())
    }

    /// Commit, retrying on transient errors within the retry policy.
    ///
    /// A transient error replays the journal in a new transaction before the
    /// next commit; an unknown commit result retries only the commit.
    pub fn commit_transaction(&mut self) -> Result<()> {
        let id = self.active_transaction()?.clone();
        let mut retries = 0;
        let mut replay = false;
        loop {
            let err = match self.commit_attempt(&id, replay) {
                Ok(()) => {
                    if let Some(session) = self.session.as_mut() {
                        if let Some(txn) = session.transaction.take() {
                            info!(
                                session = %id,
                                writes = txn.journal.len(),
                                retries,
                                "Transaction committed"
                            );
                        }
                    }
                    return Ok(());
                }
                Err(err) => err,
            };

            if err.is_timeout() || err.is_network() {
                warn!(session = %id, error = %err, "Commit did not complete; transaction left open");
                return Err(err.into());
            }
            if !err.is_transient() && !err.is_unknown_commit_result() {
                self.drop_transaction(&id);
                return Err(err.into());
            }
            if retries >= self.policy.max_retries {
                self.drop_transaction(&id);
                warn!(session = %id, attempts = retries + 1, error = %err, "Transaction retries exhausted");
                return Err(DatabaseError::RetriesExhausted {
                    attempts: retries + 1,
                    last: err,
                }
                .into());
            }

            retries += 1;
            replay = !err.is_unknown_commit_result();
            if let Some(txn) = self.session.as_mut().and_then(|s| s.transaction.as_mut()) {
                txn.retries = retries;
            }
            warn!(
                session = %id,
                attempt = retries,
                replay,
                error = %err,
                "Retrying transaction commit"
            );
            std::thread::sleep(self.policy.backoff(retries));
        }
    }

    /// Abort the active transaction. Without one, fails and changes nothing.
    ///
    /// A timeout or network failure leaves the transaction in place, since the
    /// store may still hold it; the abort can be issued again.
    pub fn abort_transaction(&mut self) -> Result<()> {
        let id = self.active_transaction()?.clone();
        match self.store.abort_transaction(&id) {
            Ok(()) | Err(StoreError::NoSuchTransaction(_)) => {}
            Err(e) if e.is_timeout() || e.is_network() => {
                warn!(session = %id, error = %e, "Abort did not complete; transaction left open");
                return Err(e.into());
            }
            Err(e) => warn!(session = %id, error = %e, "Failed to abort transaction"),
        }
        if let Some(session) = self.session.as_mut() {
            session.transaction = None;
        }
        debug!(session = %id, "Transaction aborted");
        Ok(())
    }

    /// Open a store cursor for a read, under the session when there is one.
    pub(crate) fn find(&self, collection: &str, query: &FindQuery, batch_size: usize) -> Result<Box<dyn StoreCursor>> {
        Ok(self
            .store
            .find(self.session_id(), collection, query, batch_size)?)
    }

    pub(crate) fn aggregate(
        &self,
        collection: &str,
        pipeline: &Pipeline,
        batch_size: usize,
    ) -> Result<Box<dyn StoreCursor>> {
        Ok(self
            .store
            .aggregate(self.session_id(), collection, pipeline, batch_size)?)
    }

    /// Run a write, journaling it when a transaction is active.
    pub(crate) fn write(&mut self, collection: &str, op: WriteOp) -> Result<WriteResult> {
        let result = execute_write(self.store.as_ref(), self.session_id(), collection, &op)?;
        if let Some(txn) = self.session.as_mut().and_then(|s| s.transaction.as_mut()) {
            txn.record(collection, op);
        }
        Ok(result)
    }

    fn active_transaction(&self) -> Result<&SessionId> {
        let session = self.session.as_ref().ok_or(OperationalError::NoSession)?;
        if session.transaction.is_none() {
            return Err(OperationalError::NoTransaction.into());
        }
        Ok(&session.id)
    }

    fn commit_attempt(&self, id: &SessionId, replay: bool) -> std::result::Result<(), StoreError> {
        if replay {
            self.replay(id)?;
        }
        self.store.commit_transaction(id)
    }

    /// Start over in a new store transaction and re-issue every journaled write.
    fn replay(&self, id: &SessionId) -> std::result::Result<(), StoreError> {
        match self.store.abort_transaction(id) {
            Ok(()) | Err(StoreError::NoSuchTransaction(_)) => {}
            Err(e) => warn!(session = %id, error = %e, "Failed to abort transaction before replay"),
        }
        self.store.start_transaction(id)?;
        let journal = self
            .session
            .as_ref()
            .and_then(|s| s.transaction.as_ref())
            .map(|t| t.journal.as_slice())
            .unwrap_or_default();
        for entry in journal {
            execute_write(self.store.as_ref(), Some(id), &entry.collection, &entry.op)?;
        }
        debug!(session = %id, writes = journal.len(), "Transaction replayed");
        Ok(())
    }

    /// Forget the local transaction and make sure the store has too.
    fn drop_transaction(&mut self, id: &SessionId) {
        if let Some(session) = self.session.as_mut() {
            session.transaction = None;
        }
        match self.store.abort_transaction(id) {
            Ok(()) | Err(StoreError::NoSuchTransaction(_)) => {}
            Err(e) => warn!(session = %id, error = %e, "Failed to abort transaction"),
        }
    }
}

fn execute_write(
    store: &dyn DocumentStore,
    session: Option<&SessionId>,
    collection: &str,
    op: &WriteOp,
) -> std::result::Result<WriteResult, StoreError> {
    match op {
        WriteOp::Insert(cmd) => store.insert(session, collection, cmd),
        WriteOp::Update(cmd) => store.update(session, collection, cmd),
        WriteOp::Delete(cmd) => store.delete(session, collection, cmd),
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if self.session.is_some() {
            if let Err(e) = self.end_session() {
                warn!(error = %e, "Failed to end session on drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsql_ir::{doc, Filter, UpdateSpec, Value};
    use crate::error::Error;
    use docsql_store::{FailCommand, FailMode, MemoryStore};
    use std::time::Duration;

    fn manager(store: &Arc<MemoryStore>, max_retries: u32) -> SessionManager {
        let policy = RetryPolicy {
            max_retries,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        };
        SessionManager::new(store.clone(), SessionOptions::default(), policy)
    }

    fn set_age(age: i32) -> WriteOp {
        WriteOp::Update(UpdateCommand {
            filter: Filter::all(),
            update: UpdateSpec::Set(vec![("age".to_string(), Value::Int32(age))]),
            multi: true,
        })
    }

    #[test]
    fn test_transitions() {
        let store = Arc::new(MemoryStore::new());
        let mut sessions = manager(&store, 0);
        assert_eq!(sessions.state(), SessionState::NoSession);

        sessions.start_session().unwrap();
        assert!(matches!(
            sessions.start_session(),
            Err(Error::Operational(OperationalError::SessionActive))
        ));
        sessions.start_transaction().unwrap();
        assert_eq!(sessions.state(), SessionState::TransactionActive);
        sessions.abort_transaction().unwrap();
        assert_eq!(sessions.state(), SessionState::SessionActive);
        sessions.end_session().unwrap();
        assert_eq!(sessions.state(), SessionState::NoSession);
        assert_eq!(store.stats().active_sessions(), 0);
    }

    #[test]
    fn test_journal_records_writes() {
        let store = Arc::new(MemoryStore::new());
        let mut sessions = manager(&store, 0);
        sessions.start_session().unwrap();
        sessions.start_transaction().unwrap();
        let insert = WriteOp::Insert(InsertCommand {
            documents: vec![doc! { "_id" => 1, "age" => 3 }],
        });
        sessions.write("people", insert).unwrap();
        sessions.write("pets", set_age(4)).unwrap();
        sessions.write("people", set_age(5)).unwrap();

        let txn = sessions.session().and_then(Session::transaction).unwrap();
        assert_eq!(txn.journal_len(), 3);
        assert_eq!(txn.collections(), ["people".to_string(), "pets".to_string()]);
    }

    #[test]
    fn test_replay_after_transient_commit_failure() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert(None, "people", &InsertCommand { documents: vec![doc! { "_id" => 1, "age" => 3 }] })
            .unwrap();
        let mut sessions = manager(&store, 2);
        sessions.start_session().unwrap();
        sessions.start_transaction().unwrap();
        sessions.write("people", set_age(9)).unwrap();

        store.configure_fail_point(
            FailCommand::CommitTransaction,
            FailMode::Times(2),
            StoreError::write_conflict("people", "1"),
        );
        sessions.commit_transaction().unwrap();

        assert_eq!(store.stats().commit_attempts, 3);
        assert_eq!(store.documents("people")[0].get("age"), Some(&Value::Int32(9)));
        assert_eq!(sessions.state(), SessionState::SessionActive);
    }
}
