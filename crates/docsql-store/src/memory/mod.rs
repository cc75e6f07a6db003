//! In-process document store
//!
//! All collections live behind one mutex. A transaction works on a snapshot
//! of the collections taken when it starts. Documents it writes are locked
//! against other transactions, and at commit each written document's version
//! must still be the one the snapshot saw.

mod compare;
mod cursor;
mod eval;
mod fault;
mod matcher;
mod pipeline;
mod update;

pub use fault::{FailCommand, FailMode};

use docsql_ir::{DeleteCommand, Document, FindQuery, IndexMap, InsertCommand, Pipeline, UpdateCommand, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::error::{Result, StoreError, TRANSIENT_TRANSACTION_ERROR};
use crate::{DocumentStore, SessionId, SessionOptions, StoreCursor, WriteResult};
use compare::identity_key;
use cursor::MemoryCursor;
use fault::FailPoints;
use matcher::matches;
use update::apply_update;

/// Documents keyed by the identity of their `_id`, in insertion order.
type Collection = IndexMap<String, Versioned>;

#[derive(Debug, Clone)]
struct Versioned {
    doc: Document,
    version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LockKey {
    collection: String,
    id: String,
}

impl LockKey {
    fn new(collection: &str, id: &str) -> Self {
        Self {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }
}

struct Transaction {
    snapshot: HashMap<String, Collection>,
    /// Written documents with the committed version they were based on
    /// (`None` when the document did not exist).
    write_set: IndexMap<LockKey, Option<u64>>,
}

#[derive(Default)]
struct SessionState {
    txn: Option<Transaction>,
    /// Set when an error aborted the transaction behind the client's back.
    /// Statements fail until the client aborts or starts a new transaction.
    aborted: bool,
}

/// Pending change to one document: the new body, or `None` to delete it.
type Change = (String, Option<Document>);

#[derive(Default)]
struct StoreState {
    collections: HashMap<String, Collection>,
    sessions: HashMap<SessionId, SessionState>,
    locks: HashMap<LockKey, SessionId>,
    next_version: u64,
}

impl StoreState {
    fn session(&self, id: &SessionId) -> Result<&SessionState> {
        self.sessions
            .get(id)
            .ok_or_else(|| StoreError::NoSuchSession(id.to_string()))
    }

    fn in_transaction(&self, session: Option<&SessionId>) -> Result<bool> {
        match session {
            Some(id) => {
                let state = self.session(id)?;
                if state.aborted {
                    return Err(aborted_transaction(id));
                }
                Ok(state.txn.is_some())
            }
            None => Ok(false),
        }
    }

    /// The collection as `session` sees it: its transaction snapshot, or the
    /// committed data.
    fn working(&self, session: Option<&SessionId>, collection: &str) -> Result<Option<&Collection>> {
        if let Some(id) = session {
            let state = self.session(id)?;
            if state.aborted {
                return Err(aborted_transaction(id));
            }
            if let Some(txn) = &state.txn {
                return Ok(txn.snapshot.get(collection));
            }
        }
        Ok(self.collections.get(collection))
    }

    fn documents(&self, session: Option<&SessionId>, collection: &str) -> Result<Vec<Document>> {
        Ok(self
            .working(session, collection)?
            .map(|c| c.values().map(|v| v.doc.clone()).collect())
            .unwrap_or_default())
    }

    fn bump_version(&mut self) -> u64 {
        self.next_version += 1;
        self.next_version
    }

    /// Drop the session's transaction and its locks. Returns whether there was one.
    fn discard_transaction(&mut self, session: &SessionId) -> bool {
        let had = self
            .sessions
            .get_mut(session)
            .and_then(|s| s.txn.take())
            .is_some();
        self.locks.retain(|_, holder| holder != session);
        had
    }

    /// Drop the transaction because of an error, remembering that the client
    /// still thinks it is open.
    fn fail_transaction(&mut self, session: &SessionId) -> bool {
        let had = self.discard_transaction(session);
        if had {
            if let Some(s) = self.sessions.get_mut(session) {
                s.aborted = true;
            }
        }
        had
    }

    fn apply_changes(&mut self, session: Option<&SessionId>, collection: &str, changes: Vec<Change>) -> Result<()> {
        let session = match session {
            Some(id) if self.in_transaction(Some(id))? => id,
            _ => {
                for (id, doc) in changes {
                    match doc {
                        Some(doc) => {
                            let version = self.bump_version();
                            self.collections
                                .entry(collection.to_string())
                                .or_default()
                                .insert(id, Versioned { doc, version });
                        }
                        None => {
                            if let Some(c) = self.collections.get_mut(collection) {
                                c.shift_remove(&id);
                            }
                        }
                    }
                }
                return Ok(());
            }
        };

        // Check every document before touching any of them.
        let mut bases = Vec::with_capacity(changes.len());
        {
            let txn = match &self.session(session)?.txn {
                Some(txn) => txn,
                None => return Err(StoreError::NoSuchTransaction(session.to_string())),
            };
            for (id, _) in &changes {
                let key = LockKey::new(collection, id);
                if self.locks.get(&key).is_some_and(|holder| holder != session) {
                    return Err(StoreError::write_conflict(collection, id.as_str()));
                }
                let base = match txn.write_set.get(&key) {
                    Some(base) => *base,
                    None => txn
                        .snapshot
                        .get(collection)
                        .and_then(|c| c.get(id))
                        .map(|v| v.version),
                };
                let committed = self
                    .collections
                    .get(collection)
                    .and_then(|c| c.get(id))
                    .map(|v| v.version);
                if committed != base {
                    return Err(StoreError::write_conflict(collection, id.as_str()));
                }
                bases.push((key, base));
            }
        }

        let txn = match self.sessions.get_mut(session).and_then(|s| s.txn.as_mut()) {
            Some(txn) => txn,
            None => return Err(StoreError::NoSuchTransaction(session.to_string())),
        };
        for ((id, doc), (key, base)) in changes.into_iter().zip(bases) {
            self.locks.insert(key.clone(), session.clone());
            txn.write_set.entry(key).or_insert(base);
            let working = txn.snapshot.entry(collection.to_string()).or_default();
            match doc {
                Some(doc) => {
                    let version = base.unwrap_or(0);
                    working.insert(id, Versioned { doc, version });
                }
                None => {
                    working.shift_remove(&id);
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub(crate) struct StoreStats {
    sessions_started: AtomicU64,
    sessions_ended: AtomicU64,
    transactions_started: AtomicU64,
    commit_attempts: AtomicU64,
    commits: AtomicU64,
    aborts: AtomicU64,
    pub(crate) cursors_opened: AtomicU64,
    pub(crate) cursors_closed: AtomicU64,
}

/// Operation counters at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub sessions_started: u64,
    pub sessions_ended: u64,
    pub transactions_started: u64,
    /// Every `commit_transaction` call, successful or not
    pub commit_attempts: u64,
    pub commits: u64,
    /// Transactions discarded, explicitly or because of an error
    pub aborts: u64,
    pub cursors_opened: u64,
    pub cursors_closed: u64,
}

impl StatsSnapshot {
    pub fn open_cursors(&self) -> u64 {
        self.cursors_opened - self.cursors_closed
    }

    pub fn active_sessions(&self) -> u64 {
        self.sessions_started - self.sessions_ended
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// In-process [`DocumentStore`].
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    faults: Mutex<FailPoints>,
    stats: Arc<StoreStats>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a fail point: upcoming `command` calls fail with `error`.
    pub fn configure_fail_point(&self, command: FailCommand, mode: FailMode, error: StoreError) {
        debug!(?command, ?mode, error = %error, "Fail point configured");
        self.faults.lock().unwrap_or_else(PoisonError::into_inner).configure(command, mode, error);
    }

    pub fn clear_fail_points(&self) {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn stats(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            sessions_started: load(&self.stats.sessions_started),
            sessions_ended: load(&self.stats.sessions_ended),
            transactions_started: load(&self.stats.transactions_started),
            commit_attempts: load(&self.stats.commit_attempts),
            commits: load(&self.stats.commits),
            aborts: load(&self.stats.aborts),
            cursors_opened: load(&self.stats.cursors_opened),
            cursors_closed: load(&self.stats.cursors_closed),
        }
    }

    /// Committed documents of a collection, in insertion order.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.state().documents(None, collection).unwrap_or_default()
    }

    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state().collections.keys().cloned().collect();
        names.sort();
        names
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fail_point(&self, command: FailCommand) -> Option<StoreError> {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .trigger(command)
    }

    /// Run `op` under the state lock. A transient error inside a transaction
    /// aborts that transaction.
    fn run<T>(
        &self,
        session: Option<&SessionId>,
        command: FailCommand,
        op: impl FnOnce(&mut StoreState) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.state();
        let outcome = match self.fail_point(command) {
            Some(err) => Err(err),
            None => op(&mut *state),
        };
        match outcome {
            Ok(value) => Ok(value),
            Err(err) => {
                if let Some(id) = session {
                    if err.is_transient() && state.fail_transaction(id) {
                        bump(&self.stats.aborts);
                        debug!(session = %id, error = %err, "Transaction aborted by transient error");
                    }
                }
                Err(err)
            }
        }
    }

    fn open_cursor(&self, docs: Vec<Document>, batch_size: usize) -> Box<dyn StoreCursor> {
        Box::new(MemoryCursor::open(docs, batch_size, Arc::clone(&self.stats)))
    }
}

impl DocumentStore for MemoryStore {
    fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn start_session(&self, options: SessionOptions) -> Result<SessionId> {
        self.run(None, FailCommand::StartSession, |state| {
            let id = SessionId::generate();
            state.sessions.insert(id.clone(), SessionState::default());
            bump(&self.stats.sessions_started);
            debug!(session = %id, causal_consistency = options.causal_consistency, "Session started");
            Ok(id)
        })
    }

    fn end_session(&self, session: &SessionId) -> Result<()> {
        self.run(None, FailCommand::EndSession, |state| {
            state.session(session)?;
            if state.discard_transaction(session) {
                bump(&self.stats.aborts);
            }
            state.sessions.remove(session);
            bump(&self.stats.sessions_ended);
            debug!(session = %session, "Session ended");
            Ok(())
        })
    }

    fn start_transaction(&self, session: &SessionId) -> Result<()> {
        self.run(None, FailCommand::StartTransaction, |state| {
            if state.session(session)?.txn.is_some() {
                return Err(StoreError::TransactionInProgress(session.to_string()));
            }
            let snapshot = state.collections.clone();
            if let Some(s) = state.sessions.get_mut(session) {
                s.aborted = false;
                s.txn = Some(Transaction {
                    snapshot,
                    write_set: IndexMap::new(),
                });
            }
            bump(&self.stats.transactions_started);
            debug!(session = %session, "Transaction started");
            Ok(())
        })
    }

    fn commit_transaction(&self, session: &SessionId) -> Result<()> {
        let mut state = self.state();
        bump(&self.stats.commit_attempts);
        if state.session(session)?.txn.is_none() {
            return Err(StoreError::NoSuchTransaction(session.to_string()));
        }

        if let Some(err) = self.fail_point(FailCommand::CommitTransaction) {
            // The outcome of these is unknown to the caller, so the
            // transaction stays open for another commit attempt.
            if err.is_unknown_commit_result() || err.is_timeout() || err.is_network() {
                return Err(err);
            }
            state.fail_transaction(session);
            bump(&self.stats.aborts);
            return Err(err);
        }

        let txn = match state.sessions.get_mut(session).and_then(|s| s.txn.take()) {
            Some(txn) => txn,
            None => return Err(StoreError::NoSuchTransaction(session.to_string())),
        };

        for (key, base) in &txn.write_set {
            let committed = state
                .collections
                .get(&key.collection)
                .and_then(|c| c.get(&key.id))
                .map(|v| v.version);
            if committed != *base {
                state.fail_transaction(session);
                bump(&self.stats.aborts);
                return Err(StoreError::write_conflict(key.collection.as_str(), key.id.as_str()));
            }
        }

        let written = txn.write_set.len();
        for key in txn.write_set.keys() {
            let doc = txn
                .snapshot
                .get(&key.collection)
                .and_then(|c| c.get(&key.id))
                .map(|v| v.doc.clone());
            match doc {
                Some(doc) => {
                    let version = state.bump_version();
                    state
                        .collections
                        .entry(key.collection.clone())
                        .or_default()
                        .insert(key.id.clone(), Versioned { doc, version });
                }
                None => {
                    if let Some(c) = state.collections.get_mut(&key.collection) {
                        c.shift_remove(&key.id);
                    }
                }
            }
        }
        state.discard_transaction(session);
        bump(&self.stats.commits);
        debug!(session = %session, documents = written, "Transaction committed");
        Ok(())
    }

    fn abort_transaction(&self, session: &SessionId) -> Result<()> {
        self.run(None, FailCommand::AbortTransaction, |state| {
            let aborted = state.session(session)?.aborted;
            if !state.discard_transaction(session) {
                if aborted {
                    if let Some(s) = state.sessions.get_mut(session) {
                        s.aborted = false;
                    }
                    debug!(session = %session, "Aborted transaction acknowledged");
                    return Ok(());
                }
                return Err(StoreError::NoSuchTransaction(session.to_string()));
            }
            bump(&self.stats.aborts);
            debug!(session = %session, "Transaction aborted");
            Ok(())
        })
    }

    fn find(
        &self,
        session: Option<&SessionId>,
        collection: &str,
        query: &FindQuery,
        batch_size: usize,
    ) -> Result<Box<dyn StoreCursor>> {
        let docs = self.run(session, FailCommand::Find, |state| {
            let docs = state.documents(session, collection)?;
            pipeline::run_find(docs, query)
        })?;
        Ok(self.open_cursor(docs, batch_size))
    }

    fn aggregate(
        &self,
        session: Option<&SessionId>,
        collection: &str,
        stages: &Pipeline,
        batch_size: usize,
    ) -> Result<Box<dyn StoreCursor>> {
        let docs = self.run(session, FailCommand::Aggregate, |state| {
            let docs = state.documents(session, collection)?;
            pipeline::run_pipeline(docs, stages)
        })?;
        Ok(self.open_cursor(docs, batch_size))
    }

    fn insert(&self, session: Option<&SessionId>, collection: &str, command: &InsertCommand) -> Result<WriteResult> {
        self.run(session, FailCommand::Insert, |state| {
            let existing = state.working(session, collection)?;
            let mut seen = HashSet::new();
            let mut changes = Vec::with_capacity(command.documents.len());
            let mut inserted_ids = Vec::with_capacity(command.documents.len());
            for doc in &command.documents {
                let doc = with_id(doc);
                let id = doc.get("_id").cloned().unwrap_or(Value::Null);
                let key = identity_key(&id);
                if existing.is_some_and(|c| c.contains_key(&key)) || !seen.insert(key.clone()) {
                    return Err(StoreError::DuplicateKey {
                        collection: collection.to_string(),
                        key: id.to_string(),
                    });
                }
                inserted_ids.push(id);
                changes.push((key, Some(doc)));
            }
            let inserted = changes.len() as u64;
            state.apply_changes(session, collection, changes)?;
            Ok(WriteResult {
                matched: inserted,
                modified: inserted,
                inserted_ids,
            })
        })
    }

    fn update(&self, session: Option<&SessionId>, collection: &str, command: &UpdateCommand) -> Result<WriteResult> {
        self.run(session, FailCommand::Update, |state| {
            let mut matched = 0;
            let mut changes = Vec::new();
            if let Some(coll) = state.working(session, collection)? {
                for (id, entry) in coll {
                    if !matches(&command.filter, &entry.doc)? {
                        continue;
                    }
                    matched += 1;
                    if let Some(updated) = apply_update(&entry.doc, &command.update)? {
                        changes.push((id.clone(), Some(updated)));
                    }
                    if !command.multi {
                        break;
                    }
                }
            }
            let modified = changes.len() as u64;
            state.apply_changes(session, collection, changes)?;
            Ok(WriteResult {
                matched,
                modified,
                inserted_ids: Vec::new(),
            })
        })
    }

    fn delete(&self, session: Option<&SessionId>, collection: &str, command: &DeleteCommand) -> Result<WriteResult> {
        self.run(session, FailCommand::Delete, |state| {
            let mut changes: Vec<Change> = Vec::new();
            if let Some(coll) = state.working(session, collection)? {
                for (id, entry) in coll {
                    if matches(&command.filter, &entry.doc)? {
                        changes.push((id.clone(), None));
                        if !command.multi {
                            break;
                        }
                    }
                }
            }
            let deleted = changes.len() as u64;
            state.apply_changes(session, collection, changes)?;
            Ok(WriteResult {
                matched: deleted,
                modified: deleted,
                inserted_ids: Vec::new(),
            })
        })
    }
}

/// Error for statements under a transaction an earlier error aborted.
fn aborted_transaction(session: &SessionId) -> StoreError {
    StoreError::NoSuchTransaction(session.to_string()).with_label(TRANSIENT_TRANSACTION_ERROR)
}

/// `doc` with an `_id`, generated first in the document when missing.
fn with_id(doc: &Document) -> Document {
    if doc.contains_key("_id") {
        return doc.clone();
    }
    let mut out = Document::with_capacity(doc.len() + 1);
    out.insert("_id".to_string(), Value::String(uuid::Uuid::new_v4().to_string()));
    out.extend(doc.iter().map(|(k, v)| (k.clone(), v.clone())));
    out
}
