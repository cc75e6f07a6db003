//! Session and transaction behavior through a Connection

use docsql::{
    params, Connection, ConnectionConfig, DatabaseError, Error, OperationalError, SessionState, Value,
};
use docsql_store::{codes, FailCommand, FailMode, MemoryStore, StoreError, UNKNOWN_TRANSACTION_COMMIT_RESULT};
use std::sync::Arc;

fn connect(max_retries: u32) -> (Arc<MemoryStore>, Connection) {
    let store = Arc::new(MemoryStore::new());
    let config = ConnectionConfig {
        transaction_max_retries: max_retries,
        retry_backoff_ms: 1,
        retry_max_backoff_ms: 1,
        ..ConnectionConfig::default()
    };
    let conn = Connection::open(config, store.clone()).unwrap();
    conn.execute(
        "INSERT INTO users (id, name, age) VALUES ('u1', 'alice', 30), ('u2', 'bob', 25)",
        (),
    )
    .unwrap();
    (store, conn)
}

/// Age of `name` as committed in the store, ignoring open transactions.
fn committed_age(store: &MemoryStore, name: &str) -> Option<Value> {
    store
        .documents("users")
        .into_iter()
        .find(|d| d.get("name") == Some(&Value::from(name)))
        .and_then(|d| d.get("age").cloned())
}

fn execute_err(conn: &Connection, sql: &str) -> Error {
    match conn.execute(sql, ()) {
        Err(err) => err,
        Ok(_) => panic!("expected {} to fail", sql),
    }
}

fn conflict() -> StoreError {
    StoreError::write_conflict("users", "u1")
}

#[test]
fn test_begin_update_commit_is_visible() {
    let (store, conn) = connect(3);

    conn.begin().unwrap();
    assert_eq!(conn.state(), SessionState::TransactionActive);
    assert!(!conn.autocommit());
    conn.execute("UPDATE users SET age = 31 WHERE id = 'u1'", ()).unwrap();
    assert_eq!(committed_age(&store, "alice"), Some(Value::Int32(30)));

    conn.commit().unwrap();
    assert_eq!(committed_age(&store, "alice"), Some(Value::Int32(31)));
    assert_eq!(conn.state(), SessionState::SessionActive);
}

#[test]
fn test_begin_update_rollback_leaves_data() {
    let (store, conn) = connect(3);

    conn.begin().unwrap();
    conn.execute("UPDATE users SET age = 31 WHERE id = 'u1'", ()).unwrap();

    // The transaction sees its own write.
    let mut cursor = conn.execute("SELECT age FROM users WHERE id = 'u1'", ()).unwrap();
    let row = cursor.fetch_one().unwrap().unwrap();
    assert_eq!(row.get("age").and_then(|v| v.as_i64()), Some(31));
    drop(cursor);

    conn.rollback().unwrap();
    assert_eq!(committed_age(&store, "alice"), Some(Value::Int32(30)));
    assert_eq!(conn.state(), SessionState::SessionActive);
}

#[test]
fn test_start_transaction_without_session_fails() {
    let (store, conn) = connect(3);
    let before = store.stats();

    match conn.start_transaction() {
        Err(Error::Operational(OperationalError::NoSession)) => {}
        other => panic!("expected NoSession, got {:?}", other),
    }
    assert_eq!(conn.state(), SessionState::NoSession);
    assert_eq!(store.stats().sessions_started, before.sessions_started);
    assert_eq!(store.stats().transactions_started, before.transactions_started);
}

#[test]
fn test_commit_and_abort_without_transaction_change_nothing() {
    let (_store, conn) = connect(3);

    assert!(matches!(
        conn.commit_transaction(),
        Err(Error::Operational(OperationalError::NoSession))
    ));

    conn.start_session().unwrap();
    let session = conn.session_id();
    assert!(matches!(
        conn.commit_transaction(),
        Err(Error::Operational(OperationalError::NoTransaction))
    ));
    assert!(matches!(
        conn.abort_transaction(),
        Err(Error::Operational(OperationalError::NoTransaction))
    ));
    assert_eq!(conn.state(), SessionState::SessionActive);
    assert_eq!(conn.session_id(), session);

    // The legacy calls are no-ops instead.
    conn.commit().unwrap();
    conn.rollback().unwrap();
    assert_eq!(conn.state(), SessionState::SessionActive);
}

#[test]
fn test_overlapping_session_and_nested_begin_are_rejected() {
    let (_store, conn) = connect(3);
    conn.start_session().unwrap();
    assert!(matches!(
        conn.start_session(),
        Err(Error::Operational(OperationalError::SessionActive))
    ));

    conn.begin().unwrap();
    assert!(matches!(
        conn.begin(),
        Err(Error::Operational(OperationalError::TransactionActive))
    ));
    assert_eq!(conn.state(), SessionState::TransactionActive);
}

#[test]
fn test_end_session_aborts_open_transaction() {
    let (store, conn) = connect(3);
    conn.start_session().unwrap();
    conn.start_transaction().unwrap();
    conn.execute("DELETE FROM users", ()).unwrap();

    conn.end_session().unwrap();
    assert_eq!(conn.state(), SessionState::NoSession);
    assert_eq!(store.documents("users").len(), 2);
    assert_eq!(store.stats().active_sessions(), 0);
}

#[test]
fn test_transaction_scope_aborts_once_on_error() {
    let (store, conn) = connect(3);
    conn.start_session().unwrap();
    let aborts = store.stats().aborts;

    let result: docsql::Result<()> = conn.transaction_scope(|c| {
        c.execute("UPDATE users SET age = 99 WHERE id = 'u2'", ())?;
        c.execute("SELECT FROM", ())?;
        Ok(())
    });

    assert!(matches!(result, Err(Error::Syntax(_))));
    assert_eq!(store.stats().aborts - aborts, 1);
    assert_eq!(conn.state(), SessionState::SessionActive);
    assert_eq!(committed_age(&store, "bob"), Some(Value::Int32(25)));
}

#[test]
fn test_transaction_scope_commits_on_success() {
    let (store, conn) = connect(3);
    let total = conn
        .session_scope(|c| {
            c.transaction_scope(|c| {
                let cursor = c.execute("UPDATE users SET age = age + 1", ())?;
                Ok(cursor.rowcount())
            })
        })
        .unwrap();

    assert_eq!(total, 2);
    assert_eq!(committed_age(&store, "alice"), Some(Value::Int32(31)));
    assert_eq!(conn.state(), SessionState::NoSession);
    assert_eq!(store.stats().active_sessions(), 0);
}

#[test]
fn test_guards_tear_down_on_drop() {
    let (store, conn) = connect(3);
    {
        let _session = conn.session().unwrap();
        let _txn = conn.transaction().unwrap();
        conn.execute("UPDATE users SET age = 1", ()).unwrap();
    }
    assert_eq!(conn.state(), SessionState::NoSession);
    assert_eq!(committed_age(&store, "alice"), Some(Value::Int32(30)));

    let session = conn.session().unwrap();
    let txn = conn.transaction().unwrap();
    conn.execute("UPDATE users SET age = 2 WHERE id = 'u2'", ()).unwrap();
    txn.commit().unwrap();
    session.end().unwrap();
    assert_eq!(committed_age(&store, "bob"), Some(Value::Int32(2)));
}

#[test]
fn test_always_transient_commit_is_retried_then_fails() {
    let (store, conn) = connect(2);
    conn.start_session().unwrap();
    conn.start_transaction().unwrap();
    conn.execute("UPDATE users SET age = 40 WHERE id = 'u1'", ()).unwrap();

    store.configure_fail_point(FailCommand::CommitTransaction, FailMode::AlwaysOn, conflict());
    let before = store.stats().commit_attempts;

    match conn.commit_transaction() {
        Err(Error::Database(DatabaseError::RetriesExhausted { attempts, last })) => {
            assert_eq!(attempts, 3);
            assert!(last.is_transient());
        }
        other => panic!("expected RetriesExhausted, got {:?}", other),
    }
    assert_eq!(store.stats().commit_attempts - before, 3);
    assert_eq!(conn.state(), SessionState::SessionActive);

    store.clear_fail_points();
    assert_eq!(committed_age(&store, "alice"), Some(Value::Int32(30)));
}

#[test]
fn test_transient_commit_replays_journal() {
    let (store, conn) = connect(3);
    conn.begin().unwrap();
    conn.execute("UPDATE users SET age = 50 WHERE id = 'u1'", ()).unwrap();
    conn.execute("INSERT INTO users (name, age) VALUES (?, ?)", params!["carol", 22])
        .unwrap();

    store.configure_fail_point(FailCommand::CommitTransaction, FailMode::Times(1), conflict());
    conn.commit().unwrap();

    assert_eq!(committed_age(&store, "alice"), Some(Value::Int32(50)));
    assert_eq!(committed_age(&store, "carol"), Some(Value::Int32(22)));
    assert_eq!(store.documents("users").len(), 3);
}

#[test]
fn test_unknown_commit_result_retries_commit_only() {
    let (store, conn) = connect(3);
    conn.begin().unwrap();
    conn.execute("UPDATE users SET age = 60 WHERE id = 'u2'", ()).unwrap();

    let unknown = StoreError::command(codes::EXCEEDED_TIME_LIMIT, "commit outcome unknown")
        .with_label(UNKNOWN_TRANSACTION_COMMIT_RESULT);
    store.configure_fail_point(FailCommand::CommitTransaction, FailMode::Times(1), unknown);
    let before = store.stats();

    conn.commit().unwrap();
    let after = store.stats();
    assert_eq!(after.commit_attempts - before.commit_attempts, 2);
    assert_eq!(after.transactions_started, before.transactions_started);
    assert_eq!(committed_age(&store, "bob"), Some(Value::Int32(60)));
}

#[test]
fn test_commit_timeout_leaves_transaction_open() {
    let (store, conn) = connect(3);
    conn.begin().unwrap();
    conn.execute("UPDATE users SET age = 70 WHERE id = 'u2'", ()).unwrap();

    store.configure_fail_point(FailCommand::CommitTransaction, FailMode::Times(1), StoreError::Timeout);
    assert!(matches!(
        conn.commit(),
        Err(Error::Operational(OperationalError::Store(StoreError::Timeout)))
    ));
    assert_eq!(conn.state(), SessionState::TransactionActive);

    conn.commit().unwrap();
    assert_eq!(committed_age(&store, "bob"), Some(Value::Int32(70)));
}

#[test]
fn test_statements_after_transient_failure_stay_in_transaction() {
    let (store, winner) = connect(3);
    let config = ConnectionConfig {
        retry_backoff_ms: 1,
        retry_max_backoff_ms: 1,
        ..ConnectionConfig::default()
    };
    let loser = Connection::open(config, store.clone()).unwrap();

    winner.begin().unwrap();
    winner.execute("UPDATE users SET age = 40 WHERE id = 'u1'", ()).unwrap();

    loser.begin().unwrap();
    let err = execute_err(&loser, "UPDATE users SET age = 50 WHERE id = 'u1'");
    assert!(err.is_transient());
    assert!(loser.in_transaction());

    // The store dropped the transaction; later statements must not autocommit.
    let err = execute_err(&loser, "UPDATE users SET age = 41 WHERE id = 'u2'");
    assert!(err.is_transient());
    assert_eq!(err.store_error().map(StoreError::code), Some(codes::NO_SUCH_TRANSACTION));
    assert!(loser.execute("SELECT age FROM users", ()).is_err());
    assert_eq!(committed_age(&store, "bob"), Some(Value::Int32(25)));

    loser.rollback().unwrap();
    assert_eq!(loser.state(), SessionState::SessionActive);
    assert_eq!(committed_age(&store, "bob"), Some(Value::Int32(25)));

    winner.commit().unwrap();
    loser.begin().unwrap();
    loser.execute("UPDATE users SET age = 41 WHERE id = 'u2'", ()).unwrap();
    loser.commit().unwrap();
    assert_eq!(committed_age(&store, "alice"), Some(Value::Int32(40)));
    assert_eq!(committed_age(&store, "bob"), Some(Value::Int32(41)));
}

#[test]
fn test_abort_failures_leave_transaction_open() {
    let (store, conn) = connect(3);
    conn.begin().unwrap();
    conn.execute("UPDATE users SET age = 70 WHERE id = 'u2'", ()).unwrap();
    let aborts = store.stats().aborts;

    store.configure_fail_point(FailCommand::AbortTransaction, FailMode::Times(1), StoreError::Timeout);
    assert!(matches!(
        conn.rollback(),
        Err(Error::Operational(OperationalError::Store(StoreError::Timeout)))
    ));
    assert_eq!(conn.state(), SessionState::TransactionActive);

    store.configure_fail_point(
        FailCommand::AbortTransaction,
        FailMode::Times(1),
        StoreError::Network("connection reset".to_string()),
    );
    assert!(matches!(
        conn.abort_transaction(),
        Err(Error::Operational(OperationalError::Store(StoreError::Network(_))))
    ));
    assert_eq!(conn.state(), SessionState::TransactionActive);
    assert_eq!(store.stats().aborts, aborts);

    conn.rollback().unwrap();
    assert_eq!(conn.state(), SessionState::SessionActive);
    assert_eq!(store.stats().aborts, aborts + 1);
    assert_eq!(committed_age(&store, "bob"), Some(Value::Int32(25)));
}

#[test]
fn test_with_transaction_reruns_callback_on_transient_error() {
    let (store, conn) = connect(3);
    store.configure_fail_point(FailCommand::Update, FailMode::Times(2), conflict());

    let mut calls = 0;
    conn.session_scope(|c| {
        c.with_transaction(|c| {
            calls += 1;
            c.execute("UPDATE users SET age = age + 5 WHERE id = 'u1'", ())?;
            Ok(())
        })
    })
    .unwrap();

    assert_eq!(calls, 3);
    assert_eq!(committed_age(&store, "alice"), Some(Value::Int32(35)));
}

#[test]
fn test_with_transaction_gives_up_after_retries() {
    let (store, conn) = connect(1);
    store.configure_fail_point(FailCommand::Update, FailMode::AlwaysOn, conflict());
    conn.start_session().unwrap();

    let mut calls = 0;
    let result = conn.with_transaction(|c| {
        calls += 1;
        c.execute("UPDATE users SET age = 0", ())?;
        Ok(())
    });

    assert!(matches!(
        result,
        Err(Error::Database(DatabaseError::RetriesExhausted { attempts: 2, .. }))
    ));
    assert_eq!(calls, 2);
    assert_eq!(conn.state(), SessionState::SessionActive);
}

#[test]
fn test_with_transaction_does_not_retry_other_errors() {
    let (_store, conn) = connect(3);
    conn.start_session().unwrap();

    let mut calls = 0;
    let result: docsql::Result<()> = conn.with_transaction(|c| {
        calls += 1;
        c.execute("INSERT INTO users (id, name) VALUES ('u1', 'again')", ())?;
        Ok(())
    });

    match result {
        Err(Error::Database(DatabaseError::Store(err))) => assert_eq!(err.code(), codes::DUPLICATE_KEY),
        other => panic!("expected a duplicate key error, got {:?}", other),
    }
    assert_eq!(calls, 1);
}

#[test]
fn test_close_ends_session_and_rejects_work() {
    let (store, conn) = connect(3);
    conn.begin().unwrap();
    conn.close();

    assert!(conn.is_closed());
    assert_eq!(store.stats().active_sessions(), 0);
    assert!(matches!(
        conn.execute("SELECT * FROM users", ()),
        Err(Error::Operational(OperationalError::ConnectionClosed))
    ));
    assert!(matches!(
        conn.start_session(),
        Err(Error::Operational(OperationalError::ConnectionClosed))
    ));
}
