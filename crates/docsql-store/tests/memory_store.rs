//! MemoryStore executing translated statements

use docsql_ast::compile;
use docsql_ir::{doc, Document, InsertCommand, Operation, Params, Value};
use docsql_store::{
    codes, DocumentStore, FailCommand, FailMode, MemoryStore, SessionId, SessionOptions, StoreError,
    WriteResult, UNKNOWN_TRANSACTION_COMMIT_RESULT,
};

fn read(store: &MemoryStore, session: Option<&SessionId>, sql: &str) -> Vec<Document> {
    let query = compile(sql, &Params::None).unwrap();
    let mut cursor = match &query.operation {
        Operation::Find(find) => store.find(session, &query.collection, find, 2).unwrap(),
        Operation::Aggregate(pipeline) => store.aggregate(session, &query.collection, pipeline, 2).unwrap(),
        other => panic!("not a read: {:?}", other),
    };
    let mut out = Vec::new();
    loop {
        let batch = cursor.next_batch().unwrap();
        if batch.is_empty() {
            break;
        }
        out.extend(batch);
    }
    cursor.close().unwrap();
    out
}

fn write(store: &MemoryStore, session: Option<&SessionId>, sql: &str) -> Result<WriteResult, StoreError> {
    let query = compile(sql, &Params::None).unwrap();
    match &query.operation {
        Operation::Insert(cmd) => store.insert(session, &query.collection, cmd),
        Operation::Update(cmd) => store.update(session, &query.collection, cmd),
        Operation::Delete(cmd) => store.delete(session, &query.collection, cmd),
        other => panic!("not a write: {:?}", other),
    }
}

fn field(docs: &[Document], name: &str) -> Vec<Value> {
    docs.iter()
        .map(|d| d.get(name).cloned().unwrap_or(Value::Null))
        .collect()
}

fn users() -> MemoryStore {
    let store = MemoryStore::new();
    let docs = vec![
        doc! { "_id" => "u1", "name" => "alice", "age" => 30, "email" => "a@x.io" },
        doc! { "_id" => "u2", "name" => "bob", "age" => 25, "email" => Value::Null },
        doc! { "_id" => "u3", "name" => "carol", "age" => 30 },
        doc! { "_id" => "u4", "name" => "dave", "age" => 41, "email" => "d@x.io" },
    ];
    store
        .insert(None, "users", &InsertCommand { documents: docs })
        .unwrap();
    store
}

#[test]
fn test_find_with_filter_sort_and_limit() {
    let store = users();
    let rows = read(&store, None, "SELECT name, age FROM users WHERE age > 25 ORDER BY age DESC LIMIT 2");
    assert_eq!(field(&rows, "name"), vec![Value::from("dave"), Value::from("alice")]);
}

#[test]
fn test_group_by_having() {
    let store = users();
    let rows = read(
        &store,
        None,
        "SELECT age, COUNT(id) AS cnt FROM users GROUP BY age HAVING COUNT(id) > 1",
    );
    assert_eq!(field(&rows, "age"), vec![Value::Int32(30)]);
    assert_eq!(field(&rows, "cnt"), vec![Value::Int32(2)]);
}

#[test]
fn test_count_over_empty_collection() {
    let store = MemoryStore::new();
    let rows = read(&store, None, "SELECT COUNT(*) FROM users");
    assert_eq!(field(&rows, "count_star"), vec![Value::Int32(0)]);
}

#[test]
fn test_null_and_pattern_predicates() {
    let store = users();

    let rows = read(&store, None, "SELECT name FROM users WHERE email IS NULL");
    assert_eq!(field(&rows, "name"), vec![Value::from("bob")]);

    let rows = read(&store, None, "SELECT name FROM users WHERE email IS NOT NULL ORDER BY name");
    assert_eq!(field(&rows, "name"), vec![Value::from("alice"), Value::from("dave")]);

    let rows = read(&store, None, "SELECT name FROM users WHERE name LIKE '_a%' ORDER BY name");
    assert_eq!(field(&rows, "name"), vec![Value::from("carol"), Value::from("dave")]);

    let rows = read(&store, None, "SELECT name FROM users WHERE age NOT IN (30, 41)");
    assert_eq!(field(&rows, "name"), vec![Value::from("bob")]);
}

#[test]
fn test_like_wildcards_match_newlines() {
    let store = MemoryStore::new();
    let docs = vec![
        doc! { "_id" => 1, "tag" => "two-lines", "note" => "first line\nsecond line" },
        doc! { "_id" => 2, "tag" => "split", "note" => "a\nb" },
        doc! { "_id" => 3, "tag" => "single", "note" => "single" },
    ];
    store.insert(None, "notes", &InsertCommand { documents: docs }).unwrap();

    let rows = read(&store, None, "SELECT tag FROM notes WHERE note LIKE 'first%line'");
    assert_eq!(field(&rows, "tag"), vec![Value::from("two-lines")]);
    let rows = read(&store, None, "SELECT tag FROM notes WHERE note LIKE 'a_b'");
    assert_eq!(field(&rows, "tag"), vec![Value::from("split")]);
}

#[test]
fn test_computed_columns() {
    let store = users();
    let rows = read(
        &store,
        None,
        "SELECT UPPER(name) AS shout, age * 2 AS twice FROM users WHERE id = 'u2'",
    );
    assert_eq!(field(&rows, "shout"), vec![Value::from("BOB")]);
    assert_eq!(field(&rows, "twice"), vec![Value::Int32(50)]);
}

#[test]
fn test_update_pipeline_and_delete() {
    let store = users();
    let result = write(&store, None, "UPDATE users SET age = age + 1 WHERE age >= 30").unwrap();
    assert_eq!((result.matched, result.modified), (3, 3));
    let rows = read(&store, None, "SELECT age FROM users ORDER BY age");
    assert_eq!(
        field(&rows, "age"),
        vec![Value::Int32(25), Value::Int32(31), Value::Int32(31), Value::Int32(42)]
    );

    let result = write(&store, None, "DELETE FROM users WHERE age > 30").unwrap();
    assert_eq!(result.matched, 3);
    assert_eq!(store.documents("users").len(), 1);
}

#[test]
fn test_insert_generates_missing_id_and_rejects_duplicates() {
    let store = users();
    let result = write(&store, None, "INSERT INTO users (name) VALUES ('erin')").unwrap();
    assert_eq!(result.inserted_ids.len(), 1);
    let last = store.documents("users").pop().unwrap();
    assert_eq!(last.keys().next().map(String::as_str), Some("_id"));

    let err = write(&store, None, "INSERT INTO users (id, name) VALUES ('u1', 'again')").unwrap_err();
    assert_eq!(err.code(), codes::DUPLICATE_KEY);
}

#[test]
fn test_transaction_isolation_and_commit() {
    let store = users();
    let session = store.start_session(SessionOptions::default()).unwrap();
    store.start_transaction(&session).unwrap();

    write(&store, Some(&session), "UPDATE users SET name = 'alicia' WHERE id = 'u1'").unwrap();
    let inside = read(&store, Some(&session), "SELECT name FROM users WHERE id = 'u1'");
    let outside = read(&store, None, "SELECT name FROM users WHERE id = 'u1'");
    assert_eq!(field(&inside, "name"), vec![Value::from("alicia")]);
    assert_eq!(field(&outside, "name"), vec![Value::from("alice")]);

    store.commit_transaction(&session).unwrap();
    let after = read(&store, None, "SELECT name FROM users WHERE id = 'u1'");
    assert_eq!(field(&after, "name"), vec![Value::from("alicia")]);

    let stats = store.stats();
    assert_eq!((stats.commits, stats.commit_attempts), (1, 1));
}

#[test]
fn test_abort_discards_writes() {
    let store = users();
    let session = store.start_session(SessionOptions::default()).unwrap();
    store.start_transaction(&session).unwrap();
    write(&store, Some(&session), "DELETE FROM users").unwrap();
    store.abort_transaction(&session).unwrap();

    assert_eq!(store.documents("users").len(), 4);
    let err = store.abort_transaction(&session).unwrap_err();
    assert!(matches!(err, StoreError::NoSuchTransaction(_)));
}

#[test]
fn test_concurrent_transactions_conflict() {
    let store = users();
    let first = store.start_session(SessionOptions::default()).unwrap();
    let second = store.start_session(SessionOptions::default()).unwrap();
    store.start_transaction(&first).unwrap();
    store.start_transaction(&second).unwrap();

    write(&store, Some(&first), "UPDATE users SET age = 1 WHERE id = 'u1'").unwrap();
    let err = write(&store, Some(&second), "UPDATE users SET age = 2 WHERE id = 'u1'").unwrap_err();
    assert!(err.is_transient());
    assert_eq!(err.code(), codes::WRITE_CONFLICT);

    // The losing transaction is gone; the winner still commits.
    let err = store.commit_transaction(&second).unwrap_err();
    assert!(matches!(err, StoreError::NoSuchTransaction(_)));
    store.commit_transaction(&first).unwrap();
    assert_eq!(store.documents("users")[0].get("age"), Some(&Value::Int32(1)));
}

#[test]
fn test_writes_after_error_abort_do_not_autocommit() {
    let store = users();
    let first = store.start_session(SessionOptions::default()).unwrap();
    let second = store.start_session(SessionOptions::default()).unwrap();
    store.start_transaction(&first).unwrap();
    store.start_transaction(&second).unwrap();

    write(&store, Some(&first), "UPDATE users SET age = 1 WHERE id = 'u1'").unwrap();
    write(&store, Some(&second), "UPDATE users SET age = 2 WHERE id = 'u1'").unwrap_err();

    let err = write(&store, Some(&second), "UPDATE users SET age = 2 WHERE id = 'u2'").unwrap_err();
    assert!(err.is_transient());
    assert_eq!(err.code(), codes::NO_SUCH_TRANSACTION);
    assert_eq!(store.documents("users")[1].get("age"), Some(&Value::Int32(25)));

    // Aborting acknowledges the failure; the session autocommits again afterwards.
    store.abort_transaction(&second).unwrap();
    assert!(matches!(
        store.abort_transaction(&second),
        Err(StoreError::NoSuchTransaction(_))
    ));
    write(&store, Some(&second), "UPDATE users SET age = 2 WHERE id = 'u2'").unwrap();
    assert_eq!(store.documents("users")[1].get("age"), Some(&Value::Int32(2)));
}

#[test]
fn test_commit_detects_outside_write() {
    let store = users();
    let session = store.start_session(SessionOptions::default()).unwrap();
    store.start_transaction(&session).unwrap();
    write(&store, Some(&session), "UPDATE users SET age = 1 WHERE id = 'u2'").unwrap();
    write(&store, None, "UPDATE users SET age = 99 WHERE id = 'u2'").unwrap();

    let err = store.commit_transaction(&session).unwrap_err();
    assert!(err.is_transient());
    assert_eq!(store.documents("users")[1].get("age"), Some(&Value::Int32(99)));
    assert_eq!(store.stats().aborts, 1);
}

#[test]
fn test_commit_fail_points() {
    let store = users();
    let session = store.start_session(SessionOptions::default()).unwrap();

    // Unknown commit result leaves the transaction open for another attempt.
    store.start_transaction(&session).unwrap();
    write(&store, Some(&session), "UPDATE users SET age = 5 WHERE id = 'u3'").unwrap();
    store.configure_fail_point(
        FailCommand::CommitTransaction,
        FailMode::Times(1),
        StoreError::command(91, "primary stepped down").with_label(UNKNOWN_TRANSACTION_COMMIT_RESULT),
    );
    let err = store.commit_transaction(&session).unwrap_err();
    assert!(err.is_unknown_commit_result());
    store.commit_transaction(&session).unwrap();
    assert_eq!(store.documents("users")[2].get("age"), Some(&Value::Int32(5)));

    // A transient commit error aborts it.
    store.start_transaction(&session).unwrap();
    write(&store, Some(&session), "UPDATE users SET age = 6 WHERE id = 'u3'").unwrap();
    store.configure_fail_point(
        FailCommand::CommitTransaction,
        FailMode::AlwaysOn,
        StoreError::write_conflict("users", "u3"),
    );
    assert!(store.commit_transaction(&session).unwrap_err().is_transient());
    store.clear_fail_points();
    assert!(matches!(
        store.commit_transaction(&session),
        Err(StoreError::NoSuchTransaction(_))
    ));
    assert_eq!(store.documents("users")[2].get("age"), Some(&Value::Int32(5)));
}

#[test]
fn test_timeout_leaves_transaction_open() {
    let store = users();
    let session = store.start_session(SessionOptions::default()).unwrap();
    store.start_transaction(&session).unwrap();
    store.configure_fail_point(FailCommand::Update, FailMode::Times(1), StoreError::Timeout);

    let err = write(&store, Some(&session), "UPDATE users SET age = 7").unwrap_err();
    assert!(err.is_timeout());
    write(&store, Some(&session), "UPDATE users SET age = 7").unwrap();
    store.commit_transaction(&session).unwrap();
}

#[test]
fn test_sessions_and_cursors_are_counted() {
    let store = users();
    let session = store.start_session(SessionOptions { causal_consistency: true }).unwrap();
    store.start_transaction(&session).unwrap();

    let find = compile("SELECT * FROM users", &Params::None).unwrap();
    let mut cursor = store
        .find(Some(&session), "users", find.find().unwrap(), 3)
        .unwrap();
    assert_eq!(cursor.next_batch().unwrap().len(), 3);
    drop(cursor);

    store.end_session(&session).unwrap();
    let stats = store.stats();
    assert_eq!(stats.open_cursors(), 0);
    assert_eq!(stats.active_sessions(), 0);
    assert_eq!(stats.aborts, 1);

    let err = store.start_transaction(&session).unwrap_err();
    assert_eq!(err.code(), codes::NO_SUCH_SESSION);
}
