//! End-to-end SQL → document command translation

use docsql_ast::{compile, CompileError, TranslationError};
use docsql_ir::{IndexMap, Operation, Params, UpdateSpec, Value};
use serde_json::json;

fn mql(sql: &str) -> serde_json::Value {
    compile(sql, &Params::None).unwrap().to_mql()
}

fn translation_error(sql: &str, params: &Params) -> TranslationError {
    match compile(sql, params) {
        Err(CompileError::Translation(err)) => err,
        other => panic!("expected a translation error, got {:?}", other),
    }
}

fn keys(value: &serde_json::Value) -> Vec<String> {
    value.as_object().unwrap().keys().cloned().collect()
}

#[test]
fn test_simple_select_runs_as_find() {
    let query = compile(
        "SELECT name, age FROM users WHERE age > 25 ORDER BY age LIMIT 10",
        &Params::None,
    )
    .unwrap();

    assert_eq!(query.column_names(), vec!["name", "age"]);
    assert!(query.find().is_some());
    let cmd = query.to_mql();
    assert_eq!(cmd["filter"], json!({"age": {"$gt": 25}}));
    assert_eq!(cmd["sort"], json!({"age": 1}));
    assert_eq!(cmd["limit"], json!(10));
    assert_eq!(keys(&cmd["projection"]), vec!["name", "age"]);
}

#[test]
fn test_group_by_having() {
    let cmd = mql("SELECT age, COUNT(id) AS cnt FROM users GROUP BY age HAVING COUNT(id) > 1");
    assert_eq!(
        cmd["pipeline"],
        json!([
            {"$group": {"_id": "$age", "cnt": {"$sum": 1}}},
            {"$match": {"cnt": {"$gt": 1}}},
            {"$project": {"age": "$_id", "cnt": 1}},
        ])
    );
}

#[test]
fn test_grouped_stage_order() {
    let query = compile(
        "SELECT dept, AVG(salary) AS pay FROM staff WHERE active = TRUE \
         GROUP BY dept HAVING AVG(salary) > 100 ORDER BY pay DESC LIMIT 5 OFFSET 2",
        &Params::None,
    )
    .unwrap();
    let names = query.pipeline().unwrap().stage_names();
    assert_eq!(
        names,
        vec!["$match", "$group", "$match", "$sort", "$skip", "$limit", "$project"]
    );
    assert_eq!(query.to_mql()["pipeline"][3], json!({"$sort": {"pay": -1}}));
}

#[test]
fn test_synthesized_aggregate_names_are_stable() {
    let sql = "SELECT city, COUNT(*), SUM(amount) FROM orders GROUP BY city";
    let first = compile(sql, &Params::None).unwrap();
    let second = compile(sql, &Params::None).unwrap();

    assert_eq!(first.column_names(), vec!["city", "count_star", "sum_amount"]);
    assert_eq!(first.fingerprint(), second.fingerprint());
}

#[test]
fn test_compound_group_key() {
    let cmd = mql("SELECT city, state, MAX(age) AS oldest FROM users GROUP BY city, state");
    assert_eq!(
        cmd["pipeline"][0],
        json!({"$group": {
            "_id": {"city": "$city", "state": "$state"},
            "oldest": {"$max": "$age"},
        }})
    );
    assert_eq!(
        cmd["pipeline"][1],
        json!({"$project": {"city": "$_id.city", "state": "$_id.state", "oldest": 1}})
    );
}

#[test]
fn test_count_column_skips_nulls() {
    let cmd = mql("SELECT COUNT(email) AS n FROM users");
    assert_eq!(
        cmd["pipeline"][0]["$group"],
        json!({
            "_id": null,
            "n": {"$sum": {"$cond": [{"$gt": ["$email", null]}, 1, 0]}},
        })
    );
}

#[test]
fn test_distinct_groups_on_items() {
    let cmd = mql("SELECT DISTINCT city FROM users");
    assert_eq!(
        cmd["pipeline"],
        json!([
            {"$group": {"_id": "$city"}},
            {"$project": {"city": "$_id"}},
        ])
    );
}

#[test]
fn test_ungrouped_column_is_rejected() {
    let err = translation_error("SELECT name, COUNT(*) FROM users GROUP BY age", &Params::None);
    assert_eq!(err, TranslationError::NotGrouped("name".to_string()));
}

#[test]
fn test_and_terms_share_one_filter_document() {
    let cmd = mql("SELECT * FROM users WHERE age >= 18 AND age < 65 AND city = 'Oslo'");
    assert_eq!(cmd["filter"], json!({"age": {"$gte": 18, "$lt": 65}, "city": "Oslo"}));
    assert_eq!(keys(&cmd["filter"]), vec!["age", "city"]);
    assert!(cmd.get("projection").is_none());
}

#[test]
fn test_or_and_not() {
    let cmd = mql("SELECT * FROM users WHERE NOT (age < 18 OR status = 'banned')");
    assert_eq!(
        cmd["filter"],
        json!({"$nor": [{"$or": [{"age": {"$lt": 18}}, {"status": "banned"}]}]})
    );
}

#[test]
fn test_flipped_comparison() {
    let cmd = mql("SELECT * FROM users WHERE 30 <= age");
    assert_eq!(cmd["filter"], json!({"age": {"$gte": 30}}));
}

#[test]
fn test_field_to_field_comparison_uses_expr() {
    let cmd = mql("SELECT * FROM accounts WHERE balance > credit_limit");
    assert_eq!(
        cmd["filter"],
        json!({"$expr": {"$gt": ["$balance", "$credit_limit"]}})
    );
}

#[test]
fn test_like_in_between() {
    let cmd = mql(
        "SELECT * FROM users WHERE name LIKE 'Jo%n_' AND role IN ('admin', 'ops') AND age BETWEEN 20 AND 30",
    );
    assert_eq!(
        cmd["filter"],
        json!({
            "name": {"$regex": "(?s)^Jo.*n.$"},
            "role": {"$in": ["admin", "ops"]},
            "age": {"$gte": 20, "$lte": 30},
        })
    );

    let cmd = mql("SELECT * FROM users WHERE name NOT LIKE 'a.b%' AND role NOT IN ('x')");
    assert_eq!(
        cmd["filter"],
        json!({
            "name": {"$not": {"$regex": "(?s)^a\\.b.*$"}},
            "role": {"$nin": ["x"]},
        })
    );
}

#[test]
fn test_is_null() {
    assert_eq!(mql("SELECT * FROM t WHERE a IS NULL")["filter"], json!({"a": null}));
    assert_eq!(
        mql("SELECT * FROM t WHERE a IS NOT NULL")["filter"],
        json!({"a": {"$exists": true, "$ne": null}})
    );
}

#[test]
fn test_nested_paths_and_qualifiers() {
    let query = compile(
        "SELECT u.address.city AS city, items[0].sku FROM users u WHERE u.address.zip = '0150'",
        &Params::None,
    )
    .unwrap();
    let cmd = query.to_mql();
    assert_eq!(cmd["filter"], json!({"address.zip": "0150"}));
    assert_eq!(keys(&cmd["projection"]), vec!["address.city", "items.0.sku"]);
    assert_eq!(query.columns[0].name, "city");
    assert_eq!(query.columns[0].source, "address.city");
}

#[test]
fn test_id_maps_to_primary_key() {
    let query = compile("SELECT id, name FROM users WHERE id = 'u1'", &Params::None).unwrap();
    let cmd = query.to_mql();
    assert_eq!(cmd["filter"], json!({"_id": "u1"}));
    assert_eq!(query.columns[0].name, "id");
    assert_eq!(query.columns[0].source, "_id");
}

#[test]
fn test_ambiguous_primary_key() {
    let err = translation_error("SELECT id FROM users WHERE _id = 'u1'", &Params::None);
    assert_eq!(err, TranslationError::AmbiguousPrimaryKey);
}

#[test]
fn test_computed_columns_use_project() {
    let cmd = mql("SELECT name, UPPER(city) AS town, age * 2 FROM users WHERE age > 1 LIMIT 3");
    assert_eq!(
        cmd["pipeline"],
        json!([
            {"$match": {"age": {"$gt": 1}}},
            {"$limit": 3},
            {"$project": {
                "name": 1,
                "town": {"$toUpper": "$city"},
                "expr_2": {"$multiply": ["$age", 2]},
            }},
        ])
    );
}

#[test]
fn test_substring_positions() {
    let cmd = mql("SELECT SUBSTR(name, 2, 3) AS part FROM users");
    assert_eq!(
        cmd["pipeline"][0]["$project"]["part"],
        json!({"$substrCP": ["$name", 1, 3]})
    );
}

#[test]
fn test_positional_parameters() {
    let params = Params::from(vec![Value::from(21), Value::from("Oslo")]);
    let query = compile("SELECT * FROM users WHERE age > ? AND city = ?", &params).unwrap();
    assert_eq!(query.to_mql()["filter"], json!({"age": {"$gt": 21}, "city": "Oslo"}));

    let err = translation_error("SELECT * FROM users WHERE age > ?", &Params::None);
    assert_eq!(err, TranslationError::ParameterCount { expected: 1, actual: 0 });
}

#[test]
fn test_named_parameters() {
    let mut named = IndexMap::new();
    named.insert("min".to_string(), Value::from(40));
    let params = Params::Named(named);
    let query = compile("SELECT * FROM users WHERE age >= :min", &params).unwrap();
    assert_eq!(query.to_mql()["filter"], json!({"age": {"$gte": 40}}));

    let err = translation_error("SELECT * FROM users WHERE age >= :max", &params);
    assert_eq!(err, TranslationError::MissingParameter(":max".to_string()));
}

#[test]
fn test_unsupported_constructs() {
    for sql in [
        "SELECT * FROM a JOIN b ON a.id = b.a_id",
        "SELECT * FROM (SELECT * FROM a) x",
        "SELECT * FROM a WHERE x IN (SELECT y FROM b)",
        "SELECT * FROM a WHERE EXISTS (SELECT 1 FROM b)",
        "SELECT ROW_NUMBER() OVER (ORDER BY x) FROM a",
    ] {
        let err = translation_error(sql, &Params::None);
        assert!(
            matches!(err, TranslationError::Unsupported { .. }),
            "{}: {:?}",
            sql,
            err
        );
    }
}

#[test]
fn test_unknown_function() {
    let err = translation_error("SELECT frobnicate(a) FROM t", &Params::None);
    assert!(matches!(err, TranslationError::Function(_)));
}

#[test]
fn test_syntax_errors_surface_from_compile() {
    match compile("SELECT FROM", &Params::None) {
        Err(CompileError::Syntax(err)) => assert_eq!(err.position.offset, 7),
        other => panic!("expected a syntax error, got {:?}", other),
    }
}

#[test]
fn test_insert_values() {
    let query = compile(
        "INSERT INTO users (id, name, address.city) VALUES ('u1', 'Ann', 'Oslo'), ('u2', 'Bo', NULL)",
        &Params::None,
    )
    .unwrap();
    assert!(query.is_write());
    assert_eq!(
        query.to_mql(),
        json!({
            "insert": "users",
            "documents": [
                {"_id": "u1", "name": "Ann", "address": {"city": "Oslo"}},
                {"_id": "u2", "name": "Bo", "address": {"city": null}},
            ],
        })
    );
}

#[test]
fn test_insert_without_columns() {
    let cmd = mql("INSERT INTO t VALUES (1, 'x')");
    assert_eq!(cmd["documents"], json!([{"col0": 1, "col1": "x"}]));
}

#[test]
fn test_insert_documents() {
    let cmd = mql("INSERT INTO t << {'id': 7, 'tags': ['a', 'b']}, {'n': 1.5} >>");
    assert_eq!(
        cmd["documents"],
        json!([{"_id": 7, "tags": ["a", "b"]}, {"n": 1.5}])
    );
}

#[test]
fn test_insert_column_count_mismatch() {
    let err = translation_error("INSERT INTO t (a, b) VALUES (1)", &Params::None);
    assert!(matches!(err, TranslationError::InvalidValue(_)));
}

#[test]
fn test_update_with_constants() {
    let query = compile("UPDATE users SET age = 31, city = 'Bergen' WHERE id = 'u1'", &Params::None).unwrap();
    match &query.operation {
        Operation::Update(update) => {
            assert!(update.multi);
            assert_eq!(
                update.update,
                UpdateSpec::Set(vec![
                    ("age".to_string(), Value::Int32(31)),
                    ("city".to_string(), Value::from("Bergen")),
                ])
            );
        }
        other => panic!("expected an update, got {:?}", other),
    }
    assert_eq!(query.to_mql()["filter"], json!({"_id": "u1"}));
}

#[test]
fn test_update_with_expression() {
    let cmd = mql("UPDATE accounts SET balance = balance - 10 WHERE balance >= 10");
    assert_eq!(
        cmd["update"],
        json!([{"$set": {"balance": {"$subtract": ["$balance", 10]}}}])
    );
}

#[test]
fn test_update_primary_key_rejected() {
    let err = translation_error("UPDATE users SET id = 'x'", &Params::None);
    assert!(matches!(err, TranslationError::InvalidValue(_)));
}

#[test]
fn test_delete() {
    assert_eq!(
        mql("DELETE FROM users WHERE age < 18"),
        json!({"delete": "users", "filter": {"age": {"$lt": 18}}, "multi": true})
    );
    assert_eq!(mql("DELETE FROM users")["filter"], json!({}));
}

#[test]
fn test_date_literal_folds_to_date() {
    let query = compile("SELECT * FROM events WHERE at >= DATE('2024-03-01')", &Params::None).unwrap();
    assert_eq!(
        query.to_mql()["filter"],
        json!({"at": {"$gte": {"$date": "2024-03-01T00:00:00.000Z"}}})
    );
}
