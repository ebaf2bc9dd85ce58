//! Opens a brand-new engine file, creates a table and an index on it,
//! and inserts/looks up a row through both paths — the scenario a
//! fresh database must support before anything else in this crate
//! matters.

use minisql_engine::concurrency::IsolationLevel;
use minisql_engine::config::EngineConfig;
use minisql_engine::storage::{Column, DataType, Field, Row, Schema};
use minisql_engine::Engine;

#[test]
fn opening_a_fresh_engine_creates_a_table_and_an_index() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(dir.path().join("db"), true, EngineConfig::default()).unwrap();

    let schema = Schema::new(vec![
        Column::new("student_id", DataType::Int32, 0, 0).not_null().with_unique(),
        Column::new("name", DataType::FixedChar, 64, 1),
    ]);
    engine.create_table("students", schema.clone()).unwrap();
    engine.create_index("students", "idx_student_id", vec![0]).unwrap();

    let mut txn = engine.begin_transaction(IsolationLevel::ReadCommitted).unwrap();
    let row = Row::new(vec![Field::Int32(7), Field::Char("alice".into())]);
    let rid = engine.insert_row(&mut txn, "students", row.clone()).unwrap();

    let key = row.key_bytes(&[0], &schema).unwrap();
    assert!(engine.index_insert("students", "idx_student_id", &key, rid).unwrap());
    engine.commit_transaction(&mut txn).unwrap();

    let mut read_txn = engine.begin_transaction(IsolationLevel::ReadCommitted).unwrap();
    assert_eq!(engine.get_row(&mut read_txn, "students", rid).unwrap(), row);
    assert_eq!(
        engine.index_get("students", "idx_student_id", &key).unwrap(),
        Some(rid)
    );
    engine.commit_transaction(&mut read_txn).unwrap();
}

#[test]
fn reopening_an_existing_engine_keeps_its_tables_and_indexes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");

    let schema = Schema::new(vec![Column::new("id", DataType::Int32, 0, 0).not_null().with_unique()]);
    let rid;
    {
        let engine = Engine::open(&path, true, EngineConfig::default()).unwrap();
        engine.create_table("widgets", schema.clone()).unwrap();
        engine.create_index("widgets", "idx_id", vec![0]).unwrap();

        let mut txn = engine.begin_transaction(IsolationLevel::ReadCommitted).unwrap();
        let row = Row::new(vec![Field::Int32(42)]);
        rid = engine.insert_row(&mut txn, "widgets", row).unwrap();
        engine.commit_transaction(&mut txn).unwrap();
        engine.shutdown().unwrap();
    }

    let engine = Engine::open(&path, false, EngineConfig::default()).unwrap();
    let mut txn = engine.begin_transaction(IsolationLevel::ReadCommitted).unwrap();
    let row = engine.get_row(&mut txn, "widgets", rid).unwrap();
    assert_eq!(row, Row::new(vec![Field::Int32(42)]));
    engine.commit_transaction(&mut txn).unwrap();
}
