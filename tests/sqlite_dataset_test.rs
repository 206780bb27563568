//! Dataset behavior against a real SQLite database.
//!
//! Covers reading (types, key uniqueness, schema checks, time budget,
//! paging), editing, and synchronize round trips that must leave the
//! database exactly as the dataset describes it.

mod common;

use std::cell::Cell;
use std::collections::HashSet;
use std::rc::Rc;
use std::time::Duration;

use common::{create_temp_db_file, person_count, person_name, sqlite_with_persons};
use recordset::{
    Dataset, DatasetConfig, Error, Filter, Operator, PrimaryKey, RecordStatus, SqliteDatabase,
    Value, ValueType,
};

fn persons(db: &SqliteDatabase) -> Dataset<'_> {
    let mut persons = Dataset::new("persons", db);
    persons.set_primary_table(None, "person", None);
    persons
}

fn ids(dataset: &Dataset<'_>) -> Vec<i64> {
    dataset
        .rows()
        .filter_map(|(id, _)| dataset.field(id, "id").and_then(Value::as_i64))
        .collect()
}

// =============================================================================
// Reading
// =============================================================================

/// Every value read has the type captured for its column, or is null.
#[test]
fn test_values_match_captured_column_types() {
    let db = sqlite_with_persons();
    let mut ds = persons(&db);
    assert!(ds.open_query("SELECT * FROM person").unwrap());

    assert_eq!(
        ds.columns(),
        [
            ("id".to_string(), ValueType::Integer),
            ("name".to_string(), ValueType::Text),
            ("age".to_string(), ValueType::Integer),
            ("score".to_string(), ValueType::Real),
        ]
    );
    for (_, row) in ds.rows() {
        assert_eq!(row.field_count(), ds.column_count());
        for (index, value) in row.values().enumerate() {
            if !value.is_null() {
                assert_eq!(Some(value.value_type()), ds.column_type(index));
            }
        }
    }
}

/// Appending overlapping results never duplicates a key.
#[test]
fn test_append_skips_known_keys() {
    let db = sqlite_with_persons();
    let mut ds = persons(&db);
    ds.open_query("SELECT * FROM person WHERE id <= 3").unwrap();
    assert_eq!(ds.primary_key_columns(), ["id".to_string()]);
    assert_eq!(ds.len(), 3);

    ds.append_query("SELECT * FROM person WHERE id >= 2").unwrap();
    assert_eq!(ds.len(), 5);
    assert_eq!(ds.skipped_duplicates(), 2);

    let unique: HashSet<i64> = ids(&ds).into_iter().collect();
    assert_eq!(unique.len(), ds.len());
}

/// Rows edited in memory survive a reread of the same keys.
#[test]
fn test_append_keeps_local_edits() {
    let db = sqlite_with_persons();
    let mut ds = persons(&db);
    ds.open_query("SELECT * FROM person").unwrap();
    let bob = ds
        .find_object_record(&PrimaryKey::single("id", 2))
        .unwrap()
        .unwrap();
    ds.modify_field(bob, "name", "Robert", 4);

    ds.append().unwrap();
    assert_eq!(ds.len(), 5);
    assert_eq!(ds.field(bob, "name"), Some(&Value::from("Robert")));
}

/// An append whose columns differ closes the dataset.
#[test]
fn test_append_schema_mismatch_closes() {
    let db = sqlite_with_persons();
    let mut ds = persons(&db);
    ds.open_query("SELECT id, name FROM person").unwrap();

    let err = ds.append_query("SELECT id, age FROM person").unwrap_err();
    assert!(matches!(err, Error::SchemaMismatch { .. }));
    assert!(!ds.is_open());
    assert!(ds.is_empty());
    assert!(ds.columns().is_empty());
}

/// A zero time budget is exceeded by the first row.
#[test]
fn test_time_budget_exceeded() {
    let db = sqlite_with_persons();
    let config = DatasetConfig {
        time_budget: Some(Duration::ZERO),
        ..DatasetConfig::default()
    };
    let mut ds = Dataset::with_config("persons", &db, config);

    let err = ds.open_query("SELECT * FROM person").unwrap_err();
    match err {
        Error::TimeBudgetExceeded { dataset, budget, .. } => {
            assert_eq!(dataset, "persons");
            assert_eq!(budget, Duration::ZERO);
        }
        other => panic!("expected TimeBudgetExceeded, got {other:?}"),
    }
    assert!(!ds.is_open());
    assert!(ds.is_empty());
}

/// Isolated appends page forward and keep only rows with pending changes.
#[test]
fn test_isolated_paging() {
    let db = sqlite_with_persons();
    let config = DatasetConfig {
        isolated: true,
        ..DatasetConfig::default()
    };
    let mut ds = Dataset::with_config("persons", &db, config);
    ds.set_primary_table(None, "person", None);
    ds.set_selection("*");
    ds.set_from_tables("person");
    ds.set_order_by("id");
    ds.set_top_records(2);

    ds.open().unwrap();
    assert_eq!(ids(&ds), vec![1, 2]);
    let bob = ds.row_id(1).unwrap();
    ds.modify_field(bob, "age", 18, 1);

    ds.append().unwrap();
    assert_eq!(ids(&ds), vec![2, 3, 4]);
    assert_eq!(ds.skip_records(), 2);

    ds.append().unwrap();
    assert_eq!(ids(&ds), vec![2, 5]);
    assert_eq!(ds.field(bob, "age"), Some(&Value::Integer(18)));
}

/// `$name` parameters and dataset filters are both bound, not inlined.
#[test]
fn test_parameters_and_filters() {
    let db = sqlite_with_persons();
    let mut ds = persons(&db);
    ds.set_selection("id, name, age");
    ds.set_from_tables("person");
    ds.set_where_condition("age >= $minimum");
    ds.set_parameter("minimum", 30);
    ds.add_filter(Filter::compare("age", Operator::Smaller, 50));
    ds.set_order_by("id");

    let (sql, params) = ds.select_statement().unwrap().unwrap();
    assert_eq!(
        sql,
        "SELECT id, name, age\n  FROM person\n WHERE (age >= ?)\n   AND (age < ?)\n ORDER BY id"
    );
    assert_eq!(params, vec![Value::Integer(30), Value::Integer(50)]);

    ds.open().unwrap();
    assert_eq!(ids(&ds), vec![1, 4]);
}

/// The cancel hook receives a handle before the statement runs.
#[test]
fn test_cancel_hook_called_per_read() {
    let db = sqlite_with_persons();
    let calls = Rc::new(Cell::new(0));
    let seen = Rc::clone(&calls);
    let mut ds = persons(&db);
    ds.set_cancel_hook(move |_handle| seen.set(seen.get() + 1));

    ds.open_query("SELECT * FROM person").unwrap();
    ds.append().unwrap();
    assert_eq!(calls.get(), 2);
}

// =============================================================================
// Finding and Forgetting
// =============================================================================

#[test]
fn test_find_and_forget() {
    let db = sqlite_with_persons();
    let mut ds = persons(&db);
    ds.open_query("SELECT * FROM person ORDER BY id").unwrap();

    let key = PrimaryKey::single("id", 4);
    assert_eq!(ds.find_object_rec_num(&key).unwrap(), Some(3));

    let dirk = ds.find_object_record(&key).unwrap().unwrap();
    ds.modify_field(dirk, "score", 6.5, 2);
    assert!(!ds.forget_object(&key, false).unwrap());
    assert!(ds.forget_object(&key, true).unwrap());
    assert_eq!(ds.find_object_record(&key).unwrap(), None);
    assert_eq!(ds.len(), 4);

    // The database is untouched.
    assert_eq!(person_count(&db), 5);
}

#[test]
fn test_aggregate_over_column() {
    let db = sqlite_with_persons();
    let mut ds = persons(&db);
    ds.open_query("SELECT * FROM person").unwrap();

    let score = ds.aggregate("score").unwrap();
    assert_eq!(score.count, 4);
    assert_eq!(score.min, 6.25);
    assert_eq!(score.max, 9.0);
    assert_eq!(score.sum, 30.75);
}

// =============================================================================
// Synchronize Round Trips
// =============================================================================

/// Update, delete and generated-key insert all reach the database file.
#[test]
fn test_synchronize_round_trip() {
    let (_dir, path) = create_temp_db_file("persons.db");
    let db = SqliteDatabase::open(&path).unwrap();
    let mut ds = persons(&db);
    ds.set_generator("id");
    ds.open_query("SELECT * FROM person").unwrap();

    let bob = ds.find_object_record(&PrimaryKey::single("id", 2)).unwrap().unwrap();
    let eva = ds.find_object_record(&PrimaryKey::single("id", 5)).unwrap().unwrap();
    ds.modify_field(bob, "name", "Robert", 9);
    ds.delete_record(eva);
    let fay = ds.insert_record();
    ds.modify_field(fay, "name", "Fay", 9);
    ds.modify_field(fay, "age", 52, 9);

    assert!(ds.synchronize(9).unwrap());
    assert_eq!(ds.status(), RecordStatus::SELECTED);
    drop(ds);
    drop(db);

    let db = SqliteDatabase::open(&path).unwrap();
    assert_eq!(person_name(&db, 2).as_deref(), Some("Robert"));
    assert_eq!(person_count(&db), 5);
    let evas: i64 = db
        .connection()
        .query_row("SELECT COUNT(*) FROM person WHERE name = 'Eva'", [], |r| r.get(0))
        .unwrap();
    assert_eq!(evas, 0);

    let mut reread = persons(&db);
    reread
        .open_query("SELECT * FROM person WHERE name = 'Fay'")
        .unwrap();
    assert_eq!(reread.len(), 1);
    let row = reread.row_id(0).unwrap();
    assert_eq!(reread.field(row, "age"), Some(&Value::Integer(52)));
}

/// The generated key is written back into the row and indexed.
#[test]
fn test_generated_key_is_indexed() {
    let db = sqlite_with_persons();
    let mut ds = persons(&db);
    ds.set_generator("id");
    ds.open_query("SELECT * FROM person").unwrap();

    let row = ds.insert_record();
    ds.modify_field(row, "name", "Gus", 1);
    assert!(ds.synchronize(1).unwrap());

    let id = ds.field(row, "id").and_then(Value::as_i64).unwrap();
    assert_eq!(id, 6);
    assert_eq!(person_name(&db, id).as_deref(), Some("Gus"));
    assert_eq!(
        ds.find_object_record(&PrimaryKey::single("id", id)).unwrap(),
        Some(row)
    );
}

/// A schema-qualified primary table still gets generated keys.
#[test]
fn test_generated_key_with_schema() {
    let db = sqlite_with_persons();
    let mut ds = Dataset::new("persons", &db);
    ds.set_primary_table(Some("main"), "person", None);
    ds.set_generator("id");
    ds.open_query("SELECT * FROM person").unwrap();

    let row = ds.insert_record();
    ds.modify_field(row, "name", "Hal", 1);
    assert!(ds.synchronize(1).unwrap());

    assert_eq!(ds.field(row, "id"), Some(&Value::Integer(6)));
    assert_eq!(person_name(&db, 6).as_deref(), Some("Hal"));
}

/// A constraint violation undoes the statements that already ran.
#[test]
fn test_failed_synchronize_leaves_database_untouched() {
    let db = sqlite_with_persons();
    let mut ds = persons(&db);
    ds.open_query("SELECT * FROM person").unwrap();

    let anna = ds.row_id(0).unwrap();
    ds.modify_field(anna, "name", "Ann", 3);
    let dup = ds.insert_record();
    ds.modify_field(dup, "id", 1, 3);
    ds.modify_field(dup, "name", "Clone", 3);
    let status = ds.status();

    let err = ds.synchronize(3).unwrap_err();
    assert!(matches!(err, Error::Sqlite(_)));

    assert_eq!(person_name(&db, 1).as_deref(), Some("Anna"));
    assert_eq!(person_count(&db), 5);
    assert_eq!(ds.status(), status);
    assert!(ds.row(anna).unwrap().is_modified());
    assert!(ds.row(dup).unwrap().status().contains(RecordStatus::INSERTED));

    // Dropping the offending row lets the rest through.
    assert!(ds.delete_record(dup));
    assert!(ds.synchronize(3).unwrap());
    assert_eq!(person_name(&db, 1).as_deref(), Some("Ann"));
}

/// Another session's pending edit blocks a conflicting publish.
#[test]
fn test_conflicting_sessions_write_nothing() {
    let db = sqlite_with_persons();
    let mut ds = persons(&db);
    ds.open_query("SELECT * FROM person").unwrap();

    let cleo = ds.row_id(2).unwrap();
    ds.modify_field(cleo, "age", 72, 1);
    ds.modify_field(cleo, "score", 9.5, 2);

    assert!(matches!(
        ds.synchronize(1),
        Err(Error::MixedMutations { row: 2, session: 1, .. })
    ));
    let age: i64 = db
        .connection()
        .query_row("SELECT age FROM person WHERE id = 3", [], |r| r.get(0))
        .unwrap();
    assert_eq!(age, 71);
}
