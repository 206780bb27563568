#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use recordset::driver::{Database, Metadata, Query, StatementCancel, Transaction};
use recordset::{Result, SqliteDatabase, Value, ValueType};

// =============================================================================
// Recording Database
// =============================================================================

/// One statement as the backend received it.
#[derive(Debug, Clone, PartialEq)]
pub struct Executed {
    pub sql: String,
    pub params: Vec<Value>,
}

/// A scripted SELECT result.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    pub columns: Vec<(String, ValueType)>,
    pub rows: Vec<Vec<Value>>,
}

#[derive(Default)]
struct State {
    executed: Vec<Executed>,
    results: VecDeque<ResultSet>,
    primary_keys: HashMap<String, Vec<String>>,
    fail_on: Option<String>,
    events: Vec<String>,
    next_serial: i64,
}

/// A backend that records every statement and answers SELECTs from a script.
#[derive(Clone, Default)]
pub struct RecordingDatabase {
    state: Rc<RefCell<State>>,
}

impl RecordingDatabase {
    pub fn new() -> Self {
        let db = Self::default();
        db.state.borrow_mut().next_serial = 100;
        db
    }

    /// Queues the result of the next SELECT.
    pub fn push_result(&self, columns: &[(&str, ValueType)], rows: Vec<Vec<Value>>) {
        self.state.borrow_mut().results.push_back(ResultSet {
            columns: columns.iter().map(|(n, t)| (n.to_string(), *t)).collect(),
            rows,
        });
    }

    pub fn set_primary_key(&self, table: &str, columns: &[&str]) {
        self.state
            .borrow_mut()
            .primary_keys
            .insert(table.to_string(), columns.iter().map(|c| c.to_string()).collect());
    }

    /// Statements containing `needle` fail after being recorded.
    pub fn fail_on(&self, needle: &str) {
        self.state.borrow_mut().fail_on = Some(needle.to_string());
    }

    pub fn executed(&self) -> Vec<Executed> {
        self.state.borrow().executed.clone()
    }

    /// Every executed statement that is not a SELECT.
    pub fn writes(&self) -> Vec<Executed> {
        self.executed()
            .into_iter()
            .filter(|e| !is_select(&e.sql))
            .collect()
    }

    /// Transaction events: `begin <name>`, `defer`, `commit`, `rollback`.
    pub fn events(&self) -> Vec<String> {
        self.state.borrow().events.clone()
    }

    pub fn clear_log(&self) {
        let mut state = self.state.borrow_mut();
        state.executed.clear();
        state.events.clear();
    }
}

fn is_select(sql: &str) -> bool {
    sql.trim_start().to_ascii_uppercase().starts_with("SELECT")
}

impl Database for RecordingDatabase {
    fn query(&self) -> Box<dyn Query + '_> {
        Box::new(RecordingQuery {
            state: Rc::clone(&self.state),
            params: Vec::new(),
            result: ResultSet::default(),
            cursor: None,
            affected: 0,
        })
    }

    fn begin(&self, name: &str) -> Result<Box<dyn Transaction + '_>> {
        self.state.borrow_mut().events.push(format!("begin {name}"));
        Ok(Box::new(RecordingTransaction {
            state: Rc::clone(&self.state),
            committed: false,
        }))
    }

    fn metadata(&self) -> &dyn Metadata {
        self
    }
}

impl Metadata for RecordingDatabase {
    fn primary_key_info(&self, table: &str) -> Result<Option<(String, Vec<String>)>> {
        Ok(self
            .state
            .borrow()
            .primary_keys
            .get(table)
            .map(|cols| (format!("pk_{table}"), cols.clone())))
    }

    fn generate_serial(&self, _table: &str, _sequence: &str) -> Result<Value> {
        let mut state = self.state.borrow_mut();
        let value = state.next_serial;
        state.next_serial += 1;
        Ok(Value::Integer(value))
    }

    fn effective_serial(&self, value: Value) -> Result<Value> {
        Ok(value)
    }

    fn top_n_rows_clause(&self, sql: &str, top: usize, skip: usize) -> String {
        match (top, skip) {
            (0, 0) => sql.to_string(),
            (top, skip) => format!("{sql}\n LIMIT {top} OFFSET {skip}"),
        }
    }

    fn for_update_clause(&self, _wait: u32) -> String {
        String::new()
    }

    fn for_update_trailer(&self, wait: u32) -> String {
        format!("FOR UPDATE WAIT {wait}")
    }
}

struct RecordingQuery {
    state: Rc<RefCell<State>>,
    params: Vec<Value>,
    result: ResultSet,
    cursor: Option<usize>,
    affected: usize,
}

impl Query for RecordingQuery {
    fn execute(&mut self, sql: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.executed.push(Executed {
            sql: sql.to_string(),
            params: self.params.clone(),
        });
        if state.fail_on.as_deref().is_some_and(|needle| sql.contains(needle)) {
            return Err(rusqlite::Error::InvalidQuery.into());
        }
        self.cursor = None;
        if is_select(sql) {
            self.result = state.results.pop_front().unwrap_or_default();
            self.affected = 0;
        } else {
            self.result = ResultSet::default();
            self.affected = 1;
        }
        Ok(())
    }

    fn column_count(&self) -> usize {
        self.result.columns.len()
    }

    fn column_name(&self, index: usize) -> Option<String> {
        self.result.columns.get(index).map(|(n, _)| n.clone())
    }

    fn column_type(&self, index: usize) -> ValueType {
        self.result
            .columns
            .get(index)
            .map_or(ValueType::Null, |(_, t)| *t)
    }

    fn advance(&mut self) -> Result<bool> {
        let next = self.cursor.map_or(0, |c| c + 1);
        self.cursor = Some(next);
        Ok(next < self.result.rows.len())
    }

    fn column(&self, index: usize) -> Value {
        self.cursor
            .and_then(|c| self.result.rows.get(c))
            .and_then(|row| row.get(index))
            .cloned()
            .unwrap_or_default()
    }

    fn bind_parameter(&mut self, position: usize, value: Value) {
        let index = position - 1;
        if self.params.len() <= index {
            self.params.resize(index + 1, Value::Null);
        }
        self.params[index] = value;
    }

    fn add_parameter(&mut self, value: Value) {
        self.params.push(value);
    }

    fn reset_parameters(&mut self) {
        self.params.clear();
    }

    fn cancel_handle(&self) -> Option<Arc<dyn StatementCancel>> {
        Some(Arc::new(CountingCancel::default()))
    }

    fn rows_affected(&self) -> usize {
        self.affected
    }
}

struct RecordingTransaction {
    state: Rc<RefCell<State>>,
    committed: bool,
}

impl Transaction for RecordingTransaction {
    fn defer_constraints(&mut self) -> Result<()> {
        self.state.borrow_mut().events.push("defer".to_string());
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        self.committed = true;
        self.state.borrow_mut().events.push("commit".to_string());
        Ok(())
    }
}

impl Drop for RecordingTransaction {
    fn drop(&mut self) {
        if !self.committed {
            self.state.borrow_mut().events.push("rollback".to_string());
        }
    }
}

/// Counts how often it was asked to cancel.
#[derive(Debug, Default)]
pub struct CountingCancel {
    pub calls: AtomicUsize,
}

impl StatementCancel for CountingCancel {
    fn cancel(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub const PERSON_COLUMNS: &[(&str, ValueType)] = &[
    ("ID", ValueType::Integer),
    ("NAME", ValueType::Text),
];

/// (1,"A"), (2,"B"), (3,"C")
pub fn person_rows() -> Vec<Vec<Value>> {
    vec![
        vec![Value::Integer(1), Value::from("A")],
        vec![Value::Integer(2), Value::from("B")],
        vec![Value::Integer(3), Value::from("C")],
    ]
}

const PERSON_SCHEMA: &str = "
    CREATE TABLE person (
        id    INTEGER PRIMARY KEY,
        name  VARCHAR(40) NOT NULL,
        age   INTEGER,
        score DOUBLE
    );
    INSERT INTO person VALUES (1, 'Anna', 34, 7.5);
    INSERT INTO person VALUES (2, 'Bob', 17, NULL);
    INSERT INTO person VALUES (3, 'Cleo', 71, 9.0);
    INSERT INTO person VALUES (4, 'Dirk', 45, 6.25);
    INSERT INTO person VALUES (5, 'Eva', 29, 8.0);
";

/// In-memory SQLite database with a populated `person` table.
pub fn sqlite_with_persons() -> SqliteDatabase {
    let db = SqliteDatabase::open_in_memory().expect("open in-memory database");
    db.connection()
        .execute_batch(PERSON_SCHEMA)
        .expect("create person table");
    db
}

/// A database file with a populated `person` table inside a temp dir.
pub fn create_temp_db_file(name: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::TempDir::new().expect("create temp dir");
    let path = dir.path().join(name);
    let db = SqliteDatabase::open(&path).expect("create database file");
    db.connection()
        .execute_batch(PERSON_SCHEMA)
        .expect("create person table");
    (dir, path)
}

/// Reads `SELECT name FROM person WHERE id = ?` directly.
pub fn person_name(db: &SqliteDatabase, id: i64) -> Option<String> {
    db.connection()
        .query_row("SELECT name FROM person WHERE id = ?1", [id], |r| r.get(0))
        .ok()
}

pub fn person_count(db: &SqliteDatabase) -> i64 {
    db.connection()
        .query_row("SELECT COUNT(*) FROM person", [], |r| r.get(0))
        .expect("count persons")
}
