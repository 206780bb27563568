//! # SQLite Backend
//!
//! Implements the [`driver`](crate::driver) traits on a bundled SQLite
//! connection through `rusqlite`.
//!
//! ## Result Buffering
//!
//! [`SqliteQuery::execute`] steps the whole result set into memory before
//! returning. A `rusqlite::Rows` borrows its `Statement`, which borrows the
//! connection; buffering keeps the query object free of self-references.
//! Datasets materialize every row anyway, so nothing is lost.
//!
//! ## Transactions as SAVEPOINTs
//!
//! ```text
//! begin("Synchronize persons")  →  SAVEPOINT "Synchronize persons"
//! commit()                      →  RELEASE "Synchronize persons"
//! drop without commit           →  ROLLBACK TO ...; RELEASE ...
//! ```
//!
//! A SAVEPOINT outside any transaction opens one, and nests cleanly inside a
//! transaction the caller already started on the same connection.

use std::sync::Arc;

use rusqlite::{params_from_iter, Connection, InterruptHandle};

use crate::driver::{Database, Metadata, Query, StatementCancel, Transaction};
use crate::error::Result;
use crate::value::{Value, ValueType};

// =============================================================================
// Database
// =============================================================================

/// A SQLite connection usable as a dataset backend.
///
/// # Ownership
///
/// `SqliteDatabase` owns its `Connection`. Queries and transactions borrow
/// it, so the borrow checker keeps the connection alive for as long as any
/// dataset reads from it.
#[derive(Debug)]
pub struct SqliteDatabase {
    conn: Connection,
}

impl SqliteDatabase {
    /// Opens (or creates) a database file.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Creates an in-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    /// Wraps an existing connection.
    pub fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        Ok(Self { conn })
    }

    /// The underlying connection, for schema setup and direct inspection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl Database for SqliteDatabase {
    fn query(&self) -> Box<dyn Query + '_> {
        Box::new(SqliteQuery::new(&self.conn))
    }

    fn begin(&self, name: &str) -> Result<Box<dyn Transaction + '_>> {
        Ok(Box::new(SqliteTransaction::begin(&self.conn, name)?))
    }

    fn metadata(&self) -> &dyn Metadata {
        self
    }
}

// =============================================================================
// Query
// =============================================================================

/// One statement on a SQLite connection, with a buffered result set.
pub struct SqliteQuery<'c> {
    conn: &'c Connection,
    params: Vec<Value>,
    columns: Vec<(String, ValueType)>,
    rows: Vec<Vec<Value>>,
    /// Index of the current row; `None` before the first `advance`.
    cursor: Option<usize>,
    affected: usize,
}

impl<'c> SqliteQuery<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self {
            conn,
            params: Vec::new(),
            columns: Vec::new(),
            rows: Vec::new(),
            cursor: None,
            affected: 0,
        }
    }

    fn current_row(&self) -> Option<&Vec<Value>> {
        self.cursor.and_then(|i| self.rows.get(i))
    }
}

impl Query for SqliteQuery<'_> {
    fn execute(&mut self, sql: &str) -> Result<()> {
        tracing::debug!(sql, params = self.params.len(), "executing statement");
        self.columns.clear();
        self.rows.clear();
        self.cursor = None;
        self.affected = 0;

        let mut stmt = self.conn.prepare(sql)?;
        if stmt.column_count() == 0 {
            self.affected = stmt.execute(params_from_iter(self.params.iter()))?;
            return Ok(());
        }

        // Declared types first; expression columns have none.
        let declared: Vec<(String, Option<ValueType>)> = stmt
            .columns()
            .iter()
            .map(|c| {
                (
                    c.name().to_string(),
                    c.decl_type().map(ValueType::from_decl_type),
                )
            })
            .collect();

        let mut rows = stmt.query(params_from_iter(self.params.iter()))?;
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(declared.len());
            for i in 0..declared.len() {
                values.push(Value::from(row.get_ref(i)?));
            }
            self.rows.push(values);
        }

        self.columns = declared
            .into_iter()
            .enumerate()
            .map(|(i, (name, ty))| {
                let ty = ty.unwrap_or_else(|| {
                    self.rows
                        .iter()
                        .map(|r| r[i].value_type())
                        .find(|t| *t != ValueType::Null)
                        .unwrap_or(ValueType::Text)
                });
                (name, ty)
            })
            .collect();

        for row in &mut self.rows {
            for (value, (_, ty)) in row.iter_mut().zip(&self.columns) {
                *value = std::mem::take(value).coerce(*ty);
            }
        }
        tracing::debug!(rows = self.rows.len(), "result buffered");
        Ok(())
    }

    fn column_count(&self) -> usize {
        self.columns.len()
    }

    fn column_name(&self, index: usize) -> Option<String> {
        self.columns.get(index).map(|(name, _)| name.clone())
    }

    fn column_type(&self, index: usize) -> ValueType {
        self.columns
            .get(index)
            .map_or(ValueType::Null, |(_, ty)| *ty)
    }

    fn advance(&mut self) -> Result<bool> {
        let next = self.cursor.map_or(0, |i| i + 1);
        if next < self.rows.len() {
            self.cursor = Some(next);
            Ok(true)
        } else {
            self.cursor = Some(self.rows.len());
            Ok(false)
        }
    }

    fn column(&self, index: usize) -> Value {
        self.current_row()
            .and_then(|row| row.get(index))
            .cloned()
            .unwrap_or_default()
    }

    fn bind_parameter(&mut self, position: usize, value: Value) {
        let index = position.saturating_sub(1);
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
        Some(Arc::new(SqliteCancel(self.conn.get_interrupt_handle())))
    }

    fn rows_affected(&self) -> usize {
        self.affected
    }
}

/// Interrupts whatever statement the connection is running.
struct SqliteCancel(InterruptHandle);

impl StatementCancel for SqliteCancel {
    fn cancel(&self) {
        self.0.interrupt();
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// A named SAVEPOINT, rolled back on drop unless committed.
pub struct SqliteTransaction<'c> {
    conn: &'c Connection,
    name: String,
    finished: bool,
}

impl<'c> SqliteTransaction<'c> {
    pub fn begin(conn: &'c Connection, name: &str) -> Result<Self> {
        let name = quote_identifier(name);
        conn.execute_batch(&format!("SAVEPOINT {name}"))?;
        tracing::debug!(savepoint = %name, "transaction started");
        Ok(Self {
            conn,
            name,
            finished: false,
        })
    }
}

impl Transaction for SqliteTransaction<'_> {
    fn defer_constraints(&mut self) -> Result<()> {
        self.conn.execute_batch("PRAGMA defer_foreign_keys = ON")?;
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        self.conn.execute_batch(&format!("RELEASE {}", self.name))?;
        self.finished = true;
        tracing::debug!(savepoint = %self.name, "transaction committed");
        Ok(())
    }
}

impl Drop for SqliteTransaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let rollback = format!("ROLLBACK TO {0}; RELEASE {0}", self.name);
        if let Err(e) = self.conn.execute_batch(&rollback) {
            tracing::warn!(savepoint = %self.name, error = %e, "rollback failed");
        } else {
            tracing::debug!(savepoint = %self.name, "transaction rolled back");
        }
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quotes every part of a `schema.table` name on its own.
fn quote_qualified(name: &str) -> String {
    name.split('.')
        .map(quote_identifier)
        .collect::<Vec<_>>()
        .join(".")
}

// =============================================================================
// Metadata
// =============================================================================

impl Metadata for SqliteDatabase {
    fn primary_key_info(&self, table: &str) -> Result<Option<(String, Vec<String>)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM pragma_table_info(?1) WHERE pk > 0 ORDER BY pk")?;
        let columns = stmt
            .query_map([table], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        if columns.is_empty() {
            return Ok(None);
        }
        Ok(Some((format!("pk_{table}"), columns)))
    }

    /// SQLite has no sequences; the next rowid stands in for one.
    fn generate_serial(&self, table: &str, _sequence: &str) -> Result<Value> {
        let sql = format!(
            "SELECT COALESCE(MAX(rowid), 0) + 1 FROM {}",
            quote_qualified(table)
        );
        let next: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(Value::Integer(next))
    }

    fn effective_serial(&self, value: Value) -> Result<Value> {
        Ok(value)
    }

    fn top_n_rows_clause(&self, sql: &str, top: usize, skip: usize) -> String {
        match (top, skip) {
            (0, 0) => sql.to_string(),
            (0, skip) => format!("{sql}\n LIMIT -1 OFFSET {skip}"),
            (top, 0) => format!("{sql}\n LIMIT {top}"),
            (top, skip) => format!("{sql}\n LIMIT {top} OFFSET {skip}"),
        }
    }

    /// SQLite locks whole databases, not rows.
    fn for_update_clause(&self, _wait: u32) -> String {
        String::new()
    }

    fn for_update_trailer(&self, _wait: u32) -> String {
        String::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn database() -> SqliteDatabase {
        let db = SqliteDatabase::open_in_memory().unwrap();
        db.connection()
            .execute_batch(
                "CREATE TABLE person (id INTEGER PRIMARY KEY, name VARCHAR(40), score DOUBLE);
                 INSERT INTO person VALUES (1, 'Anna', 7.5), (2, 'Bob', NULL);",
            )
            .unwrap();
        db
    }

    #[test]
    fn test_select_reads_declared_types() {
        let db = database();
        let mut query = db.query();
        query.add_parameter(Value::Integer(0));
        query.execute("SELECT id, name, score FROM person WHERE id > ? ORDER BY id").unwrap();

        assert_eq!(query.column_count(), 3);
        assert_eq!(query.column_name(1).as_deref(), Some("name"));
        assert_eq!(query.column_type(0), ValueType::Integer);
        assert_eq!(query.column_type(1), ValueType::Text);
        assert_eq!(query.column_type(2), ValueType::Real);

        assert!(query.advance().unwrap());
        assert_eq!(query.column(1), Value::from("Anna"));
        assert!(query.advance().unwrap());
        assert!(query.column(2).is_null());
        assert!(!query.advance().unwrap());
    }

    #[test]
    fn test_expression_column_type_from_values() {
        let db = database();
        let mut query = db.query();
        query.execute("SELECT COUNT(*) AS n FROM person").unwrap();
        assert_eq!(query.column_type(0), ValueType::Integer);
    }

    #[test]
    fn test_dml_reports_rows_affected() {
        let db = database();
        let mut query = db.query();
        query.bind_parameter(2, Value::Integer(1));
        query.bind_parameter(1, Value::from("Zoe"));
        query.execute("UPDATE person SET name = ? WHERE id = ?").unwrap();
        assert_eq!(query.rows_affected(), 1);
        assert_eq!(query.column_count(), 0);
    }

    #[test]
    fn test_dropped_transaction_rolls_back() {
        let db = database();
        {
            let _tx = db.begin("Synchronize person").unwrap();
            db.connection().execute("DELETE FROM person", []).unwrap();
        }
        let count: i64 = db
            .connection()
            .query_row("SELECT COUNT(*) FROM person", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2);

        let tx = db.begin("Synchronize person").unwrap();
        db.connection().execute("DELETE FROM person WHERE id = 2", []).unwrap();
        tx.commit().unwrap();
        let count: i64 = db
            .connection()
            .query_row("SELECT COUNT(*) FROM person", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_quote_qualified() {
        assert_eq!(quote_qualified("person"), "\"person\"");
        assert_eq!(quote_qualified("main.person"), "\"main\".\"person\"");
        assert_eq!(quote_qualified("odd\"name"), "\"odd\"\"name\"");
    }

    #[test]
    fn test_metadata() {
        let db = database();
        let meta = db.metadata();
        let (name, columns) = meta.primary_key_info("person").unwrap().unwrap();
        assert_eq!(name, "pk_person");
        assert_eq!(columns, vec!["id".to_string()]);
        assert_eq!(meta.primary_key_info("missing").unwrap(), None);
        assert_eq!(meta.generate_serial("person", "").unwrap(), Value::Integer(3));
        assert_eq!(meta.generate_serial("main.person", "").unwrap(), Value::Integer(3));
        assert_eq!(meta.top_n_rows_clause("SELECT 1", 10, 20), "SELECT 1\n LIMIT 10 OFFSET 20");
        assert_eq!(meta.top_n_rows_clause("SELECT 1", 0, 5), "SELECT 1\n LIMIT -1 OFFSET 5");
        assert_eq!(meta.top_n_rows_clause("SELECT 1", 0, 0), "SELECT 1");
    }
}
