//! # Database Collaborators
//!
//! A dataset never talks to a database directly. It goes through four small
//! traits that any backend can implement:
//!
//! ```text
//! ┌──────────────┐  query()   ┌─────────┐  execute / advance / column
//! │   Database   │ ─────────► │  Query  │ ─────────────────────────────►
//! │              │  begin()   ├─────────────┐
//! │              │ ─────────► │ Transaction │  defer_constraints / commit
//! │              │ metadata() ├──────────┐  │
//! │              │ ─────────► │ Metadata │  primary keys, serials, paging
//! └──────────────┘            └──────────┘
//! ```
//!
//! The crate ships one implementation, [`SqliteDatabase`](crate::sqlite::SqliteDatabase).
//! Tests substitute recording doubles to observe the exact SQL a dataset emits.
//!
//! ## Rust Pattern: Trait Objects
//!
//! The dataset holds a `&dyn Database` rather than being generic over the
//! backend. Datasets, associations and XML persistence can then be written
//! once, and a test double can be swapped in without touching their types.

use std::sync::Arc;

use crate::error::Result;
use crate::value::{Value, ValueType};

// =============================================================================
// Query
// =============================================================================

/// One statement execution: text, bound parameters and a result cursor.
///
/// Parameters are bound to `?` placeholders in textual order, starting at 1.
pub trait Query {
    /// Executes `sql` with the currently bound parameters.
    ///
    /// A SELECT leaves the cursor before its first row; use
    /// [`advance`](Query::advance) to step through the result.
    fn execute(&mut self, sql: &str) -> Result<()>;

    /// Number of columns in the current result set.
    fn column_count(&self) -> usize;

    /// Name of result column `index`.
    fn column_name(&self, index: usize) -> Option<String>;

    /// Type of result column `index`.
    fn column_type(&self, index: usize) -> ValueType;

    /// Moves to the next row. Returns `false` past the last row.
    fn advance(&mut self) -> Result<bool>;

    /// Value of column `index` in the current row.
    fn column(&self, index: usize) -> Value;

    /// Binds `value` to placeholder `position` (1-based).
    fn bind_parameter(&mut self, position: usize, value: Value);

    /// Binds `value` to the next free placeholder.
    fn add_parameter(&mut self, value: Value);

    /// Forgets every bound parameter.
    fn reset_parameters(&mut self);

    /// A handle that can abort the statement from elsewhere, if supported.
    fn cancel_handle(&self) -> Option<Arc<dyn StatementCancel>>;

    /// Rows changed by the last INSERT, UPDATE or DELETE.
    fn rows_affected(&self) -> usize;
}

/// Aborts a running statement.
pub trait StatementCancel: Send + Sync {
    fn cancel(&self);
}

// =============================================================================
// Transaction
// =============================================================================

/// A named unit of work.
///
/// Dropping a transaction without calling [`commit`](Transaction::commit)
/// rolls it back.
pub trait Transaction {
    /// Postpones constraint checks until commit.
    fn defer_constraints(&mut self) -> Result<()>;

    /// Makes every statement executed since `begin` permanent.
    fn commit(self: Box<Self>) -> Result<()>;
}

// =============================================================================
// Metadata
// =============================================================================

/// What a dataset needs to know about the database it reads from.
pub trait Metadata {
    /// Primary-key constraint name and ordered key columns of `table`, or
    /// `None` if the table has no primary key.
    fn primary_key_info(&self, table: &str) -> Result<Option<(String, Vec<String>)>>;

    /// Produces a new surrogate key value for an insert into `table`.
    fn generate_serial(&self, table: &str, sequence: &str) -> Result<Value>;

    /// The key value the database actually stored for a generated `value`.
    fn effective_serial(&self, value: Value) -> Result<Value>;

    /// Rewrites `sql` to return at most `top` rows after skipping `skip`.
    /// Zero means "no limit" and "no offset" respectively.
    fn top_n_rows_clause(&self, sql: &str, top: usize, skip: usize) -> String;

    /// Clause placed after the FROM list to lock the rows read.
    fn for_update_clause(&self, wait: u32) -> String;

    /// Clause placed after the whole SELECT to lock the rows read.
    fn for_update_trailer(&self, wait: u32) -> String;
}

// =============================================================================
// Database
// =============================================================================

/// Factory for queries and transactions on one connection.
pub trait Database {
    /// A fresh statement on this connection.
    fn query(&self) -> Box<dyn Query + '_>;

    /// Starts a named transaction.
    fn begin(&self, name: &str) -> Result<Box<dyn Transaction + '_>>;

    fn metadata(&self) -> &dyn Metadata;
}
