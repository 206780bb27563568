//! # recordset - Editable SQL Record Cache
//!
//! recordset keeps the result of a SQL query in memory, lets independent
//! editing sessions change it, and writes their changes back. It provides:
//!
//! - **Datasets**: query results held as rows of typed values
//! - **Multi-session editing**: every field remembers which session made
//!   which edit, so sessions never clobber each other
//! - **Conflict detection**: a session cannot publish a row that also
//!   carries another session's tentative edits
//! - **Write-back**: pending inserts, updates and deletes replayed as SQL
//!   inside one transaction
//! - **Filters**: typed predicates compiled to SQL or evaluated in memory
//! - **Master/detail links** and **XML persistence**
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 Dataset  ◄──── Association ────►  Dataset       │
//! │        open / append / find / edit / synchronize / save_xml     │
//! │                                                                 │
//! │  ┌─────────────┐  ┌──────────────┐  ┌────────────────────────┐ │
//! │  │  RowArena   │  │  Key index   │  │  FilterSet → SqlText   │ │
//! │  │ Row → stacks│  │ (int / text) │  │  (? + bound values)    │ │
//! │  └─────────────┘  └──────────────┘  └────────────────────────┘ │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │  Database / Query / Transaction / Metadata
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    SqliteDatabase (rusqlite)                    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Invariants
//!
//! 1. **Original at the bottom**: entry 0 of every mutation stack is the
//!    value as read, owned by session 0
//! 2. **No mixed publication**: synchronize refuses any row holding edits of
//!    the synchronizing session and of another session
//! 3. **All or nothing**: a failed synchronize commits nothing and leaves the
//!    dataset status as it was
//! 4. **Unique keys**: no two rows of a dataset share a primary key
//! 5. **Rectangular**: every row has one field per column
//!
//! ## Example
//!
//! ```rust
//! use recordset::{Dataset, SqliteDatabase};
//!
//! let db = SqliteDatabase::open_in_memory()?;
//! db.connection().execute_batch(
//!     "CREATE TABLE person (id INTEGER PRIMARY KEY, name TEXT);
//!      INSERT INTO person VALUES (1, 'Anna');",
//! )?;
//!
//! let mut persons = Dataset::new("persons", &db);
//! persons.set_primary_table(None, "person", None);
//! persons.open_query("SELECT id, name FROM person")?;
//!
//! let anna = persons.first().expect("one row");
//! persons.modify_field(anna, "name", "Ann", 5);
//! assert!(persons.synchronize(5)?);
//! # Ok::<(), recordset::Error>(())
//! ```
//!
//! ## Module Organization
//!
//! - [`error`]: Error types for all failure modes
//! - [`value`]: The scalar stored in every field
//! - [`mutation`]: Per-field edit history tagged by session
//! - [`row`]: Rows, status bits and the row arena
//! - [`primary_key`]: Key values and their lifecycle
//! - [`sql`]: SQL text with bound parameters
//! - [`filter`]: Filters and filter sets
//! - [`driver`]: Database collaborator traits
//! - [`sqlite`]: The SQLite backend
//! - [`dataset`]: The dataset itself
//! - [`synchronize`]: Write-back of pending changes
//! - [`association`]: Master/detail links
//! - [`xml`]: XML save and load

// =============================================================================
// Module Declarations
// =============================================================================

/// Error types for recordset operations.
///
/// A single error enum for business conditions (conflicts, schema mismatch,
/// time budget) and backend failures, plus a nested enum for filter problems.
pub mod error;

/// Typed scalar values.
pub mod value;

/// Mutation stacks and session ids.
///
/// The core of multi-session editing: each field keeps its original value and
/// every session's tentative edit on top of it.
pub mod mutation;

/// Rows and the handle-addressed row arena.
pub mod row;

/// Primary keys.
pub mod primary_key;

/// SQL text assembly with bound parameters and `$name` substitution.
pub mod sql;

/// Filters compiled to SQL or matched in memory.
///
/// Supports comparison, LIKE, IN, BETWEEN and EXISTS operators, scalar
/// function decoration, sub-queries, negation, grouping and OR chaining.
pub mod filter;

/// Collaborator traits a database backend implements.
pub mod driver;

/// SQLite backend built on `rusqlite`.
///
/// Buffers result sets, maps transactions onto SAVEPOINTs and answers
/// metadata questions from `pragma_table_info`.
pub mod sqlite;

/// Datasets: reading, finding, editing and navigating.
pub mod dataset;

/// Writing pending changes back inside one transaction.
pub mod synchronize;

/// Master/detail associations between datasets.
pub mod association;

/// XML persistence of datasets.
pub mod xml;

// =============================================================================
// Re-exports
// =============================================================================

pub use association::{Association, Side};
pub use dataset::{Aggregate, ColumnIndex, Dataset, DatasetConfig};
pub use driver::{Database, Metadata, Query, StatementCancel, Transaction};
pub use error::{Error, FilterError, Result};
pub use filter::{Filter, FilterSet, FunctionCall, Operator, SqlFunction, SubQuery};
pub use mutation::{MixedMutation, MutationStack, SessionId};
pub use primary_key::{KeyStatus, PrimaryKey};
pub use row::{RecordStatus, Row, RowId};
pub use sqlite::SqliteDatabase;
pub use value::{Value, ValueType};
pub use xml::Language;
