//! # Datasets
//!
//! A [`Dataset`] is an in-memory copy of one query result that can be edited
//! and written back. It owns:
//!
//! - the **query configuration**: a raw query, or structured SELECT parts,
//!   plus paging, parameters and a [`FilterSet`]
//! - the **schema**: column names and types captured by the first read
//! - the **rows**, in a [`RowArena`] addressed by [`RowId`] handles
//! - the **key index**: primary key → row, with an integer fast path
//!
//! ## Lifecycle
//!
//! ```text
//!            open()                edit / insert / delete
//! Closed ──────────────► Open ──────────────────────────► Open + pending
//!   ▲                     ▲                                     │
//!   │ close()             └──────── synchronize(session) ◄──────┘
//!   └──────────────────────────────────────────────────────────
//! ```
//!
//! A failed synchronize leaves the pending changes and the status exactly as
//! they were. See [`Dataset::synchronize`](crate::synchronize).
//!
//! ## Reading
//!
//! `open` and `append` build the SELECT, execute it through the
//! [`Database`] collaborator and materialize every row. Rows whose primary
//! key is already present are skipped and counted
//! ([`Dataset::skipped_duplicates`]). An optional time budget is checked once
//! per fetched row.
//!
//! ## Rust Pattern: Borrowed Backend
//!
//! `Dataset<'db>` borrows its database. Any number of datasets may share one
//! connection, and none of them can outlive it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::driver::{Database, StatementCancel};
use crate::error::{Error, Result};
use crate::filter::{Filter, FilterSet, Operator, RecordSource};
use crate::mutation::SessionId;
use crate::primary_key::{KeyStatus, PrimaryKey};
use crate::row::{RecordStatus, Row, RowArena, RowId};
use crate::sql::{Parameters, SqlText};
use crate::value::{Value, ValueType};

// =============================================================================
// Configuration
// =============================================================================

/// Default seconds to wait for row locks when locking for update.
pub const DEFAULT_LOCK_WAIT_SECS: u32 = 0;

/// Default suffix appended to the primary table name to name its sequence.
pub const DEFAULT_SEQUENCE_SUFFIX: &str = "_seq";

/// Behavior switches of a dataset.
#[derive(Debug, Clone)]
pub struct DatasetConfig {
    /// Maximum time a read may spend fetching rows. `None` means unlimited.
    pub time_budget: Option<Duration>,

    /// Paged reading: `append` drops rows without pending changes and moves
    /// the skip offset past the previous page.
    pub isolated: bool,

    /// Lock the rows read, using the dialect's FOR UPDATE clauses.
    pub lock_for_update: bool,

    /// Seconds to wait for row locks.
    pub lock_wait: u32,

    /// Appended to the primary table name to name its key sequence.
    pub sequence_suffix: String,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            time_budget: None,
            isolated: false,
            lock_for_update: false,
            lock_wait: DEFAULT_LOCK_WAIT_SECS,
            sequence_suffix: DEFAULT_SEQUENCE_SUFFIX.to_string(),
        }
    }
}

// =============================================================================
// Column Addressing
// =============================================================================

/// Something that selects a column: a position or a name.
///
/// Names compare case-insensitively.
pub trait ColumnIndex {
    fn index_in(&self, columns: &[(String, ValueType)]) -> Option<usize>;
}

impl ColumnIndex for usize {
    fn index_in(&self, columns: &[(String, ValueType)]) -> Option<usize> {
        (*self < columns.len()).then_some(*self)
    }
}

impl ColumnIndex for &str {
    fn index_in(&self, columns: &[(String, ValueType)]) -> Option<usize> {
        columns
            .iter()
            .position(|(name, _)| name.eq_ignore_ascii_case(self))
    }
}

impl ColumnIndex for &String {
    fn index_in(&self, columns: &[(String, ValueType)]) -> Option<usize> {
        self.as_str().index_in(columns)
    }
}

// =============================================================================
// Aggregates
// =============================================================================

/// Statistics over the numeric values of one column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aggregate {
    pub count: usize,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

// =============================================================================
// Key Index
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum IndexKey {
    Fast(i64),
    Text(String),
}

impl IndexKey {
    fn from_values(values: &[&Value]) -> Option<IndexKey> {
        if values.is_empty() || values.iter().any(|v| v.is_null()) {
            return None;
        }
        match values {
            [Value::Integer(i)] => Some(IndexKey::Fast(*i)),
            _ => Some(IndexKey::Text(crate::primary_key::key_string(
                values.iter().copied(),
            ))),
        }
    }
}

/// Live values of one row, addressed by column name.
pub(crate) struct RowView<'a> {
    pub(crate) columns: &'a [(String, ValueType)],
    pub(crate) row: &'a Row,
}

impl RecordSource for RowView<'_> {
    fn value(&self, column: &str) -> Option<&Value> {
        column
            .index_in(self.columns)
            .and_then(|i| self.row.field(i))
    }
}

// =============================================================================
// Dataset
// =============================================================================

type CancelHook<'db> = Box<dyn FnMut(Arc<dyn StatementCancel>) + 'db>;

/// In-memory, editable copy of a query result.
pub struct Dataset<'db> {
    pub(crate) name: String,
    pub(crate) db: &'db dyn Database,
    pub(crate) config: DatasetConfig,

    // Query configuration
    query: Option<String>,
    selection: Option<String>,
    from_tables: Option<String>,
    where_condition: Option<String>,
    group_by: Option<String>,
    havings: Option<String>,
    order_by: Option<String>,
    top: usize,
    skip: usize,
    parameters: Parameters,
    pub(crate) filters: FilterSet,

    // Write-back configuration
    primary_schema: Option<String>,
    primary_table: Option<String>,
    primary_alias: Option<String>,
    pub(crate) primary_key: Vec<String>,
    pub(crate) update_columns: Vec<String>,
    pub(crate) generator: Option<String>,

    // Contents
    pub(crate) columns: Vec<(String, ValueType)>,
    pub(crate) rows: RowArena,
    objects: HashMap<IndexKey, RowId>,
    pub(crate) status: RecordStatus,
    cursor: isize,
    open: bool,
    last_read: usize,
    skipped_duplicates: usize,

    cancel_hook: Option<CancelHook<'db>>,
}

impl fmt::Debug for Dataset<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dataset")
            .field("name", &self.name)
            .field("open", &self.open)
            .field("columns", &self.columns)
            .field("rows", &self.rows.len())
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl<'db> Dataset<'db> {
    /// Creates a closed dataset on `db` with the default configuration.
    pub fn new(name: impl Into<String>, db: &'db dyn Database) -> Self {
        Self::with_config(name, db, DatasetConfig::default())
    }

    pub fn with_config(name: impl Into<String>, db: &'db dyn Database, config: DatasetConfig) -> Self {
        Self {
            name: name.into(),
            db,
            config,
            query: None,
            selection: None,
            from_tables: None,
            where_condition: None,
            group_by: None,
            havings: None,
            order_by: None,
            top: 0,
            skip: 0,
            parameters: Parameters::new(),
            filters: FilterSet::new(),
            primary_schema: None,
            primary_table: None,
            primary_alias: None,
            primary_key: Vec::new(),
            update_columns: Vec::new(),
            generator: None,
            columns: Vec::new(),
            rows: RowArena::new(),
            objects: HashMap::new(),
            status: RecordStatus::NONE,
            cursor: -1,
            open: false,
            last_read: 0,
            skipped_duplicates: 0,
            cancel_hook: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &DatasetConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut DatasetConfig {
        &mut self.config
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Union of the dataset-level status flags.
    pub fn status(&self) -> RecordStatus {
        self.status
    }

    /// Number of rows currently held.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows dropped by the last read because their key was already present.
    pub fn skipped_duplicates(&self) -> usize {
        self.skipped_duplicates
    }

    // =========================================================================
    // Query Configuration
    // =========================================================================

    /// Sets a raw query. Replaces any structured SELECT parts.
    ///
    /// `$name` references to dataset parameters are bound at open time.
    pub fn set_query(&mut self, sql: impl Into<String>) {
        self.query = Some(sql.into());
        self.selection = None;
        self.from_tables = None;
        self.where_condition = None;
        self.group_by = None;
        self.havings = None;
        self.order_by = None;
    }

    pub fn set_selection(&mut self, selection: impl Into<String>) {
        self.query = None;
        self.selection = Some(selection.into());
    }

    pub fn set_from_tables(&mut self, from: impl Into<String>) {
        self.query = None;
        self.from_tables = Some(from.into());
    }

    pub fn set_where_condition(&mut self, condition: impl Into<String>) {
        self.query = None;
        self.where_condition = Some(condition.into());
    }

    pub fn set_group_by(&mut self, group_by: impl Into<String>) {
        self.query = None;
        self.group_by = Some(group_by.into());
    }

    pub fn set_havings(&mut self, havings: impl Into<String>) {
        self.query = None;
        self.havings = Some(havings.into());
    }

    pub fn set_order_by(&mut self, order_by: impl Into<String>) {
        self.query = None;
        self.order_by = Some(order_by.into());
    }

    /// Limits reads to `top` rows. Zero means no limit.
    pub fn set_top_records(&mut self, top: usize) {
        self.top = top;
    }

    /// Skips the first `skip` rows of the result.
    pub fn set_skip_records(&mut self, skip: usize) {
        self.skip = skip;
    }

    pub fn skip_records(&self) -> usize {
        self.skip
    }

    pub fn set_parameter(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.parameters.set(name, value.into());
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    /// The table synchronize writes to, with optional schema and the alias
    /// the query uses for it.
    pub fn set_primary_table(
        &mut self,
        schema: Option<&str>,
        table: impl Into<String>,
        alias: Option<&str>,
    ) {
        self.primary_schema = schema.map(str::to_string);
        self.primary_table = Some(table.into());
        self.primary_alias = alias.map(str::to_string);
    }

    pub fn primary_alias(&self) -> Option<&str> {
        self.primary_alias.as_deref()
    }

    /// `schema.table`, or just the table.
    pub fn qualified_table(&self) -> Option<String> {
        let table = self.primary_table.as_ref()?;
        Some(match &self.primary_schema {
            Some(schema) => format!("{schema}.{table}"),
            None => table.clone(),
        })
    }

    /// Declares the key columns instead of discovering them.
    pub fn set_primary_key_columns<S: Into<String>>(&mut self, columns: impl IntoIterator<Item = S>) {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self.reindex();
    }

    pub fn primary_key_columns(&self) -> &[String] {
        &self.primary_key
    }

    /// Restricts UPDATE statements to these columns. Empty allows all.
    ///
    /// A row whose edits all fall outside these columns is not written and
    /// keeps its edits after synchronize. A row that is written is reduced
    /// as a whole, including edits that were left out of the UPDATE.
    pub fn set_update_columns<S: Into<String>>(&mut self, columns: impl IntoIterator<Item = S>) {
        self.update_columns = columns.into_iter().map(Into::into).collect();
    }

    /// The column whose value the database generates on insert.
    pub fn set_generator(&mut self, column: impl Into<String>) {
        self.generator = Some(column.into());
    }

    /// Replaces the filter set.
    pub fn set_filters(&mut self, filters: FilterSet) {
        self.filters = filters;
    }

    pub fn add_filter(&mut self, filter: Filter) {
        self.filters.add(filter);
    }

    pub fn clear_filters(&mut self) {
        self.filters.clear();
    }

    pub fn filters(&self) -> &FilterSet {
        &self.filters
    }

    /// Called with the statement's cancel handle before every SELECT.
    pub fn set_cancel_hook(&mut self, hook: impl FnMut(Arc<dyn StatementCancel>) + 'db) {
        self.cancel_hook = Some(Box::new(hook));
    }

    pub fn set_lock_for_update(&mut self, lock: bool, wait: u32) {
        self.config.lock_for_update = lock;
        self.config.lock_wait = wait;
    }

    fn has_query(&self) -> bool {
        self.query.is_some() || (self.selection.is_some() && self.from_tables.is_some())
    }

    // =========================================================================
    // SQL Assembly
    // =========================================================================

    /// The SELECT a read would execute, with its bound values.
    ///
    /// Returns `None` when neither a raw query nor a selection and FROM list
    /// are configured.
    pub fn select_statement(&self) -> Result<Option<(String, Vec<Value>)>> {
        let meta = self.db.metadata();
        let mut sql = SqlText::new();

        if let Some(query) = &self.query {
            if self.filters.is_empty() {
                sql.push_with_parameters(query, &self.parameters);
            } else {
                sql.push("SELECT * FROM (\n")
                    .push_with_parameters(query, &self.parameters)
                    .push("\n) rs\n WHERE ");
                self.filters.compile(&mut sql)?;
            }
        } else if let (Some(selection), Some(from)) = (&self.selection, &self.from_tables) {
            sql.push("SELECT ")
                .push_with_parameters(selection, &self.parameters)
                .push("\n  FROM ")
                .push_with_parameters(from, &self.parameters);
            if self.config.lock_for_update {
                let clause = meta.for_update_clause(self.config.lock_wait);
                if !clause.is_empty() {
                    sql.push(" ").push(&clause);
                }
            }
            match (&self.where_condition, self.filters.is_empty()) {
                (Some(condition), true) => {
                    sql.push("\n WHERE ").push_with_parameters(condition, &self.parameters);
                }
                (Some(condition), false) => {
                    sql.push("\n WHERE (")
                        .push_with_parameters(condition, &self.parameters)
                        .push(")\n   AND (");
                    self.filters.compile(&mut sql)?;
                    sql.push(")");
                }
                (None, false) => {
                    sql.push("\n WHERE ");
                    self.filters.compile(&mut sql)?;
                }
                (None, true) => {}
            }
            if let Some(group_by) = &self.group_by {
                sql.push("\n GROUP BY ").push(group_by);
            }
            if let Some(havings) = &self.havings {
                sql.push("\nHAVING ").push_with_parameters(havings, &self.parameters);
            }
            if let Some(order_by) = &self.order_by {
                sql.push("\n ORDER BY ").push(order_by);
            }
        } else {
            return Ok(None);
        }

        let (text, params) = sql.into_parts();
        let mut text = meta.top_n_rows_clause(&text, self.top, self.skip);
        if self.config.lock_for_update {
            let trailer = meta.for_update_trailer(self.config.lock_wait);
            if !trailer.is_empty() {
                text.push('\n');
                text.push_str(&trailer);
            }
        }
        Ok(Some((text, params)))
    }

    // =========================================================================
    // Reading
    // =========================================================================

    /// Discards the current contents and reads the configured query.
    ///
    /// Returns `Ok(false)` when no query is configured.
    pub fn open(&mut self) -> Result<bool> {
        self.read(false)
    }

    /// Sets a raw query and opens it.
    pub fn open_query(&mut self, sql: impl Into<String>) -> Result<bool> {
        self.set_query(sql);
        self.read(false)
    }

    /// Reads the configured query into the existing contents.
    ///
    /// The result must have exactly the columns already held; otherwise the
    /// dataset is closed and [`Error::SchemaMismatch`] returned. On a closed
    /// dataset this is [`open`](Dataset::open).
    pub fn append(&mut self) -> Result<bool> {
        self.read(true)
    }

    /// Sets a raw query and appends its result.
    pub fn append_query(&mut self, sql: impl Into<String>) -> Result<bool> {
        self.set_query(sql);
        self.read(true)
    }

    fn read(&mut self, append: bool) -> Result<bool> {
        if !self.has_query() {
            tracing::debug!(dataset = %self.name, "no query configured");
            return Ok(false);
        }
        let append = append && self.open;

        if append {
            if self.config.isolated {
                self.discard_clean_rows();
                self.skip += self.last_read;
            }
        } else {
            if self.has_pending_changes() {
                tracing::warn!(dataset = %self.name, "reopening discards pending changes");
            }
            self.close();
        }

        if self.primary_key.is_empty() && self.primary_table.is_some() {
            self.resolve_primary_key()?;
        }

        let Some((text, params)) = self.select_statement()? else {
            return Ok(false);
        };

        let db = self.db;
        let mut query = db.query();
        for param in params {
            query.add_parameter(param);
        }
        if let Some(hook) = self.cancel_hook.as_mut() {
            if let Some(handle) = query.cancel_handle() {
                hook(handle);
            }
        }

        let started = Instant::now();
        query.execute(&text)?;

        let columns: Vec<(String, ValueType)> = (0..query.column_count())
            .map(|i| (query.column_name(i).unwrap_or_default(), query.column_type(i)))
            .collect();
        if append && !self.columns.is_empty() {
            if let Some(detail) = schema_difference(&self.columns, &columns) {
                tracing::warn!(dataset = %self.name, %detail, "append result does not match schema");
                self.close();
                return Err(Error::SchemaMismatch {
                    dataset: self.name.clone(),
                    detail,
                });
            }
        } else {
            self.columns = columns;
        }

        let key_columns = self.key_column_indexes();
        let mut read = 0;
        let mut skipped = 0;
        while query.advance()? {
            if let Some(budget) = self.config.time_budget {
                let elapsed = started.elapsed();
                if elapsed >= budget {
                    tracing::warn!(dataset = %self.name, ?elapsed, ?budget, rows = read, "time budget exceeded");
                    self.close();
                    return Err(Error::TimeBudgetExceeded {
                        dataset: self.name.clone(),
                        elapsed,
                        budget,
                    });
                }
            }
            read += 1;

            let row = Row::from_values((0..self.columns.len()).map(|i| query.column(i)));
            let key = key_columns.as_deref().and_then(|cols| index_key(&row, cols));
            if let Some(key) = &key {
                if self.objects.contains_key(key) {
                    skipped += 1;
                    continue;
                }
            }
            let id = self.rows.push(row);
            if let Some(key) = key {
                self.objects.insert(key, id);
            }
        }

        if skipped > 0 {
            tracing::debug!(dataset = %self.name, skipped, "duplicate keys skipped");
        }
        self.last_read = read;
        self.skipped_duplicates = skipped;
        self.open = true;
        self.status.insert(RecordStatus::SELECTED);
        if self.cursor < 0 && !self.rows.is_empty() {
            self.cursor = 0;
        }
        tracing::debug!(dataset = %self.name, read, rows = self.rows.len(), append, "dataset read");
        Ok(true)
    }

    /// Drops every row without pending changes.
    fn discard_clean_rows(&mut self) {
        let clean: Vec<RowId> = self
            .rows
            .iter()
            .filter(|(_, row)| !row.is_modified())
            .map(|(id, _)| id)
            .collect();
        for id in clean {
            self.rows.remove(id);
        }
        self.reindex();
        self.clamp_cursor();
    }

    // =========================================================================
    // Primary Key
    // =========================================================================

    /// Makes sure the key columns are known, asking the database if needed.
    ///
    /// Returns `false` when there is no primary table or the database reports
    /// no key for it.
    pub fn resolve_primary_key(&mut self) -> Result<bool> {
        if !self.primary_key.is_empty() {
            return Ok(true);
        }
        let Some(table) = self.primary_table.clone() else {
            return Ok(false);
        };
        match self.db.metadata().primary_key_info(&table)? {
            Some((constraint, columns)) if !columns.is_empty() => {
                tracing::debug!(dataset = %self.name, %table, %constraint, ?columns, "primary key discovered");
                self.primary_key = columns;
                self.reindex();
                Ok(true)
            }
            _ => {
                tracing::debug!(dataset = %self.name, %table, "no primary key");
                Ok(false)
            }
        }
    }

    /// Positions of the key columns, if every one of them is a column.
    pub(crate) fn key_column_indexes(&self) -> Option<Vec<usize>> {
        if self.primary_key.is_empty() {
            return None;
        }
        self.primary_key
            .iter()
            .map(|name| name.index_in(&self.columns))
            .collect()
    }

    /// Rebuilds the key index from the current rows.
    pub fn reindex(&mut self) {
        self.objects.clear();
        let Some(key_columns) = self.key_column_indexes() else {
            return;
        };
        for (id, row) in self.rows.iter() {
            if let Some(key) = index_key(row, &key_columns) {
                self.objects.entry(key).or_insert(id);
            }
        }
    }

    /// Moves one row's index entry to the key it holds now.
    ///
    /// A key already indexed for another row keeps pointing there.
    fn reindex_row(&mut self, row: RowId) {
        self.objects.retain(|_, id| *id != row);
        let Some(key_columns) = self.key_column_indexes() else {
            return;
        };
        if let Some(key) = self.rows.get(row).and_then(|r| index_key(r, &key_columns)) {
            self.objects.entry(key).or_insert(row);
        }
    }

    fn is_key_column(&self, index: usize) -> bool {
        self.key_column_indexes()
            .is_some_and(|indexes| indexes.contains(&index))
    }

    /// The key of a row, with a status describing where the row stands.
    pub fn primary_key_of(&self, row: RowId) -> Option<PrimaryKey> {
        let data = self.rows.get(row)?;
        let mut key = PrimaryKey::new(self.primary_key.iter().cloned());
        let Some(indexes) = self.key_column_indexes() else {
            key.set_status(KeyStatus::Unknown);
            return Some(key);
        };
        for i in &indexes {
            key.add_value(data.field(*i).cloned().unwrap_or_default(), false);
        }
        if data.status().contains(RecordStatus::INSERTED) {
            let generated_pending = data
                .generator()
                .and_then(|g| data.field(g))
                .is_some_and(Value::is_null);
            key.set_status(if generated_pending {
                KeyStatus::AsyncCreate
            } else if key.is_complete() {
                KeyStatus::Created
            } else {
                KeyStatus::Empty
            });
        } else {
            key.set_status(KeyStatus::Value);
        }
        Some(key)
    }

    // =========================================================================
    // Finding
    // =========================================================================

    /// Looks a row up by primary key.
    ///
    /// Key columns are discovered first if needed; without them nothing is
    /// found.
    pub fn find_object_record(&mut self, key: &PrimaryKey) -> Result<Option<RowId>> {
        if !self.resolve_primary_key()? {
            return Ok(None);
        }
        let values: Vec<&Value> = key.values().iter().collect();
        if values.len() != self.primary_key.len() {
            return Ok(None);
        }
        let found = IndexKey::from_values(&values).and_then(|k| self.objects.get(&k).copied());
        if found.is_none() {
            tracing::trace!(dataset = %self.name, key = %key.get_condition(), "key not found");
        }
        Ok(found)
    }

    /// Like [`find_object_record`](Dataset::find_object_record), returning
    /// the row's position.
    pub fn find_object_rec_num(&mut self, key: &PrimaryKey) -> Result<Option<usize>> {
        Ok(self
            .find_object_record(key)?
            .and_then(|id| self.rows.position(id)))
    }

    /// First row matching `filters`.
    pub fn find_object_filter(&self, filters: &FilterSet) -> Result<Option<RowId>> {
        if let Some(found) = self.find_by_key_filter(filters) {
            return Ok(found);
        }
        for (id, row) in self.rows.iter() {
            if filters.match_record(&self.view(row))? {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    /// Every row matching `filters`, in dataset order.
    pub fn find_record_set(&self, filters: &FilterSet) -> Result<Vec<RowId>> {
        if let Some(found) = self.find_by_key_filter(filters) {
            return Ok(found.into_iter().collect());
        }
        let mut found = Vec::new();
        for (id, row) in self.rows.iter() {
            if filters.match_record(&self.view(row))? {
                found.push(id);
            }
        }
        Ok(found)
    }

    /// A lone `key = <integer>` filter on a single-column key goes straight
    /// to the index.
    fn find_by_key_filter(&self, filters: &FilterSet) -> Option<Option<RowId>> {
        let [filter] = filters.filters() else {
            return None;
        };
        let [key_column] = self.primary_key.as_slice() else {
            return None;
        };
        let plain_equal = filter.operator() == Operator::Equal
            && !filter.is_negated()
            && !filter.has_function()
            && filter.second_field().is_none()
            && filter.field().eq_ignore_ascii_case(key_column);
        match (plain_equal, filter.values()) {
            (true, [Value::Integer(i)]) if self.key_column_indexes().is_some() => {
                Some(self.objects.get(&IndexKey::Fast(*i)).copied())
            }
            _ => None,
        }
    }

    pub(crate) fn view<'a>(&'a self, row: &'a Row) -> RowView<'a> {
        RowView {
            columns: &self.columns,
            row,
        }
    }

    // =========================================================================
    // Row and Field Access
    // =========================================================================

    pub fn columns(&self) -> &[(String, ValueType)] {
        &self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        name.index_in(&self.columns)
    }

    pub fn column_name(&self, index: usize) -> Option<&str> {
        self.columns.get(index).map(|(name, _)| name.as_str())
    }

    pub fn column_type(&self, index: usize) -> Option<ValueType> {
        self.columns.get(index).map(|(_, ty)| *ty)
    }

    pub fn row(&self, id: RowId) -> Option<&Row> {
        self.rows.get(id)
    }

    /// Handle of the row at `position`.
    pub fn row_id(&self, position: usize) -> Option<RowId> {
        self.rows.id_at(position)
    }

    pub fn row_ids(&self) -> &[RowId] {
        self.rows.ids()
    }

    pub fn rows(&self) -> impl Iterator<Item = (RowId, &Row)> {
        self.rows.iter()
    }

    /// Current value of a field.
    pub fn field<C: ColumnIndex>(&self, row: RowId, column: C) -> Option<&Value> {
        let index = column.index_in(&self.columns)?;
        self.rows.get(row)?.field(index)
    }

    /// Edits a field without marking the row Updated.
    pub fn set_field<C: ColumnIndex>(
        &mut self,
        row: RowId,
        column: C,
        value: impl Into<Value>,
        session: impl Into<SessionId>,
    ) -> bool {
        let Some((index, value)) = self.typed_value(&column, value.into()) else {
            return false;
        };
        let changed = self
            .rows
            .get_mut(row)
            .is_some_and(|r| r.set_field(index, value, session.into()));
        if changed && self.is_key_column(index) {
            self.reindex_row(row);
        }
        changed
    }

    /// Edits a field and marks the row and the dataset Updated.
    ///
    /// Returns whether anything changed. Deleted and non-modifiable rows
    /// refuse edits.
    pub fn modify_field<C: ColumnIndex>(
        &mut self,
        row: RowId,
        column: C,
        value: impl Into<Value>,
        session: impl Into<SessionId>,
    ) -> bool {
        let Some((index, value)) = self.typed_value(&column, value.into()) else {
            return false;
        };
        let changed = self
            .rows
            .get_mut(row)
            .is_some_and(|r| r.modify_field(index, value, session.into()));
        if changed {
            self.status.insert(RecordStatus::UPDATED);
            if self.is_key_column(index) {
                self.reindex_row(row);
            }
        }
        changed
    }

    fn typed_value<C: ColumnIndex>(&self, column: &C, value: Value) -> Option<(usize, Value)> {
        let index = column.index_in(&self.columns)?;
        let ty = self.columns[index].1;
        let value = if ty == ValueType::Null { value } else { value.coerce(ty) };
        Some((index, value))
    }

    /// Whether any row carries pending changes.
    pub fn has_pending_changes(&self) -> bool {
        self.rows.iter().any(|(_, row)| row.is_modified())
    }

    // =========================================================================
    // Inserting and Deleting
    // =========================================================================

    /// Adds a new, empty row marked Inserted and makes it current.
    ///
    /// A closed dataset becomes open.
    pub fn insert_record(&mut self) -> RowId {
        let mut row = Row::new();
        for _ in &self.columns {
            row.add_field(Value::Null, true);
        }
        row.set_status(RecordStatus::INSERTED);
        if let Some(generator) = &self.generator {
            row.set_generator(generator.as_str().index_in(&self.columns));
        }
        let id = self.rows.push(row);
        self.status.insert(RecordStatus::INSERTED);
        self.open = true;
        self.cursor = self.rows.len() as isize - 1;
        id
    }

    /// Sets a field of a row, adding the column if the dataset lacks it.
    ///
    /// A new column is padded with nulls in every other row. On inserted
    /// rows the value becomes the field's original; on other rows it is an
    /// edit by [`SessionId::ORIGINAL`].
    pub fn insert_field(&mut self, row: RowId, name: &str, value: impl Into<Value>) -> bool {
        if !self.rows.contains(row) {
            return false;
        }
        let value = value.into();
        let index = match self.column_index(name) {
            Some(index) => index,
            None => {
                self.columns.push((name.to_string(), value.value_type()));
                let ids: Vec<RowId> = self.rows.ids().to_vec();
                for id in ids {
                    if let Some(r) = self.rows.get_mut(id) {
                        r.add_field(Value::Null, false);
                    }
                }
                if self.generator.as_deref().is_some_and(|g| g.eq_ignore_ascii_case(name)) {
                    let index = self.columns.len() - 1;
                    let ids: Vec<RowId> = self.rows.ids().to_vec();
                    for id in ids {
                        if let Some(r) = self.rows.get_mut(id) {
                            if r.status().contains(RecordStatus::INSERTED) {
                                r.set_generator(Some(index));
                            }
                        }
                    }
                }
                self.columns.len() - 1
            }
        };
        if self.columns[index].1 == ValueType::Null {
            self.columns[index].1 = value.value_type();
        }

        let Some(r) = self.rows.get_mut(row) else {
            return false;
        };
        let changed = if r.status().contains(RecordStatus::INSERTED) {
            r.reset_field(index, value)
        } else {
            let changed = r.modify_field(index, value, SessionId::ORIGINAL);
            if changed {
                self.status.insert(RecordStatus::UPDATED);
            }
            changed
        };
        if changed && self.is_key_column(index) {
            self.reindex_row(row);
        }
        changed
    }

    /// Marks a row for deletion. A row that only exists in memory is
    /// forgotten right away.
    pub fn delete_record(&mut self, row: RowId) -> bool {
        let Some(r) = self.rows.get_mut(row) else {
            return false;
        };
        if r.status().contains(RecordStatus::INSERTED) {
            return self.forget_record(row, true);
        }
        let marked = r.mark_deleted();
        if marked {
            self.status.insert(RecordStatus::DELETED);
        }
        marked
    }

    /// Removes a row from the dataset without touching the database.
    ///
    /// Without `force`, rows with pending changes are kept and `false`
    /// returned.
    pub fn forget_record(&mut self, row: RowId, force: bool) -> bool {
        match self.rows.get(row) {
            None => return false,
            Some(r) if !force && r.is_modified() => return false,
            Some(_) => {}
        }
        self.rows.remove(row);
        self.objects.retain(|_, id| *id != row);
        self.clamp_cursor();
        true
    }

    /// Removes the row with the given key.
    pub fn forget_object(&mut self, key: &PrimaryKey, force: bool) -> Result<bool> {
        Ok(match self.find_object_record(key)? {
            Some(id) => self.forget_record(id, force),
            None => false,
        })
    }

    /// Discards every row and closes the dataset, keeping its schema.
    ///
    /// Without `force`, fails and keeps everything while changes are pending.
    pub fn forget(&mut self, force: bool) -> bool {
        if !force && self.has_pending_changes() {
            return false;
        }
        self.rows.clear();
        self.objects.clear();
        self.cursor = -1;
        self.status = RecordStatus::NONE;
        self.open = false;
        true
    }

    /// Discards every row and the schema.
    pub fn close(&mut self) {
        self.forget(true);
        self.columns.clear();
        self.last_read = 0;
    }

    /// Withdraws every edit of `session`.
    ///
    /// Rows inserted in memory stay inserted. Returns the number of edits
    /// removed.
    pub fn cancel_mutations(&mut self, session: impl Into<SessionId>) -> usize {
        let session = session.into();
        let ids: Vec<RowId> = self.rows.ids().to_vec();
        let mut removed = 0;
        for id in ids {
            if let Some(row) = self.rows.get_mut(id) {
                let inserted = row.status().contains(RecordStatus::INSERTED);
                removed += row.cancel_mutation(session);
                if inserted {
                    let mut status = row.status();
                    status.remove(RecordStatus::SELECTED);
                    status.insert(RecordStatus::INSERTED);
                    row.set_status(status);
                }
            }
        }
        self.recompute_status();
        removed
    }

    /// Recomputes the dataset flags from the rows.
    pub(crate) fn recompute_status(&mut self) {
        let mut status = RecordStatus::NONE;
        if self.open {
            status.insert(RecordStatus::SELECTED);
        }
        for (_, row) in self.rows.iter() {
            let mut pending = row.status();
            pending.remove(RecordStatus::SELECTED);
            status.insert(pending);
        }
        self.status = status;
    }

    pub(crate) fn clamp_cursor(&mut self) {
        let last = self.rows.len() as isize - 1;
        if self.cursor > last {
            self.cursor = last;
        }
        if self.cursor < 0 && last >= 0 {
            self.cursor = 0;
        }
    }

    // =========================================================================
    // Cursor
    // =========================================================================

    pub fn first(&mut self) -> Option<RowId> {
        self.goto(0)
    }

    pub fn last(&mut self) -> Option<RowId> {
        let last = self.rows.len().checked_sub(1)?;
        self.goto(last)
    }

    pub fn next(&mut self) -> Option<RowId> {
        let next = usize::try_from(self.cursor + 1).ok()?;
        self.goto(next)
    }

    pub fn prev(&mut self) -> Option<RowId> {
        let prev = usize::try_from(self.cursor - 1).ok()?;
        self.goto(prev)
    }

    /// Moves to `position`. Out of range leaves the cursor where it was.
    pub fn goto(&mut self, position: usize) -> Option<RowId> {
        let id = self.rows.id_at(position)?;
        self.cursor = position as isize;
        Some(id)
    }

    pub fn current(&self) -> Option<RowId> {
        self.current_position().and_then(|p| self.rows.id_at(p))
    }

    pub fn current_position(&self) -> Option<usize> {
        usize::try_from(self.cursor).ok()
    }

    pub fn is_first(&self) -> bool {
        self.cursor == 0
    }

    pub fn is_last(&self) -> bool {
        !self.rows.is_empty() && self.cursor == self.rows.len() as isize - 1
    }

    // =========================================================================
    // Aggregates
    // =========================================================================

    /// Count, sum, min, max and mean over the numeric values of a column.
    ///
    /// Nulls and non-numeric values are skipped. `None` when the column does
    /// not exist or holds no numbers.
    pub fn aggregate<C: ColumnIndex>(&self, column: C) -> Option<Aggregate> {
        let index = column.index_in(&self.columns)?;
        let numbers: Vec<f64> = self
            .rows
            .iter()
            .filter_map(|(_, row)| row.field(index).and_then(Value::as_f64))
            .collect();
        if numbers.is_empty() {
            return None;
        }
        let sum: f64 = numbers.iter().sum();
        Some(Aggregate {
            count: numbers.len(),
            sum,
            min: numbers.iter().copied().fold(f64::INFINITY, f64::min),
            max: numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            mean: sum / numbers.len() as f64,
        })
    }

    /// Appends a fully formed row read from elsewhere, indexing it.
    pub(crate) fn push_loaded_row(&mut self, row: Row) -> bool {
        assert_eq!(
            row.field_count(),
            self.columns.len(),
            "row width must match the dataset schema"
        );
        let key = self
            .key_column_indexes()
            .and_then(|cols| index_key(&row, &cols));
        if let Some(key) = &key {
            if self.objects.contains_key(key) {
                self.skipped_duplicates += 1;
                return false;
            }
        }
        let id = self.rows.push(row);
        if let Some(key) = key {
            self.objects.insert(key, id);
        }
        true
    }

    /// Marks the dataset open after its rows were loaded from elsewhere.
    pub(crate) fn mark_loaded(&mut self) {
        self.open = true;
        self.status.insert(RecordStatus::SELECTED);
        self.cursor = if self.rows.is_empty() { -1 } else { 0 };
    }
}

fn index_key(row: &Row, key_columns: &[usize]) -> Option<IndexKey> {
    let values: Option<Vec<&Value>> = key_columns.iter().map(|i| row.field(*i)).collect();
    IndexKey::from_values(&values?)
}

/// Describes the first difference between two column lists.
fn schema_difference(held: &[(String, ValueType)], read: &[(String, ValueType)]) -> Option<String> {
    if held.len() != read.len() {
        return Some(format!("{} columns read, {} held", read.len(), held.len()));
    }
    held.iter()
        .zip(read)
        .enumerate()
        .find_map(|(i, ((held_name, held_ty), (read_name, read_ty)))| {
            if !held_name.eq_ignore_ascii_case(read_name) {
                Some(format!("column {i} is '{read_name}', expected '{held_name}'"))
            } else if held_ty != read_ty {
                Some(format!("column '{read_name}' is {read_ty}, expected {held_ty}"))
            } else {
                None
            }
        })
}

// =============================================================================
// Tests
// =============================================================================
