//! # Synchronize
//!
//! Writes the pending changes of one editing session back to the database.
//!
//! ## Algorithm
//!
//! ```text
//! 1. classify   every pending row by mixed_mutations(session)
//!                  OnlyOthers      → skip the row
//!                  only edits outside the update columns → skip the row
//!                  Mixed           → refuse the whole call, nothing written
//!                  No/MyMutation   → write the row
//! 2. write      inside one transaction, constraints deferred:
//!                  DELETEs, then UPDATEs, then INSERTs
//! 3. commit     then reduce written rows, evict deleted rows,
//!                  rebuild the key index and recompute the status
//! ```
//!
//! Any error in step 2 rolls the transaction back (the transaction is
//! dropped uncommitted) and restores the dataset status to what it was.
//!
//! ## Statement Shapes
//!
//! ```text
//! DELETE FROM person
//!  WHERE ID = ?
//!
//! UPDATE person
//!    SET NAME = ?
//!  WHERE ID = ?
//!
//! INSERT INTO person (ID, NAME) VALUES (?, ?)
//! ```
//!
//! Key conditions bind the *original* key values, so a row whose key column
//! was edited is still found. A null key value renders `col IS NULL`.

use crate::dataset::{ColumnIndex, Dataset};
use crate::driver::Query;
use crate::error::{Error, Result};
use crate::mutation::{MixedMutation, SessionId};
use crate::row::{RecordStatus, Row, RowId};
use crate::sql::SqlText;
use crate::value::Value;

/// Rows to write, by statement kind.
#[derive(Debug, Default)]
struct WorkList {
    deletes: Vec<RowId>,
    updates: Vec<RowId>,
    inserts: Vec<RowId>,
}

impl WorkList {
    fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.updates.is_empty() && self.inserts.is_empty()
    }
}

/// A value the database generated for an inserted row.
struct Generated {
    row: RowId,
    column: usize,
    value: Value,
}

impl<'db> Dataset<'db> {
    /// Writes the pending changes of `session` to the primary table.
    ///
    /// Returns `Ok(false)` without side effects when no primary table is set,
    /// or when deletes or updates are pending and the key columns cannot be
    /// discovered or are not all part of the result. Returns
    /// [`Error::MixedMutations`] when a pending row also carries another
    /// session's edits; nothing is written in that case.
    pub fn synchronize(&mut self, session: impl Into<SessionId>) -> Result<bool> {
        let session = session.into();
        let Some(table) = self.qualified_table() else {
            tracing::debug!(dataset = %self.name, "synchronize without primary table");
            return Ok(false);
        };

        let work = self.classify(session)?;
        if work.is_empty() {
            tracing::debug!(dataset = %self.name, %session, "nothing to synchronize");
            return Ok(true);
        }

        let needs_key = !work.deletes.is_empty() || !work.updates.is_empty();
        if needs_key && (!self.resolve_primary_key()? || self.key_column_indexes().is_none()) {
            tracing::debug!(dataset = %self.name, "primary key unavailable, synchronize refused");
            return Ok(false);
        }

        let saved_status = self.status;
        let generated = match self.write(&table, &work) {
            Ok(generated) => generated,
            Err(e) => {
                self.status = saved_status;
                tracing::warn!(dataset = %self.name, %session, error = %e, "synchronize rolled back");
                return Err(e);
            }
        };

        for Generated { row, column, value } in generated {
            if let Some(r) = self.rows.get_mut(row) {
                r.reset_field(column, value);
            }
        }
        for id in &work.deletes {
            self.rows.remove(*id);
        }
        for id in work.updates.iter().chain(&work.inserts) {
            if let Some(r) = self.rows.get_mut(*id) {
                r.reduce();
            }
        }
        self.reindex();
        self.clamp_cursor();
        self.recompute_status();

        tracing::info!(
            dataset = %self.name,
            %session,
            deleted = work.deletes.len(),
            updated = work.updates.len(),
            inserted = work.inserts.len(),
            "synchronized"
        );
        Ok(true)
    }

    /// Sorts pending rows into statement kinds, refusing on mixed edits.
    fn classify(&self, session: SessionId) -> Result<WorkList> {
        let mut work = WorkList::default();
        for (position, (id, row)) in self.rows.iter().enumerate() {
            if !row.is_modified() {
                continue;
            }
            match row.mixed_mutations(session) {
                MixedMutation::OnlyOthers => continue,
                MixedMutation::Mixed => {
                    tracing::warn!(dataset = %self.name, row = position, %session, "mixed mutations");
                    return Err(Error::MixedMutations {
                        dataset: self.name.clone(),
                        row: position,
                        session: session.as_raw(),
                    });
                }
                MixedMutation::NoMutation | MixedMutation::MyMutation => {}
            }
            let status = row.status();
            if status.contains(RecordStatus::DELETED) {
                if !status.contains(RecordStatus::INSERTED) {
                    work.deletes.push(id);
                }
            } else if status.contains(RecordStatus::INSERTED) {
                work.inserts.push(id);
            } else if status.contains(RecordStatus::UPDATED) {
                if self.has_updatable_edit(row) {
                    work.updates.push(id);
                } else {
                    tracing::debug!(dataset = %self.name, row = position, "no updatable fields, edits kept");
                }
            }
        }
        Ok(work)
    }

    /// Runs every statement in one transaction.
    fn write(&self, table: &str, work: &WorkList) -> Result<Vec<Generated>> {
        let db = self.db;
        let mut tx = db.begin(&format!("Synchronize {}", self.name))?;
        tx.defer_constraints()?;
        let mut query = db.query();
        let mut generated = Vec::new();

        for id in &work.deletes {
            let Some(row) = self.rows.get(*id) else { continue };
            let mut sql = SqlText::new();
            sql.push("DELETE FROM ").push(table);
            self.push_key_condition(&mut sql, row);
            run(query.as_mut(), sql)?;
        }

        for id in &work.updates {
            let Some(row) = self.rows.get(*id) else { continue };
            if let Some(sql) = self.update_statement(table, row) {
                run(query.as_mut(), sql)?;
            }
        }

        for id in &work.inserts {
            let Some(row) = self.rows.get(*id) else { continue };
            let mut values: Vec<Value> = row.values().cloned().collect();
            let mut serial = None;
            if let Some(column) = row.generator() {
                if values.get(column).is_some_and(Value::is_null) {
                    let sequence = format!("{table}{}", self.config.sequence_suffix);
                    let value = db.metadata().generate_serial(table, &sequence)?;
                    tracing::debug!(dataset = %self.name, column, %value, "surrogate key generated");
                    values[column] = value.clone();
                    serial = Some((column, value));
                }
            }
            run(query.as_mut(), self.insert_statement(table, &values))?;
            if let Some((column, value)) = serial {
                generated.push(Generated {
                    row: *id,
                    column,
                    value: db.metadata().effective_serial(value)?,
                });
            }
        }

        drop(query);
        tx.commit()?;
        Ok(generated)
    }

    /// ` WHERE k1 = ? AND k2 IS NULL` over the original key values.
    fn push_key_condition(&self, sql: &mut SqlText, row: &Row) {
        sql.push("\n WHERE ");
        for (i, name) in self.primary_key.iter().enumerate() {
            if i > 0 {
                sql.push("\n   AND ");
            }
            let original = name
                .index_in(&self.columns)
                .and_then(|index| row.original(index))
                .cloned()
                .unwrap_or_default();
            sql.push(name);
            if original.is_null() {
                sql.push(" IS NULL");
            } else {
                sql.push(" = ").push_param(original);
            }
        }
    }

    fn is_updatable(&self, column: &str) -> bool {
        self.update_columns.is_empty()
            || self
                .update_columns
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(column))
    }

    fn has_updatable_edit(&self, row: &Row) -> bool {
        self.columns
            .iter()
            .enumerate()
            .any(|(index, (name, _))| row.is_field_modified(index) && self.is_updatable(name))
    }

    /// UPDATE over the modified fields, or `None` if none may be written.
    fn update_statement(&self, table: &str, row: &Row) -> Option<SqlText> {
        let mut sql = SqlText::new();
        sql.push("UPDATE ").push(table).push("\n   SET ");
        let mut any = false;
        for (index, (name, _)) in self.columns.iter().enumerate() {
            if !row.is_field_modified(index) || !self.is_updatable(name) {
                continue;
            }
            if any {
                sql.push(", ");
            }
            sql.push(name)
                .push(" = ")
                .push_param(row.field(index).cloned().unwrap_or_default());
            any = true;
        }
        if !any {
            tracing::debug!(dataset = %self.name, "no updatable fields, row skipped");
            return None;
        }
        self.push_key_condition(&mut sql, row);
        Some(sql)
    }

    fn insert_statement(&self, table: &str, values: &[Value]) -> SqlText {
        let mut names = Vec::new();
        let mut sql_values = SqlText::new();
        for (index, (name, _)) in self.columns.iter().enumerate() {
            let is_key = self
                .primary_key
                .iter()
                .chain(self.generator.as_ref())
                .any(|k| k.eq_ignore_ascii_case(name));
            if !is_key && !self.is_updatable(name) {
                continue;
            }
            if !names.is_empty() {
                sql_values.push(", ");
            }
            names.push(name.as_str());
            sql_values.push_param(values.get(index).cloned().unwrap_or_default());
        }
        let mut sql = SqlText::new();
        sql.push("INSERT INTO ")
            .push(table)
            .push(" (")
            .push(&names.join(", "))
            .push(") VALUES (")
            .append(sql_values)
            .push(")");
        sql
    }
}

fn run(query: &mut dyn Query, sql: SqlText) -> Result<()> {
    let (text, params) = sql.into_parts();
    query.reset_parameters();
    for param in params {
        query.add_parameter(param);
    }
    query.execute(&text)?;
    tracing::debug!(sql = %text, affected = query.rows_affected(), "statement executed");
    Ok(())
}
