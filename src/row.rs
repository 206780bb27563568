//! # Rows
//!
//! A [`Row`] is one record of a dataset: an ordered list of
//! [`MutationStack`] fields plus an aggregate [`RecordStatus`].
//!
//! Rows live in a [`RowArena`] owned by the dataset and are addressed by
//! [`RowId`] handles. A handle carries the generation of its slot, so once a
//! row is removed every handle to it stops resolving, even after the slot is
//! reused by a new row.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use crate::mutation::{MixedMutation, MutationStack, SessionId};
use crate::value::Value;

// =============================================================================
// Record Status
// =============================================================================

/// Status bits of a row, or the union of all row statuses of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RecordStatus(u8);

impl RecordStatus {
    pub const NONE: RecordStatus = RecordStatus(0);
    /// Read from the database (or reduced after a synchronize).
    pub const SELECTED: RecordStatus = RecordStatus(0x01);
    /// Carries field edits.
    pub const UPDATED: RecordStatus = RecordStatus(0x02);
    /// Marked for deletion.
    pub const DELETED: RecordStatus = RecordStatus(0x04);
    /// Created in memory, not yet in the database.
    pub const INSERTED: RecordStatus = RecordStatus(0x08);

    /// The bits that mean "has pending changes".
    pub const PENDING: RecordStatus = RecordStatus(0x02 | 0x04 | 0x08);

    pub fn from_raw(bits: u8) -> Self {
        Self(bits)
    }

    pub fn as_raw(&self) -> u8 {
        self.0
    }

    /// Whether every bit of `other` is set.
    pub fn contains(&self, other: RecordStatus) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether any bit of `other` is set.
    pub fn intersects(&self, other: RecordStatus) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: RecordStatus) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: RecordStatus) {
        self.0 &= !other.0;
    }

    pub fn is_pending(&self) -> bool {
        self.intersects(RecordStatus::PENDING)
    }
}

impl BitOr for RecordStatus {
    type Output = RecordStatus;

    fn bitor(self, rhs: RecordStatus) -> RecordStatus {
        RecordStatus(self.0 | rhs.0)
    }
}

impl BitOrAssign for RecordStatus {
    fn bitor_assign(&mut self, rhs: RecordStatus) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (RecordStatus::SELECTED, "selected"),
            (RecordStatus::UPDATED, "updated"),
            (RecordStatus::DELETED, "deleted"),
            (RecordStatus::INSERTED, "inserted"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect();
        if set.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&set.join("|"))
        }
    }
}

// =============================================================================
// Row
// =============================================================================

/// One record: an ordered list of mutation-stack fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    fields: Vec<MutationStack>,
    status: RecordStatus,
    modifiable: bool,
    generator: Option<usize>,
}

impl Row {
    /// Creates an empty row as read from the database.
    pub fn new() -> Self {
        Self {
            fields: Vec::new(),
            status: RecordStatus::SELECTED,
            modifiable: true,
            generator: None,
        }
    }

    /// Creates a row from a list of original values.
    pub fn from_values(values: impl IntoIterator<Item = Value>) -> Self {
        let mut row = Row::new();
        for value in values {
            row.add_field(value, false);
        }
        row
    }

    /// Appends a field. With `is_insert` the row becomes an insertion.
    pub fn add_field(&mut self, value: Value, is_insert: bool) {
        self.fields.push(MutationStack::new(value));
        if is_insert {
            self.status.insert(RecordStatus::INSERTED);
        }
    }

    /// The current value of field `index`.
    pub fn field(&self, index: usize) -> Option<&Value> {
        self.fields.get(index).map(MutationStack::current)
    }

    /// The original value of field `index`.
    pub fn original(&self, index: usize) -> Option<&Value> {
        self.fields.get(index).map(MutationStack::original)
    }

    pub fn mutation_stack(&self, index: usize) -> Option<&MutationStack> {
        self.fields.get(index)
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Current values of all fields, in column order.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.fields.iter().map(MutationStack::current)
    }

    /// Records an edit without raising the Updated status.
    ///
    /// Returns whether the field actually changed; an out-of-range index
    /// changes nothing.
    pub fn set_field(&mut self, index: usize, value: Value, session: SessionId) -> bool {
        match self.fields.get_mut(index) {
            Some(field) => field.mutate(value, session),
            None => false,
        }
    }

    /// Records an edit and marks the row Updated.
    ///
    /// Non-modifiable and deleted rows refuse edits.
    pub fn modify_field(&mut self, index: usize, value: Value, session: SessionId) -> bool {
        if !self.modifiable || self.status.contains(RecordStatus::DELETED) {
            return false;
        }
        let changed = self.set_field(index, value, session);
        if changed {
            self.status.insert(RecordStatus::UPDATED);
        }
        changed
    }

    /// Overwrites the original value of a field, dropping its history.
    ///
    /// Used to fill in the values of rows that do not exist in the database
    /// yet, where there is nothing to conflict with.
    pub fn reset_field(&mut self, index: usize, value: Value) -> bool {
        match self.fields.get_mut(index) {
            Some(field) => {
                field.reset(value);
                true
            }
            None => false,
        }
    }

    /// Whether field `index` carries edits above its original value.
    pub fn is_field_modified(&self, index: usize) -> bool {
        self.fields.get(index).is_some_and(MutationStack::is_modified)
    }

    /// Classifies the edits of the whole row as seen from `session`.
    pub fn mixed_mutations(&self, session: SessionId) -> MixedMutation {
        let mut result = MixedMutation::NoMutation;
        for field in &self.fields {
            result = result.combine(field.mixed_mutations(session));
            if result == MixedMutation::Mixed {
                break;
            }
        }
        result
    }

    /// Removes every edit of `session` from every field.
    ///
    /// The pending status is cleared only when no edits remain on the row.
    /// Returns the number of edits removed.
    pub fn cancel_mutation(&mut self, session: SessionId) -> usize {
        let removed: usize = self.fields.iter_mut().map(|f| f.cancel(session)).sum();
        if !self.fields.iter().any(MutationStack::is_modified) {
            self.status.remove(RecordStatus::PENDING);
            self.status.insert(RecordStatus::SELECTED);
        }
        removed
    }

    /// Makes the current values the new originals and resets the status.
    pub fn reduce(&mut self) {
        for field in &mut self.fields {
            field.reduce();
        }
        self.status = RecordStatus::SELECTED;
    }

    pub fn status(&self) -> RecordStatus {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: RecordStatus) {
        self.status = status;
    }

    /// Marks the row for deletion. Returns `false` if it already was.
    pub fn mark_deleted(&mut self) -> bool {
        if self.status.contains(RecordStatus::DELETED) {
            return false;
        }
        self.status.insert(RecordStatus::DELETED);
        true
    }

    /// Whether the row carries Inserted, Updated or Deleted status.
    pub fn is_modified(&self) -> bool {
        self.status.is_pending()
    }

    pub fn is_modifiable(&self) -> bool {
        self.modifiable
    }

    pub fn set_modifiable(&mut self, modifiable: bool) {
        self.modifiable = modifiable;
    }

    /// Index of the column whose value the database generates on insert.
    pub fn generator(&self) -> Option<usize> {
        self.generator
    }

    pub fn set_generator(&mut self, column: Option<usize>) {
        self.generator = column;
    }
}

impl Default for Row {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Row Arena
// =============================================================================

/// Stable handle to a row of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowId {
    slot: u32,
    generation: u32,
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row#{}.{}", self.slot, self.generation)
    }
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    row: Option<Row>,
}

/// Ordered, handle-addressed storage for the rows of a dataset.
///
/// Iteration order is insertion order; removal keeps the order of the
/// remaining rows. Freed slots are reused with a bumped generation.
#[derive(Debug, Clone, Default)]
pub struct RowArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    order: Vec<RowId>,
}

impl RowArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn push(&mut self, row: Row) -> RowId {
        let id = match self.free.pop() {
            Some(slot) => {
                let entry = &mut self.slots[slot as usize];
                entry.generation = entry.generation.wrapping_add(1);
                entry.row = Some(row);
                RowId {
                    slot,
                    generation: entry.generation,
                }
            }
            None => {
                let slot = u32::try_from(self.slots.len()).expect("row arena exceeds u32 slots");
                self.slots.push(Slot {
                    generation: 0,
                    row: Some(row),
                });
                RowId {
                    slot,
                    generation: 0,
                }
            }
        };
        self.order.push(id);
        id
    }

    pub fn get(&self, id: RowId) -> Option<&Row> {
        self.slots
            .get(id.slot as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.row.as_ref())
    }

    pub fn get_mut(&mut self, id: RowId) -> Option<&mut Row> {
        self.slots
            .get_mut(id.slot as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.row.as_mut())
    }

    pub fn contains(&self, id: RowId) -> bool {
        self.get(id).is_some()
    }

    /// Removes a row; its handle and every copy of it stop resolving.
    pub fn remove(&mut self, id: RowId) -> Option<Row> {
        let slot = self
            .slots
            .get_mut(id.slot as usize)
            .filter(|s| s.generation == id.generation)?;
        let row = slot.row.take()?;
        self.free.push(id.slot);
        self.order.retain(|other| *other != id);
        Some(row)
    }

    pub fn clear(&mut self) {
        for id in std::mem::take(&mut self.order) {
            if let Some(slot) = self.slots.get_mut(id.slot as usize) {
                slot.row = None;
                self.free.push(id.slot);
            }
        }
    }

    /// Handle of the row at `position` in dataset order.
    pub fn id_at(&self, position: usize) -> Option<RowId> {
        self.order.get(position).copied()
    }

    /// Position of a row in dataset order.
    pub fn position(&self, id: RowId) -> Option<usize> {
        self.order.iter().position(|other| *other == id)
    }

    /// Handles in dataset order.
    pub fn ids(&self) -> &[RowId] {
        &self.order
    }

    /// Rows in dataset order, with their handles.
    pub fn iter(&self) -> impl Iterator<Item = (RowId, &Row)> {
        self.order
            .iter()
            .filter_map(move |id| self.get(*id).map(|row| (*id, row)))
    }
}

// =============================================================================
// Tests
// =============================================================================
