//! # Master/Detail Associations
//!
//! An [`Association`] links two datasets through pairs of columns: a column
//! of the master (usually its key) and the matching column of the detail.
//! Each pair also carries the value currently being followed.
//!
//! ```text
//!   person (master)            orders (detail)
//!   ┌────┬──────┐              ┌────┬───────────┬───────┐
//!   │ id │ name │ ◄─── pair ───│ id │ person_id │ total │
//!   └────┴──────┘   id = 7     └────┴───────────┴───────┘
//! ```
//!
//! Following the association turns the pairs into an equality
//! [`FilterSet`], installs it on the target dataset, reads the target (open
//! when closed or when a re-filter is requested, append otherwise) and
//! returns the matching rows.
//!
//! The datasets are passed to every call, so an association cannot act
//! without both of them.

use crate::dataset::Dataset;
use crate::error::Result;
use crate::filter::{Filter, FilterSet};
use crate::row::RowId;
use crate::value::Value;

/// Which end of an association a dataset or row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Master,
    Detail,
}

/// One linked column pair and the value being followed.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnPair {
    pub primary: String,
    pub foreign: String,
    pub value: Value,
}

impl ColumnPair {
    fn column(&self, side: Side) -> &str {
        match side {
            Side::Master => &self.primary,
            Side::Detail => &self.foreign,
        }
    }
}

/// Column-pair link between a master and a detail dataset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Association {
    pairs: Vec<ColumnPair>,
}

impl Association {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pair: `primary` on the master, `foreign` on the detail.
    pub fn add_association(
        &mut self,
        primary: impl Into<String>,
        foreign: impl Into<String>,
        value: impl Into<Value>,
    ) -> &mut Self {
        self.pairs.push(ColumnPair {
            primary: primary.into(),
            foreign: foreign.into(),
            value: value.into(),
        });
        self
    }

    pub fn pairs(&self) -> &[ColumnPair] {
        &self.pairs
    }

    /// Sets the followed value of pair `index`.
    pub fn set_value(&mut self, index: usize, value: impl Into<Value>) -> bool {
        match self.pairs.get_mut(index) {
            Some(pair) => {
                pair.value = value.into();
                true
            }
            None => false,
        }
    }

    /// At least one pair, and at least one pair with a value to follow.
    pub fn basic_checks(&self) -> bool {
        !self.pairs.is_empty() && self.pairs.iter().any(|p| !p.value.is_null())
    }

    /// Copies the pair values out of a row of the `side` dataset.
    ///
    /// Returns `false` if the row or one of the columns does not exist; the
    /// pairs found so far keep their new values.
    pub fn take_values_from(&mut self, dataset: &Dataset<'_>, row: RowId, side: Side) -> bool {
        for pair in &mut self.pairs {
            match dataset.field(row, pair.column(side)) {
                Some(value) => pair.value = value.clone(),
                None => return false,
            }
        }
        true
    }

    /// The equality filters selecting the rows of the `side` dataset.
    pub fn filters(&self, side: Side) -> FilterSet {
        self.pairs
            .iter()
            .map(|pair| Filter::equal(pair.column(side), pair.value.clone()))
            .collect()
    }

    /// Reads the master row the pair values point at.
    pub fn follow_to_master(&self, master: &mut Dataset<'_>, refilter: bool) -> Result<Option<RowId>> {
        if !self.basic_checks() {
            return Ok(None);
        }
        let filters = self.filters(Side::Master);
        apply(master, filters.clone(), refilter)?;
        master.find_object_filter(&filters)
    }

    /// Reads every detail row that points at the pair values.
    pub fn follow_to_details(&self, detail: &mut Dataset<'_>, refilter: bool) -> Result<Vec<RowId>> {
        if !self.basic_checks() {
            return Ok(Vec::new());
        }
        let filters = self.filters(Side::Detail);
        apply(detail, filters.clone(), refilter)?;
        detail.find_record_set(&filters)
    }
}

fn apply(target: &mut Dataset<'_>, filters: FilterSet, refilter: bool) -> Result<bool> {
    target.set_filters(filters);
    if !target.is_open() || refilter {
        target.open()
    } else {
        target.append()
    }
}

// =============================================================================
// Tests
// =============================================================================
