//! # Primary Keys
//!
//! A [`PrimaryKey`] names the key columns of a table together with one set of
//! key values. Datasets use it to look rows up and to address rows in the
//! WHERE clauses of generated UPDATE and DELETE statements.
//!
//! ## Fast Path
//!
//! Most tables have a single integer key. For those the key caches the
//! integer itself, and the dataset looks it up in an integer index instead of
//! building a key string.

use crate::sql::quote_literal;
use crate::value::Value;

/// Separator between the stringified values of a compound key.
///
/// Non-printable, so it cannot collide with text that users type.
pub const KEY_SEPARATOR: char = '\u{1}';

/// Where a key stands in the life of its row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum KeyStatus {
    /// No values yet.
    #[default]
    Empty,
    /// Values present; the row exists in the database.
    Value,
    /// A lookup for these values found nothing.
    NotFound,
    /// The row was inserted in memory with a complete key.
    Created,
    /// The row was inserted in memory; the database will generate the key.
    AsyncCreate,
    /// The key columns of the table are not known.
    Unknown,
}

/// Ordered key column names and matching values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PrimaryKey {
    fields: Vec<String>,
    values: Vec<Value>,
    fast: Option<i64>,
    status: KeyStatus,
}

impl PrimaryKey {
    /// Creates a key over the given columns, without values.
    pub fn new<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Self {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Creates a single-column key with its value.
    pub fn single(field: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut key = PrimaryKey::new([field]);
        key.add_value(value.into(), false);
        key
    }

    /// Adds a value to the key.
    ///
    /// With `replace` the existing values are dropped first; otherwise the
    /// value extends a compound key.
    pub fn add_value(&mut self, value: Value, replace: bool) {
        if replace {
            self.values.clear();
        }
        self.values.push(value);
        self.refresh();
    }

    pub fn add_field(&mut self, field: impl Into<String>) {
        self.fields.push(field.into());
        self.refresh();
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn status(&self) -> KeyStatus {
        self.status
    }

    pub fn set_status(&mut self, status: KeyStatus) {
        self.status = status;
    }

    /// The cached single-integer value, if the key is one integer.
    pub fn fast_key(&self) -> Option<i64> {
        self.fast
    }

    /// Whether every key column has a non-null value.
    pub fn is_complete(&self) -> bool {
        !self.fields.is_empty()
            && self.values.len() == self.fields.len()
            && self.values.iter().all(|v| !v.is_null())
    }

    /// The values joined by [`KEY_SEPARATOR`].
    pub fn key_string(&self) -> String {
        key_string(self.values.iter())
    }

    /// Renders `a = 1 AND b = 'x'`, quoting non-numeric values.
    pub fn get_condition(&self) -> String {
        self.fields
            .iter()
            .zip(&self.values)
            .map(|(field, value)| {
                if value.is_null() {
                    format!("{field} IS NULL")
                } else if value.value_type().is_numeric() {
                    format!("{field} = {value}")
                } else {
                    format!("{field} = {}", quote_literal(&value.to_string()))
                }
            })
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    fn refresh(&mut self) {
        self.fast = match self.values.as_slice() {
            [Value::Integer(i)] if self.fields.len() <= 1 => Some(*i),
            _ => None,
        };
        if self.status == KeyStatus::Empty && !self.values.is_empty() {
            self.status = KeyStatus::Value;
        }
    }
}

/// Joins stringified key values with [`KEY_SEPARATOR`].
pub fn key_string<'a>(values: impl IntoIterator<Item = &'a Value>) -> String {
    let mut out = String::new();
    for (i, value) in values.into_iter().enumerate() {
        if i > 0 {
            out.push(KEY_SEPARATOR);
        }
        out.push_str(&value.to_string());
    }
    out
}

// =============================================================================
// Tests
// =============================================================================
