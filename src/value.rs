//! # Scalar Values
//!
//! [`Value`] is the narrow scalar type stored in every field of a
//! [`Row`](crate::row::Row). It deliberately offers only what the cache needs:
//!
//! - **Comparison**: equality and ordering, with integers and reals compared
//!   numerically
//! - **String form**: a stable textual rendering used for key strings, LIKE
//!   matching and the XML format
//! - **Null test** and a [`ValueType`] tag
//! - **Typed getters** (`as_i64`, `as_f64`, `as_str`, `as_blob`)
//!
//! Arithmetic between values is out of scope; the database does that.

use std::cmp::Ordering;
use std::fmt;

use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};

// =============================================================================
// Value Type
// =============================================================================

/// The type tag of a [`Value`] or of a result-set column.
///
/// The numeric codes follow the ODBC SQL type numbering so persisted datasets
/// stay readable by tools that know those codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Null,
    Integer,
    Real,
    Text,
    Blob,
}

impl ValueType {
    /// Numeric type code used in the persisted XML format.
    pub fn code(self) -> i32 {
        match self {
            ValueType::Null => 0,
            ValueType::Integer => 4,
            ValueType::Real => 8,
            ValueType::Text => 12,
            ValueType::Blob => -3,
        }
    }

    /// Human-readable type name used in the persisted XML format.
    pub fn name(self) -> &'static str {
        match self {
            ValueType::Null => "NULL",
            ValueType::Integer => "INTEGER",
            ValueType::Real => "DOUBLE",
            ValueType::Text => "VARCHAR",
            ValueType::Blob => "VARBINARY",
        }
    }

    /// Inverse of [`ValueType::code`].
    pub fn from_code(code: i32) -> Option<ValueType> {
        match code {
            0 => Some(ValueType::Null),
            4 => Some(ValueType::Integer),
            8 => Some(ValueType::Real),
            12 => Some(ValueType::Text),
            -3 => Some(ValueType::Blob),
            _ => None,
        }
    }

    /// Maps a declared SQL column type onto a value type.
    ///
    /// Follows SQLite's affinity rules: anything containing `INT` is an
    /// integer, `CHAR`/`CLOB`/`TEXT` are text, `BLOB` is binary and
    /// `REAL`/`FLOA`/`DOUB`/`NUMERIC`/`DECIMAL` are reals. Date and time
    /// columns and unknown declarations are treated as text.
    pub fn from_decl_type(decl: &str) -> ValueType {
        let upper = decl.to_ascii_uppercase();
        if upper.contains("INT") {
            ValueType::Integer
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            ValueType::Text
        } else if upper.contains("BLOB") || upper.contains("BINARY") {
            ValueType::Blob
        } else if upper.contains("REAL")
            || upper.contains("FLOA")
            || upper.contains("DOUB")
            || upper.contains("NUMERIC")
            || upper.contains("DECIMAL")
        {
            ValueType::Real
        } else {
            ValueType::Text
        }
    }

    /// Whether values of this type render without quotes in SQL text.
    pub fn is_numeric(self) -> bool {
        matches!(self, ValueType::Integer | ValueType::Real)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Value
// =============================================================================

/// A typed scalar: one field of one row.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::Integer(_) => ValueType::Integer,
            Value::Real(_) => ValueType::Real,
            Value::Text(_) => ValueType::Text,
            Value::Blob(_) => ValueType::Blob,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer view. Reals convert only when they carry no fraction.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Real(r) if r.fract() == 0.0 => Some(*r as i64),
            _ => None,
        }
    }

    /// Numeric view used by comparisons and aggregates.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Real(r) => Some(*r),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(b) => Some(b),
            _ => None,
        }
    }

    /// Compares two values.
    ///
    /// Integers and reals compare numerically with each other; text compares
    /// lexically; blobs bytewise. Null equals only null and does not order.
    /// Values of unrelated types do not compare.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Blob(a), Value::Blob(b)) => Some(a.cmp(b)),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            },
        }
    }

    /// Converts the value to `target` where a lossless or textual conversion
    /// exists; otherwise returns it unchanged.
    pub fn coerce(self, target: ValueType) -> Value {
        match (self, target) {
            (Value::Null, _) => Value::Null,
            (Value::Integer(i), ValueType::Real) => Value::Real(i as f64),
            (Value::Real(r), ValueType::Integer) if r.fract() == 0.0 => Value::Integer(r as i64),
            (v @ (Value::Integer(_) | Value::Real(_)), ValueType::Text) => Value::Text(v.to_string()),
            (Value::Text(s), ValueType::Integer) => match s.trim().parse::<i64>() {
                Ok(i) => Value::Integer(i),
                Err(_) => Value::Text(s),
            },
            (Value::Text(s), ValueType::Real) => match s.trim().parse::<f64>() {
                Ok(r) => Value::Real(r),
                Err(_) => Value::Text(s),
            },
            (Value::Text(s), ValueType::Blob) => Value::Blob(s.into_bytes()),
            (Value::Blob(b), ValueType::Text) => match String::from_utf8(b) {
                Ok(s) => Value::Text(s),
                Err(e) => Value::Blob(e.into_bytes()),
            },
            (v, _) => v,
        }
    }

    /// Parses the string form produced by `Display` back into a value.
    ///
    /// Returns `None` when `text` is not a valid rendering of `ty`.
    pub fn parse(ty: ValueType, text: &str) -> Option<Value> {
        match ty {
            ValueType::Null => Some(Value::Null),
            ValueType::Integer => text.trim().parse().ok().map(Value::Integer),
            ValueType::Real => text.trim().parse().ok().map(Value::Real),
            ValueType::Text => Some(Value::Text(text.to_string())),
            ValueType::Blob => decode_hex(text.trim()).map(Value::Blob),
        }
    }
}

impl fmt::Display for Value {
    /// The string form: empty for null, decimal numbers, raw text and
    /// uppercase hex for blobs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Real(r) => write!(f, "{r}"),
            Value::Text(s) => f.write_str(s),
            Value::Blob(b) => {
                for byte in b {
                    write!(f, "{byte:02X}")?;
                }
                Ok(())
            }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.compare(other)
    }
}

fn decode_hex(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(text.get(i..i + 2)?, 16).ok())
        .collect()
}

// =============================================================================
// Conversions
// =============================================================================

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(v: ValueRef<'_>) -> Self {
        match v {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(r) => Value::Real(r),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Integer(i) => ToSqlOutput::from(*i),
            Value::Real(r) => ToSqlOutput::from(*r),
            Value::Text(s) => ToSqlOutput::from(s.as_str()),
            Value::Blob(b) => ToSqlOutput::from(b.as_slice()),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_cross_type_equality() {
        assert_eq!(Value::Integer(2), Value::Real(2.0));
        assert!(Value::Integer(2) < Value::Real(2.5));
        assert_ne!(Value::Integer(2), Value::from("2"));
    }

    #[test]
    fn test_null_semantics() {
        assert_eq!(Value::Null, Value::Null);
        assert_ne!(Value::Null, Value::Integer(0));
        assert_eq!(Value::Null.partial_cmp(&Value::Integer(0)), None);
        assert_eq!(Value::Null.to_string(), "");
    }

    #[test]
    fn test_display_parse_round_trip() {
        let cases = [
            Value::Integer(-42),
            Value::Real(1.25),
            Value::from("hello <world>"),
            Value::Blob(vec![0x00, 0xAB, 0x7F]),
        ];
        for v in cases {
            let parsed = Value::parse(v.value_type(), &v.to_string()).expect("should parse");
            assert_eq!(parsed, v);
            assert_eq!(parsed.value_type(), v.value_type());
        }
        assert_eq!(Value::Blob(vec![0xAB, 0x01]).to_string(), "AB01");
        assert!(Value::parse(ValueType::Blob, "ABC").is_none());
    }

    #[test]
    fn test_decl_type_affinity() {
        assert_eq!(ValueType::from_decl_type("INTEGER"), ValueType::Integer);
        assert_eq!(ValueType::from_decl_type("bigint"), ValueType::Integer);
        assert_eq!(ValueType::from_decl_type("VARCHAR(40)"), ValueType::Text);
        assert_eq!(ValueType::from_decl_type("DOUBLE PRECISION"), ValueType::Real);
        assert_eq!(ValueType::from_decl_type("DECIMAL(10,2)"), ValueType::Real);
        assert_eq!(ValueType::from_decl_type("BLOB"), ValueType::Blob);
        assert_eq!(ValueType::from_decl_type("DATE"), ValueType::Text);
    }

    #[test]
    fn test_coerce() {
        assert_eq!(Value::Integer(3).coerce(ValueType::Real).value_type(), ValueType::Real);
        assert_eq!(Value::from("17").coerce(ValueType::Integer), Value::Integer(17));
        assert_eq!(Value::from("abc").coerce(ValueType::Integer), Value::from("abc"));
        assert!(Value::Null.coerce(ValueType::Text).is_null());
    }

    #[test]
    fn test_type_codes_round_trip() {
        for ty in [
            ValueType::Null,
            ValueType::Integer,
            ValueType::Real,
            ValueType::Text,
            ValueType::Blob,
        ] {
            assert_eq!(ValueType::from_code(ty.code()), Some(ty));
        }
    }
}
