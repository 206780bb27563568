//! # SQL Text Assembly
//!
//! [`SqlText`] accumulates statement text together with the values bound to
//! its `?` placeholders, in textual order. Every piece of generated SQL in the
//! crate (SELECT assembly, filter compilation, INSERT/UPDATE/DELETE synthesis)
//! goes through it, so placeholders and bound values cannot drift apart.
//!
//! ## Named Parameters
//!
//! Query text written by users may reference dataset parameters as `$name`.
//! [`SqlText::push_with_parameters`] scans the text character by character,
//! skipping quoted literals and quoted identifiers, and replaces each known
//! `$name` with a `?` bound to the parameter's value. Unknown names are left
//! in the text untouched.

use crate::value::Value;

// =============================================================================
// Parameters
// =============================================================================

/// Named parameter values of a dataset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters {
    entries: Vec<(String, Value)>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a parameter, replacing an existing one of the same name.
    ///
    /// Names compare case-insensitively.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self
            .entries
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// =============================================================================
// SQL Text Builder
// =============================================================================

/// Statement text plus the values bound to its placeholders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlText {
    sql: String,
    params: Vec<Value>,
}

impl SqlText {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends literal text.
    pub fn push(&mut self, text: &str) -> &mut Self {
        self.sql.push_str(text);
        self
    }

    /// Appends a `?` placeholder bound to `value`.
    pub fn push_param(&mut self, value: Value) -> &mut Self {
        self.sql.push('?');
        self.params.push(value);
        self
    }

    /// Appends another fragment, keeping its bound values in order.
    pub fn append(&mut self, other: SqlText) -> &mut Self {
        self.sql.push_str(&other.sql);
        self.params.extend(other.params);
        self
    }

    /// Appends user-written text, replacing `$name` references to known
    /// parameters with bound placeholders.
    pub fn push_with_parameters(&mut self, text: &str, parameters: &Parameters) -> &mut Self {
        let chars: Vec<char> = text.chars().collect();
        let mut quote: Option<char> = None;
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            match quote {
                Some(q) => {
                    // A doubled quote inside a literal closes and reopens it,
                    // which this toggle handles without special casing.
                    if c == q {
                        quote = None;
                    }
                    self.sql.push(c);
                    i += 1;
                }
                None if c == '\'' || c == '"' => {
                    quote = Some(c);
                    self.sql.push(c);
                    i += 1;
                }
                None if c == '$' => {
                    let start = i + 1;
                    let mut end = start;
                    while end < chars.len() && is_name_char(chars[end], end == start) {
                        end += 1;
                    }
                    let name: String = chars[start..end].iter().collect();
                    match parameters.get(&name).filter(|_| !name.is_empty()) {
                        Some(value) => {
                            self.push_param(value.clone());
                        }
                        None => {
                            tracing::debug!(parameter = %name, "unresolved query parameter left as text");
                            self.sql.push('$');
                            self.sql.push_str(&name);
                        }
                    }
                    i = end;
                }
                None => {
                    self.sql.push(c);
                    i += 1;
                }
            }
        }
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }

    pub fn into_parts(self) -> (String, Vec<Value>) {
        (self.sql, self.params)
    }
}

fn is_name_char(c: char, first: bool) -> bool {
    if first {
        c.is_ascii_alphabetic() || c == '_'
    } else {
        c.is_ascii_alphanumeric() || c == '_'
    }
}

/// Quotes text as a SQL string literal, doubling embedded quotes.
pub fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

// =============================================================================
// Tests
// =============================================================================
