//! # Error Handling for recordset
//!
//! A single error enum ([`Error`]) covers every failure mode that reaches a
//! caller. The categories mirror what a caller does about them:
//!
//! | Category | Variants | Typical Response |
//! |----------|----------|------------------|
//! | Conflict | `MixedMutations` | Resolve the other session's edits, retry |
//! | Schema | `SchemaMismatch` | Reopen the dataset with a fresh query |
//! | Budget | `TimeBudgetExceeded` | Narrow the query or raise the budget |
//! | Filter | `Filter(..)` | Fix the filter definition |
//! | Backend | `Sqlite`, `Xml`, `Io` | Log and investigate |
//!
//! Configuration problems (no query, no primary table, undiscoverable primary
//! key) are not errors at all: the affected operations return `Ok(false)` and
//! leave the dataset untouched.

use std::time::Duration;

use thiserror::Error;

// =============================================================================
// Error Type
// =============================================================================

/// All errors that can occur in recordset operations.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Conflict Errors
    // =========================================================================

    /// A row carries edits from the synchronizing session and from another
    /// session at the same time.
    ///
    /// # When This Happens
    ///
    /// Two sessions edited the same row (not necessarily the same field) and
    /// one of them calls `synchronize`. Writing the row would publish the other
    /// session's tentative edits, so the whole synchronize call is refused.
    ///
    /// # Recovery
    ///
    /// Nothing was written and the dataset status is unchanged. Cancel one of
    /// the sessions' mutations or let the other session synchronize first.
    #[error("mixed mutations on row {row} of dataset '{dataset}': session {session} cannot synchronize")]
    MixedMutations {
        /// Name of the dataset being synchronized
        dataset: String,
        /// Position of the conflicting row
        row: usize,
        /// The session that attempted to synchronize
        session: u32,
    },

    // =========================================================================
    // Read Errors (dataset is closed as a side effect)
    // =========================================================================

    /// An `append` read a result set whose columns differ from the columns the
    /// dataset already holds.
    #[error("schema mismatch in dataset '{dataset}': {detail}")]
    SchemaMismatch {
        /// Name of the dataset
        dataset: String,
        /// Which column differed and how
        detail: String,
    },

    /// Reading the result set took longer than the configured budget.
    #[error("time budget exceeded for dataset '{dataset}': {elapsed:?} > {budget:?}")]
    TimeBudgetExceeded {
        /// Name of the dataset
        dataset: String,
        /// Time spent when the overrun was detected
        elapsed: Duration,
        /// The configured budget
        budget: Duration,
    },

    // =========================================================================
    // Filter Errors
    // =========================================================================

    /// A filter could not be compiled to SQL or matched against a row.
    #[error("filter error: {0}")]
    Filter(#[from] FilterError),

    // =========================================================================
    // Backend Errors
    // =========================================================================

    /// SQLite operation failed.
    ///
    /// Wraps any error from the `rusqlite` crate raised by the bundled SQLite
    /// backend. Other backends map their failures onto the variants above or
    /// onto this one.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// XML reading or writing failed.
    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// A persisted dataset document is well-formed XML but not a dataset.
    #[error("invalid dataset document: {0}")]
    InvalidXml(String),

    /// File I/O failed while saving or loading a dataset.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Problems with a filter or its function decoration.
///
/// Kept apart from [`Error`] so callers that build filters from user input can
/// match on exactly what was wrong with it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    /// The operator received the wrong number of operand values.
    #[error("operator {operator} on '{field}' expects {expected} value(s), got {actual}")]
    Arity {
        field: String,
        operator: &'static str,
        expected: &'static str,
        actual: usize,
    },

    /// A function received the wrong number of argument values.
    #[error("function {function} expects {expected} argument value(s), got {actual}")]
    FunctionArity {
        function: &'static str,
        expected: usize,
        actual: usize,
    },

    /// EXTRACT, TIMESTAMPADD or TIMESTAMPDIFF got a part it does not know.
    #[error("unknown date part '{0}'")]
    UnknownPart(String),

    /// EXTRACT, TIMESTAMPADD or TIMESTAMPDIFF was used without its part.
    #[error("function {0} requires a date part")]
    MissingPart(&'static str),

    /// LIKE operators only work on text operands.
    #[error("LIKE on '{0}' requires a text operand")]
    LikeNotText(String),

    /// The filter cannot be evaluated in memory.
    #[error("cannot match in memory: {0}")]
    Unsupported(String),

    /// The filter names a column the row does not have.
    #[error("unknown column '{0}'")]
    UnknownColumn(String),
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A `Result` type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Verify error messages are formatted correctly.
    #[test]
    fn test_error_display() {
        let mixed = Error::MixedMutations {
            dataset: "persons".to_string(),
            row: 3,
            session: 5,
        };
        assert_eq!(
            mixed.to_string(),
            "mixed mutations on row 3 of dataset 'persons': session 5 cannot synchronize"
        );

        let mismatch = Error::SchemaMismatch {
            dataset: "persons".to_string(),
            detail: "column 1 is 'NAME', expected 'TITLE'".to_string(),
        };
        assert_eq!(
            mismatch.to_string(),
            "schema mismatch in dataset 'persons': column 1 is 'NAME', expected 'TITLE'"
        );
    }

    #[test]
    fn test_filter_error_wraps() {
        let err: Error = FilterError::LikeNotText("age".to_string()).into();
        assert!(matches!(err, Error::Filter(FilterError::LikeNotText(_))));
        assert_eq!(
            err.to_string(),
            "filter error: LIKE on 'age' requires a text operand"
        );
    }

    /// Verify that rusqlite errors convert automatically.
    #[test]
    fn test_sqlite_error_conversion() {
        let sqlite_err = rusqlite::Error::InvalidParameterName("test".to_string());
        let our_err: Error = sqlite_err.into();

        assert!(matches!(our_err, Error::Sqlite(_)));
        assert!(our_err.to_string().contains("sqlite error"));
    }
}
