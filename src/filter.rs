//! # Filters
//!
//! A [`Filter`] is one typed predicate over a column; a [`FilterSet`] is an
//! ordered list of them. Both compile two ways:
//!
//! - **to SQL**: text with `?` placeholders and bound values, merged into the
//!   WHERE clause of the SELECT a dataset opens with
//! - **to an in-memory test**: evaluated against the live values of a row, so
//!   datasets can search what they already hold
//!
//! ```text
//! FilterSet [ age >= 18 , age < 65 ]   →   age >= ? AND age < ?   [18, 65]
//! FilterSet [ a = 1 , OR , b = 2 ]      →   a = ? OR b = ?          [1, 2]
//! ```
//!
//! ## Chaining
//!
//! Filters join with `AND`. An [`Operator::OrChain`] marker placed between two
//! filters switches that single join to `OR`. Grouping comes from the open and
//! close parenthesis counts carried by the filters themselves; negation puts
//! `NOT` in front of the opening parenthesis.

use crate::error::FilterError;
use crate::sql::SqlText;
use crate::value::Value;

// =============================================================================
// Operators
// =============================================================================

/// Comparison operator of a [`Filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equal,
    NotEqual,
    Greater,
    GreaterEqual,
    Smaller,
    SmallerEqual,
    IsNull,
    IsNotNull,
    /// `LIKE 'value%'`
    LikeBegin,
    /// `LIKE '%value%'`
    LikeMiddle,
    /// `LIKE '%value'`
    LikeEnd,
    In,
    Between,
    Exists,
    /// Marker: the next filter of the set joins with `OR`.
    OrChain,
}

impl Operator {
    pub fn name(self) -> &'static str {
        match self {
            Operator::Equal => "=",
            Operator::NotEqual => "<>",
            Operator::Greater => ">",
            Operator::GreaterEqual => ">=",
            Operator::Smaller => "<",
            Operator::SmallerEqual => "<=",
            Operator::IsNull => "IS NULL",
            Operator::IsNotNull => "IS NOT NULL",
            Operator::LikeBegin | Operator::LikeMiddle | Operator::LikeEnd => "LIKE",
            Operator::In => "IN",
            Operator::Between => "BETWEEN",
            Operator::Exists => "EXISTS",
            Operator::OrChain => "OR",
        }
    }

    fn is_comparison(self) -> bool {
        matches!(
            self,
            Operator::Equal
                | Operator::NotEqual
                | Operator::Greater
                | Operator::GreaterEqual
                | Operator::Smaller
                | Operator::SmallerEqual
        )
    }

    fn is_like(self) -> bool {
        matches!(self, Operator::LikeBegin | Operator::LikeMiddle | Operator::LikeEnd)
    }
}

// =============================================================================
// Scalar Functions
// =============================================================================

const ESCAPE: u8 = 0x01;
const PART: u8 = 0x02;
const FIELD_LAST: u8 = 0x04;

/// Scalar function wrapped around the field of a filter.
///
/// Rendered as an ODBC escape `{fn NAME(field, ?...)}`. Aggregates and TRIM
/// render as plain calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlFunction {
    // String
    Ascii,
    Char,
    Concat,
    Insert,
    Lcase,
    Ucase,
    Left,
    Right,
    Length,
    Locate,
    Ltrim,
    Rtrim,
    Trim,
    Replace,
    Substring,
    // Numeric
    Abs,
    Ceiling,
    Floor,
    Round,
    Mod,
    Sign,
    Sqrt,
    // Date and time
    DayOfMonth,
    DayOfWeek,
    DayOfYear,
    Week,
    Month,
    Quarter,
    Year,
    Hour,
    Minute,
    Second,
    Extract,
    TimestampAdd,
    TimestampDiff,
    // Aggregate
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

impl SqlFunction {
    /// (name, bound argument count, flags)
    fn info(self) -> (&'static str, usize, u8) {
        use SqlFunction::*;
        match self {
            Ascii => ("ASCII", 0, ESCAPE),
            Char => ("CHAR", 0, ESCAPE),
            Concat => ("CONCAT", 1, ESCAPE),
            Insert => ("INSERT", 3, ESCAPE),
            Lcase => ("LCASE", 0, ESCAPE),
            Ucase => ("UCASE", 0, ESCAPE),
            Left => ("LEFT", 1, ESCAPE),
            Right => ("RIGHT", 1, ESCAPE),
            Length => ("LENGTH", 0, ESCAPE),
            Locate => ("LOCATE", 1, ESCAPE | FIELD_LAST),
            Ltrim => ("LTRIM", 0, ESCAPE),
            Rtrim => ("RTRIM", 0, ESCAPE),
            Trim => ("TRIM", 0, 0),
            Replace => ("REPLACE", 2, ESCAPE),
            Substring => ("SUBSTRING", 2, ESCAPE),
            Abs => ("ABS", 0, ESCAPE),
            Ceiling => ("CEILING", 0, ESCAPE),
            Floor => ("FLOOR", 0, ESCAPE),
            Round => ("ROUND", 1, ESCAPE),
            Mod => ("MOD", 1, ESCAPE),
            Sign => ("SIGN", 0, ESCAPE),
            Sqrt => ("SQRT", 0, ESCAPE),
            DayOfMonth => ("DAYOFMONTH", 0, ESCAPE),
            DayOfWeek => ("DAYOFWEEK", 0, ESCAPE),
            DayOfYear => ("DAYOFYEAR", 0, ESCAPE),
            Week => ("WEEK", 0, ESCAPE),
            Month => ("MONTH", 0, ESCAPE),
            Quarter => ("QUARTER", 0, ESCAPE),
            Year => ("YEAR", 0, ESCAPE),
            Hour => ("HOUR", 0, ESCAPE),
            Minute => ("MINUTE", 0, ESCAPE),
            Second => ("SECOND", 0, ESCAPE),
            Extract => ("EXTRACT", 0, ESCAPE | PART),
            TimestampAdd => ("TIMESTAMPADD", 1, ESCAPE | PART),
            TimestampDiff => ("TIMESTAMPDIFF", 1, ESCAPE | PART),
            Count => ("COUNT", 0, 0),
            Sum => ("SUM", 0, 0),
            Min => ("MIN", 0, 0),
            Max => ("MAX", 0, 0),
            Avg => ("AVG", 0, 0),
        }
    }

    pub fn name(self) -> &'static str {
        self.info().0
    }

    /// Number of bound values the function consumes besides the field.
    pub fn arity(self) -> usize {
        self.info().1
    }

    /// Whether the function takes a textual date part.
    pub fn takes_part(self) -> bool {
        self.info().2 & PART != 0
    }

    fn escaped(self) -> bool {
        self.info().2 & ESCAPE != 0
    }

    fn field_last(self) -> bool {
        self.info().2 & FIELD_LAST != 0
    }
}

const EXTRACT_PARTS: &[&str] = &["YEAR", "MONTH", "DAY", "HOUR", "MINUTE", "SECOND"];

const INTERVAL_PARTS: &[&str] = &[
    "SQL_TSI_FRAC_SECOND",
    "SQL_TSI_SECOND",
    "SQL_TSI_MINUTE",
    "SQL_TSI_HOUR",
    "SQL_TSI_DAY",
    "SQL_TSI_WEEK",
    "SQL_TSI_MONTH",
    "SQL_TSI_QUARTER",
    "SQL_TSI_YEAR",
];

/// A function applied to the field of a filter, with its arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    function: SqlFunction,
    part: Option<String>,
    args: Vec<Value>,
}

impl FunctionCall {
    pub fn new(function: SqlFunction, args: Vec<Value>) -> Self {
        Self {
            function,
            part: None,
            args,
        }
    }

    /// A function with a textual date part, such as EXTRACT(YEAR FROM ..).
    pub fn with_part(function: SqlFunction, part: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            function,
            part: Some(part.into()),
            args,
        }
    }

    pub fn function(&self) -> SqlFunction {
        self.function
    }

    /// Checks argument count and date part.
    fn validate(&self) -> Result<Option<&'static str>, FilterError> {
        let function = self.function;
        if self.args.len() != function.arity() {
            return Err(FilterError::FunctionArity {
                function: function.name(),
                expected: function.arity(),
                actual: self.args.len(),
            });
        }
        if !function.takes_part() {
            return Ok(None);
        }
        let part = self
            .part
            .as_deref()
            .ok_or(FilterError::MissingPart(function.name()))?;
        let known = if function == SqlFunction::Extract {
            EXTRACT_PARTS
        } else {
            INTERVAL_PARTS
        };
        known
            .iter()
            .find(|k| k.eq_ignore_ascii_case(part.trim()))
            .map(|k| Some(*k))
            .ok_or_else(|| FilterError::UnknownPart(part.to_string()))
    }

    fn compile(&self, field: &str, out: &mut SqlText) -> Result<(), FilterError> {
        let part = self.validate()?;
        let function = self.function;

        out.push(if function.escaped() { "{fn " } else { "" });
        out.push(function.name()).push("(");
        match (function, part) {
            (SqlFunction::Extract, Some(part)) => {
                out.push(part).push(" FROM ").push(field);
            }
            (_, Some(part)) => {
                out.push(part);
                for arg in &self.args {
                    out.push(", ").push_param(arg.clone());
                }
                out.push(", ").push(field);
            }
            (_, None) if function.field_last() => {
                for arg in &self.args {
                    out.push_param(arg.clone()).push(", ");
                }
                out.push(field);
            }
            (_, None) => {
                out.push(field);
                for arg in &self.args {
                    out.push(", ").push_param(arg.clone());
                }
            }
        }
        out.push(")");
        if function.escaped() {
            out.push("}");
        }
        Ok(())
    }

    /// Applies the function in memory. Only simple string and numeric
    /// functions are supported.
    fn apply(&self, value: &Value) -> Result<Value, FilterError> {
        self.validate()?;
        if value.is_null() {
            return Ok(Value::Null);
        }
        let text = || value.to_string();
        Ok(match self.function {
            SqlFunction::Ucase => Value::Text(text().to_uppercase()),
            SqlFunction::Lcase => Value::Text(text().to_lowercase()),
            SqlFunction::Ltrim => Value::Text(text().trim_start().to_string()),
            SqlFunction::Rtrim => Value::Text(text().trim_end().to_string()),
            SqlFunction::Trim => Value::Text(text().trim().to_string()),
            SqlFunction::Length => Value::Integer(text().chars().count() as i64),
            SqlFunction::Abs => match value {
                Value::Integer(i) => Value::Integer(i.abs()),
                Value::Real(r) => Value::Real(r.abs()),
                _ => return Err(FilterError::Unsupported("ABS on a non-numeric value".into())),
            },
            other => {
                return Err(FilterError::Unsupported(format!(
                    "function {} in memory",
                    other.name()
                )))
            }
        })
    }
}

// =============================================================================
// Sub-queries
// =============================================================================

/// A nested SELECT for EXISTS and IN filters.
///
/// `select` is the head of the statement (`SELECT 1 FROM orders o`); the
/// filters become its WHERE clause.
#[derive(Debug, Clone, PartialEq)]
pub struct SubQuery {
    select: String,
    filters: FilterSet,
}

impl SubQuery {
    pub fn new(select: impl Into<String>, filters: FilterSet) -> Self {
        Self {
            select: select.into(),
            filters,
        }
    }

    fn compile(&self, out: &mut SqlText) -> Result<(), FilterError> {
        out.push(&self.select);
        if !self.filters.is_empty() {
            out.push(" WHERE ");
            self.filters.compile(out)?;
        }
        Ok(())
    }
}

// =============================================================================
// Record Access
// =============================================================================

/// Gives filters access to the live values of one record.
pub trait RecordSource {
    /// The current value of `column`, or `None` if there is no such column.
    fn value(&self, column: &str) -> Option<&Value>;
}

// =============================================================================
// Filter
// =============================================================================

/// One typed predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    field: String,
    operator: Operator,
    values: Vec<Value>,
    function: Option<FunctionCall>,
    field2: Option<String>,
    subquery: Option<SubQuery>,
    expression: Option<String>,
    negate: bool,
    open_paren: u8,
    close_paren: u8,
}

impl Filter {
    /// A filter on `field` with no operand values yet.
    pub fn new(field: impl Into<String>, operator: Operator) -> Self {
        Self {
            field: field.into(),
            operator,
            values: Vec::new(),
            function: None,
            field2: None,
            subquery: None,
            expression: None,
            negate: false,
            open_paren: 0,
            close_paren: 0,
        }
    }

    /// `field <op> value`
    pub fn compare(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Filter::new(field, operator).value(value)
    }

    pub fn equal(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::compare(field, Operator::Equal, value)
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Filter::new(field, Operator::IsNull)
    }

    pub fn between(field: impl Into<String>, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        Filter::new(field, Operator::Between).value(low).value(high)
    }

    pub fn in_list(field: impl Into<String>, values: impl IntoIterator<Item = Value>) -> Self {
        let mut filter = Filter::new(field, Operator::In);
        filter.values.extend(values);
        filter
    }

    /// `field IN (SELECT ... WHERE <filters>)`
    pub fn in_subquery(field: impl Into<String>, subquery: SubQuery) -> Self {
        let mut filter = Filter::new(field, Operator::In);
        filter.subquery = Some(subquery);
        filter
    }

    /// `EXISTS (SELECT ... WHERE <filters>)`; negate for NOT EXISTS.
    pub fn exists(subquery: SubQuery) -> Self {
        let mut filter = Filter::new("", Operator::Exists);
        filter.subquery = Some(subquery);
        filter
    }

    /// A free-text SQL condition, copied into the query verbatim.
    pub fn expression(text: impl Into<String>) -> Self {
        let mut filter = Filter::new("", Operator::Equal);
        filter.expression = Some(text.into());
        filter
    }

    /// The marker that joins the following filter with `OR`.
    pub fn or() -> Self {
        Filter::new("", Operator::OrChain)
    }

    /// Adds an operand value.
    pub fn value(mut self, value: impl Into<Value>) -> Self {
        self.values.push(value.into());
        self
    }

    /// Compares against another column instead of a value.
    pub fn against_field(mut self, field: impl Into<String>) -> Self {
        self.field2 = Some(field.into());
        self
    }

    /// Wraps the field in a scalar function.
    pub fn function(mut self, call: FunctionCall) -> Self {
        self.function = Some(call);
        self
    }

    /// Inverts the filter (`NOT` in SQL).
    pub fn negate(mut self) -> Self {
        self.negate = !self.negate;
        self
    }

    /// Opens a parenthesis before this filter.
    pub fn open(mut self) -> Self {
        self.open_paren += 1;
        self
    }

    /// Closes a parenthesis after this filter.
    pub fn close(mut self) -> Self {
        self.close_paren += 1;
        self
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn is_negated(&self) -> bool {
        self.negate
    }

    pub fn has_function(&self) -> bool {
        self.function.is_some()
    }

    pub fn second_field(&self) -> Option<&str> {
        self.field2.as_deref()
    }

    /// The operator after rewriting comparisons with a null value.
    fn effective_operator(&self) -> Operator {
        let null_operand = self.field2.is_none()
            && self.values.len() == 1
            && self.values[0].is_null();
        match self.operator {
            Operator::Equal if null_operand => Operator::IsNull,
            Operator::NotEqual if null_operand => Operator::IsNotNull,
            op => op,
        }
    }

    fn arity_error(&self, operator: Operator, expected: &'static str) -> FilterError {
        FilterError::Arity {
            field: self.field.clone(),
            operator: operator.name(),
            expected,
            actual: self.values.len(),
        }
    }

    /// Compiles the filter into `out`.
    pub fn compile(&self, out: &mut SqlText) -> Result<(), FilterError> {
        if self.operator == Operator::OrChain {
            return Ok(());
        }
        if self.negate {
            out.push("NOT ");
        }
        for _ in 0..self.open_paren {
            out.push("(");
        }
        self.compile_body(out)?;
        for _ in 0..self.close_paren {
            out.push(")");
        }
        Ok(())
    }

    fn compile_body(&self, out: &mut SqlText) -> Result<(), FilterError> {
        if let Some(expression) = &self.expression {
            out.push(expression);
            return Ok(());
        }

        let operator = self.effective_operator();
        if operator == Operator::Exists {
            let subquery = self
                .subquery
                .as_ref()
                .ok_or_else(|| self.arity_error(operator, "a sub-query"))?;
            out.push("EXISTS (");
            subquery.compile(out)?;
            out.push(")");
            return Ok(());
        }

        let mut field = SqlText::new();
        match &self.function {
            Some(call) => call.compile(&self.field, &mut field)?,
            None => {
                field.push(&self.field);
            }
        }
        out.append(field);

        match operator {
            op if op.is_comparison() => {
                out.push(" ").push(op.name()).push(" ");
                match (&self.field2, self.values.as_slice()) {
                    (Some(other), _) => {
                        out.push(other);
                    }
                    (None, [value]) => {
                        out.push_param(value.clone());
                    }
                    (None, _) => return Err(self.arity_error(op, "1")),
                }
            }
            Operator::IsNull | Operator::IsNotNull => {
                out.push(" ").push(operator.name());
            }
            op if op.is_like() => {
                let pattern = self.like_operand(op)?;
                out.push(" LIKE ").push_param(Value::Text(pattern));
            }
            Operator::In => {
                out.push(" IN (");
                if let Some(subquery) = &self.subquery {
                    subquery.compile(out)?;
                } else if self.values.is_empty() {
                    return Err(self.arity_error(operator, "at least 1"));
                } else {
                    for (i, value) in self.values.iter().enumerate() {
                        if i > 0 {
                            out.push(", ");
                        }
                        out.push_param(value.clone());
                    }
                }
                out.push(")");
            }
            Operator::Between => match self.values.as_slice() {
                [low, high] => {
                    out.push(" BETWEEN ")
                        .push_param(low.clone())
                        .push(" AND ")
                        .push_param(high.clone());
                }
                _ => return Err(self.arity_error(operator, "2")),
            },
            op => {
                return Err(FilterError::Unsupported(format!(
                    "operator {} in a field filter",
                    op.name()
                )))
            }
        }
        Ok(())
    }

    fn like_operand(&self, operator: Operator) -> Result<String, FilterError> {
        let text = match self.values.as_slice() {
            [Value::Text(text)] => text,
            [_] => return Err(FilterError::LikeNotText(self.field.clone())),
            _ => return Err(self.arity_error(operator, "1")),
        };
        Ok(match operator {
            Operator::LikeBegin => format!("{text}%"),
            Operator::LikeEnd => format!("%{text}"),
            _ => format!("%{text}%"),
        })
    }

    /// Tests the filter against the live values of a record.
    ///
    /// An unknown outcome (a comparison with null) does not match, negated
    /// or not.
    pub fn match_record(&self, record: &dyn RecordSource) -> Result<bool, FilterError> {
        Ok(self.truth(record)?.unwrap_or(false))
    }

    /// The filter's three-valued truth after negation; `None` is unknown.
    fn truth(&self, record: &dyn RecordSource) -> Result<Option<bool>, FilterError> {
        Ok(self.evaluate(record)?.map(|value| value != self.negate))
    }

    /// The filter's three-valued truth before negation.
    fn evaluate(&self, record: &dyn RecordSource) -> Result<Option<bool>, FilterError> {
        if self.expression.is_some() {
            return Err(FilterError::Unsupported("free-text expression".into()));
        }
        if self.subquery.is_some() {
            return Err(FilterError::Unsupported(format!(
                "{} with a sub-query",
                self.operator.name()
            )));
        }
        let operator = self.effective_operator();
        if matches!(operator, Operator::Exists | Operator::OrChain) {
            return Err(FilterError::Unsupported(format!("operator {}", operator.name())));
        }

        let raw = record
            .value(&self.field)
            .ok_or_else(|| FilterError::UnknownColumn(self.field.clone()))?;
        let field = match &self.function {
            Some(call) => call.apply(raw)?,
            None => raw.clone(),
        };

        Ok(match operator {
            op if op.is_comparison() => {
                let operand = match (&self.field2, self.values.as_slice()) {
                    (Some(other), _) => record
                        .value(other)
                        .ok_or_else(|| FilterError::UnknownColumn(other.clone()))?,
                    (None, [value]) => value,
                    (None, _) => return Err(self.arity_error(op, "1")),
                };
                compare(&field, op, operand)
            }
            Operator::IsNull => Some(field.is_null()),
            Operator::IsNotNull => Some(!field.is_null()),
            op if op.is_like() => {
                let pattern = match self.values.as_slice() {
                    [Value::Text(text)] => text.as_str(),
                    [_] => return Err(FilterError::LikeNotText(self.field.clone())),
                    _ => return Err(self.arity_error(op, "1")),
                };
                if field.is_null() {
                    None
                } else {
                    let text = field.to_string();
                    Some(match op {
                        Operator::LikeBegin => text.starts_with(pattern),
                        Operator::LikeEnd => text.ends_with(pattern),
                        _ => text.contains(pattern),
                    })
                }
            }
            Operator::In => {
                if self.values.is_empty() {
                    return Err(self.arity_error(operator, "at least 1"));
                }
                if field.is_null() {
                    None
                } else if self.values.iter().any(|v| *v == field) {
                    Some(true)
                } else if self.values.iter().any(Value::is_null) {
                    None
                } else {
                    Some(false)
                }
            }
            Operator::Between => match self.values.as_slice() {
                [low, high] => and3(
                    compare(&field, Operator::GreaterEqual, low),
                    compare(&field, Operator::SmallerEqual, high),
                ),
                _ => return Err(self.arity_error(operator, "2")),
            },
            op => return Err(FilterError::Unsupported(format!("operator {}", op.name()))),
        })
    }
}

/// SQL comparison semantics: anything compared with null is unknown.
/// Values of unrelated types are simply unequal.
fn compare(left: &Value, operator: Operator, right: &Value) -> Option<bool> {
    if left.is_null() || right.is_null() {
        return None;
    }
    let Some(ordering) = left.compare(right) else {
        return Some(operator == Operator::NotEqual);
    };
    Some(match operator {
        Operator::Equal => ordering.is_eq(),
        Operator::NotEqual => ordering.is_ne(),
        Operator::Greater => ordering.is_gt(),
        Operator::GreaterEqual => ordering.is_ge(),
        Operator::Smaller => ordering.is_lt(),
        Operator::SmallerEqual => ordering.is_le(),
        _ => false,
    })
}

/// Three-valued AND: false wins, then unknown.
fn and3(left: Option<bool>, right: Option<bool>) -> Option<bool> {
    match (left, right) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), Some(true)) => Some(true),
        _ => None,
    }
}

/// Three-valued OR: true wins, then unknown.
fn or3(left: Option<bool>, right: Option<bool>) -> Option<bool> {
    match (left, right) {
        (Some(true), _) | (_, Some(true)) => Some(true),
        (Some(false), Some(false)) => Some(false),
        _ => None,
    }
}

// =============================================================================
// Filter Set
// =============================================================================

/// Ordered list of filters, joined with AND unless an OR marker intervenes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSet {
    filters: Vec<Filter>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, filter: Filter) -> &mut Self {
        self.filters.push(filter);
        self
    }

    /// Joins the next filter with `OR`.
    pub fn or(&mut self) -> &mut Self {
        self.filters.push(Filter::or());
        self
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn clear(&mut self) {
        self.filters.clear();
    }

    /// Compiles the set into `out`.
    pub fn compile(&self, out: &mut SqlText) -> Result<(), FilterError> {
        let mut emitted = false;
        let mut or_next = false;
        for filter in &self.filters {
            if filter.operator == Operator::OrChain {
                or_next = true;
                continue;
            }
            if emitted {
                out.push(if or_next { " OR " } else { " AND " });
            }
            filter.compile(out)?;
            emitted = true;
            or_next = false;
        }
        Ok(())
    }

    /// Compiles the set on its own.
    pub fn to_sql(&self) -> Result<SqlText, FilterError> {
        let mut out = SqlText::new();
        self.compile(&mut out)?;
        Ok(out)
    }

    /// Tests the set against a record with SQL precedence
    /// (NOT over AND over OR) and three-valued logic, honoring the
    /// parenthesis counts. A set whose outcome is unknown does not match.
    pub fn match_record(&self, record: &dyn RecordSource) -> Result<bool, FilterError> {
        let mut tokens = Vec::new();
        let mut emitted = false;
        let mut or_next = false;
        for filter in &self.filters {
            if filter.operator == Operator::OrChain {
                or_next = true;
                continue;
            }
            if emitted {
                tokens.push(if or_next { Token::Or } else { Token::And });
            }
            if filter.negate {
                tokens.push(Token::Not);
            }
            tokens.extend(std::iter::repeat(Token::Open).take(filter.open_paren as usize));
            tokens.push(Token::Value(filter.evaluate(record)?));
            tokens.extend(std::iter::repeat(Token::Close).take(filter.close_paren as usize));
            emitted = true;
            or_next = false;
        }
        if tokens.is_empty() {
            return Ok(true);
        }
        let tokens = drop_unmatched_closes(tokens);
        let mut parser = Parser { tokens: &tokens, pos: 0 };
        Ok(parser.or_expr().unwrap_or(false))
    }
}

impl From<Vec<Filter>> for FilterSet {
    fn from(filters: Vec<Filter>) -> Self {
        Self { filters }
    }
}

impl FromIterator<Filter> for FilterSet {
    fn from_iter<I: IntoIterator<Item = Filter>>(iter: I) -> Self {
        Self {
            filters: iter.into_iter().collect(),
        }
    }
}

// =============================================================================
// In-memory Boolean Evaluation
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Not,
    Open,
    Close,
    And,
    Or,
    Value(Option<bool>),
}

fn drop_unmatched_closes(tokens: Vec<Token>) -> Vec<Token> {
    let mut depth = 0usize;
    tokens
        .into_iter()
        .filter(|token| match token {
            Token::Open => {
                depth += 1;
                true
            }
            Token::Close if depth == 0 => false,
            Token::Close => {
                depth -= 1;
                true
            }
            _ => true,
        })
        .collect()
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn or_expr(&mut self) -> Option<bool> {
        let mut value = self.and_expr();
        while self.peek() == Some(Token::Or) {
            self.pos += 1;
            let right = self.and_expr();
            value = or3(value, right);
        }
        value
    }

    fn and_expr(&mut self) -> Option<bool> {
        let mut value = self.unary();
        while self.peek() == Some(Token::And) {
            self.pos += 1;
            let right = self.unary();
            value = and3(value, right);
        }
        value
    }

    fn unary(&mut self) -> Option<bool> {
        let Some(token) = self.peek() else {
            return Some(false);
        };
        self.pos += 1;
        match token {
            Token::Not => self.unary().map(|value| !value),
            Token::Open => {
                let value = self.or_expr();
                if self.peek() == Some(Token::Close) {
                    self.pos += 1;
                }
                value
            }
            Token::Value(value) => value,
            Token::Close | Token::And | Token::Or => Some(false),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
