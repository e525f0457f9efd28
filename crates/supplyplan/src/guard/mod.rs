//! Safety gate for translator-suggested SQL.
//!
//! A statement is accepted only if it is a single `SELECT`, carries no
//! denylisted token, bounds its result with `LIMIT n` where `n <= 200`, and
//! reads only from allow-listed tables. Anything the gate cannot classify is
//! rejected. Column names are deliberately not checked: the executor reports
//! unknown columns precisely, while lexical column matching would reject valid
//! queries.

pub mod lexer;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use rusqlite::types::Value as SqlValue;
use serde::Serialize;
use tracing::{debug, warn};

use crate::catalog;
use crate::error::{PlanError, Result, StorageContext};
use crate::sqlite::RunStore;
use lexer::{Token, tokenize};

pub const MAX_ROW_LIMIT: u64 = 200;

const FETCH_ROW_CAP: usize = MAX_ROW_LIMIT as usize;

/// Case-insensitive substrings that reject a statement outright.
pub const FORBIDDEN_TOKENS: &[&str] = &[
    "--", "/*", "pragma", "insert", "update", "delete", "alter", "drop", "create",
];

/// Words that open a subquery right after `(`.
const SUBQUERY_KEYWORDS: &[&str] = &["select", "values", "with"];

/// Words that end the table-source list of a FROM clause at the current depth.
const FROM_CLAUSE_TERMINATORS: &[&str] = &[
    "where", "group", "having", "order", "limit", "window", "union", "intersect", "except",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationReason {
    EmptyStatement,
    MultiStatement,
    NotSelect,
    ForbiddenToken,
    UnbalancedQuote,
    MissingLimit,
    InvalidLimit,
    AmbiguousLimit,
    LimitTooLarge,
    UnparseableTableReference,
    UnknownTable,
    NotReadOnly,
}

impl ViolationReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EmptyStatement => "empty_statement",
            Self::MultiStatement => "multi_statement",
            Self::NotSelect => "not_select",
            Self::ForbiddenToken => "forbidden_token",
            Self::UnbalancedQuote => "unbalanced_quote",
            Self::MissingLimit => "missing_limit",
            Self::InvalidLimit => "invalid_limit",
            Self::AmbiguousLimit => "ambiguous_limit",
            Self::LimitTooLarge => "limit_too_large",
            Self::UnparseableTableReference => "unparseable_table_reference",
            Self::UnknownTable => "unknown_table",
            Self::NotReadOnly => "not_read_only",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuardViolation {
    pub reason: ViolationReason,
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub offending: Option<String>,
}

impl GuardViolation {
    #[must_use]
    pub fn new(reason: ViolationReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
            offending: None,
        }
    }

    #[must_use]
    pub fn with_offending(mut self, offending: impl Into<String>) -> Self {
        self.offending = Some(offending.into());
        self
    }
}

impl Display for GuardViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.reason.as_str())
    }
}

impl std::error::Error for GuardViolation {}

/// Total over all strings: malformed input is simply unsafe.
#[must_use]
pub fn is_safe(
    query: &str,
    allowed_tables: &BTreeSet<String>,
    _columns_by_table: &BTreeMap<String, BTreeSet<String>>,
) -> bool {
    evaluate(query, allowed_tables).is_ok()
}

/// Like [`is_safe`], but names the first rule the statement breaks.
pub fn evaluate(
    query: &str,
    allowed_tables: &BTreeSet<String>,
) -> std::result::Result<(), GuardViolation> {
    let candidate = strip_statement_terminator(query);
    if candidate.is_empty() {
        return Err(GuardViolation::new(
            ViolationReason::EmptyStatement,
            "query is empty",
        ));
    }

    if candidate.contains(';') {
        return Err(GuardViolation::new(
            ViolationReason::MultiStatement,
            "multiple statements are not allowed",
        ));
    }

    let normalized = candidate.to_ascii_lowercase();
    if !normalized.starts_with("select") {
        return Err(GuardViolation::new(
            ViolationReason::NotSelect,
            "only SELECT statements are allowed",
        ));
    }

    if let Some(token) = FORBIDDEN_TOKENS
        .iter()
        .find(|token| normalized.contains(*token))
    {
        return Err(GuardViolation::new(
            ViolationReason::ForbiddenToken,
            format!("forbidden token `{token}`"),
        )
        .with_offending(*token));
    }

    let tokens = tokenize(candidate).map_err(|error| {
        GuardViolation::new(
            ViolationReason::UnbalancedQuote,
            format!(
                "unterminated {} quote at byte {}",
                error.quote, error.opened_at
            ),
        )
    })?;

    check_limits(&tokens)?;

    for table in referenced_tables(&tokens)? {
        let allowed = allowed_tables
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&table));
        if !allowed {
            return Err(GuardViolation::new(
                ViolationReason::UnknownTable,
                format!("table `{table}` is not queryable"),
            )
            .with_offending(table));
        }
    }

    Ok(())
}

/// Trims whitespace and drops at most one trailing `;`.
#[must_use]
pub fn strip_statement_terminator(query: &str) -> &str {
    let trimmed = query.trim();
    match trimmed.strip_suffix(';') {
        Some(stripped) => stripped.trim_end(),
        None => trimmed,
    }
}

fn check_limits(tokens: &[Token]) -> std::result::Result<(), GuardViolation> {
    let mut seen_limit = false;
    for (index, token) in tokens.iter().enumerate() {
        if !token.is_word("limit") {
            continue;
        }
        seen_limit = true;

        let Some(Token::Number(raw)) = tokens.get(index + 1) else {
            return Err(GuardViolation::new(
                ViolationReason::InvalidLimit,
                "LIMIT must be followed by an integer literal",
            ));
        };
        if !raw.chars().all(|ch| ch.is_ascii_digit()) {
            return Err(GuardViolation::new(
                ViolationReason::InvalidLimit,
                format!("LIMIT value `{raw}` is not an integer"),
            )
            .with_offending(raw.clone()));
        }
        let too_large = raw
            .parse::<u64>()
            .map_or(true, |value| value > MAX_ROW_LIMIT);
        if too_large {
            return Err(GuardViolation::new(
                ViolationReason::LimitTooLarge,
                format!("LIMIT {raw} exceeds the ceiling of {MAX_ROW_LIMIT}"),
            )
            .with_offending(raw.clone()));
        }
        // `LIMIT a, b` means offset a, count b in SQLite.
        if matches!(tokens.get(index + 2), Some(Token::Punct(','))) {
            return Err(GuardViolation::new(
                ViolationReason::AmbiguousLimit,
                "the `LIMIT offset, count` form is not allowed; use LIMIT n OFFSET m",
            ));
        }
    }

    if seen_limit {
        Ok(())
    } else {
        Err(GuardViolation::new(
            ViolationReason::MissingLimit,
            format!("a LIMIT clause of at most {MAX_ROW_LIMIT} is required"),
        ))
    }
}

/// Lexically collects every table named after FROM, JOIN, a comma inside a
/// FROM clause, or `IN`. Aliases are skipped over, not recorded.
pub fn referenced_tables(tokens: &[Token]) -> std::result::Result<BTreeSet<String>, GuardViolation> {
    let mut tables = BTreeSet::new();
    // One entry per open parenthesis: whether that level is inside a FROM clause.
    let mut in_from = vec![false];
    let mut index = 0usize;

    while index < tokens.len() {
        let token = &tokens[index];
        match token {
            Token::Punct('(') if opens_parenthesized_table(tokens, index, &in_from) => {
                in_from.push(true);
                index = read_table_reference(tokens, index + 1, &mut tables)?;
            }
            Token::Punct('(') => {
                in_from.push(false);
                index += 1;
            }
            Token::Punct(')') => {
                if in_from.len() == 1 {
                    return Err(unbalanced_parentheses());
                }
                in_from.pop();
                index += 1;
            }
            Token::Word(word) if word == "from" || word == "join" => {
                set_top(&mut in_from, true);
                index = read_table_reference(tokens, index + 1, &mut tables)?;
            }
            Token::Punct(',') if in_from.last().copied().unwrap_or(false) => {
                index = read_table_reference(tokens, index + 1, &mut tables)?;
            }
            Token::Word(word) if FROM_CLAUSE_TERMINATORS.contains(&word.as_str()) => {
                set_top(&mut in_from, false);
                index += 1;
            }
            Token::Word(word) if word == "in" => {
                index += 1;
                if tokens.get(index).and_then(Token::identifier).is_some() {
                    let (name, next) = read_qualified_name(tokens, index)?;
                    tables.insert(name);
                    index = next;
                }
            }
            _ => index += 1,
        }
    }

    if in_from.len() != 1 {
        return Err(unbalanced_parentheses());
    }

    Ok(tables)
}

/// `(` in a table position that does not start a subquery wraps a table
/// name or a join, e.g. `FROM (runs)` or `FROM (runs JOIN forecasts ...)`.
fn opens_parenthesized_table(tokens: &[Token], index: usize, in_from: &[bool]) -> bool {
    if !in_from.last().copied().unwrap_or(false) {
        return false;
    }
    let in_table_position = index
        .checked_sub(1)
        .and_then(|previous| tokens.get(previous))
        .is_some_and(|previous| {
            previous.is_word("from")
                || previous.is_word("join")
                || matches!(previous, Token::Punct(',') | Token::Punct('('))
        });
    let starts_subquery = tokens.get(index + 1).is_some_and(|next| {
        SUBQUERY_KEYWORDS
            .iter()
            .any(|keyword| next.is_word(keyword))
    });
    in_table_position && !starts_subquery
}

fn read_table_reference(
    tokens: &[Token],
    index: usize,
    tables: &mut BTreeSet<String>,
) -> std::result::Result<usize, GuardViolation> {
    match tokens.get(index) {
        // The caller descends into the parenthesis.
        Some(Token::Punct('(')) => Ok(index),
        Some(token) if token.identifier().is_some() => {
            let (name, next) = read_qualified_name(tokens, index)?;
            tables.insert(name);
            Ok(next)
        }
        other => Err(GuardViolation::new(
            ViolationReason::UnparseableTableReference,
            "expected a table name or subquery",
        )
        .with_offending(describe_token(other))),
    }
}

fn read_qualified_name(
    tokens: &[Token],
    index: usize,
) -> std::result::Result<(String, usize), GuardViolation> {
    let mut name = tokens
        .get(index)
        .and_then(Token::identifier)
        .map(ToString::to_string)
        .ok_or_else(|| {
            GuardViolation::new(
                ViolationReason::UnparseableTableReference,
                "expected a table name",
            )
        })?;
    let mut cursor = index + 1;
    while matches!(tokens.get(cursor), Some(Token::Punct('.'))) {
        let part = tokens
            .get(cursor + 1)
            .and_then(Token::identifier)
            .ok_or_else(|| {
                GuardViolation::new(
                    ViolationReason::UnparseableTableReference,
                    format!("dangling qualifier after `{name}`"),
                )
            })?;
        name.push('.');
        name.push_str(part);
        cursor += 2;
    }
    Ok((name, cursor))
}

fn set_top(stack: &mut [bool], value: bool) {
    if let Some(top) = stack.last_mut() {
        *top = value;
    }
}

fn unbalanced_parentheses() -> GuardViolation {
    GuardViolation::new(
        ViolationReason::UnparseableTableReference,
        "unbalanced parentheses",
    )
}

fn describe_token(token: Option<&Token>) -> String {
    match token {
        None => "end of statement".to_string(),
        Some(Token::Word(word) | Token::Quoted(word) | Token::Number(word)) => word.clone(),
        Some(Token::StringLiteral) => "string literal".to_string(),
        Some(Token::Punct(ch)) => ch.to_string(),
    }
}

/// A single result value as returned by the executor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    /// Lower-case hex.
    Blob(String),
}

impl From<SqlValue> for Cell {
    fn from(value: SqlValue) -> Self {
        match value {
            SqlValue::Null => Self::Null,
            SqlValue::Integer(value) => Self::Integer(value),
            SqlValue::Real(value) => Self::Real(value),
            SqlValue::Text(value) => Self::Text(value),
            SqlValue::Blob(value) => Self::Blob(encode_blob_hex(&value)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<BTreeMap<String, Cell>>,
    pub row_count: usize,
    pub truncated: bool,
}

/// Runs `query` only if the gate accepts it against the live catalog.
/// Rejections surface as [`PlanError::SafetyRejected`].
pub fn execute_gated(store: &RunStore, query: &str) -> Result<QueryRows> {
    let connection = store.connection();
    let catalog = catalog::describe(connection)?;

    if let Err(violation) = evaluate(query, &catalog.allowed_tables()) {
        warn!(reason = violation.reason.as_str(), "safety gate rejected query");
        return Err(PlanError::SafetyRejected(violation));
    }

    let candidate = strip_statement_terminator(query);
    let mut statement = connection
        .prepare(candidate)
        .storage_context("failed to prepare gated query")?;
    if !statement.readonly() {
        warn!("safety gate accepted a statement sqlite reports as writable");
        return Err(PlanError::SafetyRejected(GuardViolation::new(
            ViolationReason::NotReadOnly,
            "statement is not read-only",
        )));
    }

    let columns = statement
        .column_names()
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>();

    let mut rows = statement
        .query([])
        .storage_context("failed to execute gated query")?;
    let mut result_rows = Vec::new();
    let mut truncated = false;
    while let Some(row) = rows.next().storage_context("failed to fetch query row")? {
        if result_rows.len() >= FETCH_ROW_CAP {
            truncated = true;
            break;
        }

        let mut record = BTreeMap::new();
        for (index, column) in columns.iter().enumerate() {
            let value = row
                .get::<usize, SqlValue>(index)
                .storage_context("failed to decode query column")?;
            record.insert(column.clone(), Cell::from(value));
        }
        result_rows.push(record);
    }

    debug!(rows = result_rows.len(), truncated, "executed gated query");
    Ok(QueryRows {
        columns,
        row_count: result_rows.len(),
        rows: result_rows,
        truncated,
    })
}

fn encode_blob_hex(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        output.push(HEX[(byte >> 4) as usize] as char);
        output.push(HEX[(byte & 0x0f) as usize] as char);
    }
    output
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::{ViolationReason, evaluate, strip_statement_terminator};

    fn allowed() -> BTreeSet<String> {
        ["runs", "forecasts", "production_plans"]
            .into_iter()
            .map(ToString::to_string)
            .collect()
    }

    fn reason(query: &str) -> ViolationReason {
        evaluate(query, &allowed())
            .expect_err("query should be rejected")
            .reason
    }

    #[test]
    fn strips_one_trailing_terminator_only() {
        assert_eq!(strip_statement_terminator("  SELECT 1 ;  "), "SELECT 1");
        assert_eq!(strip_statement_terminator("SELECT 1;;"), "SELECT 1;");
    }

    #[test]
    fn reports_rule_names_in_check_order() {
        assert_eq!(reason("   "), ViolationReason::EmptyStatement);
        assert_eq!(reason("SELECT 1;;"), ViolationReason::MultiStatement);
        assert_eq!(reason("WITH x AS (SELECT 1) SELECT * FROM x LIMIT 1"), ViolationReason::NotSelect);
        assert_eq!(reason("SELECT * FROM runs -- LIMIT 5"), ViolationReason::ForbiddenToken);
        assert_eq!(reason("SELECT 'open FROM runs LIMIT 5"), ViolationReason::UnbalancedQuote);
        assert_eq!(reason("SELECT * FROM runs"), ViolationReason::MissingLimit);
        assert_eq!(reason("SELECT * FROM runs LIMIT -1"), ViolationReason::InvalidLimit);
        assert_eq!(reason("SELECT * FROM runs LIMIT 0, 5000"), ViolationReason::AmbiguousLimit);
        assert_eq!(reason("SELECT * FROM runs LIMIT 201"), ViolationReason::LimitTooLarge);
        assert_eq!(reason("SELECT * FROM LIMIT 5"), ViolationReason::UnknownTable);
        assert_eq!(reason("SELECT * FROM , runs LIMIT 5"), ViolationReason::UnparseableTableReference);
        assert_eq!(reason("SELECT * FROM secrets LIMIT 5"), ViolationReason::UnknownTable);
    }

    #[test]
    fn limit_overflow_counts_as_too_large() {
        assert_eq!(
            reason("SELECT * FROM runs LIMIT 99999999999999999999999"),
            ViolationReason::LimitTooLarge
        );
    }

    #[test]
    fn every_limit_clause_is_bounded() {
        assert_eq!(
            reason("SELECT * FROM (SELECT * FROM runs LIMIT 5) LIMIT 500"),
            ViolationReason::LimitTooLarge
        );
        assert!(evaluate("SELECT * FROM (SELECT * FROM runs LIMIT 5) LIMIT 200", &allowed()).is_ok());
    }
}
