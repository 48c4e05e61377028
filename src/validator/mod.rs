//! Dialect Validator
//!
//! Pure check of generated SQL against an [`AgentPolicy`]: single read-only
//! query, no blocked function calls, and a row bound no larger than the
//! policy's `max_rows`. Nothing reaches an execution adapter without an
//! [`AcceptedQuery`], and only this module can build one.

pub mod basic;
pub mod limit;
pub mod sql_validator;

use crate::error::ErrorCode;
use crate::policy::AgentPolicy;
use regex::Regex;
use serde::Serialize;
use std::fmt;

const FENCED_SQL: &str = r"(?is)```[ \t]*(?:sql|tsql|postgresql|postgres)?[ \t]*\n?(.*?)```";

/// Why a query was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    SyntaxError,
    NotReadOnly,
    BlockedFunction,
}

impl RejectionReason {
    pub fn code(&self) -> ErrorCode {
        match self {
            RejectionReason::SyntaxError => ErrorCode::SyntaxError,
            RejectionReason::NotReadOnly => ErrorCode::NotReadOnly,
            RejectionReason::BlockedFunction => ErrorCode::BlockedFunction,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub reason: RejectionReason,
    /// Offending construct, e.g. the blocked function name or statement kind.
    pub construct: Option<String>,
    pub message: String,
}

impl Rejection {
    pub(crate) fn new(
        reason: RejectionReason,
        construct: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            reason,
            construct,
            message: message.into(),
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.construct {
            Some(construct) => write!(f, "{} ({}): {}", self.reason.code(), construct, self.message),
            None => write!(f, "{}: {}", self.reason.code(), self.message),
        }
    }
}

/// What the validator did to the query's row bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum LimitAction {
    /// Literal bound already within `max_rows`.
    Unchanged,
    /// No bound present; one was added at `max_rows`.
    Injected,
    /// Literal bound above `max_rows` was lowered.
    Clamped { from: u64 },
    /// Bound is non-literal or could not be placed; rows are cut after execution.
    Deferred,
}

/// SQL that passed validation. Fields are private so adapters can trust it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcceptedQuery {
    sql: String,
    limit: LimitAction,
    row_cap: u64,
    warnings: Vec<String>,
}

impl AcceptedQuery {
    pub(crate) fn new(sql: String, limit: LimitAction, row_cap: u64, warnings: Vec<String>) -> Self {
        Self {
            sql,
            limit,
            row_cap,
            warnings,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn limit_action(&self) -> LimitAction {
        self.limit
    }

    /// Row count the caller must truncate results to.
    pub fn row_cap(&self) -> u64 {
        self.row_cap
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn needs_truncation(&self) -> bool {
        self.limit == LimitAction::Deferred
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ValidationOutcome {
    Accepted(AcceptedQuery),
    Rejected(Rejection),
}

impl ValidationOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ValidationOutcome::Accepted(_))
    }

    pub fn accepted(&self) -> Option<&AcceptedQuery> {
        match self {
            ValidationOutcome::Accepted(query) => Some(query),
            ValidationOutcome::Rejected(_) => None,
        }
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            ValidationOutcome::Accepted(_) => None,
            ValidationOutcome::Rejected(rejection) => Some(rejection),
        }
    }
}

/// Validate and, where needed, rewrite `sql` under `policy`.
///
/// Deterministic: the same input and policy always give the same outcome,
/// and re-validating accepted SQL returns it unchanged.
pub fn validate(sql: &str, policy: &AgentPolicy) -> ValidationOutcome {
    let cleaned = strip_sql_decoration(sql);
    if cleaned.is_empty() {
        return ValidationOutcome::Rejected(Rejection::new(
            RejectionReason::SyntaxError,
            None,
            "Empty SQL statement",
        ));
    }

    match policy.dialect().parser_dialect() {
        Some(dialect) => sql_validator::validate_parsed(&cleaned, dialect.as_ref(), policy),
        None => basic::validate_basic(&cleaned, policy),
    }
}

/// Remove markdown fences, surrounding whitespace and trailing semicolons.
pub fn strip_sql_decoration(sql: &str) -> String {
    let mut body = sql;
    if let Ok(re) = Regex::new(FENCED_SQL) {
        if let Some(inner) = re.captures(sql).and_then(|caps| caps.get(1)) {
            body = inner.as_str();
        }
    }

    body.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace()).to_string()
}
