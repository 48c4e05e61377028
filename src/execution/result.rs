//! Query Result - standardized outcome of running validated SQL

use crate::error::ErrorCode;
use serde::{Deserialize, Serialize};
use std::fmt;

pub type Row = serde_json::Map<String, serde_json::Value>;

/// Ordered rows returned by an adapter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    /// Rows the backend produced before any truncation. A lower bound when
    /// the adapter stopped reading early.
    pub row_count: usize,
    pub truncated: bool,
}

impl QueryRows {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        let row_count = rows.len();
        Self {
            columns,
            rows,
            row_count,
            truncated: false,
        }
    }

    /// Rows read from a stream that may have been cut short.
    pub fn streamed(columns: Vec<String>, rows: Vec<Row>, truncated: bool) -> Self {
        let row_count = rows.len() + usize::from(truncated);
        Self {
            columns,
            rows,
            row_count,
            truncated,
        }
    }

    /// Cut to at most `max_rows`, marking the result truncated when rows were dropped.
    pub fn cap(mut self, max_rows: u64) -> Self {
        let max = usize::try_from(max_rows).unwrap_or(usize::MAX);
        if self.rows.len() > max {
            self.rows.truncate(max);
            self.truncated = true;
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// First `limit` rows as a JSON array, for prompts.
    pub fn sample_json(&self, limit: usize) -> serde_json::Value {
        serde_json::Value::Array(
            self.rows
                .iter()
                .take(limit)
                .cloned()
                .map(serde_json::Value::Object)
                .collect(),
        )
    }
}

/// Adapter failure classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorKind {
    Timeout,
    Connection,
    Permission,
    Other,
}

impl ExecutionErrorKind {
    pub fn code(&self) -> ErrorCode {
        match self {
            ExecutionErrorKind::Timeout => ErrorCode::ExecutionTimeout,
            ExecutionErrorKind::Permission => ErrorCode::ExecutionPermission,
            ExecutionErrorKind::Connection | ExecutionErrorKind::Other => ErrorCode::ExecutionOther,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    pub kind: ExecutionErrorKind,
    pub message: String,
}

impl fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.code(), self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Rows(QueryRows),
    Failure(ExecutionFailure),
}

impl ExecutionOutcome {
    pub fn failure(kind: ExecutionErrorKind, message: impl Into<String>) -> Self {
        ExecutionOutcome::Failure(ExecutionFailure {
            kind,
            message: message.into(),
        })
    }

    pub fn is_rows(&self) -> bool {
        matches!(self, ExecutionOutcome::Rows(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(n: usize) -> QueryRows {
        let rows = (0..n)
            .map(|i| {
                let mut row = Row::new();
                row.insert("id".to_string(), json!(i));
                row
            })
            .collect();
        QueryRows::new(vec!["id".to_string()], rows)
    }

    #[test]
    fn test_cap_marks_truncation() {
        let capped = rows(12).cap(5);
        assert_eq!(capped.len(), 5);
        assert_eq!(capped.row_count, 12);
        assert!(capped.truncated);

        let untouched = rows(3).cap(5);
        assert!(!untouched.truncated);
    }

    #[test]
    fn test_streamed_rows_keep_truncation_through_cap() {
        let streamed = QueryRows::streamed(vec!["id".to_string()], rows(5).rows, true).cap(5);
        assert_eq!(streamed.len(), 5);
        assert_eq!(streamed.row_count, 6);
        assert!(streamed.truncated);
    }

    #[test]
    fn test_connection_failures_map_to_other() {
        assert_eq!(ExecutionErrorKind::Connection.code(), ErrorCode::ExecutionOther);
        assert_eq!(ExecutionErrorKind::Timeout.code(), ErrorCode::ExecutionTimeout);
    }
}
