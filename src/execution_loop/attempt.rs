//! Attempt records and run outcomes for the query state machine.

use crate::error::ErrorCode;
use crate::execution::result::{ExecutionOutcome, QueryRows};
use crate::generation::proposal::QueryProposal;
use crate::validator::ValidationOutcome;
use serde::Serialize;
use std::fmt;

/// States of one query run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Proposing,
    Validating,
    Executing,
    Retrying,
    Succeeded,
    Exhausted,
    Failed,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Succeeded | RunPhase::Exhausted | RunPhase::Failed)
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Proposing => "proposing",
            RunPhase::Validating => "validating",
            RunPhase::Executing => "executing",
            RunPhase::Retrying => "retrying",
            RunPhase::Succeeded => "succeeded",
            RunPhase::Exhausted => "exhausted",
            RunPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One generate → validate → execute cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    /// Zero-based attempt index.
    pub index: usize,
    pub proposal: QueryProposal,
    pub validation: ValidationOutcome,
    /// Present only when validation accepted the query.
    pub execution: Option<ExecutionOutcome>,
}

impl AttemptRecord {
    /// Error code for a failed attempt, `None` when it succeeded.
    pub fn failure_code(&self) -> Option<ErrorCode> {
        if let Some(rejection) = self.validation.rejection() {
            return Some(rejection.reason.code());
        }
        match &self.execution {
            Some(ExecutionOutcome::Failure(failure)) => Some(failure.kind.code()),
            _ => None,
        }
    }

    /// SQL that was sent to the adapter, or the raw proposal when rejected.
    pub fn effective_sql(&self) -> &str {
        match self.validation.accepted() {
            Some(query) => query.sql(),
            None => &self.proposal.sql,
        }
    }
}

/// Mutable state of a single run; only the state machine changes it.
#[derive(Debug, Clone)]
pub struct QueryState {
    phase: RunPhase,
    attempt: usize,
    records: Vec<AttemptRecord>,
}

impl QueryState {
    pub fn new() -> Self {
        Self {
            phase: RunPhase::Proposing,
            attempt: 0,
            records: Vec::new(),
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn attempt(&self) -> usize {
        self.attempt
    }

    pub fn records(&self) -> &[AttemptRecord] {
        &self.records
    }

    pub(crate) fn set_phase(&mut self, phase: RunPhase) {
        self.phase = phase;
    }

    pub(crate) fn record(&mut self, record: AttemptRecord) {
        self.records.push(record);
    }

    /// Retrying → Proposing
    pub(crate) fn next_attempt(&mut self) {
        self.attempt += 1;
        self.phase = RunPhase::Proposing;
    }

    pub(crate) fn into_records(self) -> Vec<AttemptRecord> {
        self.records
    }
}

impl Default for QueryState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QuerySuccess {
    pub sql: String,
    pub explanation: String,
    pub visualization_requested: bool,
    pub rows: QueryRows,
    pub attempts: Vec<AttemptRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryExhausted {
    /// Generic text safe to show a user.
    pub message: String,
    pub attempts: Vec<AttemptRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryFailed {
    pub code: ErrorCode,
    /// Generic text safe to show a user.
    pub message: String,
    /// Internal detail for logs.
    #[serde(skip)]
    pub detail: String,
    pub attempts: Vec<AttemptRecord>,
}

/// Terminal result of one run
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded(QuerySuccess),
    Exhausted(QueryExhausted),
    Failed(QueryFailed),
}

impl RunOutcome {
    pub fn attempts(&self) -> &[AttemptRecord] {
        match self {
            RunOutcome::Succeeded(s) => &s.attempts,
            RunOutcome::Exhausted(e) => &e.attempts,
            RunOutcome::Failed(f) => &f.attempts,
        }
    }

    pub fn phase(&self) -> RunPhase {
        match self {
            RunOutcome::Succeeded(_) => RunPhase::Succeeded,
            RunOutcome::Exhausted(_) => RunPhase::Exhausted,
            RunOutcome::Failed(_) => RunPhase::Failed,
        }
    }

    /// Error code of a non-successful outcome.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            RunOutcome::Succeeded(_) => None,
            RunOutcome::Exhausted(_) => Some(ErrorCode::RetriesExhausted),
            RunOutcome::Failed(f) => Some(f.code),
        }
    }
}
