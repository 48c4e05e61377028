use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Ambiguous intent: {0}")]
    AmbiguousIntent(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("SQL driver error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl AgentError {
    /// Taxonomy code for errors that surface to callers, if any.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            AgentError::Llm(_) | AgentError::Generation(_) | AgentError::Json(_) => {
                Some(ErrorCode::GenerationError)
            }
            AgentError::AmbiguousIntent(_) => Some(ErrorCode::AmbiguousIntent),
            AgentError::Sandbox(_) => Some(ErrorCode::SandboxFailure),
            AgentError::Database(_) | AgentError::Sqlx(_) => Some(ErrorCode::ExecutionOther),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;

/// Stable failure codes shared by validation, execution, routing and sandboxing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    SyntaxError,
    NotReadOnly,
    BlockedFunction,
    GenerationError,
    ExecutionTimeout,
    ExecutionPermission,
    ExecutionOther,
    AmbiguousIntent,
    RetriesExhausted,
    SandboxFailure,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::SyntaxError => "syntax_error",
            ErrorCode::NotReadOnly => "not_read_only",
            ErrorCode::BlockedFunction => "blocked_function",
            ErrorCode::GenerationError => "generation_error",
            ErrorCode::ExecutionTimeout => "execution_timeout",
            ErrorCode::ExecutionPermission => "execution_permission",
            ErrorCode::ExecutionOther => "execution_other",
            ErrorCode::AmbiguousIntent => "ambiguous_intent",
            ErrorCode::RetriesExhausted => "retries_exhausted",
            ErrorCode::SandboxFailure => "sandbox_failure",
        }
    }

    /// Codes the retry controller folds back into the next attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::SyntaxError
                | ErrorCode::NotReadOnly
                | ErrorCode::BlockedFunction
                | ErrorCode::ExecutionTimeout
                | ErrorCode::ExecutionPermission
                | ErrorCode::ExecutionOther
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
