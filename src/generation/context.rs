//! Generation Context
//!
//! Everything a generation call may see. Contexts are append-only values:
//! each retry builds a new context with one more feedback entry, so any
//! attempt can be replayed from the context it was given.

use crate::error::ErrorCode;
use crate::execution::result::QueryRows;
use crate::generation::schema::FewShotExample;
use crate::llm::ChatMessage;
use crate::policy::{AgentPolicy, SqlDialect};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What went wrong with one earlier attempt, already sanitized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptFeedback {
    pub attempt: usize,
    pub sql: String,
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct GenerationContext {
    question: String,
    dialect: SqlDialect,
    schema_description: String,
    system_prompt: Option<String>,
    examples: Arc<Vec<FewShotExample>>,
    history: Vec<ChatMessage>,
    feedback: Vec<AttemptFeedback>,
}

impl GenerationContext {
    pub fn new(question: impl Into<String>, policy: &AgentPolicy) -> Self {
        Self {
            question: question.into(),
            dialect: policy.dialect(),
            schema_description: policy.schema_description().to_string(),
            system_prompt: None,
            examples: Arc::new(Vec::new()),
            history: Vec::new(),
            feedback: Vec::new(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt;
        self
    }

    pub fn with_examples(mut self, examples: Arc<Vec<FewShotExample>>) -> Self {
        self.examples = examples;
        self
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }

    /// New context carrying every earlier entry plus `feedback`.
    pub fn with_feedback(&self, feedback: AttemptFeedback) -> Self {
        let mut next = self.clone();
        next.feedback.push(feedback);
        next
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    pub fn schema_description(&self) -> &str {
        &self.schema_description
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    pub fn examples(&self) -> &[FewShotExample] {
        &self.examples
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn feedback(&self) -> &[AttemptFeedback] {
        &self.feedback
    }
}

/// Input for the chart-code generation call
#[derive(Debug, Clone)]
pub struct ChartRequest {
    pub question: String,
    pub columns: Vec<String>,
    pub sample: serde_json::Value,
    pub total_rows: usize,
}

/// Input for the natural-language answer call
#[derive(Debug, Clone)]
pub struct SummaryRequest {
    pub question: String,
    pub sql: String,
    pub rows: QueryRows,
    pub history: Vec<ChatMessage>,
    pub response_prompt: Option<String>,
    pub image_attached: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_feedback_leaves_original_untouched() {
        let policy = AgentPolicy::with_defaults(SqlDialect::Postgres);
        let base = GenerationContext::new("how many orders?", &policy);
        let next = base.with_feedback(AttemptFeedback {
            attempt: 0,
            sql: "SELECT pg_sleep(1)".to_string(),
            code: ErrorCode::BlockedFunction,
            message: "Function 'pg_sleep' is not allowed".to_string(),
        });

        assert!(base.feedback().is_empty());
        assert_eq!(next.feedback().len(), 1);
        assert_eq!(next.question(), base.question());
    }
}
