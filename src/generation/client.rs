//! Generation Client
//!
//! Capability the state machine and visualization pipeline call for model
//! output. The core only ever sees typed results.

use crate::error::{AgentError, Result};
use crate::generation::context::{ChartRequest, GenerationContext, SummaryRequest};
use crate::generation::proposal::QueryProposal;
use crate::llm::LlmClient;
use crate::prompts;
use async_trait::async_trait;
use tracing::debug;

#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Propose SQL for the context. Transport or schema failures are
    /// `AgentError::Llm` / `AgentError::Generation`.
    async fn propose(&self, context: &GenerationContext) -> Result<QueryProposal>;

    /// Raw model text expected to contain chart code.
    async fn generate_chart_code(&self, request: &ChartRequest) -> Result<String>;

    async fn summarize(&self, request: &SummaryRequest) -> Result<String>;
}

/// [`GenerationClient`] backed by a chat completions endpoint
pub struct LlmGenerationClient {
    llm: LlmClient,
    max_rows: u64,
}

impl LlmGenerationClient {
    pub fn new(llm: LlmClient, max_rows: u64) -> Self {
        Self { llm, max_rows }
    }
}

#[async_trait]
impl GenerationClient for LlmGenerationClient {
    async fn propose(&self, context: &GenerationContext) -> Result<QueryProposal> {
        let messages = prompts::sql_messages(context, self.max_rows);
        let text = self.llm.chat(&messages, true).await?;
        debug!("SQL generation response: {}", text);
        QueryProposal::from_model_output(&text)
    }

    async fn generate_chart_code(&self, request: &ChartRequest) -> Result<String> {
        let messages = prompts::chart_messages(request);
        self.llm.chat(&messages, false).await
    }

    async fn summarize(&self, request: &SummaryRequest) -> Result<String> {
        let messages = prompts::summary_messages(request);
        let text = self.llm.chat(&messages, false).await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(AgentError::Generation("Empty summary".to_string()));
        }
        Ok(text.to_string())
    }
}
