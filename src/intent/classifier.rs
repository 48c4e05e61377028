//! Intent Classifier
//!
//! One model call that scores configured agents against a question, plus
//! the follow-up rewrite call used after routing.

use crate::error::{AgentError, Result};
use crate::intent::descriptor::AgentDescriptor;
use crate::llm::{extract_json_object, ChatMessage, LlmClient};
use crate::prompts;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentCandidate {
    #[serde(alias = "agent")]
    pub agent_id: String,
    #[serde(default = "full_confidence")]
    pub confidence: f64,
}

fn full_confidence() -> f64 {
    1.0
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntentClassification {
    #[serde(default)]
    pub candidates: Vec<IntentCandidate>,
}

impl IntentClassification {
    /// Parse classifier output. A JSON `{"candidates": [...]}` object is
    /// preferred; a bare agent name is read as a single certain candidate.
    pub fn from_model_output(text: &str) -> Result<Self> {
        if let Some(json) = extract_json_object(text) {
            let parsed: IntentClassification = serde_json::from_str(json).map_err(|e| {
                AgentError::Generation(format!("Invalid intent classification: {}", e))
            })?;
            return Ok(parsed);
        }

        let name = text.trim().trim_matches(|c| c == '"' || c == '\'' || c == '`').trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Ok(Self::default());
        }
        Ok(Self {
            candidates: vec![IntentCandidate {
                agent_id: name.to_string(),
                confidence: 1.0,
            }],
        })
    }
}

#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(
        &self,
        question: &str,
        history: &[ChatMessage],
        agents: &[AgentDescriptor],
    ) -> Result<IntentClassification>;

    /// Make a follow-up question self-contained for `agent`.
    async fn rewrite(
        &self,
        question: &str,
        history: &[ChatMessage],
        agent: &AgentDescriptor,
    ) -> Result<String>;
}

pub struct LlmIntentClassifier {
    llm: LlmClient,
    system_prompt: Option<String>,
}

impl LlmIntentClassifier {
    pub fn new(llm: LlmClient, system_prompt: Option<String>) -> Self {
        Self { llm, system_prompt }
    }
}

#[async_trait]
impl IntentClassifier for LlmIntentClassifier {
    async fn classify(
        &self,
        question: &str,
        history: &[ChatMessage],
        agents: &[AgentDescriptor],
    ) -> Result<IntentClassification> {
        let messages = prompts::intent_messages(question, history, agents, self.system_prompt.as_deref());
        let text = self.llm.chat(&messages, true).await?;
        debug!("Intent classification response: {}", text);
        IntentClassification::from_model_output(&text)
    }

    async fn rewrite(
        &self,
        question: &str,
        history: &[ChatMessage],
        agent: &AgentDescriptor,
    ) -> Result<String> {
        let messages = prompts::rewrite_messages(question, history, &agent.summary());
        let text = self.llm.chat(&messages, false).await?;
        let rewritten = text.trim();
        if rewritten.is_empty() {
            return Err(AgentError::Generation("Empty rewrite".to_string()));
        }
        Ok(rewritten.to_string())
    }
}
