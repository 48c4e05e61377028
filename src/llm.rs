//! OpenAI-compatible chat completions client

use crate::error::{AgentError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Clone)]
pub struct LlmClient {
    api_key: String,
    base_url: String,
    model: String,
    temperature: f64,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            temperature: 0.0,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::Llm(format!("Failed to build HTTP client: {}", e)))?;
        Ok(self)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send a chat completion and return the first choice's content.
    ///
    /// With `json_mode` the request asks for a JSON object response.
    pub async fn chat(&self, messages: &[ChatMessage], json_mode: bool) -> Result<String> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
        });
        if json_mode {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }

        debug!("LLM request: model={} messages={}", self.model, messages.len());

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AgentError::Llm(format!(
                "LLM API error ({}): {}",
                status, error_text
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AgentError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        if let Some(error) = response_json.get("error") {
            return Err(AgentError::Llm(format!("LLM API error: {}", error)));
        }

        let choice = response_json
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|choices| choices.first())
            .ok_or_else(|| AgentError::Llm("No choices in LLM response".to_string()))?;

        match choice.get("finish_reason").and_then(|r| r.as_str()) {
            Some("length") => warn!("LLM response was truncated due to length limit"),
            Some("content_filter") => {
                return Err(AgentError::Llm(
                    "LLM response was filtered by content policy".to_string(),
                ))
            }
            _ => {}
        }

        let content = choice["message"]["content"]
            .as_str()
            .ok_or_else(|| AgentError::Llm("No content in LLM response".to_string()))?;

        if content.trim().is_empty() {
            return Err(AgentError::Llm("Empty content in LLM response".to_string()));
        }

        Ok(content.to_string())
    }
}

/// Pull a JSON object out of model output that may be fenced or wrapped in prose.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed);

    let start = unfenced.find('{')?;
    let end = unfenced.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&unfenced[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_from_fence() {
        let text = "```json\n{\"a\": 1}\n```";
        assert_eq!(extract_json_object(text), Some("{\"a\": 1}"));
    }

    #[test]
    fn test_extract_json_from_prose() {
        let text = "Here you go: {\"sql_query\": \"SELECT 1\"} hope it helps";
        assert_eq!(extract_json_object(text), Some("{\"sql_query\": \"SELECT 1\"}"));
        assert_eq!(extract_json_object("no json here"), None);
    }

    #[test]
    fn test_messages_serialize_with_roles() {
        let value = serde_json::to_value(ChatMessage::system("hi")).unwrap();
        assert_eq!(value["role"], "system");
    }
}
