//! Query Proposal
//!
//! Typed form of the model's structured SQL response. Parsing is the only
//! way to get one from model output, and it fails with a generation error
//! when a required field is missing or has the wrong type.

use crate::error::{AgentError, Result};
use crate::llm::extract_json_object;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryProposal {
    pub reasoning: String,
    pub sql: String,
    pub explanation: String,
    pub visualization_requested: bool,
}

impl QueryProposal {
    pub fn new(sql: impl Into<String>, explanation: impl Into<String>, visualization_requested: bool) -> Self {
        Self {
            reasoning: String::new(),
            sql: sql.into(),
            explanation: explanation.into(),
            visualization_requested,
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    /// Validate raw model output against the proposal schema.
    ///
    /// Required: `sql_query` (non-empty string), `explanation` (string),
    /// `visualization_requested` (boolean). Optional: `thinking` or `reasoning`.
    pub fn from_model_output(text: &str) -> Result<Self> {
        let json = extract_json_object(text).ok_or_else(|| {
            AgentError::Generation("Model response did not contain a JSON object".to_string())
        })?;
        let value: Value = serde_json::from_str(json)
            .map_err(|e| AgentError::Generation(format!("Model response is not valid JSON: {}", e)))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let object = value.as_object().ok_or_else(|| {
            AgentError::Generation("Model response must be a JSON object".to_string())
        })?;

        let sql = required_str(object, "sql_query")?;
        if sql.trim().is_empty() {
            return Err(AgentError::Generation("Field 'sql_query' is empty".to_string()));
        }
        let explanation = required_str(object, "explanation")?;
        let visualization_requested = object
            .get("visualization_requested")
            .ok_or_else(|| missing("visualization_requested"))?
            .as_bool()
            .ok_or_else(|| {
                AgentError::Generation("Field 'visualization_requested' must be a boolean".to_string())
            })?;

        let reasoning = object
            .get("thinking")
            .or_else(|| object.get("reasoning"))
            .and_then(Value::as_str)
            .unwrap_or_default();

        Ok(Self {
            reasoning: reasoning.to_string(),
            sql: sql.to_string(),
            explanation: explanation.to_string(),
            visualization_requested,
        })
    }
}

fn missing(field: &str) -> AgentError {
    AgentError::Generation(format!("Missing required field '{}'", field))
}

fn required_str<'a>(object: &'a serde_json::Map<String, Value>, field: &str) -> Result<&'a str> {
    object
        .get(field)
        .ok_or_else(|| missing(field))?
        .as_str()
        .ok_or_else(|| AgentError::Generation(format!("Field '{}' must be a string", field)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_parses_complete_response() {
        let text = r#"```json
{"thinking": "count rows", "sql_query": "SELECT count(*) FROM orders",
 "explanation": "Counts orders", "visualization_requested": false}
```"#;
        let proposal = QueryProposal::from_model_output(text).unwrap();
        assert_eq!(proposal.sql, "SELECT count(*) FROM orders");
        assert_eq!(proposal.reasoning, "count rows");
        assert!(!proposal.visualization_requested);
    }

    #[test]
    fn test_missing_field_is_generation_error() {
        let err = QueryProposal::from_model_output(
            r#"{"sql_query": "SELECT 1", "explanation": "one"}"#,
        )
        .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::GenerationError));
        assert!(err.to_string().contains("visualization_requested"));
    }

    #[test]
    fn test_wrong_types_rejected() {
        assert!(QueryProposal::from_model_output(
            r#"{"sql_query": 5, "explanation": "x", "visualization_requested": false}"#
        )
        .is_err());
        assert!(QueryProposal::from_model_output(
            r#"{"sql_query": "SELECT 1", "explanation": "x", "visualization_requested": "yes"}"#
        )
        .is_err());
        assert!(QueryProposal::from_model_output("SELECT 1").is_err());
    }
}
