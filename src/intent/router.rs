//! Intent Router
//!
//! Picks the data agent for a question. Ties and weak matches are reported
//! as `ambiguous_intent` instead of guessed.

use crate::error::{AgentError, Result};
use crate::intent::classifier::{IntentCandidate, IntentClassifier};
use crate::intent::descriptor::AgentDescriptor;
use crate::llm::ChatMessage;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.5;
pub const DEFAULT_TIE_MARGIN: f64 = 0.1;

/// Slack for score arithmetic; `0.9 - 0.8` is just under `0.1` in binary.
const SCORE_TOLERANCE: f64 = 1e-9;

pub struct IntentRouter {
    classifier: Arc<dyn IntentClassifier>,
    min_confidence: f64,
    tie_margin: f64,
}

impl IntentRouter {
    pub fn new(classifier: Arc<dyn IntentClassifier>) -> Self {
        Self {
            classifier,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            tie_margin: DEFAULT_TIE_MARGIN,
        }
    }

    pub fn with_thresholds(mut self, min_confidence: f64, tie_margin: f64) -> Self {
        self.min_confidence = min_confidence.clamp(0.0, 1.0);
        self.tie_margin = tie_margin.max(0.0);
        self
    }

    pub fn classifier(&self) -> &Arc<dyn IntentClassifier> {
        &self.classifier
    }

    /// Select the agent id that should answer `question`.
    pub async fn route(
        &self,
        question: &str,
        history: &[ChatMessage],
        agents: &[AgentDescriptor],
    ) -> Result<String> {
        if agents.is_empty() {
            return Err(AgentError::Config("No data agents configured".to_string()));
        }

        let classification = self.classifier.classify(question, history, agents).await?;
        let ranked = rank_candidates(classification.candidates, agents);
        debug!("Intent candidates: {:?}", ranked);

        let Some(best) = ranked.first() else {
            warn!(code = "ambiguous_intent", "No configured agent matches the question");
            return Err(AgentError::AmbiguousIntent(
                "no configured agent matches the question".to_string(),
            ));
        };

        if best.confidence < self.min_confidence {
            warn!(
                code = "ambiguous_intent",
                agent = %best.agent_id,
                "Best match confidence {:.2} is below {:.2}",
                best.confidence,
                self.min_confidence
            );
            return Err(AgentError::AmbiguousIntent(format!(
                "low confidence match for '{}'",
                best.agent_id
            )));
        }

        if let Some(runner_up) = ranked.get(1) {
            if best.confidence - runner_up.confidence + SCORE_TOLERANCE < self.tie_margin {
                warn!(
                    code = "ambiguous_intent",
                    "Agents '{}' and '{}' tie",
                    best.agent_id,
                    runner_up.agent_id
                );
                return Err(AgentError::AmbiguousIntent(format!(
                    "question matches both '{}' and '{}'",
                    best.agent_id, runner_up.agent_id
                )));
            }
        }

        info!(agent = %best.agent_id, confidence = best.confidence, "Routed question");
        Ok(best.agent_id.clone())
    }
}

/// Known agents only, one entry per agent at its highest score, best first.
fn rank_candidates(candidates: Vec<IntentCandidate>, agents: &[AgentDescriptor]) -> Vec<IntentCandidate> {
    let mut ranked: Vec<IntentCandidate> = Vec::new();

    for candidate in candidates {
        let Some(agent) = agents
            .iter()
            .find(|a| a.id.eq_ignore_ascii_case(candidate.agent_id.trim()))
        else {
            debug!("Ignoring unknown agent '{}'", candidate.agent_id);
            continue;
        };

        let confidence = if candidate.confidence.is_finite() {
            candidate.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };

        match ranked.iter_mut().find(|c| c.agent_id == agent.id) {
            Some(existing) => existing.confidence = existing.confidence.max(confidence),
            None => ranked.push(IntentCandidate {
                agent_id: agent.id.clone(),
                confidence,
            }),
        }
    }

    ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::classifier::IntentClassification;
    use async_trait::async_trait;

    struct FixedClassifier(Vec<(&'static str, f64)>);

    #[async_trait]
    impl IntentClassifier for FixedClassifier {
        async fn classify(
            &self,
            _question: &str,
            _history: &[ChatMessage],
            _agents: &[AgentDescriptor],
        ) -> Result<IntentClassification> {
            Ok(IntentClassification {
                candidates: self
                    .0
                    .iter()
                    .map(|(id, confidence)| IntentCandidate {
                        agent_id: id.to_string(),
                        confidence: *confidence,
                    })
                    .collect(),
            })
        }

        async fn rewrite(
            &self,
            question: &str,
            _history: &[ChatMessage],
            _agent: &AgentDescriptor,
        ) -> Result<String> {
            Ok(question.to_string())
        }
    }

    fn agents() -> Vec<AgentDescriptor> {
        vec![
            AgentDescriptor::new("sales", Some("Orders".to_string())),
            AgentDescriptor::new("hr", Some("Employees".to_string())),
        ]
    }

    fn router(scores: Vec<(&'static str, f64)>) -> IntentRouter {
        IntentRouter::new(Arc::new(FixedClassifier(scores)))
    }

    #[tokio::test]
    async fn test_routes_clear_winner() {
        let selected = router(vec![("sales", 0.9), ("hr", 0.3)])
            .route("revenue by month", &[], &agents())
            .await
            .unwrap();
        assert_eq!(selected, "sales");
    }

    #[tokio::test]
    async fn test_case_insensitive_id_match() {
        let selected = router(vec![("HR", 0.8)]).route("headcount", &[], &agents()).await.unwrap();
        assert_eq!(selected, "hr");
    }

    #[tokio::test]
    async fn test_tie_is_ambiguous() {
        let err = router(vec![("sales", 0.8), ("hr", 0.75)])
            .route("people who bought things", &[], &agents())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::AmbiguousIntent(_)));
    }

    #[tokio::test]
    async fn test_gap_equal_to_margin_routes_to_best() {
        let selected = router(vec![("sales", 0.9), ("hr", 0.8)])
            .route("orders per employee", &[], &agents())
            .await
            .unwrap();
        assert_eq!(selected, "sales");

        let selected = router(vec![("hr", 0.7), ("sales", 0.4)])
            .with_thresholds(0.5, 0.3)
            .route("headcount", &[], &agents())
            .await
            .unwrap();
        assert_eq!(selected, "hr");
    }

    #[tokio::test]
    async fn test_low_confidence_is_ambiguous() {
        let err = router(vec![("sales", 0.4)])
            .route("weather tomorrow", &[], &agents())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::AmbiguousIntent(_)));
    }

    #[tokio::test]
    async fn test_unknown_agents_ignored() {
        let err = router(vec![("finance", 0.99)])
            .route("budget", &[], &agents())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::AmbiguousIntent(_)));

        let selected = router(vec![("finance", 0.99), ("sales", 0.7)])
            .route("budget", &[], &agents())
            .await
            .unwrap();
        assert_eq!(selected, "sales");
    }

    #[tokio::test]
    async fn test_duplicate_candidates_keep_highest() {
        let selected = router(vec![("sales", 0.2), ("sales", 0.9), ("hr", 0.5)])
            .route("orders", &[], &agents())
            .await
            .unwrap();
        assert_eq!(selected, "sales");
    }
}
