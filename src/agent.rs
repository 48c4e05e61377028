//! Data Agent Flow
//!
//! Top-level orchestration: route the question to a data agent, optionally
//! rewrite follow-ups, drive the query state machine, render a chart when
//! asked, summarize the rows and record the exchange in the conversation.

use crate::config::AppConfig;
use crate::conversation::{Conversation, GENERATION_HISTORY, ROUTING_HISTORY};
use crate::error::{AgentError, ErrorCode, Result};
use crate::execution::adapter::{connect_adapter, ExecutionAdapter};
use crate::execution::result::QueryRows;
use crate::execution_loop::{AttemptRecord, QueryStateMachine, RunOutcome};
use crate::generation::client::{GenerationClient, LlmGenerationClient};
use crate::generation::context::{GenerationContext, SummaryRequest};
use crate::generation::schema::FewShotExample;
use crate::intent::{AgentDescriptor, IntentRouter, LlmIntentClassifier};
use crate::llm::ChatMessage;
use crate::observability::ExecutionLogger;
use crate::policy::AgentPolicy;
use crate::sandbox::create_executor;
use crate::visualization::{VisualizationArtifact, VisualizationOutcome, VisualizationPipeline};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Answered,
    Exhausted,
    Failed,
    Ambiguous,
}

impl ResponseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStatus::Answered => "answered",
            ResponseStatus::Exhausted => "exhausted",
            ResponseStatus::Failed => "failed",
            ResponseStatus::Ambiguous => "ambiguous",
        }
    }
}

/// Final result of one question
#[derive(Debug, Clone, Serialize)]
pub struct AgentResponse {
    pub agent: Option<String>,
    /// Question after rewriting, as answered.
    pub question: String,
    pub status: ResponseStatus,
    pub sql: Option<String>,
    pub explanation: Option<String>,
    /// Text shown to the user.
    pub answer: String,
    pub rows: Option<QueryRows>,
    /// Present only when a chart image was produced.
    pub visualization: Option<VisualizationArtifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visualization_error: Option<ErrorCode>,
    pub code: Option<ErrorCode>,
    #[serde(skip)]
    pub attempts: Vec<AttemptRecord>,
}

impl AgentResponse {
    fn unanswered(
        agent: Option<String>,
        question: &str,
        status: ResponseStatus,
        code: ErrorCode,
        answer: String,
        attempts: Vec<AttemptRecord>,
    ) -> Self {
        Self {
            agent,
            question: question.to_string(),
            status,
            sql: None,
            explanation: None,
            answer,
            rows: None,
            visualization: None,
            visualization_error: None,
            code: Some(code),
            attempts,
        }
    }

    pub fn is_answered(&self) -> bool {
        self.status == ResponseStatus::Answered
    }

    pub fn image(&self) -> Option<&[u8]> {
        self.visualization.as_ref().and_then(|v| v.image())
    }
}

/// Datasource reachability for one agent
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentHealth {
    pub agent: String,
    pub adapter: &'static str,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One configured agent: policy, state machine and answer assembly
pub struct DataAgent {
    descriptor: AgentDescriptor,
    policy: Arc<AgentPolicy>,
    machine: QueryStateMachine,
    generator: Arc<dyn GenerationClient>,
    adapter: Arc<dyn ExecutionAdapter>,
    visualization: Option<VisualizationPipeline>,
    examples: Arc<Vec<FewShotExample>>,
    system_prompt: Option<String>,
    response_prompt: Option<String>,
}

impl DataAgent {
    pub fn new(
        descriptor: AgentDescriptor,
        policy: Arc<AgentPolicy>,
        generator: Arc<dyn GenerationClient>,
        adapter: Arc<dyn ExecutionAdapter>,
        max_retries: usize,
    ) -> Self {
        let machine = QueryStateMachine::new(
            descriptor.id.clone(),
            generator.clone(),
            adapter.clone(),
            policy.clone(),
            max_retries,
        );
        Self {
            descriptor,
            policy,
            machine,
            generator,
            adapter,
            visualization: None,
            examples: Arc::new(Vec::new()),
            system_prompt: None,
            response_prompt: None,
        }
    }

    pub fn with_visualization(mut self, pipeline: VisualizationPipeline) -> Self {
        self.visualization = Some(pipeline);
        self
    }

    pub fn with_examples(mut self, examples: Vec<FewShotExample>) -> Self {
        self.examples = Arc::new(examples);
        self
    }

    pub fn with_prompts(mut self, system_prompt: Option<String>, response_prompt: Option<String>) -> Self {
        self.system_prompt = system_prompt;
        self.response_prompt = response_prompt;
        self
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    pub fn policy(&self) -> &AgentPolicy {
        &self.policy
    }

    pub async fn health_check(&self) -> AgentHealth {
        match self.adapter.health_check().await {
            Ok(()) => AgentHealth {
                agent: self.id().to_string(),
                adapter: self.adapter.name(),
                healthy: true,
                error: None,
            },
            Err(e) => {
                warn!(agent = %self.id(), adapter = self.adapter.name(), "Health check failed: {}", e);
                AgentHealth {
                    agent: self.id().to_string(),
                    adapter: self.adapter.name(),
                    healthy: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Answer a (self-contained) question. Every failure resolves to a
    /// response status rather than an error.
    pub async fn answer(&self, question: &str, history: &[ChatMessage]) -> AgentResponse {
        let context = GenerationContext::new(question, &self.policy)
            .with_system_prompt(self.system_prompt.clone())
            .with_examples(self.examples.clone())
            .with_history(history.to_vec());

        let success = match self.machine.run(context).await {
            RunOutcome::Succeeded(success) => success,
            RunOutcome::Exhausted(exhausted) => {
                return AgentResponse::unanswered(
                    Some(self.id().to_string()),
                    question,
                    ResponseStatus::Exhausted,
                    ErrorCode::RetriesExhausted,
                    exhausted.message,
                    exhausted.attempts,
                );
            }
            RunOutcome::Failed(failed) => {
                debug!(agent = %self.id(), "Run failed: {}", failed.detail);
                return AgentResponse::unanswered(
                    Some(self.id().to_string()),
                    question,
                    ResponseStatus::Failed,
                    failed.code,
                    failed.message,
                    failed.attempts,
                );
            }
        };

        let mut visualization = None;
        let mut visualization_error = None;
        if success.visualization_requested {
            match &self.visualization {
                Some(pipeline) => match pipeline.render(question, &success.rows).await {
                    Some(artifact) => match &artifact.outcome {
                        VisualizationOutcome::Image { .. } => visualization = Some(artifact),
                        VisualizationOutcome::Failure { code, .. } => visualization_error = Some(*code),
                    },
                    None => debug!(agent = %self.id(), "Nothing to chart"),
                },
                None => debug!(agent = %self.id(), "Visualization requested but no pipeline configured"),
            }
        }

        let summary_request = SummaryRequest {
            question: question.to_string(),
            sql: success.sql.clone(),
            rows: success.rows.clone(),
            history: history.to_vec(),
            response_prompt: self.response_prompt.clone(),
            image_attached: visualization.is_some(),
        };
        let answer = match self.generator.summarize(&summary_request).await {
            Ok(text) => text,
            Err(e) => {
                warn!(agent = %self.id(), "Summary failed, using explanation: {}", e);
                success.explanation.clone()
            }
        };

        AgentResponse {
            agent: Some(self.id().to_string()),
            question: question.to_string(),
            status: ResponseStatus::Answered,
            sql: Some(success.sql),
            explanation: Some(success.explanation),
            answer,
            rows: Some(success.rows),
            visualization,
            visualization_error,
            code: None,
            attempts: success.attempts,
        }
    }
}

/// Routes questions across the configured agents
pub struct DataAgentFlow {
    agents: Vec<DataAgent>,
    router: IntentRouter,
    rewrite_questions: bool,
    logger: Option<Arc<ExecutionLogger>>,
}

impl DataAgentFlow {
    pub fn new(agents: Vec<DataAgent>, router: IntentRouter) -> Self {
        Self {
            agents,
            router,
            rewrite_questions: true,
            logger: None,
        }
    }

    pub fn with_rewrite(mut self, enabled: bool) -> Self {
        self.rewrite_questions = enabled;
        self
    }

    pub fn with_logger(mut self, logger: Arc<ExecutionLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Build every agent from configuration and connect its datasource.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let executor = create_executor(&config.sandbox);
        let mut agents = Vec::with_capacity(config.data_agents.len());

        for agent_config in &config.data_agents {
            let policy = agent_config.build_policy()?;
            let llm = agent_config.llm.merged_over(&config.llm).build_client()?;
            let generator: Arc<dyn GenerationClient> =
                Arc::new(LlmGenerationClient::new(llm, policy.max_rows()));

            let adapter = connect_adapter(&agent_config.datasource, &agent_config.name).await?;
            info!(
                agent = %agent_config.name,
                dialect = %policy.dialect().as_str(),
                adapter = adapter.name(),
                "Data agent ready"
            );

            let pipeline = VisualizationPipeline::new(generator.clone(), executor.clone(), config.sandbox.timeout());
            let agent = DataAgent::new(
                agent_config.descriptor(),
                policy,
                generator,
                adapter,
                config.max_retries_for(agent_config),
            )
            .with_visualization(pipeline)
            .with_examples(agent_config.few_shot_examples.clone())
            .with_prompts(agent_config.system_prompt.clone(), agent_config.response_prompt.clone());
            agents.push(agent);
        }

        let intent = &config.intent_detection;
        let classifier = LlmIntentClassifier::new(
            intent.llm.merged_over(&config.llm).build_client()?,
            intent.system_prompt.clone(),
        );
        let router = IntentRouter::new(Arc::new(classifier)).with_thresholds(intent.min_confidence, intent.tie_margin);

        let mut flow = Self::new(agents, router).with_rewrite(intent.rewrite_questions);
        let logger = match &config.audit_log {
            Some(path) => ExecutionLogger::default().with_file(path),
            None => ExecutionLogger::default(),
        };
        flow = flow.with_logger(Arc::new(logger));
        Ok(flow)
    }

    pub fn agents(&self) -> &[DataAgent] {
        &self.agents
    }

    pub fn agent(&self, id: &str) -> Option<&DataAgent> {
        self.agents.iter().find(|a| a.id() == id)
    }

    pub fn logger(&self) -> Option<&Arc<ExecutionLogger>> {
        self.logger.as_ref()
    }

    /// Ping every agent's datasource concurrently.
    pub async fn health_check(&self) -> Vec<AgentHealth> {
        futures::future::join_all(self.agents.iter().map(|agent| agent.health_check())).await
    }

    pub fn descriptors(&self) -> Vec<AgentDescriptor> {
        self.agents.iter().map(|a| a.descriptor.clone()).collect()
    }

    /// Answer one question within `conversation` and append the exchange.
    pub async fn run(&self, question: &str, conversation: &mut Conversation) -> Result<AgentResponse> {
        let started = Instant::now();
        let response = self.respond(question, conversation).await?;

        conversation.push_user(question);
        conversation.push_assistant(assistant_turn(&response));

        info!(
            agent = response.agent.as_deref().unwrap_or("-"),
            status = response.status.as_str(),
            code = response.code.map(|c| c.as_str()).unwrap_or("-"),
            "Question finished in {} ms",
            started.elapsed().as_millis()
        );
        if let Some(logger) = &self.logger {
            logger.record(question, &response, started.elapsed()).await;
        }

        Ok(response)
    }

    /// [`run`](Self::run) that gives up at the next suspension point once
    /// `cancel` fires, leaving the conversation untouched.
    pub async fn run_cancellable(
        &self,
        question: &str,
        conversation: &mut Conversation,
        cancel: &CancellationToken,
    ) -> Result<AgentResponse> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("Question cancelled");
                Err(AgentError::Cancelled)
            }
            response = self.run(question, conversation) => response,
        }
    }

    async fn respond(&self, question: &str, conversation: &Conversation) -> Result<AgentResponse> {
        let descriptors = self.descriptors();
        let routing_history = conversation.recent(ROUTING_HISTORY);

        let agent = match self.router.route(question, &routing_history, &descriptors).await {
            Ok(id) => match self.agent(&id) {
                Some(agent) => agent,
                None => return Err(AgentError::Config(format!("Routed to unknown agent '{}'", id))),
            },
            Err(AgentError::AmbiguousIntent(reason)) => {
                debug!("Ambiguous intent: {}", reason);
                return Ok(AgentResponse::unanswered(
                    None,
                    question,
                    ResponseStatus::Ambiguous,
                    ErrorCode::AmbiguousIntent,
                    out_of_scope_message(&descriptors),
                    Vec::new(),
                ));
            }
            Err(e) => match e.code() {
                Some(code) => {
                    warn!(code = %code, "Routing failed: {}", e);
                    return Ok(AgentResponse::unanswered(
                        None,
                        question,
                        ResponseStatus::Failed,
                        code,
                        "I couldn't work out which data source to use right now. Please try again.".to_string(),
                        Vec::new(),
                    ));
                }
                None => return Err(e),
            },
        };

        let effective_question = if self.rewrite_questions && !routing_history.is_empty() {
            match self
                .router
                .classifier()
                .rewrite(question, &routing_history, agent.descriptor())
                .await
            {
                Ok(rewritten) => {
                    debug!(agent = %agent.id(), "Rewrote question: {}", rewritten);
                    rewritten
                }
                Err(e) => {
                    warn!(agent = %agent.id(), "Rewrite failed, keeping original question: {}", e);
                    question.to_string()
                }
            }
        } else {
            question.to_string()
        };

        let history = conversation.recent(GENERATION_HISTORY);
        Ok(agent.answer(&effective_question, &history).await)
    }
}

/// Reply listing what the configured agents can answer.
pub fn out_of_scope_message(agents: &[AgentDescriptor]) -> String {
    let coverage = agents
        .iter()
        .map(|a| format!("- {}", a.summary()))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "I'm not sure which data your question is about, or it is outside the scope of the available data.\n\nI can help you with queries related to:\n{}",
        coverage
    )
}

/// What the assistant turn records: the answer, plus the SQL so follow-ups
/// can build on it.
fn assistant_turn(response: &AgentResponse) -> String {
    match &response.sql {
        Some(sql) => format!("{}\n\nSQL: {}", response.answer, sql),
        None => response.answer.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_scope_lists_agents() {
        let agents = vec![
            AgentDescriptor::new("sales", Some("Orders and revenue".to_string())),
            AgentDescriptor::new("hr", None),
        ];
        let message = out_of_scope_message(&agents);
        assert!(message.contains("- Agent 'sales': Orders and revenue"));
        assert!(message.contains("- Agent 'hr'"));
    }

    #[test]
    fn test_assistant_turn_includes_sql() {
        let mut response = AgentResponse::unanswered(
            Some("sales".to_string()),
            "q",
            ResponseStatus::Answered,
            ErrorCode::SyntaxError,
            "There were 3 orders.".to_string(),
            Vec::new(),
        );
        assert_eq!(assistant_turn(&response), "There were 3 orders.");
        response.sql = Some("SELECT COUNT(*) FROM orders LIMIT 100".to_string());
        assert!(assistant_turn(&response).ends_with("SQL: SELECT COUNT(*) FROM orders LIMIT 100"));
    }

    #[test]
    fn test_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(ResponseStatus::Ambiguous).unwrap(),
            serde_json::json!("ambiguous")
        );
    }
}
