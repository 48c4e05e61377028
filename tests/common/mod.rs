#![allow(dead_code)]

use async_trait::async_trait;
use data_agent::error::{AgentError, Result};
use data_agent::execution::{ExecutionAdapter, ExecutionOutcome, QueryRows, Row};
use data_agent::generation::{
    ChartRequest, GenerationClient, GenerationContext, QueryProposal, SummaryRequest,
};
use data_agent::intent::{
    AgentDescriptor, IntentCandidate, IntentClassification, IntentClassifier,
};
use data_agent::llm::ChatMessage;
use data_agent::policy::SqlDialect;
use data_agent::sandbox::{SandboxExecutor, SandboxOutcome};
use data_agent::validator::AcceptedQuery;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// One scripted reply to `propose`.
#[derive(Clone)]
pub enum Step {
    Propose(QueryProposal),
    Fail(String),
}

pub fn sql(sql: &str) -> Step {
    Step::Propose(QueryProposal::new(sql, format!("Runs {}", sql), false))
}

pub fn chart_sql(sql: &str) -> Step {
    Step::Propose(QueryProposal::new(sql, "Chart of the data", true))
}

/// Replays proposals in order and repeats the last one once the script runs out.
pub struct ScriptedGenerator {
    steps: Mutex<VecDeque<Step>>,
    last: Mutex<Option<Step>>,
    contexts: Mutex<Vec<GenerationContext>>,
    chart_reply: Option<String>,
    summary_reply: Option<String>,
    summaries: Mutex<Vec<SummaryRequest>>,
    propose_delay: Option<Duration>,
    pub propose_calls: AtomicUsize,
    pub chart_calls: AtomicUsize,
    pub summary_calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            last: Mutex::new(None),
            contexts: Mutex::new(Vec::new()),
            chart_reply: Some("```python\nimport matplotlib.pyplot as plt\nplt.bar(['a'], [1])\nplt.show()\n```".to_string()),
            summary_reply: Some("Here is your answer.".to_string()),
            summaries: Mutex::new(Vec::new()),
            propose_delay: None,
            propose_calls: AtomicUsize::new(0),
            chart_calls: AtomicUsize::new(0),
            summary_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_chart_reply(mut self, reply: Option<&str>) -> Self {
        self.chart_reply = reply.map(str::to_string);
        self
    }

    pub fn with_summary_reply(mut self, reply: Option<&str>) -> Self {
        self.summary_reply = reply.map(str::to_string);
        self
    }

    pub fn with_propose_delay(mut self, delay: Duration) -> Self {
        self.propose_delay = Some(delay);
        self
    }

    pub fn contexts(&self) -> Vec<GenerationContext> {
        self.contexts.lock().unwrap().clone()
    }

    pub fn summaries(&self) -> Vec<SummaryRequest> {
        self.summaries.lock().unwrap().clone()
    }

    pub fn proposals(&self) -> usize {
        self.propose_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationClient for ScriptedGenerator {
    async fn propose(&self, context: &GenerationContext) -> Result<QueryProposal> {
        self.propose_calls.fetch_add(1, Ordering::SeqCst);
        self.contexts.lock().unwrap().push(context.clone());

        if let Some(delay) = self.propose_delay {
            tokio::time::sleep(delay).await;
        }

        let step = {
            let next = self.steps.lock().unwrap().pop_front();
            let mut last = self.last.lock().unwrap();
            if let Some(step) = next {
                *last = Some(step);
            }
            last.clone()
        };

        match step {
            Some(Step::Propose(proposal)) => Ok(proposal),
            Some(Step::Fail(message)) => Err(AgentError::Generation(message)),
            None => Err(AgentError::Generation("script is empty".to_string())),
        }
    }

    async fn generate_chart_code(&self, _request: &ChartRequest) -> Result<String> {
        self.chart_calls.fetch_add(1, Ordering::SeqCst);
        self.chart_reply
            .clone()
            .ok_or_else(|| AgentError::Llm("chart model unavailable".to_string()))
    }

    async fn summarize(&self, request: &SummaryRequest) -> Result<String> {
        self.summary_calls.fetch_add(1, Ordering::SeqCst);
        self.summaries.lock().unwrap().push(request.clone());
        self.summary_reply
            .clone()
            .ok_or_else(|| AgentError::Llm("summary model unavailable".to_string()))
    }
}

pub fn rows(n: usize) -> QueryRows {
    let rows = (0..n)
        .map(|i| {
            let mut row = Row::new();
            row.insert("id".to_string(), json!(i));
            row.insert("name".to_string(), json!(format!("row {}", i)));
            row
        })
        .collect();
    QueryRows::new(vec!["id".to_string(), "name".to_string()], rows)
}

/// Replays execution outcomes; returns `default_rows` once the script runs out.
pub struct ScriptedAdapter {
    outcomes: Mutex<VecDeque<ExecutionOutcome>>,
    default_rows: usize,
    executed: Mutex<Vec<String>>,
    unreachable: bool,
}

impl ScriptedAdapter {
    pub fn new(outcomes: Vec<ExecutionOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            default_rows: 3,
            executed: Mutex::new(Vec::new()),
            unreachable: false,
        }
    }

    /// Fails its health check as if the database were down.
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn returning_rows(n: usize) -> Self {
        Self {
            default_rows: n,
            ..Self::new(Vec::new())
        }
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExecutionAdapter for ScriptedAdapter {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn execute(&self, query: &AcceptedQuery, _dialect: SqlDialect) -> ExecutionOutcome {
        self.executed.lock().unwrap().push(query.sql().to_string());
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ExecutionOutcome::Rows(rows(self.default_rows)))
    }

    async fn health_check(&self) -> Result<()> {
        if self.unreachable {
            return Err(AgentError::Database("connection refused".to_string()));
        }
        Ok(())
    }
}

pub struct ScriptedSandbox {
    outcome: SandboxOutcome,
    pub calls: AtomicUsize,
}

impl ScriptedSandbox {
    pub fn new(outcome: SandboxOutcome) -> Self {
        Self {
            outcome,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SandboxExecutor for ScriptedSandbox {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn isolated(&self) -> bool {
        true
    }

    async fn execute(&self, _code: &str, _timeout: Duration) -> SandboxOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone()
    }
}

/// Fixed routing scores; rewrite echoes a prefix or fails.
pub struct FixedClassifier {
    scores: Vec<(String, f64)>,
    rewrite_prefix: Option<String>,
    pub classify_calls: AtomicUsize,
    pub rewrite_calls: AtomicUsize,
}

impl FixedClassifier {
    pub fn new(scores: &[(&str, f64)]) -> Self {
        Self {
            scores: scores.iter().map(|(id, c)| (id.to_string(), *c)).collect(),
            rewrite_prefix: None,
            classify_calls: AtomicUsize::new(0),
            rewrite_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_rewrite_prefix(mut self, prefix: &str) -> Self {
        self.rewrite_prefix = Some(prefix.to_string());
        self
    }
}

#[async_trait]
impl IntentClassifier for FixedClassifier {
    async fn classify(
        &self,
        _question: &str,
        _history: &[ChatMessage],
        _agents: &[AgentDescriptor],
    ) -> Result<IntentClassification> {
        self.classify_calls.fetch_add(1, Ordering::SeqCst);
        Ok(IntentClassification {
            candidates: self
                .scores
                .iter()
                .map(|(id, confidence)| IntentCandidate {
                    agent_id: id.clone(),
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
        self.rewrite_calls.fetch_add(1, Ordering::SeqCst);
        match &self.rewrite_prefix {
            Some(prefix) => Ok(format!("{}{}", prefix, question)),
            None => Err(AgentError::Llm("rewrite unavailable".to_string())),
        }
    }
}
