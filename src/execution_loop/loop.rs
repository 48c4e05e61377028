//! Query State Machine
//!
//! Bounded generate → validate → execute loop. Validation and execution
//! failures are sanitized and folded into the next generation context until
//! `max_retries` is spent; a generation failure ends the run immediately.

use crate::error::{AgentError, ErrorCode, Result};
use crate::execution::adapter::ExecutionAdapter;
use crate::execution::result::ExecutionOutcome;
use crate::execution_loop::attempt::{
    AttemptRecord, QueryExhausted, QueryFailed, QueryState, QuerySuccess, RunOutcome, RunPhase,
};
use crate::execution_loop::error_classifier::sanitize_error_message;
use crate::generation::client::GenerationClient;
use crate::generation::context::{AttemptFeedback, GenerationContext};
use crate::policy::AgentPolicy;
use crate::validator::{self, ValidationOutcome};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_RETRIES: usize = 3;

pub const EXHAUSTED_MESSAGE: &str =
    "I wasn't able to answer that question after several attempts. Please try rephrasing it.";
pub const GENERATION_FAILED_MESSAGE: &str =
    "I couldn't generate a query for that question right now. Please try again.";

/// Query state machine with bounded retries
pub struct QueryStateMachine {
    agent: String,
    generator: Arc<dyn GenerationClient>,
    adapter: Arc<dyn ExecutionAdapter>,
    policy: Arc<AgentPolicy>,
    max_retries: usize,
}

impl QueryStateMachine {
    pub fn new(
        agent: impl Into<String>,
        generator: Arc<dyn GenerationClient>,
        adapter: Arc<dyn ExecutionAdapter>,
        policy: Arc<AgentPolicy>,
        max_retries: usize,
    ) -> Self {
        Self {
            agent: agent.into(),
            generator,
            adapter,
            policy,
            max_retries,
        }
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    pub fn policy(&self) -> &AgentPolicy {
        &self.policy
    }

    fn transition(&self, state: &mut QueryState, phase: RunPhase) {
        debug!(
            agent = %self.agent,
            attempt = state.attempt(),
            "{} -> {}",
            state.phase(),
            phase
        );
        state.set_phase(phase);
    }

    /// Drive one question to a terminal outcome.
    pub async fn run(&self, context: GenerationContext) -> RunOutcome {
        let mut state = QueryState::new();
        let mut context = context;

        loop {
            info!(
                agent = %self.agent,
                attempt = state.attempt(),
                "Query attempt {} of {}",
                state.attempt() + 1,
                self.max_retries + 1
            );

            let proposal = match self.generator.propose(&context).await {
                Ok(proposal) => proposal,
                Err(e) => {
                    warn!(agent = %self.agent, code = "generation_error", "Generation failed: {}", e);
                    self.transition(&mut state, RunPhase::Failed);
                    return RunOutcome::Failed(QueryFailed {
                        code: e.code().unwrap_or(ErrorCode::GenerationError),
                        message: GENERATION_FAILED_MESSAGE.to_string(),
                        detail: e.to_string(),
                        attempts: state.into_records(),
                    });
                }
            };

            self.transition(&mut state, RunPhase::Validating);
            let validation = validator::validate(&proposal.sql, &self.policy);

            let (code, raw_message, execution) = match &validation {
                ValidationOutcome::Accepted(query) => {
                    for warning in query.warnings() {
                        debug!(agent = %self.agent, "Validator: {}", warning);
                    }
                    self.transition(&mut state, RunPhase::Executing);

                    match self.adapter.execute(query, self.policy.dialect()).await {
                        ExecutionOutcome::Rows(rows) => {
                            let rows = rows.cap(query.row_cap());
                            let sql = query.sql().to_string();
                            info!(
                                agent = %self.agent,
                                attempt = state.attempt(),
                                "Query succeeded with {} rows{}",
                                rows.len(),
                                if rows.truncated { " (truncated)" } else { "" }
                            );
                            let explanation = proposal.explanation.clone();
                            let visualization_requested = proposal.visualization_requested;
                            state.record(AttemptRecord {
                                index: state.attempt(),
                                proposal,
                                validation: validation.clone(),
                                execution: Some(ExecutionOutcome::Rows(rows.clone())),
                            });
                            self.transition(&mut state, RunPhase::Succeeded);
                            return RunOutcome::Succeeded(QuerySuccess {
                                sql,
                                explanation,
                                visualization_requested,
                                rows,
                                attempts: state.into_records(),
                            });
                        }
                        ExecutionOutcome::Failure(failure) => {
                            debug!(agent = %self.agent, "Execution failed: {}", failure.message);
                            (
                                failure.kind.code(),
                                failure.message.clone(),
                                Some(ExecutionOutcome::Failure(failure)),
                            )
                        }
                    }
                }
                ValidationOutcome::Rejected(rejection) => {
                    (rejection.reason.code(), rejection.to_string(), None)
                }
            };

            warn!(
                agent = %self.agent,
                attempt = state.attempt(),
                code = %code,
                "Attempt failed"
            );

            let failed_sql = proposal.sql.clone();
            state.record(AttemptRecord {
                index: state.attempt(),
                proposal,
                validation,
                execution,
            });

            if state.attempt() >= self.max_retries {
                self.transition(&mut state, RunPhase::Exhausted);
                warn!(
                    agent = %self.agent,
                    code = "retries_exhausted",
                    "Giving up after {} attempts",
                    state.records().len()
                );
                return RunOutcome::Exhausted(QueryExhausted {
                    message: EXHAUSTED_MESSAGE.to_string(),
                    attempts: state.into_records(),
                });
            }

            self.transition(&mut state, RunPhase::Retrying);
            context = context.with_feedback(AttemptFeedback {
                attempt: state.attempt(),
                sql: failed_sql,
                code,
                message: sanitize_error_message(&raw_message),
            });
            state.next_attempt();
        }
    }

    /// [`run`](Self::run) that stops at the next suspension point once
    /// `cancel` fires. Partial attempt records are dropped.
    pub async fn run_cancellable(
        &self,
        context: GenerationContext,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(agent = %self.agent, "Query run cancelled");
                Err(AgentError::Cancelled)
            }
            outcome = self.run(context) => Ok(outcome),
        }
    }
}
