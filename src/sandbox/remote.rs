//! Remote Session-Pool Sandbox
//!
//! Runs chart code in a remote dynamic-sessions pool over HTTP. A bounded
//! number of sessions can be in flight at once; each call leases a session
//! identifier and gives it back when the lease drops.

use crate::error::{AgentError, Result};
use crate::sandbox::executor::{SandboxExecutor, SandboxFailureKind, SandboxOutcome};
use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

pub const SESSIONS_API_VERSION: &str = "2024-02-02-preview";

/// Extra time allowed for the HTTP round trip on top of the code timeout.
const TRANSPORT_SLACK: Duration = Duration::from_secs(10);

pub struct RemoteSandboxExecutor {
    endpoint: String,
    api_token: Option<String>,
    http: reqwest::Client,
    permits: Arc<Semaphore>,
    idle: Arc<Mutex<Vec<String>>>,
    acquire_timeout: Duration,
}

/// A session checked out of the pool.
struct SessionLease {
    id: Option<String>,
    idle: Arc<Mutex<Vec<String>>>,
    _permit: OwnedSemaphorePermit,
}

impl SessionLease {
    fn id(&self) -> &str {
        self.id.as_deref().unwrap_or_default()
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            if let Ok(mut idle) = self.idle.lock() {
                idle.push(id);
            }
        }
    }
}

impl RemoteSandboxExecutor {
    pub fn new(
        endpoint: impl Into<String>,
        api_token: Option<String>,
        max_sessions: usize,
        acquire_timeout: Duration,
    ) -> Self {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        Self {
            endpoint,
            api_token,
            http: reqwest::Client::new(),
            permits: Arc::new(Semaphore::new(max_sessions.max(1))),
            idle: Arc::new(Mutex::new(Vec::new())),
            acquire_timeout,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Sessions not currently leased.
    pub fn available_sessions(&self) -> usize {
        self.permits.available_permits()
    }

    async fn acquire(&self) -> Result<SessionLease> {
        let permit = tokio::time::timeout(self.acquire_timeout, self.permits.clone().acquire_owned())
            .await
            .map_err(|_| {
                AgentError::Sandbox(format!(
                    "No sandbox session available within {}s",
                    self.acquire_timeout.as_secs()
                ))
            })?
            .map_err(|e| AgentError::Sandbox(format!("Session pool closed: {}", e)))?;

        let reused = self.idle.lock().ok().and_then(|mut idle| idle.pop());
        let id = reused.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Ok(SessionLease {
            id: Some(id),
            idle: self.idle.clone(),
            _permit: permit,
        })
    }

    async fn post_code(&self, session: &str, code: &str, timeout: Duration) -> Result<Value> {
        let url = format!("{}/code/execute", self.endpoint);
        let body = json!({
            "properties": {
                "codeInputType": "inline",
                "executionType": "synchronous",
                "code": code,
                "timeoutInSeconds": timeout.as_secs().max(1),
            }
        });

        let mut request = self
            .http
            .post(&url)
            .query(&[("api-version", SESSIONS_API_VERSION), ("identifier", session)])
            .timeout(timeout + TRANSPORT_SLACK)
            .json(&body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AgentError::Sandbox(format!("Session request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AgentError::Sandbox(format!("Failed to read session response: {}", e)))?;

        if !status.is_success() {
            return Err(AgentError::Sandbox(format!(
                "Session pool returned {}: {}",
                status, text
            )));
        }

        Ok(serde_json::from_str(&text)?)
    }
}

/// Turn a `code/execute` response body into an outcome.
pub fn parse_execution_response(body: &Value) -> SandboxOutcome {
    let properties = body.get("properties").unwrap_or(body);

    let status = properties
        .get("status")
        .and_then(|s| s.as_str())
        .unwrap_or("Success");
    let stderr = properties
        .get("stderr")
        .and_then(|s| s.as_str())
        .unwrap_or("")
        .trim();

    if !status.eq_ignore_ascii_case("success") || properties.get("error").is_some_and(|e| !e.is_null()) {
        let detail = properties
            .get("error")
            .and_then(|e| e.as_str())
            .filter(|e| !e.is_empty())
            .unwrap_or(stderr);
        return SandboxOutcome::failure(
            SandboxFailureKind::Execution,
            format!("Chart code failed: {}", last_line(detail)),
        );
    }

    let result = properties.get("result");
    let is_image = result
        .and_then(|r| r.get("type"))
        .and_then(|t| t.as_str())
        == Some("image");

    if is_image {
        let data = result
            .and_then(|r| r.get("base64_data"))
            .and_then(|d| d.as_str())
            .unwrap_or("");
        return match base64::engine::general_purpose::STANDARD.decode(data) {
            Ok(bytes) if !bytes.is_empty() => SandboxOutcome::png(bytes),
            Ok(_) => SandboxOutcome::failure(SandboxFailureKind::Transport, "Session returned an empty image"),
            Err(e) => SandboxOutcome::failure(
                SandboxFailureKind::Transport,
                format!("Session returned invalid image data: {}", e),
            ),
        };
    }

    let message = if stderr.is_empty() {
        "Chart code produced no image".to_string()
    } else {
        format!("Chart code produced no image: {}", last_line(stderr))
    };
    SandboxOutcome::failure(SandboxFailureKind::Execution, message)
}

/// Python tracebacks end with the exception line.
pub(crate) fn last_line(text: &str) -> &str {
    text.lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("")
}

#[async_trait]
impl SandboxExecutor for RemoteSandboxExecutor {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn isolated(&self) -> bool {
        true
    }

    async fn execute(&self, code: &str, timeout: Duration) -> SandboxOutcome {
        let lease = match self.acquire().await {
            Ok(lease) => lease,
            Err(e) => {
                warn!("Sandbox session unavailable: {}", e);
                return SandboxOutcome::failure(SandboxFailureKind::Unavailable, e.to_string());
            }
        };

        info!(session = %lease.id(), "Running chart code in remote session");

        let body = match tokio::time::timeout(
            timeout + TRANSPORT_SLACK,
            self.post_code(lease.id(), code, timeout),
        )
        .await
        {
            Ok(Ok(body)) => body,
            Ok(Err(e)) => {
                debug!("Remote sandbox error: {}", e);
                return SandboxOutcome::failure(SandboxFailureKind::Transport, e.to_string());
            }
            Err(_) => {
                return SandboxOutcome::failure(
                    SandboxFailureKind::Timeout,
                    format!("Chart code timed out after {}s", timeout.as_secs()),
                );
            }
        };

        parse_execution_response(&body)
    }
}
