//! Sandbox Executor capability

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub const PNG_MIME: &str = "image/png";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxFailureKind {
    /// No free session within the acquisition timeout.
    Unavailable,
    Timeout,
    /// The code ran and raised, or produced no image.
    Execution,
    /// Transport or response-format problem talking to the sandbox.
    Transport,
}

impl fmt::Display for SandboxFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SandboxFailureKind::Unavailable => "unavailable",
            SandboxFailureKind::Timeout => "timeout",
            SandboxFailureKind::Execution => "execution",
            SandboxFailureKind::Transport => "transport",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SandboxOutcome {
    Image { bytes: Vec<u8>, mime_type: String },
    Failure { kind: SandboxFailureKind, message: String },
}

impl SandboxOutcome {
    pub fn png(bytes: Vec<u8>) -> Self {
        SandboxOutcome::Image {
            bytes,
            mime_type: PNG_MIME.to_string(),
        }
    }

    pub fn failure(kind: SandboxFailureKind, message: impl Into<String>) -> Self {
        SandboxOutcome::Failure {
            kind,
            message: message.into(),
        }
    }
}

/// Runs untrusted chart code and returns an image or a failure
#[async_trait]
pub trait SandboxExecutor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether code runs outside this host's trust boundary.
    fn isolated(&self) -> bool;

    async fn execute(&self, code: &str, timeout: Duration) -> SandboxOutcome;
}
