//! Local Python Executor
//!
//! Development fallback used when no remote session pool is configured.
//! The code runs as a child Python process on this host with the
//! interpreter's full privileges; there is no isolation.

use crate::sandbox::executor::{SandboxExecutor, SandboxFailureKind, SandboxOutcome};
use crate::sandbox::remote::last_line;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

pub const OUTPUT_FILE: &str = "visualization.png";
const SCRIPT_FILE: &str = "chart.py";

/// Headless backend and a `plt.show()` that writes the figure to disk.
const PRELUDE: &str = r#"import matplotlib
matplotlib.use("Agg")
import matplotlib.pyplot as plt

def _save_figure(*args, **kwargs):
    plt.savefig("visualization.png", format="png", dpi=150, bbox_inches="tight")
    plt.close("all")

plt.show = _save_figure
"#;

/// Saves a figure the code drew but never showed.
const EPILOGUE: &str = r#"
import os as _os
if plt.get_fignums() and not _os.path.exists("visualization.png"):
    _save_figure()
"#;

pub struct LocalSandboxExecutor {
    python: String,
}

impl LocalSandboxExecutor {
    pub fn new(python: impl Into<String>) -> Self {
        warn!("Local sandbox runs chart code on this host without isolation; use only in development");
        Self {
            python: python.into(),
        }
    }

    pub fn python(&self) -> &str {
        &self.python
    }

    async fn run_script(&self, dir: &Path, timeout: Duration) -> SandboxOutcome {
        let mut command = Command::new(&self.python);
        command
            .arg(SCRIPT_FILE)
            .current_dir(dir)
            .env("MPLBACKEND", "Agg")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return SandboxOutcome::failure(
                    SandboxFailureKind::Unavailable,
                    format!("Failed to start {}: {}", self.python, e),
                );
            }
        };

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return SandboxOutcome::failure(
                    SandboxFailureKind::Execution,
                    format!("Chart process failed: {}", e),
                );
            }
            Err(_) => {
                return SandboxOutcome::failure(
                    SandboxFailureKind::Timeout,
                    format!("Chart code timed out after {}s", timeout.as_secs()),
                );
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            debug!("Chart process stderr: {}", stderr);
            return SandboxOutcome::failure(
                SandboxFailureKind::Execution,
                format!("Chart code failed: {}", last_line(&stderr)),
            );
        }

        match tokio::fs::read(dir.join(OUTPUT_FILE)).await {
            Ok(bytes) if !bytes.is_empty() => SandboxOutcome::png(bytes),
            _ => SandboxOutcome::failure(SandboxFailureKind::Execution, "Chart code produced no image"),
        }
    }
}

/// Full script written to disk for one run.
pub fn build_script(code: &str) -> String {
    format!("{}\n{}\n{}", PRELUDE, code.trim_end(), EPILOGUE)
}

#[async_trait]
impl SandboxExecutor for LocalSandboxExecutor {
    fn name(&self) -> &'static str {
        "local"
    }

    fn isolated(&self) -> bool {
        false
    }

    async fn execute(&self, code: &str, timeout: Duration) -> SandboxOutcome {
        let dir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                return SandboxOutcome::failure(
                    SandboxFailureKind::Unavailable,
                    format!("Failed to create working directory: {}", e),
                );
            }
        };

        if let Err(e) = tokio::fs::write(dir.path().join(SCRIPT_FILE), build_script(code)).await {
            return SandboxOutcome::failure(
                SandboxFailureKind::Unavailable,
                format!("Failed to write chart script: {}", e),
            );
        }

        debug!(dir = %dir.path().display(), "Running chart code locally");
        self.run_script(dir.path(), timeout).await
    }
}
