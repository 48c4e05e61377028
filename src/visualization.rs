//! Visualization Pipeline
//!
//! Second branch after a successful query: ask the model for matplotlib code
//! over a sample of the result rows, then run it in the sandbox. There is no
//! retry; any failure leaves the answer without an image.

use crate::error::ErrorCode;
use crate::execution::result::QueryRows;
use crate::generation::client::GenerationClient;
use crate::generation::context::ChartRequest;
use crate::sandbox::executor::{SandboxExecutor, SandboxOutcome};
use base64::Engine;
use regex::Regex;
use serde::{Serialize, Serializer};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Rows included in the chart prompt.
pub const CHART_SAMPLE_ROWS: usize = 100;

const PYTHON_FENCE: &str = r"(?s)```python\s*\n(.*?)```";
const ANY_FENCE: &str = r"(?s)```[A-Za-z0-9_+-]*\s*\n(.*?)```";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VisualizationOutcome {
    Image {
        #[serde(rename = "base64_data", serialize_with = "serialize_base64")]
        bytes: Vec<u8>,
        mime_type: String,
    },
    Failure {
        code: ErrorCode,
        message: String,
    },
}

fn serialize_base64<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
}

/// Chart code plus what running it produced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisualizationArtifact {
    pub code: String,
    pub outcome: VisualizationOutcome,
}

impl VisualizationArtifact {
    fn failed(code: String, error: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            outcome: VisualizationOutcome::Failure {
                code: error,
                message: message.into(),
            },
        }
    }

    pub fn image(&self) -> Option<&[u8]> {
        match &self.outcome {
            VisualizationOutcome::Image { bytes, .. } => Some(bytes),
            VisualizationOutcome::Failure { .. } => None,
        }
    }

    pub fn is_image(&self) -> bool {
        self.image().is_some()
    }
}

pub struct VisualizationPipeline {
    generator: Arc<dyn GenerationClient>,
    executor: Arc<dyn SandboxExecutor>,
    timeout: Duration,
}

impl VisualizationPipeline {
    pub fn new(
        generator: Arc<dyn GenerationClient>,
        executor: Arc<dyn SandboxExecutor>,
        timeout: Duration,
    ) -> Self {
        Self {
            generator,
            executor,
            timeout,
        }
    }

    pub fn executor_name(&self) -> &'static str {
        self.executor.name()
    }

    /// Render a chart for `rows`. Returns `None` when there is nothing to plot.
    pub async fn render(&self, question: &str, rows: &QueryRows) -> Option<VisualizationArtifact> {
        if rows.is_empty() {
            debug!("No rows to visualize");
            return None;
        }

        let request = ChartRequest {
            question: question.to_string(),
            columns: rows.columns.clone(),
            sample: rows.sample_json(CHART_SAMPLE_ROWS),
            total_rows: rows.row_count.max(rows.len()),
        };

        let text = match self.generator.generate_chart_code(&request).await {
            Ok(text) => text,
            Err(e) => {
                warn!(code = "generation_error", "Chart generation failed: {}", e);
                return Some(VisualizationArtifact::failed(
                    String::new(),
                    ErrorCode::GenerationError,
                    "Chart code could not be generated",
                ));
            }
        };

        let Some(code) = extract_chart_code(&text) else {
            warn!(code = "generation_error", "No chart code found in model output");
            return Some(VisualizationArtifact::failed(
                String::new(),
                ErrorCode::GenerationError,
                "Model response contained no chart code",
            ));
        };

        info!(executor = self.executor.name(), "Executing chart code");
        match self.executor.execute(&code, self.timeout).await {
            SandboxOutcome::Image { bytes, mime_type } => {
                info!("Chart rendered ({} bytes)", bytes.len());
                Some(VisualizationArtifact {
                    code,
                    outcome: VisualizationOutcome::Image { bytes, mime_type },
                })
            }
            SandboxOutcome::Failure { kind, message } => {
                warn!(code = "sandbox_failure", kind = %kind, "Chart execution failed: {}", message);
                Some(VisualizationArtifact::failed(code, ErrorCode::SandboxFailure, message))
            }
        }
    }
}

/// Pull runnable code out of a model response: a python fence, else any
/// fence, else the whole text when it imports matplotlib.
pub fn extract_chart_code(text: &str) -> Option<String> {
    for pattern in [PYTHON_FENCE, ANY_FENCE] {
        if let Ok(re) = Regex::new(pattern) {
            if let Some(code) = re.captures(text).and_then(|c| c.get(1)) {
                let code = code.as_str().trim();
                if !code.is_empty() {
                    return Some(code.to_string());
                }
            }
        }
    }

    let trimmed = text.trim();
    if trimmed.contains("import") && (trimmed.contains("matplotlib") || trimmed.contains("plt")) {
        return Some(trimmed.to_string());
    }
    None
}
