//! Execution Log - one JSON line per answered question
//!
//! Keeps the most recent records in memory and optionally appends each one
//! to a JSONL file for later inspection.

use crate::agent::AgentResponse;
use crate::error::{ErrorCode, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

pub const DEFAULT_LOG_CAPACITY: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptSummary {
    pub index: usize,
    pub sql: String,
    /// `None` for the attempt that succeeded.
    pub code: Option<ErrorCode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub agent: Option<String>,
    pub question: String,
    pub effective_question: String,
    pub status: String,
    pub code: Option<ErrorCode>,
    pub attempts: Vec<AttemptSummary>,
    pub row_count: Option<usize>,
    pub visualization: bool,
    pub duration_ms: u64,
}

impl RunRecord {
    pub fn from_response(question: &str, response: &AgentResponse, duration: Duration) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            agent: response.agent.clone(),
            question: question.to_string(),
            effective_question: response.question.clone(),
            status: response.status.as_str().to_string(),
            code: response.code,
            attempts: response
                .attempts
                .iter()
                .map(|attempt| AttemptSummary {
                    index: attempt.index,
                    sql: attempt.effective_sql().to_string(),
                    code: attempt.failure_code(),
                })
                .collect(),
            row_count: response.rows.as_ref().map(|rows| rows.len()),
            visualization: response.visualization.is_some(),
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Bounded run log
pub struct ExecutionLogger {
    records: RwLock<VecDeque<RunRecord>>,
    capacity: usize,
    file: Option<PathBuf>,
    /// Keeps appends whole and in record order.
    file_lock: Mutex<()>,
}

impl ExecutionLogger {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
            file: None,
            file_lock: Mutex::new(()),
        }
    }

    /// Also append every record to `path`.
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    pub async fn record(&self, question: &str, response: &AgentResponse, duration: Duration) -> RunRecord {
        let record = RunRecord::from_response(question, response, duration);

        if let Ok(mut records) = self.records.write() {
            records.push_back(record.clone());
            while records.len() > self.capacity {
                records.pop_front();
            }
        }

        if let Some(path) = &self.file {
            let _guard = self.file_lock.lock().await;
            if let Err(e) = append_line(path, &record).await {
                warn!("Failed to write execution log {}: {}", path.display(), e);
            }
        }

        record
    }

    /// Oldest first.
    pub fn records(&self) -> Vec<RunRecord> {
        self.records
            .read()
            .map(|records| records.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ExecutionLogger {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

async fn append_line(path: &Path, record: &RunRecord) -> Result<()> {
    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ResponseStatus;

    fn response(status: ResponseStatus, code: Option<ErrorCode>) -> AgentResponse {
        AgentResponse {
            agent: Some("sales".to_string()),
            question: "How many orders?".to_string(),
            status,
            sql: None,
            explanation: None,
            answer: "n/a".to_string(),
            rows: None,
            visualization: None,
            visualization_error: None,
            code,
            attempts: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_buffer_is_bounded() {
        let logger = ExecutionLogger::new(2);
        for i in 0..3 {
            logger
                .record(&format!("q{}", i), &response(ResponseStatus::Answered, None), Duration::from_millis(5))
                .await;
        }
        let records = logger.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].question, "q1");
        assert_eq!(records[1].question, "q2");
    }

    #[tokio::test]
    async fn test_appends_jsonl_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.jsonl");
        let logger = ExecutionLogger::default().with_file(&path);

        logger
            .record("q1", &response(ResponseStatus::Exhausted, Some(ErrorCode::RetriesExhausted)), Duration::from_millis(12))
            .await;
        logger.record("q2", &response(ResponseStatus::Answered, None), Duration::from_millis(3)).await;

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: RunRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.status, "exhausted");
        assert_eq!(first.code, Some(ErrorCode::RetriesExhausted));
        assert_eq!(first.duration_ms, 12);
        assert_ne!(first.id, serde_json::from_str::<RunRecord>(lines[1]).unwrap().id);
    }

    #[tokio::test]
    async fn test_concurrent_records_write_whole_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.jsonl");
        let logger = std::sync::Arc::new(ExecutionLogger::default().with_file(&path));

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let logger = logger.clone();
                tokio::spawn(async move {
                    logger
                        .record(&format!("q{}", i), &response(ResponseStatus::Answered, None), Duration::from_millis(1))
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 16);
        for line in lines {
            serde_json::from_str::<RunRecord>(line).unwrap();
        }
        assert_eq!(logger.len(), 16);
    }
}
