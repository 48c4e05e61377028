//! Error Recovery
//!
//! Builds the retry section of the generation prompt from earlier attempt feedback.

use crate::error::ErrorCode;
use crate::generation::context::AttemptFeedback;
use crate::policy::SqlDialect;

/// Retry prompt builder
pub struct ErrorRecovery {
    dialect: SqlDialect,
    max_rows: u64,
}

impl ErrorRecovery {
    pub fn new(dialect: SqlDialect, max_rows: u64) -> Self {
        Self { dialect, max_rows }
    }

    /// One block per failed attempt, oldest first. Empty when there is no feedback.
    pub fn build_recovery_prompt(&self, feedback: &[AttemptFeedback]) -> String {
        if feedback.is_empty() {
            return String::new();
        }

        let mut prompt_parts = vec![format!(
            "RETRY ATTEMPT {}: earlier queries failed. Do not repeat them.",
            feedback.len() + 1
        )];

        for entry in feedback {
            prompt_parts.push(format!(
                "\nAttempt {} ({}):\n```sql\n{}\n```\nError: {}",
                entry.attempt + 1,
                entry.code,
                entry.sql,
                entry.message
            ));
            prompt_parts.push(self.hint(entry.code).to_string());
        }

        prompt_parts.join("\n")
    }

    fn hint(&self, code: ErrorCode) -> String {
        match code {
            ErrorCode::SyntaxError => format!(
                "The query did not parse as {} SQL. Fix the syntax and return a single statement.",
                self.dialect
            ),
            ErrorCode::NotReadOnly => {
                "Only a single read-only SELECT is allowed. No INSERT/UPDATE/DELETE/DDL, SELECT INTO or locking clauses."
                    .to_string()
            }
            ErrorCode::BlockedFunction => {
                "The query called a function that is not permitted. Answer the question without it."
                    .to_string()
            }
            ErrorCode::ExecutionTimeout => format!(
                "The query ran too long. Filter earlier, aggregate, or return at most {} rows.",
                self.max_rows
            ),
            ErrorCode::ExecutionPermission => {
                "The database refused access. Use only the tables and columns listed in the schema."
                    .to_string()
            }
            ErrorCode::ExecutionOther => {
                "The database rejected the query. Check table and column names against the schema."
                    .to_string()
            }
            _ => "Generate a corrected query.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_prompt_lists_every_attempt() {
        let recovery = ErrorRecovery::new(SqlDialect::Postgres, 100);
        let feedback = vec![
            AttemptFeedback {
                attempt: 0,
                sql: "SELECT pg_sleep(1)".to_string(),
                code: ErrorCode::BlockedFunction,
                message: "Function 'pg_sleep' is not allowed".to_string(),
            },
            AttemptFeedback {
                attempt: 1,
                sql: "SELECT nme FROM students".to_string(),
                code: ErrorCode::ExecutionOther,
                message: "column \"nme\" does not exist".to_string(),
            },
        ];

        let prompt = recovery.build_recovery_prompt(&feedback);
        assert!(prompt.starts_with("RETRY ATTEMPT 3"));
        assert!(prompt.contains("Attempt 1 (blocked_function)"));
        assert!(prompt.contains("column \"nme\" does not exist"));
        assert!(recovery.build_recovery_prompt(&[]).is_empty());
    }
}
