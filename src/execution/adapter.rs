//! Execution Adapter - runs validated SQL against a backend

use crate::config::{DatasourceConfig, DatasourceKind};
use crate::error::{AgentError, Result};
use crate::execution::mysql::MySqlAdapter;
use crate::execution::postgres::PostgresAdapter;
use crate::execution::result::{ExecutionErrorKind, ExecutionOutcome};
use crate::execution::sqlite::SqliteAdapter;
use crate::execution_loop::error_classifier::classify_error_message;
use crate::policy::SqlDialect;
use crate::validator::AcceptedQuery;
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::sync::Arc;
use tracing::debug;

/// Backend capability consumed by the query state machine.
///
/// Takes an [`AcceptedQuery`] rather than raw text, so every statement an
/// adapter sees has been through the validator. Failures are returned as
/// [`ExecutionOutcome::Failure`], never as `Err`.
#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    /// Adapter name (e.g., "postgres")
    fn name(&self) -> &'static str;

    async fn execute(&self, query: &AcceptedQuery, dialect: SqlDialect) -> ExecutionOutcome;

    /// Round-trip to the backend. Adapters without a connection are always healthy.
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// Rows pulled off a result stream, and whether more were left unread.
#[derive(Debug)]
pub struct CappedRows<T> {
    pub rows: Vec<T>,
    pub truncated: bool,
}

/// Read at most `row_cap` rows from `stream`.
///
/// One extra row is polled to tell an exact fit from a truncated result;
/// nothing after it is read.
pub async fn take_capped<S, T, E>(mut stream: S, row_cap: u64) -> std::result::Result<CappedRows<T>, E>
where
    S: Stream<Item = std::result::Result<T, E>> + Unpin,
{
    let cap = usize::try_from(row_cap).unwrap_or(usize::MAX);
    let mut rows = Vec::new();
    while let Some(row) = stream.try_next().await? {
        if rows.len() >= cap {
            return Ok(CappedRows { rows, truncated: true });
        }
        rows.push(row);
    }
    Ok(CappedRows { rows, truncated: false })
}

/// SQLSTATE-based mapping; falls back to message keywords.
pub fn classify_sqlx_error(error: &sqlx::Error) -> ExecutionErrorKind {
    match error {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some("57014") => ExecutionErrorKind::Timeout,
            Some("42501") | Some("28000") | Some("28P01") => ExecutionErrorKind::Permission,
            Some(code) if code.starts_with("08") => ExecutionErrorKind::Connection,
            _ => classify_error_message(db.message()),
        },
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::WorkerCrashed => ExecutionErrorKind::Connection,
        other => classify_error_message(&other.to_string()),
    }
}

/// Failure outcome for a driver error, keeping only the backend's own message.
pub fn sqlx_failure(adapter: &str, error: &sqlx::Error) -> ExecutionOutcome {
    let kind = classify_sqlx_error(error);
    debug!("{} error ({:?}): {}", adapter, kind, error);
    let message = match error {
        sqlx::Error::Database(db) => db.message().to_string(),
        other => other.to_string(),
    };
    ExecutionOutcome::failure(kind, message)
}

/// Connect the adapter named by the datasource's `type`.
pub async fn connect_adapter(datasource: &DatasourceConfig, agent: &str) -> Result<Arc<dyn ExecutionAdapter>> {
    let kind = datasource.datasource_kind()?;
    let url = datasource.connection_url()?.ok_or_else(|| {
        AgentError::Config(format!(
            "Agent '{}' has no datasource connection settings and DATABASE_URL is not set",
            agent
        ))
    })?;
    let timeout = datasource.statement_timeout();

    let adapter: Arc<dyn ExecutionAdapter> = match kind {
        DatasourceKind::Postgres => Arc::new(PostgresAdapter::connect(&url, timeout).await?),
        DatasourceKind::Sqlite => Arc::new(SqliteAdapter::connect(&url, timeout).await?),
        DatasourceKind::MySql => Arc::new(MySqlAdapter::connect(&url, timeout).await?),
    };
    Ok(adapter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_take_capped_stops_after_one_extra_row() {
        let pulled = AtomicUsize::new(0);
        let rows = stream::iter((0..1_000).map(|i| {
            pulled.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(i)
        }));

        let capped = take_capped(rows, 10).await.unwrap();
        assert_eq!(capped.rows, (0..10).collect::<Vec<_>>());
        assert!(capped.truncated);
        assert_eq!(pulled.load(Ordering::SeqCst), 11);
    }

    #[tokio::test]
    async fn test_take_capped_exact_fit_is_not_truncated() {
        let capped = take_capped(stream::iter((0..5).map(Ok::<_, String>)), 5).await.unwrap();
        assert_eq!(capped.rows.len(), 5);
        assert!(!capped.truncated);
    }

    #[tokio::test]
    async fn test_take_capped_propagates_errors() {
        let rows = stream::iter(vec![Ok(1), Err("canceling statement due to statement timeout".to_string())]);
        let error = take_capped(rows, 10).await.unwrap_err();
        assert!(error.contains("timeout"));
    }

    #[test]
    fn test_pool_errors_are_connection_failures() {
        assert_eq!(classify_sqlx_error(&sqlx::Error::PoolTimedOut), ExecutionErrorKind::Connection);
        assert_eq!(
            classify_sqlx_error(&sqlx::Error::Protocol("permission denied for table orders".to_string())),
            ExecutionErrorKind::Permission
        );
    }
}
