//! SQLite execution adapter using sqlx

use crate::error::Result;
use crate::execution::adapter::{sqlx_failure, take_capped, CappedRows, ExecutionAdapter};
use crate::execution::result::{ExecutionErrorKind, ExecutionOutcome, QueryRows, Row};
use crate::policy::SqlDialect;
use crate::validator::AcceptedQuery;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row as _, TypeInfo, ValueRef};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Opens the database file read-only. SQLite has no server-side statement
/// timeout, so the timeout bounds the whole call instead.
pub struct SqliteAdapter {
    pool: SqlitePool,
    statement_timeout: Duration,
}

impl SqliteAdapter {
    pub fn new(pool: SqlitePool, statement_timeout: Duration) -> Self {
        Self {
            pool,
            statement_timeout,
        }
    }

    pub async fn connect(database_url: &str, statement_timeout: Duration) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .read_only(true)
            .busy_timeout(statement_timeout);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await?;

        sqlx::query("SELECT 1").execute(&pool).await?;

        Ok(Self::new(pool, statement_timeout))
    }

    async fn run(&self, sql: &str, row_cap: u64) -> std::result::Result<CappedRows<SqliteRow>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        take_capped(sqlx::query(sql).fetch(&mut *conn), row_cap).await
    }
}

#[async_trait]
impl ExecutionAdapter for SqliteAdapter {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn execute(&self, query: &AcceptedQuery, dialect: SqlDialect) -> ExecutionOutcome {
        if dialect != SqlDialect::Sqlite {
            warn!("SQLite adapter asked to run {} SQL", dialect);
        }

        let start = Instant::now();
        match tokio::time::timeout(self.statement_timeout, self.run(query.sql(), query.row_cap())).await {
            Ok(Ok(capped)) => {
                let columns: Vec<String> = capped
                    .rows
                    .first()
                    .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
                    .unwrap_or_default();
                let rows: Vec<Row> = capped.rows.iter().map(row_to_json).collect();
                info!(
                    "SQLite returned {} rows in {}ms{}",
                    rows.len(),
                    start.elapsed().as_millis(),
                    if capped.truncated { " (more available)" } else { "" }
                );
                ExecutionOutcome::Rows(QueryRows::streamed(columns, rows, capped.truncated))
            }
            Ok(Err(e)) => sqlx_failure("SQLite", &e),
            Err(_) => ExecutionOutcome::failure(
                ExecutionErrorKind::Timeout,
                format!(
                    "statement timeout of {}ms exceeded",
                    self.statement_timeout.as_millis()
                ),
            ),
        }
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn row_to_json(row: &SqliteRow) -> Row {
    let mut out = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        out.insert(column.name().to_string(), column_value(row, idx));
    }
    out
}

/// Decode by the value's storage class; declared column types are advisory in SQLite.
fn column_value(row: &SqliteRow, idx: usize) -> Value {
    let storage = match row.try_get_raw(idx) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(raw) => raw.type_info().name().to_string(),
        Err(_) => return Value::Null,
    };

    match storage.as_str() {
        "INTEGER" => row.try_get::<i64, _>(idx).map(Value::from).unwrap_or(Value::Null),
        "REAL" => row.try_get::<f64, _>(idx).map(Value::from).unwrap_or(Value::Null),
        "BLOB" => Value::String("<blob>".to_string()),
        _ => row
            .try_get::<String, _>(idx)
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}
