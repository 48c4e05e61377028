//! MySQL execution adapter using sqlx

use crate::error::Result;
use crate::execution::adapter::{sqlx_failure, take_capped, CappedRows, ExecutionAdapter};
use crate::execution::result::{ExecutionOutcome, QueryRows, Row};
use crate::policy::SqlDialect;
use crate::validator::AcceptedQuery;
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Row as _, TypeInfo, ValueRef};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Runs each query inside `START TRANSACTION READ ONLY` and rolls it back.
pub struct MySqlAdapter {
    pool: MySqlPool,
    statement_timeout: Duration,
}

impl MySqlAdapter {
    pub fn new(pool: MySqlPool, statement_timeout: Duration) -> Self {
        Self {
            pool,
            statement_timeout,
        }
    }

    /// Connect a small pool and check it with `SELECT 1`.
    pub async fn connect(database_url: &str, statement_timeout: Duration) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await?;

        sqlx::query("SELECT 1").execute(&pool).await?;

        Ok(Self::new(pool, statement_timeout))
    }

    async fn run(&self, sql: &str, row_cap: u64) -> std::result::Result<CappedRows<MySqlRow>, sqlx::Error> {
        let mut tx = self.pool.begin_with("START TRANSACTION READ ONLY").await?;

        sqlx::query(&execution_time_statement(self.statement_timeout))
            .execute(&mut *tx)
            .await?;

        let capped = take_capped(sqlx::query(sql).fetch(&mut *tx), row_cap).await?;
        tx.rollback().await?;
        Ok(capped)
    }
}

/// Server-side SELECT timeout for the session, in milliseconds.
fn execution_time_statement(timeout: Duration) -> String {
    format!("SET SESSION max_execution_time = {}", timeout.as_millis())
}

#[async_trait]
impl ExecutionAdapter for MySqlAdapter {
    fn name(&self) -> &'static str {
        "mysql"
    }

    async fn execute(&self, query: &AcceptedQuery, dialect: SqlDialect) -> ExecutionOutcome {
        if dialect != SqlDialect::MySql {
            warn!("MySQL adapter asked to run {} SQL", dialect);
        }

        let start = Instant::now();
        match self.run(query.sql(), query.row_cap()).await {
            Ok(capped) => {
                let columns: Vec<String> = capped
                    .rows
                    .first()
                    .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
                    .unwrap_or_default();
                let rows: Vec<Row> = capped.rows.iter().map(row_to_json).collect();
                info!(
                    "MySQL returned {} rows in {}ms{}",
                    rows.len(),
                    start.elapsed().as_millis(),
                    if capped.truncated { " (more available)" } else { "" }
                );
                ExecutionOutcome::Rows(QueryRows::streamed(columns, rows, capped.truncated))
            }
            Err(e) => sqlx_failure("MySQL", &e),
        }
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn row_to_json(row: &MySqlRow) -> Row {
    let mut out = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        out.insert(
            column.name().to_string(),
            column_value(row, idx, column.type_info().name()),
        );
    }
    out
}

fn column_value(row: &MySqlRow, idx: usize, type_name: &str) -> Value {
    match row.try_get_raw(idx) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Err(_) => return Value::Null,
        _ => {}
    }

    match type_name {
        "BOOLEAN" => row.try_get::<bool, _>(idx).map(Value::Bool).unwrap_or(Value::Null),
        "TINYINT" | "SMALLINT" | "INT" | "MEDIUMINT" | "BIGINT" => {
            row.try_get::<i64, _>(idx).map(Value::from).unwrap_or(Value::Null)
        }
        name if name.ends_with(" UNSIGNED") => {
            row.try_get::<u64, _>(idx).map(Value::from).unwrap_or(Value::Null)
        }
        "FLOAT" | "DOUBLE" => row.try_get::<f64, _>(idx).map(Value::from).unwrap_or(Value::Null),
        "DECIMAL" => row
            .try_get::<Decimal, _>(idx)
            .map(|d| match d.to_f64() {
                Some(f) => Value::from(f),
                None => Value::String(d.to_string()),
            })
            .unwrap_or(Value::Null),
        "JSON" => row.try_get::<Value, _>(idx).unwrap_or(Value::Null),
        "DATE" => row
            .try_get::<chrono::NaiveDate, _>(idx)
            .map(|d| Value::String(d.to_string()))
            .unwrap_or(Value::Null),
        "TIME" => row
            .try_get::<chrono::NaiveTime, _>(idx)
            .map(|t| Value::String(t.to_string()))
            .unwrap_or(Value::Null),
        "DATETIME" => row
            .try_get::<chrono::NaiveDateTime, _>(idx)
            .map(|t| Value::String(t.to_string()))
            .unwrap_or(Value::Null),
        "TIMESTAMP" => row
            .try_get::<chrono::DateTime<chrono::Utc>, _>(idx)
            .map(|t| Value::String(t.to_rfc3339()))
            .unwrap_or(Value::Null),
        _ => row
            .try_get::<String, _>(idx)
            .map(Value::String)
            .unwrap_or_else(|_| Value::String(format!("<{}>", type_name.to_lowercase()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatasourceConfig, DatasourceKind};

    #[test]
    fn test_execution_time_in_millis() {
        assert_eq!(
            execution_time_statement(Duration::from_secs(30)),
            "SET SESSION max_execution_time = 30000"
        );
    }

    #[test]
    fn test_datasource_url_targets_mysql() {
        let datasource = DatasourceConfig {
            kind: "mysql".to_string(),
            database: Some("school".to_string()),
            username: Some("reader".to_string()),
            ..DatasourceConfig::default()
        };
        assert_eq!(datasource.datasource_kind().unwrap(), DatasourceKind::MySql);
        assert_eq!(
            datasource.connection_url().unwrap().as_deref(),
            Some("mysql://reader@localhost:3306/school")
        );
    }
}
