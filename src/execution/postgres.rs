//! PostgreSQL execution adapter using sqlx

use crate::error::Result;
use crate::execution::adapter::{sqlx_failure, take_capped, CappedRows, ExecutionAdapter};
use crate::execution::result::{ExecutionOutcome, QueryRows, Row};
use crate::policy::SqlDialect;
use crate::validator::AcceptedQuery;
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row as _, TypeInfo, ValueRef};
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub const DEFAULT_STATEMENT_TIMEOUT_SECS: u64 = 30;

/// Runs each query in a read-only transaction that is always rolled back.
pub struct PostgresAdapter {
    pool: PgPool,
    statement_timeout: Duration,
}

impl PostgresAdapter {
    pub fn new(pool: PgPool, statement_timeout: Duration) -> Self {
        Self {
            pool,
            statement_timeout,
        }
    }

    /// Connect a small pool and check it with `SELECT 1`.
    pub async fn connect(database_url: &str, statement_timeout: Duration) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await?;

        sqlx::query("SELECT 1").execute(&pool).await?;

        Ok(Self::new(pool, statement_timeout))
    }

    /// Stream at most `row_cap` rows; the rest of the result is never read.
    async fn run(&self, sql: &str, row_cap: u64) -> std::result::Result<CappedRows<PgRow>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!(
            "SET LOCAL statement_timeout = {}",
            self.statement_timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await?;

        let capped = take_capped(sqlx::query(sql).fetch(&mut *tx), row_cap).await?;
        tx.rollback().await?;
        Ok(capped)
    }
}

#[async_trait]
impl ExecutionAdapter for PostgresAdapter {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn execute(&self, query: &AcceptedQuery, dialect: SqlDialect) -> ExecutionOutcome {
        if dialect != SqlDialect::Postgres {
            warn!("Postgres adapter asked to run {} SQL", dialect);
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
                    "Postgres returned {} rows in {}ms{}",
                    rows.len(),
                    start.elapsed().as_millis(),
                    if capped.truncated { " (more available)" } else { "" }
                );
                ExecutionOutcome::Rows(QueryRows::streamed(columns, rows, capped.truncated))
            }
            Err(e) => sqlx_failure("Postgres", &e),
        }
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn row_to_json(row: &PgRow) -> Row {
    let mut out = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        out.insert(
            column.name().to_string(),
            column_value(row, idx, column.type_info().name()),
        );
    }
    out
}

fn column_value(row: &PgRow, idx: usize, type_name: &str) -> Value {
    match row.try_get_raw(idx) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Err(_) => return Value::Null,
        _ => {}
    }

    match type_name {
        "BOOL" => row.try_get::<bool, _>(idx).map(Value::Bool).unwrap_or(Value::Null),
        "INT2" => row.try_get::<i16, _>(idx).map(Value::from).unwrap_or(Value::Null),
        "INT4" => row.try_get::<i32, _>(idx).map(Value::from).unwrap_or(Value::Null),
        "INT8" => row.try_get::<i64, _>(idx).map(Value::from).unwrap_or(Value::Null),
        "FLOAT4" => row
            .try_get::<f32, _>(idx)
            .map(|v| Value::from(f64::from(v)))
            .unwrap_or(Value::Null),
        "FLOAT8" => row.try_get::<f64, _>(idx).map(Value::from).unwrap_or(Value::Null),
        "NUMERIC" => row
            .try_get::<Decimal, _>(idx)
            .map(|d| match d.to_f64() {
                Some(f) => Value::from(f),
                None => Value::String(d.to_string()),
            })
            .unwrap_or(Value::Null),
        "JSON" | "JSONB" => row.try_get::<Value, _>(idx).unwrap_or(Value::Null),
        "UUID" => row
            .try_get::<uuid::Uuid, _>(idx)
            .map(|u| Value::String(u.to_string()))
            .unwrap_or(Value::Null),
        "DATE" => row
            .try_get::<chrono::NaiveDate, _>(idx)
            .map(|d| Value::String(d.to_string()))
            .unwrap_or(Value::Null),
        "TIME" => row
            .try_get::<chrono::NaiveTime, _>(idx)
            .map(|t| Value::String(t.to_string()))
            .unwrap_or(Value::Null),
        "TIMESTAMP" => row
            .try_get::<chrono::NaiveDateTime, _>(idx)
            .map(|t| Value::String(t.to_string()))
            .unwrap_or(Value::Null),
        "TIMESTAMPTZ" => row
            .try_get::<chrono::DateTime<chrono::Utc>, _>(idx)
            .map(|t| Value::String(t.to_rfc3339()))
            .unwrap_or(Value::Null),
        _ => row
            .try_get::<String, _>(idx)
            .map(Value::String)
            .unwrap_or_else(|_| Value::String(format!("<{}>", type_name.to_lowercase()))),
    }
}
