//! Agent Policy
//!
//! Per-agent safety configuration: dialect, row cap, blocked functions and
//! the schema description handed to the model. Built once at startup.

use crate::error::{AgentError, Result};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use sqlparser::dialect::{
    BigQueryDialect, Dialect, DuckDbDialect, GenericDialect, MsSqlDialect, MySqlDialect,
    PostgreSqlDialect, SQLiteDialect, SnowflakeDialect,
};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_MAX_ROWS: u64 = 10_000;

/// SQL variant of a target backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlDialect {
    Postgres,
    TSql,
    MySql,
    Sqlite,
    BigQuery,
    Snowflake,
    DuckDb,
    Databricks,
    CosmosDb,
    Generic,
}

impl SqlDialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            SqlDialect::Postgres => "postgres",
            SqlDialect::TSql => "tsql",
            SqlDialect::MySql => "mysql",
            SqlDialect::Sqlite => "sqlite",
            SqlDialect::BigQuery => "bigquery",
            SqlDialect::Snowflake => "snowflake",
            SqlDialect::DuckDb => "duckdb",
            SqlDialect::Databricks => "databricks",
            SqlDialect::CosmosDb => "cosmosdb",
            SqlDialect::Generic => "generic",
        }
    }

    /// Parser grammar for this dialect. Cosmos DB SQL has no grammar here and
    /// falls back to keyword validation.
    pub fn parser_dialect(&self) -> Option<Box<dyn Dialect>> {
        match self {
            SqlDialect::Postgres => Some(Box::new(PostgreSqlDialect {})),
            SqlDialect::TSql => Some(Box::new(MsSqlDialect {})),
            SqlDialect::MySql => Some(Box::new(MySqlDialect {})),
            SqlDialect::Sqlite => Some(Box::new(SQLiteDialect {})),
            SqlDialect::BigQuery => Some(Box::new(BigQueryDialect {})),
            SqlDialect::Snowflake => Some(Box::new(SnowflakeDialect {})),
            SqlDialect::DuckDb => Some(Box::new(DuckDbDialect {})),
            SqlDialect::Databricks | SqlDialect::Generic => Some(Box::new(GenericDialect {})),
            SqlDialect::CosmosDb => None,
        }
    }

    /// Dialects that bound rows with `TOP n` instead of `LIMIT n`.
    pub fn uses_top(&self) -> bool {
        matches!(self, SqlDialect::TSql | SqlDialect::CosmosDb)
    }
}

impl FromStr for SqlDialect {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" | "redshift" => Ok(SqlDialect::Postgres),
            "tsql" | "mssql" | "sqlserver" | "azure_sql" | "synapse" => Ok(SqlDialect::TSql),
            "mysql" | "mariadb" => Ok(SqlDialect::MySql),
            "sqlite" => Ok(SqlDialect::Sqlite),
            "bigquery" => Ok(SqlDialect::BigQuery),
            "snowflake" => Ok(SqlDialect::Snowflake),
            "duckdb" => Ok(SqlDialect::DuckDb),
            "databricks" | "spark" => Ok(SqlDialect::Databricks),
            "cosmos" | "cosmosdb" => Ok(SqlDialect::CosmosDb),
            "generic" | "ansi" => Ok(SqlDialect::Generic),
            other => Err(AgentError::Config(format!("Unknown SQL dialect: {}", other))),
        }
    }
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Functions blocked for every dialect.
const COMMON_BLOCKED: &[&str] = &[
    "pg_sleep",
    "pg_read_file",
    "pg_read_binary_file",
    "pg_ls_dir",
    "pg_stat_file",
    "lo_import",
    "lo_export",
    "sleep",
    "benchmark",
    "load_file",
    "into_outfile",
    "into_dumpfile",
    "xp_cmdshell",
    "xp_fileexist",
    "xp_dirtree",
    "xp_regread",
    "xp_regwrite",
    "sp_oacreate",
    "sp_oamethod",
    "openrowset",
    "opendatasource",
    "bulk",
    "waitfor",
    "session_user",
    "reflect",
    "java_method",
    "exec",
    "execute",
    "system",
    "shell",
];

lazy_static! {
    static ref DIALECT_BLOCKED: HashMap<SqlDialect, HashSet<&'static str>> = {
        let extras: &[(SqlDialect, &[&str])] = &[
            (
                SqlDialect::Postgres,
                &[
                    "dblink",
                    "dblink_exec",
                    "pg_terminate_backend",
                    "pg_cancel_backend",
                    "pg_reload_conf",
                    "pg_sleep_for",
                    "pg_sleep_until",
                    "lo_get",
                    "lo_put",
                ],
            ),
            (SqlDialect::TSql, &["openquery", "xp_servicecontrol", "sp_executesql"]),
            (SqlDialect::MySql, &["get_lock", "sys_exec", "sys_eval"]),
            (SqlDialect::Sqlite, &["load_extension", "readfile", "writefile", "edit"]),
            (SqlDialect::Databricks, &["java_method", "reflect"]),
            (SqlDialect::DuckDb, &["read_text", "read_blob", "glob"]),
        ];

        let all = [
            SqlDialect::Postgres,
            SqlDialect::TSql,
            SqlDialect::MySql,
            SqlDialect::Sqlite,
            SqlDialect::BigQuery,
            SqlDialect::Snowflake,
            SqlDialect::DuckDb,
            SqlDialect::Databricks,
            SqlDialect::CosmosDb,
            SqlDialect::Generic,
        ];

        let mut table = HashMap::new();
        for dialect in all {
            let mut set: HashSet<&'static str> = COMMON_BLOCKED.iter().copied().collect();
            if let Some((_, names)) = extras.iter().find(|(d, _)| *d == dialect) {
                set.extend(names.iter().copied());
            }
            table.insert(dialect, set);
        }
        table
    };
}

/// Built-in dangerous function names for a dialect (lowercase).
pub fn base_blocked_functions(dialect: SqlDialect) -> BTreeSet<String> {
    DIALECT_BLOCKED
        .get(&dialect)
        .map(|set| set.iter().map(|name| name.to_string()).collect())
        .unwrap_or_default()
}

/// Immutable per-agent safety configuration
#[derive(Debug, Clone, Serialize)]
pub struct AgentPolicy {
    dialect: SqlDialect,
    max_rows: u64,
    blocked_functions: BTreeSet<String>,
    schema_description: String,
}

impl AgentPolicy {
    /// Build a policy; `extra_blocked` is merged into the dialect's base list.
    pub fn new<I, S>(
        dialect: SqlDialect,
        max_rows: u64,
        extra_blocked: I,
        schema_description: impl Into<String>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut blocked_functions = base_blocked_functions(dialect);
        blocked_functions.extend(
            extra_blocked
                .into_iter()
                .map(|name| name.as_ref().trim().to_lowercase())
                .filter(|name| !name.is_empty()),
        );

        Self {
            dialect,
            max_rows,
            blocked_functions,
            schema_description: schema_description.into(),
        }
    }

    pub fn with_defaults(dialect: SqlDialect) -> Self {
        Self::new(dialect, DEFAULT_MAX_ROWS, Vec::<String>::new(), "")
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    pub fn max_rows(&self) -> u64 {
        self.max_rows
    }

    pub fn schema_description(&self) -> &str {
        &self.schema_description
    }

    pub fn blocked_functions(&self) -> &BTreeSet<String> {
        &self.blocked_functions
    }

    /// Case-insensitive membership test.
    pub fn is_blocked(&self, function_name: &str) -> bool {
        self.blocked_functions.contains(&function_name.to_lowercase())
    }
}
