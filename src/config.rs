//! Application Configuration
//!
//! YAML configuration for the agent flow: shared LLM settings, intent
//! routing, the chart sandbox and one block per data agent. Loaded once at
//! startup; environment variables fill in credentials and endpoints.

use crate::error::{AgentError, Result};
use crate::execution::postgres::DEFAULT_STATEMENT_TIMEOUT_SECS;
use crate::execution_loop::DEFAULT_MAX_RETRIES;
use crate::generation::schema::{format_schema_context, FewShotExample, TableSchema};
use crate::intent::descriptor::AgentDescriptor;
use crate::intent::router::{DEFAULT_MIN_CONFIDENCE, DEFAULT_TIE_MARGIN};
use crate::llm::{LlmClient, DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::policy::{AgentPolicy, SqlDialect, DEFAULT_MAX_ROWS};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Upper bound accepted for `max_retries`.
pub const MAX_RETRIES_LIMIT: usize = 10;

const DEFAULT_LLM_TIMEOUT_SECS: u64 = 120;

fn default_max_retries() -> usize {
    DEFAULT_MAX_RETRIES
}

fn default_max_rows() -> u64 {
    DEFAULT_MAX_ROWS
}

fn default_true() -> bool {
    true
}

fn default_min_confidence() -> f64 {
    DEFAULT_MIN_CONFIDENCE
}

fn default_tie_margin() -> f64 {
    DEFAULT_TIE_MARGIN
}

fn default_sandbox_timeout() -> u64 {
    30
}

fn default_max_sessions() -> usize {
    4
}

fn default_acquire_timeout() -> u64 {
    10
}

fn default_python() -> String {
    "python3".to_string()
}

fn default_datasource_type() -> String {
    "postgres".to_string()
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_statement_timeout() -> u64 {
    DEFAULT_STATEMENT_TIMEOUT_SECS
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl LlmConfig {
    /// Settings from `self`, falling back to `base` field by field.
    pub fn merged_over(&self, base: &LlmConfig) -> LlmConfig {
        LlmConfig {
            model: self.model.clone().or_else(|| base.model.clone()),
            base_url: self.base_url.clone().or_else(|| base.base_url.clone()),
            api_key: self.api_key.clone().or_else(|| base.api_key.clone()),
            temperature: self.temperature.or(base.temperature),
            timeout_secs: self.timeout_secs.or(base.timeout_secs),
        }
    }

    pub fn build_client(&self) -> Result<LlmClient> {
        let api_key = self
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| AgentError::Config("OPENAI_API_KEY is not set".to_string()))?;

        let client = LlmClient::new(
            api_key,
            self.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            self.base_url.clone().unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        )
        .with_temperature(self.temperature.unwrap_or(0.0))
        .with_timeout(Duration::from_secs(
            self.timeout_secs.unwrap_or(DEFAULT_LLM_TIMEOUT_SECS),
        ))?;

        Ok(client)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentDetectionConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "default_tie_margin")]
    pub tie_margin: f64,
    #[serde(default = "default_true")]
    pub rewrite_questions: bool,
}

impl Default for IntentDetectionConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            system_prompt: None,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            tie_margin: DEFAULT_TIE_MARGIN,
            rewrite_questions: true,
        }
    }
}

/// Chart sandbox settings. A set `endpoint` selects the remote session pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_sandbox_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
    #[serde(default = "default_python")]
    pub python: String,
    #[serde(default)]
    pub api_token: Option<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: default_sandbox_timeout(),
            max_sessions: default_max_sessions(),
            acquire_timeout_secs: default_acquire_timeout(),
            python: default_python(),
            api_token: None,
        }
    }
}

impl SandboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

/// Backend a datasource block connects to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasourceKind {
    Postgres,
    Sqlite,
    MySql,
}

impl DatasourceKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" => Some(DatasourceKind::Postgres),
            "sqlite" | "sqlite3" => Some(DatasourceKind::Sqlite),
            "mysql" => Some(DatasourceKind::MySql),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DatasourceKind::Postgres => "postgres",
            DatasourceKind::Sqlite => "sqlite",
            DatasourceKind::MySql => "mysql",
        }
    }

    pub fn default_port(&self) -> Option<u16> {
        match self {
            DatasourceKind::Postgres => Some(5432),
            DatasourceKind::MySql => Some(3306),
            DatasourceKind::Sqlite => None,
        }
    }

    /// Dialect the validator should use for SQL sent to this backend.
    pub fn dialect(&self) -> SqlDialect {
        match self {
            DatasourceKind::Postgres => SqlDialect::Postgres,
            DatasourceKind::Sqlite => SqlDialect::Sqlite,
            DatasourceKind::MySql => SqlDialect::MySql,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasourceConfig {
    #[serde(rename = "type", default = "default_datasource_type")]
    pub kind: String,
    #[serde(default)]
    pub connection_string: Option<String>,
    #[serde(default = "default_host")]
    pub host: String,
    /// Defaults to the backend's standard port.
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_statement_timeout")]
    pub statement_timeout_secs: u64,
}

impl Default for DatasourceConfig {
    fn default() -> Self {
        Self {
            kind: default_datasource_type(),
            connection_string: None,
            host: default_host(),
            port: None,
            database: None,
            username: None,
            password: None,
            statement_timeout_secs: default_statement_timeout(),
        }
    }
}

impl DatasourceConfig {
    pub fn datasource_kind(&self) -> Result<DatasourceKind> {
        DatasourceKind::parse(&self.kind).ok_or_else(|| {
            AgentError::Config(format!("unsupported datasource type '{}'", self.kind))
        })
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.statement_timeout_secs)
    }

    pub fn has_connection_settings(&self) -> bool {
        self.connection_string.as_deref().is_some_and(|c| !c.trim().is_empty())
            || self.database.as_deref().is_some_and(|d| !d.trim().is_empty())
    }

    /// Connection URL from `connection_string`, or built from the parts.
    pub fn connection_url(&self) -> Result<Option<String>> {
        if let Some(url) = self.connection_string.as_deref().filter(|c| !c.trim().is_empty()) {
            return Ok(Some(url.trim().to_string()));
        }

        let Some(database) = self.database.as_deref().filter(|d| !d.trim().is_empty()) else {
            return Ok(None);
        };

        let kind = self.datasource_kind()?;
        if kind == DatasourceKind::Sqlite {
            let path = database.trim();
            return Ok(Some(if path == ":memory:" {
                "sqlite::memory:".to_string()
            } else {
                format!("sqlite://{}", path)
            }));
        }

        let port = self.port.or(kind.default_port()).unwrap_or_default();
        let mut url = reqwest::Url::parse(&format!("{}://{}:{}/", kind.as_str(), self.host, port))
            .map_err(|e| AgentError::Config(format!("Invalid datasource host '{}': {}", self.host, e)))?;
        url.set_path(database);
        if let Some(username) = self.username.as_deref().filter(|u| !u.is_empty()) {
            url.set_username(username)
                .map_err(|_| AgentError::Config("Invalid datasource username".to_string()))?;
            if let Some(password) = self.password.as_deref().filter(|p| !p.is_empty()) {
                url.set_password(Some(password))
                    .map_err(|_| AgentError::Config("Invalid datasource password".to_string()))?;
            }
        }

        Ok(Some(url.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationConfig {
    #[serde(default = "default_max_rows")]
    pub max_rows: u64,
    #[serde(default)]
    pub blocked_functions: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_rows: DEFAULT_MAX_ROWS,
            blocked_functions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataAgentConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub dialect: String,
    #[serde(default)]
    pub datasource: DatasourceConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub response_prompt: Option<String>,
    #[serde(default)]
    pub table_schemas: Vec<TableSchema>,
    #[serde(default)]
    pub few_shot_examples: Vec<FewShotExample>,
    #[serde(default)]
    pub max_retries: Option<usize>,
}

impl DataAgentConfig {
    pub fn sql_dialect(&self) -> Result<SqlDialect> {
        self.dialect
            .parse()
            .map_err(|_| AgentError::Config(format!("Agent '{}': unknown dialect '{}'", self.name, self.dialect)))
    }

    /// Immutable policy for this agent, schema rendered into its description.
    pub fn build_policy(&self) -> Result<Arc<AgentPolicy>> {
        Ok(Arc::new(AgentPolicy::new(
            self.sql_dialect()?,
            self.validation.max_rows,
            &self.validation.blocked_functions,
            format_schema_context(&self.table_schemas),
        )))
    }

    pub fn descriptor(&self) -> AgentDescriptor {
        AgentDescriptor::new(self.name.clone(), self.description.clone()).with_tables(&self.table_schemas)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub intent_detection: IntentDetectionConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub audit_log: Option<PathBuf>,
    #[serde(default)]
    pub data_agents: Vec<DataAgentConfig>,
}

impl AppConfig {
    /// Read, apply environment overrides and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| AgentError::Config(format!("Failed to read {}: {}", path.display(), e)))?;

        let mut config = Self::from_yaml_str(&content)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        info!(
            "Loaded {} data agent(s) from {}",
            config.data_agents.len(),
            path.display()
        );
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Fill credentials and endpoints from the environment. `lookup` is
    /// `std::env::var` outside tests.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = var("OPENAI_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Some(url) = var("OPENAI_BASE_URL") {
            self.llm.base_url = Some(url);
        }
        if let Some(model) = var("OPENAI_MODEL") {
            self.llm.model = Some(model);
        }
        if let Some(endpoint) = var("SANDBOX_POOL_ENDPOINT") {
            self.sandbox.endpoint = Some(endpoint);
        }
        if let Some(token) = var("SANDBOX_API_TOKEN") {
            self.sandbox.api_token = Some(token);
        }
        if let Some(url) = var("DATABASE_URL") {
            for agent in &mut self.data_agents {
                if !agent.datasource.has_connection_settings() {
                    debug!(agent = %agent.name, "Using DATABASE_URL for datasource");
                    agent.datasource.connection_string = Some(url.clone());
                }
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.data_agents.is_empty() {
            return Err(AgentError::Config("No data agents configured".to_string()));
        }
        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(AgentError::Config(format!(
                "max_retries must be at most {}, got {}",
                MAX_RETRIES_LIMIT, self.max_retries
            )));
        }
        if !(0.0..=1.0).contains(&self.intent_detection.min_confidence) {
            return Err(AgentError::Config(
                "intent_detection.min_confidence must be between 0 and 1".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for agent in &self.data_agents {
            if agent.name.trim().is_empty() {
                return Err(AgentError::Config("Data agent name must not be empty".to_string()));
            }
            if !names.insert(agent.name.as_str()) {
                return Err(AgentError::Config(format!("Duplicate data agent name '{}'", agent.name)));
            }
            agent.sql_dialect()?;
            if agent.validation.max_rows == 0 {
                return Err(AgentError::Config(format!(
                    "Agent '{}': validation.max_rows must be greater than 0",
                    agent.name
                )));
            }
            if let Some(retries) = agent.max_retries {
                if retries > MAX_RETRIES_LIMIT {
                    return Err(AgentError::Config(format!(
                        "Agent '{}': max_retries must be at most {}",
                        agent.name, MAX_RETRIES_LIMIT
                    )));
                }
            }
            if let Err(e) = agent.datasource.datasource_kind() {
                return Err(AgentError::Config(format!("Agent '{}': {}", agent.name, e)));
            }
        }

        Ok(())
    }

    pub fn agent(&self, name: &str) -> Option<&DataAgentConfig> {
        self.data_agents.iter().find(|a| a.name == name)
    }

    pub fn max_retries_for(&self, agent: &DataAgentConfig) -> usize {
        agent.max_retries.unwrap_or(self.max_retries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    const SAMPLE: &str = r#"
max_retries: 2
intent_detection:
  min_confidence: 0.6
sandbox:
  timeout_secs: 45
audit_log: runs.jsonl
data_agents:
  - name: sales
    description: Orders and revenue
    dialect: postgresql
    datasource:
      type: postgres
      host: db.internal
      database: shop
      username: reader
      password: "p@ss word"
    validation:
      max_rows: 500
      blocked_functions: [dblink]
    table_schemas:
      - name: orders
        description: One row per order
        columns:
          - name: id
            type: integer
          - name: status
            type: text
            allowed_values: [open, shipped]
    few_shot_examples:
      - question: How many orders?
        sql_query: SELECT COUNT(*) FROM orders
  - name: school
    dialect: mssql
    max_retries: 1
"#;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_parse_sample_with_defaults() {
        let config = AppConfig::from_yaml_str(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.max_retries, 2);
        assert!((config.intent_detection.min_confidence - 0.6).abs() < f64::EPSILON);
        assert!(config.intent_detection.rewrite_questions);
        assert_eq!(config.sandbox.timeout_secs, 45);
        assert_eq!(config.sandbox.max_sessions, 4);
        assert_eq!(config.sandbox.python, "python3");

        let sales = config.agent("sales").unwrap();
        assert_eq!(sales.sql_dialect().unwrap(), SqlDialect::Postgres);
        assert_eq!(sales.few_shot_examples[0].sql, "SELECT COUNT(*) FROM orders");

        let school = config.agent("school").unwrap();
        assert_eq!(school.sql_dialect().unwrap(), SqlDialect::TSql);
        assert_eq!(school.validation.max_rows, 10_000);
        assert_eq!(config.max_retries_for(school), 1);
        assert_eq!(config.max_retries_for(sales), 2);
    }

    #[test]
    fn test_policy_built_from_agent() {
        let config = AppConfig::from_yaml_str(SAMPLE).unwrap();
        let policy = config.agent("sales").unwrap().build_policy().unwrap();
        assert_eq!(policy.max_rows(), 500);
        assert!(policy.is_blocked("DBLINK"));
        assert!(policy.is_blocked("pg_sleep"));
        assert!(policy.schema_description().contains("### Table: orders"));
    }

    #[test]
    fn test_connection_url_from_parts() {
        let config = AppConfig::from_yaml_str(SAMPLE).unwrap();
        let url = config.agent("sales").unwrap().datasource.connection_url().unwrap().unwrap();
        assert!(url.starts_with("postgres://reader:"));
        assert!(url.ends_with("@db.internal:5432/shop"));
        assert!(!url.contains(' '));
    }

    #[test]
    fn test_sqlite_and_mysql_datasources() {
        let mut config = AppConfig::from_yaml_str(SAMPLE).unwrap();

        let sales = &mut config.data_agents[0].datasource;
        sales.kind = "mysql".to_string();
        let url = sales.connection_url().unwrap().unwrap();
        assert!(url.starts_with("mysql://reader:"));
        assert!(url.ends_with("@db.internal:3306/shop"));

        sales.port = Some(3307);
        assert!(sales.connection_url().unwrap().unwrap().ends_with(":3307/shop"));

        let school = &mut config.data_agents[1].datasource;
        school.kind = "SQLite".to_string();
        school.database = Some("/var/data/school.db".to_string());
        assert_eq!(school.connection_url().unwrap().as_deref(), Some("sqlite:///var/data/school.db"));
        school.database = Some(":memory:".to_string());
        assert_eq!(school.connection_url().unwrap().as_deref(), Some("sqlite::memory:"));

        config.validate().unwrap();
        assert_eq!(DatasourceKind::parse("PostgreSQL"), Some(DatasourceKind::Postgres));
        assert_eq!(DatasourceKind::Sqlite.dialect(), SqlDialect::Sqlite);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::from_yaml_str(SAMPLE).unwrap();
        config.apply_env_overrides(env(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("SANDBOX_POOL_ENDPOINT", "https://pool.example.test"),
            ("DATABASE_URL", "postgres://fallback/db"),
        ]));

        assert_eq!(config.llm.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.sandbox.endpoint.as_deref(), Some("https://pool.example.test"));
        // Agents with their own connection settings keep them.
        assert_eq!(config.agent("sales").unwrap().datasource.connection_string, None);
        assert_eq!(
            config.agent("school").unwrap().datasource.connection_string.as_deref(),
            Some("postgres://fallback/db")
        );
    }

    #[test]
    fn test_validate_rejections() {
        let base = AppConfig::from_yaml_str(SAMPLE).unwrap();

        let mut empty = base.clone();
        empty.data_agents.clear();
        assert!(empty.validate().is_err());

        let mut duplicate = base.clone();
        duplicate.data_agents[1].name = "sales".to_string();
        assert!(duplicate.validate().unwrap_err().to_string().contains("Duplicate"));

        let mut zero_rows = base.clone();
        zero_rows.data_agents[0].validation.max_rows = 0;
        assert!(zero_rows.validate().is_err());

        let mut bad_dialect = base.clone();
        bad_dialect.data_agents[0].dialect = "oracle".to_string();
        assert!(bad_dialect.validate().unwrap_err().to_string().contains("unknown dialect"));

        let mut too_many = base.clone();
        too_many.max_retries = 11;
        assert!(too_many.validate().is_err());

        let mut other_source = base;
        other_source.data_agents[0].datasource.kind = "bigquery".to_string();
        assert!(other_source.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.data_agents.len(), 2);
        assert_eq!(config.audit_log, Some(PathBuf::from("runs.jsonl")));
    }

    #[test]
    fn test_llm_override_merge() {
        let base = LlmConfig {
            model: Some("gpt-4o".to_string()),
            api_key: Some("sk-base".to_string()),
            ..LlmConfig::default()
        };
        let agent = LlmConfig {
            model: Some("gpt-4o-mini".to_string()),
            ..LlmConfig::default()
        };
        let merged = agent.merged_over(&base);
        assert_eq!(merged.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(merged.api_key.as_deref(), Some("sk-base"));
        assert!(LlmConfig::default().build_client().is_err());
    }
}
