use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use data_agent::config::AppConfig;
use data_agent::conversation::Conversation;
use data_agent::policy::{AgentPolicy, SqlDialect, DEFAULT_MAX_ROWS};
use data_agent::{validate, AgentResponse, DataAgentFlow, ValidationOutcome};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "data-agent")]
#[command(about = "Answer natural-language questions with validated SQL and charts")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Answer one question
    Ask {
        /// Path to the YAML configuration
        #[arg(short, long)]
        config: PathBuf,

        question: String,

        /// Print the full response as JSON
        #[arg(long)]
        json: bool,

        /// Write the chart image here when one is produced
        #[arg(long)]
        image_out: Option<PathBuf>,
    },

    /// Interactive multi-turn session on stdin
    Chat {
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Check that every agent's datasource answers
    Health {
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Run the SQL validator only
    Validate {
        #[arg(short, long, default_value = "postgres")]
        dialect: String,

        #[arg(long, default_value_t = DEFAULT_MAX_ROWS)]
        max_rows: u64,

        /// Extra function names to block (repeatable)
        #[arg(long = "block")]
        blocked: Vec<String>,

        sql: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("data_agent=info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Ask {
            config,
            question,
            json,
            image_out,
        } => ask(config, &question, json, image_out).await,
        Command::Chat { config } => chat(config).await,
        Command::Health { config } => health(config).await,
        Command::Validate {
            dialect,
            max_rows,
            blocked,
            sql,
        } => validate_only(&dialect, max_rows, &blocked, &sql),
    }
}

async fn build_flow(path: &Path) -> Result<DataAgentFlow> {
    let config = AppConfig::load(path).with_context(|| format!("loading {}", path.display()))?;
    let flow = DataAgentFlow::from_config(&config).await?;
    info!("{} data agent(s) ready", flow.agents().len());
    Ok(flow)
}

/// Cancels the returned token on Ctrl-C until the listener is aborted.
fn cancel_on_ctrl_c() -> (CancellationToken, JoinHandle<()>) {
    let token = CancellationToken::new();
    let child = token.clone();
    let listener = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            child.cancel();
        }
    });
    (token, listener)
}

async fn ask(config: PathBuf, question: &str, json: bool, image_out: Option<PathBuf>) -> Result<()> {
    let flow = build_flow(&config).await?;
    let mut conversation = Conversation::new();
    let (cancel, listener) = cancel_on_ctrl_c();

    let response = flow.run_cancellable(question, &mut conversation, &cancel).await;
    listener.abort();
    let response = response?;

    if let (Some(path), Some(image)) = (&image_out, response.image()) {
        std::fs::write(path, image).with_context(|| format!("writing {}", path.display()))?;
        info!("Chart written to {}", path.display());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_response(&response);
    }
    Ok(())
}

async fn chat(config: PathBuf) -> Result<()> {
    let flow = build_flow(&config).await?;
    let mut conversation = Conversation::new();
    let stdin = io::stdin();

    println!("Ask a question (empty line or 'exit' to quit).");
    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let question = line.trim();
        if question.is_empty() || question.eq_ignore_ascii_case("exit") || question.eq_ignore_ascii_case("quit") {
            break;
        }

        let (cancel, listener) = cancel_on_ctrl_c();
        let result = flow.run_cancellable(question, &mut conversation, &cancel).await;
        listener.abort();

        match result {
            Ok(response) => print_response(&response),
            Err(e) => error!("{}", e),
        }
    }
    Ok(())
}

async fn health(config: PathBuf) -> Result<()> {
    let flow = build_flow(&config).await?;
    let report = flow.health_check().await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    let down: Vec<&str> = report.iter().filter(|h| !h.healthy).map(|h| h.agent.as_str()).collect();
    if !down.is_empty() {
        anyhow::bail!("unhealthy datasources: {}", down.join(", "));
    }
    Ok(())
}

fn validate_only(dialect: &str, max_rows: u64, blocked: &[String], sql: &str) -> Result<()> {
    let dialect: SqlDialect = dialect.parse()?;
    let policy = AgentPolicy::new(dialect, max_rows, blocked, "");
    let outcome = validate(sql, &policy);

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if let ValidationOutcome::Rejected(rejection) = outcome {
        anyhow::bail!("rejected: {}", rejection);
    }
    Ok(())
}

fn print_response(response: &AgentResponse) {
    if let Some(agent) = &response.agent {
        println!("[{}]", agent);
    }
    println!("{}", response.answer);

    if let Some(sql) = &response.sql {
        println!("\nSQL: {}", sql);
    }
    if let Some(rows) = &response.rows {
        println!(
            "Rows: {}{}",
            rows.len(),
            if rows.truncated { " (truncated)" } else { "" }
        );
    }
    if response.visualization.is_some() {
        println!("Chart: rendered");
    } else if let Some(code) = response.visualization_error {
        println!("Chart: not available ({})", code);
    }
}
