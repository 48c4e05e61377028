//! Prompt templates and message builders for every model call.

use crate::execution_loop::error_recovery::ErrorRecovery;
use crate::generation::context::{ChartRequest, GenerationContext, SummaryRequest};
use crate::generation::schema::format_few_shot_examples;
use crate::intent::AgentDescriptor;
use crate::llm::ChatMessage;
use crate::policy::SqlDialect;

pub const DEFAULT_SQL_PROMPT: &str = "You are a SQL expert. Generate a syntactically correct {dialect} query.
Limit results to 10 unless specified. Only select relevant columns.

## Conversation Context
If this is a follow-up question, use the conversation history to understand what the user is referring to.
When in doubt, infer context from the most recent SQL query in the conversation.

IMPORTANT: Always generate a single, executable SQL query. Never include comments, explanations, or multiple query options.

{schema_context}

{few_shot_examples}";

const COSMOS_ADDENDUM: &str = "
Key Cosmos DB constraints:
1. Queries operate on a SINGLE container - no cross-container or cross-document joins.
2. JOIN only works WITHIN documents (to traverse arrays), not across documents.
3. Always filter on the partition key for performance.
4. DISTINCT inside aggregate functions (COUNT, SUM, AVG) is NOT supported.
5. Use TOP n to bound results.";

const OUTPUT_FORMAT: &str = "## Output
Respond with a JSON object and nothing else:
{\"thinking\": \"<short reasoning>\", \"sql_query\": \"<the query>\", \"explanation\": \"<one or two sentences for the user>\", \"visualization_requested\": <true if the user asked for a chart, graph or plot, else false>}";

pub const DEFAULT_RESPONSE_PROMPT: &str = "You are a helpful data analyst. Given the user's question,
the SQL query that was executed, and the results, provide a clear and concise natural
language response that answers the user's question.

Be conversational but precise. Include relevant numbers and insights from the data.";

const IMAGE_NOTE: &str = "\n\nIMPORTANT: A chart has already been generated and will be displayed separately. Do NOT create ASCII charts, text-based charts, or plotting code. Focus on insights from the data.";

pub const VISUALIZATION_PROMPT: &str = "You are a data visualization expert. Generate Python code using matplotlib to create a chart.

## Rules
1. Use matplotlib only. Do not call plt.style.use() with seaborn styles.
2. The data is embedded in the code you write; do not read files or use the network.
3. End your code with plt.show() - the image is captured automatically.
4. Pick the chart type from the data: bar for categories, line for time series,
   pie for part-to-whole with fewer than 7 slices, scatter for two numeric columns,
   histogram for distributions.
5. Use descriptive titles and axis labels, rotate overlapping x labels and call plt.tight_layout().

Return the code in a single ```python block.";

pub const DEFAULT_INTENT_PROMPT: &str = "You route questions to data agents. Available agents:
{agent_descriptions}

Score how well each agent can answer the user's latest question, using the conversation for context.
Respond with a JSON object and nothing else:
{\"candidates\": [{\"agent\": \"<agent name>\", \"confidence\": <0.0 to 1.0>}]}
List only agents that could plausibly answer. Use an empty list when none can.";

fn date_context() -> String {
    format!(
        "Today's date is {}.\n\n",
        chrono::Utc::now().format("%Y-%m-%d")
    )
}

/// System prompt for SQL generation, with schema, examples and retry feedback.
pub fn sql_system_prompt(ctx: &GenerationContext, max_rows: u64) -> String {
    let template = ctx.system_prompt().unwrap_or(DEFAULT_SQL_PROMPT);
    let mut prompt = date_context();
    prompt.push_str(
        &template
            .replace("{dialect}", &dialect_label(ctx.dialect()))
            .replace("{schema_context}", ctx.schema_description())
            .replace("{few_shot_examples}", &format_few_shot_examples(ctx.examples())),
    );

    if ctx.dialect() == SqlDialect::CosmosDb {
        prompt.push_str(COSMOS_ADDENDUM);
    }
    prompt.push_str(&format!(
        "\n\nNever return more than {} rows.\n\n{}",
        max_rows, OUTPUT_FORMAT
    ));
    prompt
}

pub fn sql_messages(ctx: &GenerationContext, max_rows: u64) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(sql_system_prompt(ctx, max_rows))];
    messages.extend(ctx.history().iter().cloned());

    let recovery = ErrorRecovery::new(ctx.dialect(), max_rows).build_recovery_prompt(ctx.feedback());
    if recovery.is_empty() {
        messages.push(ChatMessage::user(ctx.question()));
    } else {
        messages.push(ChatMessage::user(format!("{}\n\n{}", ctx.question(), recovery)));
    }
    messages
}

fn dialect_label(dialect: SqlDialect) -> String {
    match dialect {
        SqlDialect::Postgres => "PostgreSQL".to_string(),
        SqlDialect::TSql => "T-SQL (SQL Server)".to_string(),
        SqlDialect::MySql => "MySQL".to_string(),
        SqlDialect::Sqlite => "SQLite".to_string(),
        SqlDialect::BigQuery => "BigQuery".to_string(),
        SqlDialect::Snowflake => "Snowflake".to_string(),
        SqlDialect::DuckDb => "DuckDB".to_string(),
        SqlDialect::Databricks => "Databricks SQL".to_string(),
        SqlDialect::CosmosDb => "Azure Cosmos DB NoSQL".to_string(),
        SqlDialect::Generic => "ANSI SQL".to_string(),
    }
}

pub fn chart_messages(request: &ChartRequest) -> Vec<ChatMessage> {
    let mut data = format!(
        "Question: {}\n\nColumns: {}\n\nData ({} rows",
        request.question,
        request.columns.join(", "),
        request.total_rows
    );
    if let Some(shown) = request.sample.as_array().map(|rows| rows.len()) {
        if shown < request.total_rows {
            data.push_str(&format!(", first {} shown", shown));
        }
    }
    data.push_str(&format!("):\n{}", request.sample));

    vec![
        ChatMessage::system(VISUALIZATION_PROMPT),
        ChatMessage::user(data),
    ]
}

pub fn summary_messages(request: &SummaryRequest) -> Vec<ChatMessage> {
    let mut system = request
        .response_prompt
        .clone()
        .unwrap_or_else(|| DEFAULT_RESPONSE_PROMPT.to_string());
    if request.image_attached {
        system.push_str(IMAGE_NOTE);
    }

    let mut results = format!("{}", request.rows.sample_json(50));
    if request.rows.truncated || request.rows.len() > 50 {
        results.push_str(&format!(
            "\n(showing {} of {} rows)",
            request.rows.len().min(50),
            request.rows.row_count
        ));
    }

    let mut messages = vec![ChatMessage::system(system)];
    messages.extend(request.history.iter().cloned());
    messages.push(ChatMessage::user(format!(
        "Question: {}\n\nSQL Query: {}\n\nResults: {}",
        request.question, request.sql, results
    )));
    messages
}

pub fn intent_messages(
    question: &str,
    history: &[ChatMessage],
    agents: &[AgentDescriptor],
    system_prompt: Option<&str>,
) -> Vec<ChatMessage> {
    let agent_list = agents
        .iter()
        .map(|agent| format!("- {}: {}", agent.id, agent.summary()))
        .collect::<Vec<_>>()
        .join("\n");
    let system = system_prompt
        .unwrap_or(DEFAULT_INTENT_PROMPT)
        .replace("{agent_descriptions}", &agent_list);

    let mut messages = vec![ChatMessage::system(system)];
    messages.extend(history.iter().cloned());
    messages.push(ChatMessage::user(question));
    messages
}

pub fn rewrite_messages(question: &str, history: &[ChatMessage], agent_description: &str) -> Vec<ChatMessage> {
    let mut conversation_context = String::new();
    for message in history {
        let content: String = message.content.chars().take(500).collect();
        conversation_context.push_str(&format!("- {}: {}\n", message.role, content));
    }

    let prompt = format!(
        "You are a query rewriter. Rewrite the user's question so a database query system can answer it without the conversation.

## Target Agent
{}

## Conversation History
{}
## Instructions
1. Keep the original intent of the question.
2. For follow-up questions, make implicit references explicit using the conversation history.
3. If the question is already clear and specific, return it unchanged.
4. Do NOT add information that was not implied by the question or conversation.

## Original Question
{}

Respond with ONLY the rewritten question, nothing else.",
        agent_description, conversation_context, question
    );

    vec![ChatMessage::user(prompt)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::generation::context::AttemptFeedback;
    use crate::policy::AgentPolicy;

    #[test]
    fn test_sql_prompt_carries_schema_and_feedback() {
        let policy = AgentPolicy::new(SqlDialect::Postgres, 500, Vec::<String>::new(), "## Database Schema\n### Table: orders");
        let ctx = GenerationContext::new("total revenue?", &policy).with_feedback(AttemptFeedback {
            attempt: 0,
            sql: "SELECT revenue FROM order".to_string(),
            code: ErrorCode::SyntaxError,
            message: "Expected identifier".to_string(),
        });

        let messages = sql_messages(&ctx, 500);
        assert_eq!(messages.len(), 2);
        assert!(messages[0].content.contains("### Table: orders"));
        assert!(messages[0].content.contains("PostgreSQL"));
        assert!(messages[0].content.contains("more than 500 rows"));
        assert!(messages[1].content.starts_with("total revenue?"));
        assert!(messages[1].content.contains("Expected identifier"));
    }

    #[test]
    fn test_cosmos_prompt_has_addendum() {
        let policy = AgentPolicy::with_defaults(SqlDialect::CosmosDb);
        let ctx = GenerationContext::new("count docs", &policy);
        assert!(sql_system_prompt(&ctx, 10).contains("Cosmos DB constraints"));
    }
}
