//! Schema Formatter
//!
//! Renders configured table schemas and few-shot examples into prompt text.

use serde::{Deserialize, Serialize};

const MAX_SAMPLE_ROWS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    #[serde(rename = "type", default)]
    pub data_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub allowed_values: Vec<String>,
    #[serde(default)]
    pub constraints: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub columns: Vec<ColumnSchema>,
    #[serde(default, alias = "sample_rows")]
    pub sample_data: Vec<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FewShotExample {
    pub question: String,
    #[serde(alias = "sql_query")]
    pub sql: String,
    #[serde(default)]
    pub answer: Option<String>,
}

/// Schema description handed to the model for one agent.
pub fn format_schema_context(tables: &[TableSchema]) -> String {
    if tables.is_empty() {
        return String::new();
    }

    let mut parts = vec!["## Database Schema".to_string()];
    for table in tables {
        parts.push(format!("\n### Table: {}", table.name));
        if let Some(description) = &table.description {
            parts.push(format!("Description: {}", description));
        }

        if !table.columns.is_empty() {
            parts.push("Columns:".to_string());
            for column in &table.columns {
                parts.push(format_column(column));
            }
        }

        if !table.sample_data.is_empty() {
            parts.push("Sample rows:".to_string());
            for row in table.sample_data.iter().take(MAX_SAMPLE_ROWS) {
                parts.push(format!("  {}", serde_json::Value::Object(row.clone())));
            }
        }
    }
    parts.join("\n")
}

fn format_column(column: &ColumnSchema) -> String {
    let mut line = format!("- {}", column.name);
    if let Some(data_type) = &column.data_type {
        line.push_str(&format!(" ({})", data_type));
    }
    if let Some(description) = &column.description {
        line.push_str(&format!(": {}", description));
    }
    if !column.allowed_values.is_empty() {
        line.push_str(&format!(" [allowed values: {}]", column.allowed_values.join(", ")));
    }
    if let Some(constraints) = &column.constraints {
        line.push_str(&format!(" [constraints: {}]", constraints));
    }
    if let Some(format) = &column.format {
        line.push_str(&format!(" [format: {}]", format));
    }
    line
}

pub fn format_few_shot_examples(examples: &[FewShotExample]) -> String {
    if examples.is_empty() {
        return String::new();
    }

    let mut parts = vec!["## Examples".to_string()];
    for (i, example) in examples.iter().enumerate() {
        parts.push(format!("\nExample {}:", i + 1));
        parts.push(format!("Question: {}", example.question));
        parts.push(format!("SQL: {}", example.sql));
        if let Some(answer) = &example.answer {
            parts.push(format!("Answer: {}", answer));
        }
    }
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schema_context_includes_columns_and_samples() {
        let mut rows = Vec::new();
        for i in 0..5 {
            let mut row = serde_json::Map::new();
            row.insert("id".to_string(), json!(i));
            rows.push(row);
        }
        let table = TableSchema {
            name: "students".to_string(),
            description: Some("Enrolled students".to_string()),
            columns: vec![ColumnSchema {
                name: "status".to_string(),
                data_type: Some("TEXT".to_string()),
                description: None,
                allowed_values: vec!["active".to_string(), "graduated".to_string()],
                constraints: None,
                format: None,
            }],
            sample_data: rows,
        };

        let text = format_schema_context(&[table]);
        assert!(text.contains("### Table: students"));
        assert!(text.contains("- status (TEXT) [allowed values: active, graduated]"));
        assert_eq!(text.matches("{\"id\":").count(), MAX_SAMPLE_ROWS);
    }

    #[test]
    fn test_few_shot_numbering() {
        let examples = vec![
            FewShotExample {
                question: "How many?".to_string(),
                sql: "SELECT count(*) FROM t".to_string(),
                answer: None,
            },
            FewShotExample {
                question: "Newest?".to_string(),
                sql: "SELECT max(created_at) FROM t".to_string(),
                answer: Some("Yesterday".to_string()),
            },
        ];
        let text = format_few_shot_examples(&examples);
        assert!(text.contains("Example 2:\nQuestion: Newest?"));
        assert!(text.contains("Answer: Yesterday"));
        assert!(format_few_shot_examples(&[]).is_empty());
    }
}
