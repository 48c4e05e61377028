use crate::generation::schema::TableSchema;
use serde::{Deserialize, Serialize};

/// Routing metadata for one configured data agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub id: String,
    pub description: Option<String>,
    pub tables: Vec<String>,
    /// Description of the first table, used when the agent has none.
    pub primary_table_description: Option<String>,
}

impl AgentDescriptor {
    pub fn new(id: impl Into<String>, description: Option<String>) -> Self {
        Self {
            id: id.into(),
            description: description.filter(|d| !d.trim().is_empty()),
            tables: Vec::new(),
            primary_table_description: None,
        }
    }

    pub fn with_tables(mut self, tables: &[TableSchema]) -> Self {
        self.tables = tables.iter().map(|t| t.name.clone()).collect();
        self.primary_table_description = tables
            .first()
            .and_then(|t| t.description.clone())
            .filter(|d| !d.trim().is_empty());
        self
    }

    /// One-line description shown to the router and in out-of-scope replies.
    pub fn summary(&self) -> String {
        let mut summary = format!("Agent '{}'", self.id);

        if let Some(description) = &self.description {
            summary.push_str(": ");
            summary.push_str(description);
        }

        if !self.tables.is_empty() {
            if self.description.is_some() {
                summary.push_str(&format!(" Tables: {}.", self.tables.join(", ")));
            } else {
                summary.push_str(&format!(" handles queries about: {}.", self.tables.join(", ")));
                if let Some(table_description) = &self.primary_table_description {
                    summary.push(' ');
                    summary.push_str(table_description);
                }
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str, description: Option<&str>) -> TableSchema {
        TableSchema {
            name: name.to_string(),
            description: description.map(str::to_string),
            columns: Vec::new(),
            sample_data: Vec::new(),
        }
    }

    #[test]
    fn test_summary_with_description() {
        let agent = AgentDescriptor::new("sales", Some("Orders and revenue".to_string()))
            .with_tables(&[table("orders", None), table("customers", None)]);
        assert_eq!(agent.summary(), "Agent 'sales': Orders and revenue Tables: orders, customers.");
    }

    #[test]
    fn test_summary_falls_back_to_tables() {
        let agent = AgentDescriptor::new("school", Some("  ".to_string()))
            .with_tables(&[table("students", Some("Enrolled students"))]);
        assert_eq!(
            agent.summary(),
            "Agent 'school' handles queries about: students. Enrolled students"
        );
    }
}
