//! Conversation history for multi-turn exchanges

use crate::llm::ChatMessage;
use serde::{Deserialize, Serialize};

/// Turns passed to SQL generation.
pub const GENERATION_HISTORY: usize = 6;
/// Turns passed to routing, rewriting and summaries.
pub const ROUTING_HISTORY: usize = 4;

// Long assistant answers are cut when replayed as context.
const MAX_TURN_CHARS: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

/// Append-only list of user and assistant turns
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.turns.push(Turn {
            role: Role::User,
            content: content.into(),
        });
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.turns.push(Turn {
            role: Role::Assistant,
            content: content.into(),
        });
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// The last `max_turns` turns as chat messages, oldest first.
    pub fn recent(&self, max_turns: usize) -> Vec<ChatMessage> {
        let skip = self.turns.len().saturating_sub(max_turns);
        self.turns[skip..]
            .iter()
            .map(|turn| {
                let content: String = turn.content.chars().take(MAX_TURN_CHARS).collect();
                match turn.role {
                    Role::User => ChatMessage::user(content),
                    Role::Assistant => ChatMessage::assistant(content),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recent_keeps_newest_turns_in_order() {
        let mut conversation = Conversation::new();
        for i in 0..5 {
            conversation.push_user(format!("q{}", i));
            conversation.push_assistant(format!("a{}", i));
        }
        let recent = conversation.recent(ROUTING_HISTORY);
        let contents: Vec<&str> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["q3", "a3", "q4", "a4"]);
        assert_eq!(recent[0].role, "user");
        assert_eq!(conversation.recent(100).len(), 10);
    }
}
