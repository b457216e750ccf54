//! Query input types: the user question, jurisdiction, and conversation history.

use serde::{Deserialize, Serialize};

/// Role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
}

/// A single turn of prior conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Immutable input to a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// The user's question, possibly an elliptical follow-up.
    pub text: String,
    /// Jurisdiction the question concerns (e.g. "Zimbabwe").
    pub jurisdiction: String,
    /// Prior conversation turns, oldest first.
    #[serde(default)]
    pub history: Vec<ConversationTurn>,
}

impl Query {
    pub fn new(text: impl Into<String>, jurisdiction: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            jurisdiction: jurisdiction.into(),
            history: Vec::new(),
        }
    }

    pub fn with_history(mut self, history: Vec<ConversationTurn>) -> Self {
        self.history = history;
        self
    }

    /// The last `k` turns of history, oldest first.
    pub fn recent_history(&self, k: usize) -> &[ConversationTurn] {
        let start = self.history.len().saturating_sub(k);
        &self.history[start..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recent_history_window() {
        let query = Query::new("and in Kenya?", "Kenya").with_history(vec![
            ConversationTurn::user("a"),
            ConversationTurn::assistant("b"),
            ConversationTurn::user("c"),
            ConversationTurn::assistant("d"),
            ConversationTurn::user("e"),
        ]);

        let recent = query.recent_history(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].content, "c");
        assert_eq!(recent[2].content, "e");
    }

    #[test]
    fn test_recent_history_shorter_than_window() {
        let query = Query::new("q", "US").with_history(vec![ConversationTurn::user("only")]);
        assert_eq!(query.recent_history(4).len(), 1);
    }
}
