//! Multi-turn conversation history, adapted from the agent-runtime crate's
//! `reasoning::conversation` with the same role/message shape and
//! provider-format serialization.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: MessageRole,
    pub content: String,
    pub tool_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    pub messages: Vec<ConversationMessage>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_system(&mut self, content: impl Into<String>) {
        self.messages.push(ConversationMessage {
            role: MessageRole::System,
            content: content.into(),
            tool_name: None,
        });
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(ConversationMessage {
            role: MessageRole::User,
            content: content.into(),
            tool_name: None,
        });
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(ConversationMessage {
            role: MessageRole::Assistant,
            content: content.into(),
            tool_name: None,
        });
    }

    pub fn push_tool_result(&mut self, tool_name: impl Into<String>, content: impl Into<String>) {
        self.messages.push(ConversationMessage {
            role: MessageRole::Tool,
            content: content.into(),
            tool_name: Some(tool_name.into()),
        });
    }

    /// Rough token estimate (4 characters per token), used by the context
    /// manager to decide when to compact, matching the heuristic the
    /// agent-runtime crate's conversation module already uses.
    pub fn estimate_tokens(&self) -> usize {
        self.messages.iter().map(|m| m.content.len() / 4).sum()
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == MessageRole::System)
            .map(|m| m.content.as_str())
    }

    pub fn render_as_prompt(&self) -> String {
        let mut out = String::new();
        for message in &self.messages {
            let label = match message.role {
                MessageRole::System => "SYSTEM",
                MessageRole::User => "USER",
                MessageRole::Assistant => "ASSISTANT",
                MessageRole::Tool => "TOOL",
            };
            out.push_str(&format!("[{label}]\n{}\n\n", message.content));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_tokens_scales_with_content() {
        let mut conv = Conversation::new();
        conv.push_user("x".repeat(400));
        assert_eq!(conv.estimate_tokens(), 100);
    }
}
