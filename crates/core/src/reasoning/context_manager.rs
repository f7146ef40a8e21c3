//! Context management (§4.6a), adapted from the agent-runtime crate's
//! `reasoning::context_manager`: keeps a rolling conversation within a token
//! budget before each Think step, independent of the thinking-budget hint
//! that only applies to the completion call itself.

use serde::{Deserialize, Serialize};

use crate::reasoning::conversation::{Conversation, ConversationMessage, MessageRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextStrategy {
    /// Drop the oldest non-system messages until under budget.
    SlidingWindow,
    /// Replace stale tool observations with a placeholder, keeping reasoning
    /// turns intact.
    ObservationMasking,
    /// Keep the system prompt and first user message, summarize everything
    /// in between into a single synthetic message.
    AnchoredSummary,
}

const MASK_PLACEHOLDER: &str = "[observation omitted to stay within the context budget]";

/// Compacts `conversation` in place if it exceeds `token_budget`, using
/// `strategy`. Returns whether any compaction was applied.
pub fn compact(conversation: &mut Conversation, token_budget: usize, strategy: ContextStrategy) -> bool {
    if conversation.estimate_tokens() <= token_budget {
        return false;
    }

    match strategy {
        ContextStrategy::SlidingWindow => sliding_window(conversation, token_budget),
        ContextStrategy::ObservationMasking => observation_masking(conversation, token_budget),
        ContextStrategy::AnchoredSummary => anchored_summary(conversation, token_budget),
    }
    true
}

fn sliding_window(conversation: &mut Conversation, token_budget: usize) {
    // Never drop the system prompt (index 0 if present); drop the oldest
    // non-system messages first.
    while conversation.estimate_tokens() > token_budget && conversation.messages.len() > 1 {
        let drop_at = conversation
            .messages
            .iter()
            .position(|m| m.role != MessageRole::System);
        match drop_at {
            Some(idx) => {
                conversation.messages.remove(idx);
            }
            None => break,
        }
    }
}

fn observation_masking(conversation: &mut Conversation, token_budget: usize) {
    for idx in 0..conversation.messages.len() {
        if conversation.estimate_tokens() <= token_budget {
            break;
        }
        let message = &mut conversation.messages[idx];
        if message.role == MessageRole::Tool && message.content != MASK_PLACEHOLDER {
            message.content = MASK_PLACEHOLDER.to_string();
        }
    }
    // If masking alone wasn't enough, fall back to trimming the oldest
    // masked entries outright.
    while conversation.estimate_tokens() > token_budget {
        let drop_at = conversation
            .messages
            .iter()
            .position(|m| m.role == MessageRole::Tool && m.content == MASK_PLACEHOLDER);
        match drop_at {
            Some(idx) => {
                conversation.messages.remove(idx);
            }
            None => break,
        }
    }
}

fn anchored_summary(conversation: &mut Conversation, token_budget: usize) {
    if conversation.messages.len() < 3 {
        return;
    }
    let system_idx = conversation
        .messages
        .iter()
        .position(|m| m.role == MessageRole::System);
    let first_user_idx = conversation
        .messages
        .iter()
        .position(|m| m.role == MessageRole::User);

    let anchor_end = match (system_idx, first_user_idx) {
        (Some(s), Some(u)) => s.max(u) + 1,
        (Some(s), None) => s + 1,
        (None, Some(u)) => u + 1,
        (None, None) => return,
    };

    if anchor_end >= conversation.messages.len() {
        return;
    }

    let middle = &conversation.messages[anchor_end..];
    if middle.is_empty() {
        return;
    }

    let summary = summarize(middle);
    let mut compacted: Vec<ConversationMessage> = conversation.messages[..anchor_end].to_vec();
    compacted.push(ConversationMessage {
        role: MessageRole::System,
        content: format!("[context summary of {} earlier turns]\n{summary}", middle.len()),
        tool_name: None,
    });

    conversation.messages = compacted;

    // If the summary alone still exceeds budget, nothing more to do locally
    // short of dropping the anchor itself, which this strategy never does.
    let _ = token_budget;
}

fn summarize(messages: &[ConversationMessage]) -> String {
    messages
        .iter()
        .map(|m| {
            let role = match m.role {
                MessageRole::System => "system",
                MessageRole::User => "user",
                MessageRole::Assistant => "assistant",
                MessageRole::Tool => "tool",
            };
            let snippet: String = m.content.chars().take(120).collect();
            format!("- {role}: {snippet}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn big_conversation() -> Conversation {
        let mut conv = Conversation::new();
        conv.push_system("you are an auditor");
        for i in 0..20 {
            conv.push_user(format!("user turn {i} {}", "x".repeat(200)));
            conv.push_assistant(format!("assistant turn {i} {}", "y".repeat(200)));
        }
        conv
    }

    #[test]
    fn sliding_window_preserves_system_prompt() {
        let mut conv = big_conversation();
        compact(&mut conv, 500, ContextStrategy::SlidingWindow);
        assert_eq!(conv.messages[0].role, MessageRole::System);
        assert!(conv.estimate_tokens() <= 500 || conv.messages.len() == 1);
    }

    #[test]
    fn observation_masking_replaces_tool_content_only() {
        let mut conv = Conversation::new();
        conv.push_system("sys");
        for i in 0..10 {
            conv.push_tool_result("fetch_github_file", format!("payload {}", "z".repeat(300)));
            conv.push_assistant(format!("reasoning {i}"));
        }
        compact(&mut conv, 300, ContextStrategy::ObservationMasking);
        let remaining_tool_msgs: Vec<_> = conv
            .messages
            .iter()
            .filter(|m| m.role == MessageRole::Tool)
            .collect();
        assert!(remaining_tool_msgs
            .iter()
            .all(|m| m.content == MASK_PLACEHOLDER || conv.estimate_tokens() <= 300));
    }

    #[test]
    fn anchored_summary_keeps_system_and_first_user_message() {
        let mut conv = big_conversation();
        let first_user = conv.messages[1].content.clone();
        compact(&mut conv, 50, ContextStrategy::AnchoredSummary);
        assert_eq!(conv.messages[0].role, MessageRole::System);
        assert_eq!(conv.messages[1].content, first_user);
        assert!(conv.messages.last().unwrap().content.contains("context summary"));
    }

    #[test]
    fn under_budget_conversation_is_left_untouched() {
        let mut conv = Conversation::new();
        conv.push_system("sys");
        conv.push_user("hi");
        let before = conv.messages.len();
        let compacted = compact(&mut conv, 10_000, ContextStrategy::SlidingWindow);
        assert!(!compacted);
        assert_eq!(conv.messages.len(), before);
    }
}
