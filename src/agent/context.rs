//! Conversation context management

use crate::llm::{ContentPart, Message, Role, ToolCall};
use crate::tools::ToolCallResult;

/// Max tokens for a single tool result (keeps one noisy page from flooding the request)
const MAX_TOOL_RESULT_TOKENS: usize = 4_000;

/// Ordered conversation history for one session
///
/// Only grows during a turn; [`ConversationContext::truncate`] exists so a
/// failed turn can be undone as a whole.
#[derive(Debug, Clone, Default)]
pub struct ConversationContext {
    messages: Vec<Message>,
}

impl ConversationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a system instruction as the first message
    pub fn with_system(instruction: &str) -> Self {
        let mut context = Self::new();
        if !instruction.trim().is_empty() {
            context.messages.push(Message::system(instruction));
        }
        context
    }

    /// Add a user message
    pub fn add_user(&mut self, content: impl Into<String>) {
        self.messages.push(Message::user(content));
    }

    /// Add an assistant message; empty text is skipped so providers never see a blank turn
    pub fn add_assistant(&mut self, content: impl Into<String>) {
        let content = content.into();
        if content.trim().is_empty() {
            return;
        }
        self.messages.push(Message::assistant(content));
    }

    /// Add an assistant message carrying tool calls
    pub fn add_assistant_tool_calls(&mut self, text: Option<&str>, tool_calls: &[ToolCall]) {
        self.messages
            .push(Message::assistant_tool_calls(text, tool_calls));
    }

    /// Add the answers to the previous assistant message's tool calls (auto-truncates large ones)
    pub fn add_tool_results(&mut self, results: &[ToolCallResult]) {
        let parts = results
            .iter()
            .map(|r| {
                let mut part = r.to_content_part();
                if let ContentPart::ToolResult { content, .. } = &mut part {
                    *content = Self::truncate_if_needed(content, MAX_TOOL_RESULT_TOKENS);
                }
                part
            })
            .collect();
        self.messages.push(Message::tool_results(parts));
    }

    /// Truncate text if it exceeds token limit
    fn truncate_if_needed(text: &str, max_tokens: usize) -> String {
        if Self::estimate_tokens(text) <= max_tokens {
            return text.to_string();
        }

        // ~4 chars per token is a rough estimate
        let max_chars = max_tokens * 4;
        let truncated: String = text.chars().take(max_chars).collect();
        format!(
            "{}\n\n... [TRUNCATED: result exceeded {} tokens]",
            truncated, max_tokens
        )
    }

    /// Estimate tokens in text (~4 chars per token for English)
    pub fn estimate_tokens(text: &str) -> usize {
        text.len().div_ceil(4)
    }

    /// Get all messages
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drop everything after the first `len` messages
    pub fn truncate(&mut self, len: usize) {
        self.messages.truncate(len);
    }

    /// Clear the conversation, keeping the system instruction
    pub fn clear(&mut self) {
        self.messages.retain(|m| m.role == Role::System);
    }
}
