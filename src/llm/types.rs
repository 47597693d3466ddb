//! Shared types for LLM providers

use serde::{Deserialize, Serialize};

/// Role in a conversation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

/// Content of a message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(s) => Some(s),
            MessageContent::Parts(parts) => parts.iter().find_map(|p| {
                if let ContentPart::Text { text } = p {
                    Some(text.as_str())
                } else {
                    None
                }
            }),
        }
    }

    pub fn parts(&self) -> &[ContentPart] {
        match self {
            MessageContent::Text(_) => &[],
            MessageContent::Parts(parts) => parts,
        }
    }
}

/// Part of a multi-part message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thought_signature: Option<String>,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        name: String,
        content: String,
        is_error: bool,
    },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(content.into()),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(content.into()),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(content.into()),
        }
    }

    /// Assistant turn that requested tools, optionally with accompanying text
    pub fn assistant_tool_calls(text: Option<&str>, calls: &[ToolCall]) -> Self {
        let mut parts = Vec::with_capacity(calls.len() + 1);
        if let Some(text) = text.filter(|t| !t.is_empty()) {
            parts.push(ContentPart::Text {
                text: text.to_string(),
            });
        }
        parts.extend(calls.iter().map(|c| ContentPart::ToolUse {
            id: c.id.clone(),
            name: c.name.clone(),
            input: c.arguments.clone(),
            thought_signature: c.thought_signature.clone(),
        }));
        Self {
            role: Role::Assistant,
            content: MessageContent::Parts(parts),
        }
    }

    /// Answers to every tool call of the preceding assistant turn
    pub fn tool_results(results: Vec<ContentPart>) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::Parts(results),
        }
    }
}

/// Response from an LLM
#[derive(Debug, Clone)]
pub enum LlmResponse {
    /// Plain text response
    Text {
        text: String,
        usage: Option<TokenUsage>,
    },
    /// Tool calls requested by the model
    ToolCalls {
        calls: Vec<ToolCall>,
        usage: Option<TokenUsage>,
    },
    /// Mixed response with text and tool calls
    Mixed {
        text: Option<String>,
        tool_calls: Vec<ToolCall>,
        usage: Option<TokenUsage>,
    },
}

impl LlmResponse {
    /// Build the right variant from collected text and calls
    pub fn from_parts(text: Option<String>, calls: Vec<ToolCall>, usage: Option<TokenUsage>) -> Self {
        match (text, calls.is_empty()) {
            (text, true) => LlmResponse::Text {
                text: text.unwrap_or_default(),
                usage,
            },
            (None, false) => LlmResponse::ToolCalls { calls, usage },
            (Some(text), false) => LlmResponse::Mixed {
                text: Some(text),
                tool_calls: calls,
                usage,
            },
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            LlmResponse::Text { text, .. } => Some(text),
            LlmResponse::Mixed { text, .. } => text.as_deref(),
            LlmResponse::ToolCalls { .. } => None,
        }
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            LlmResponse::ToolCalls { calls, .. } => calls,
            LlmResponse::Mixed { tool_calls, .. } => tool_calls,
            LlmResponse::Text { .. } => &[],
        }
    }

    pub fn usage(&self) -> Option<&TokenUsage> {
        match self {
            LlmResponse::Text { usage, .. } => usage.as_ref(),
            LlmResponse::ToolCalls { usage, .. } => usage.as_ref(),
            LlmResponse::Mixed { usage, .. } => usage.as_ref(),
        }
    }
}

/// A tool call from the LLM, exactly as the provider reported it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
    /// Opaque token thinking models attach to a call; it must be replayed with the call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<String>,
}

/// Definition of a tool for the LLM
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Token usage statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str) -> ToolCall {
        ToolCall {
            id: format!("call_{}", name),
            name: name.to_string(),
            arguments: serde_json::json!({"query": "rust"}),
            thought_signature: None,
        }
    }

    #[test]
    fn test_from_parts_text_only() {
        let response = LlmResponse::from_parts(Some("Hello".to_string()), vec![], None);
        assert!(matches!(response, LlmResponse::Text { .. }));
        assert_eq!(response.text(), Some("Hello"));
        assert!(response.tool_calls().is_empty());
    }

    #[test]
    fn test_from_parts_empty_is_empty_text() {
        let response = LlmResponse::from_parts(None, vec![], None);
        assert_eq!(response.text(), Some(""));
    }

    #[test]
    fn test_from_parts_tool_calls_and_mixed() {
        let response = LlmResponse::from_parts(None, vec![call("web_search")], None);
        assert!(matches!(response, LlmResponse::ToolCalls { .. }));
        assert!(response.text().is_none());

        let response =
            LlmResponse::from_parts(Some("Let me look".to_string()), vec![call("web_search")], None);
        assert_eq!(response.text(), Some("Let me look"));
        assert_eq!(response.tool_calls().len(), 1);
    }

    #[test]
    fn test_assistant_tool_calls_skips_empty_text() {
        let msg = Message::assistant_tool_calls(Some(""), &[call("web_search")]);
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.content.parts().len(), 1);
        assert!(msg.content.as_text().is_none());

        let msg = Message::assistant_tool_calls(Some("Searching"), &[call("web_search")]);
        assert_eq!(msg.content.parts().len(), 2);
        assert_eq!(msg.content.as_text(), Some("Searching"));
    }

    #[test]
    fn test_usage_accumulation() {
        let mut total = TokenUsage::default();
        total.add(&TokenUsage {
            input_tokens: 100,
            output_tokens: 50,
            total_tokens: 150,
        });
        total.add(&TokenUsage {
            input_tokens: 200,
            output_tokens: 75,
            total_tokens: 275,
        });
        assert_eq!(total.input_tokens, 300);
        assert_eq!(total.output_tokens, 125);
        assert_eq!(total.total_tokens, 425);
    }
}
