//! Scripted provider for exercising the chat loop without a network
//!
//! Replies are consumed in order, one per `chat` call. Every request is
//! captured so tests can assert what the model would have seen.

use super::{LlmError, LlmProvider, LlmResponse, Message, ToolCall, ToolDefinition};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// What the provider received on one `chat` call
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub messages: Vec<Message>,
    pub tool_names: Vec<String>,
}

pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    requests: Mutex<Vec<CapturedRequest>>,
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue an arbitrary reply
    pub fn then(self, reply: Result<LlmResponse, LlmError>) -> Self {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply);
        }
        self
    }

    pub fn then_text(self, text: &str) -> Self {
        self.then(Ok(LlmResponse::Text {
            text: text.to_string(),
            usage: None,
        }))
    }

    pub fn then_tool_call(self, name: &str, arguments: serde_json::Value) -> Self {
        self.then_tool_calls(vec![(name, arguments)])
    }

    pub fn then_tool_calls(self, calls: Vec<(&str, serde_json::Value)>) -> Self {
        let calls = calls
            .into_iter()
            .enumerate()
            .map(|(i, (name, arguments))| ToolCall {
                id: format!("scripted_{}_{}", name, i),
                name: name.to_string(),
                arguments,
                thought_signature: None,
            })
            .collect();
        self.then(Ok(LlmResponse::ToolCalls { calls, usage: None }))
    }

    pub fn then_error(self, error: LlmError) -> Self {
        self.then(Err(error))
    }

    /// Number of `chat` calls made so far
    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Replies not consumed yet
    pub fn remaining(&self) -> usize {
        self.replies.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted"
    }

    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<LlmResponse, LlmError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(CapturedRequest {
                messages: messages.to_vec(),
                tool_names: tools
                    .unwrap_or_default()
                    .iter()
                    .map(|t| t.name.clone())
                    .collect(),
            });
        }

        let next = self.replies.lock().ok().and_then(|mut r| r.pop_front());
        next.unwrap_or_else(|| {
            Err(LlmError::Other(anyhow::anyhow!(
                "scripted provider has no reply left"
            )))
        })
    }
}
