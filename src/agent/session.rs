//! Chat session: conversation history plus the model's pending tool calls
//!
//! The session hands tool calls out one at a time as [`Reply::ToolCall`] and
//! only talks to the provider again once every call from a model turn has
//! been answered, since Gemini expects all function responses of one turn in
//! a single request.

use super::ConversationContext;
use crate::llm::{LlmError, LlmProvider, LlmResponse, Message, TokenUsage, ToolDefinition};
use crate::tools::{ToolCallRequest, ToolCallResult};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;

/// What the model wants next
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Answer for the user; the turn is over
    Final(String),
    /// A local tool must run and its result be handed back
    ToolCall(ToolCallRequest),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{0} tool call(s) still waiting for a result")]
    ToolCallsPending(usize),

    #[error("no tool call is waiting for a result")]
    NoPendingToolCall,

    #[error("result for tool call '{got}' does not match pending call '{expected}'")]
    UnexpectedToolResult { expected: String, got: String },

    #[error(transparent)]
    Provider(#[from] LlmError),
}

pub struct ChatSession {
    llm: Arc<dyn LlmProvider>,
    context: ConversationContext,
    tools: Vec<ToolDefinition>,
    tools_enabled: bool,
    /// Call handed out and not answered yet
    outstanding: Option<ToolCallRequest>,
    /// Calls from the same model turn still to be handed out
    queued: VecDeque<ToolCallRequest>,
    answered: Vec<ToolCallResult>,
    /// History length when the current turn began
    turn_start: Option<usize>,
    turn_usage: TokenUsage,
    total_usage: TokenUsage,
}

impl ChatSession {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        system_instruction: &str,
        tools: Vec<ToolDefinition>,
    ) -> Self {
        Self {
            llm,
            context: ConversationContext::with_system(system_instruction),
            tools,
            tools_enabled: true,
            outstanding: None,
            queued: VecDeque::new(),
            answered: Vec::new(),
            turn_start: None,
            turn_usage: TokenUsage::default(),
            total_usage: TokenUsage::default(),
        }
    }

    /// Send a user message and return the model's first reply
    pub async fn send(&mut self, text: &str) -> Result<Reply, SessionError> {
        let pending = self.pending_count();
        if pending > 0 {
            return Err(SessionError::ToolCallsPending(pending));
        }

        self.begin_turn();
        self.context.add_user(text);
        self.request().await
    }

    /// Answer the outstanding tool call
    ///
    /// Returns the next queued call without a network round trip, or the
    /// model's reply once every call of the model turn has a result.
    pub async fn respond_to_tool_call(
        &mut self,
        result: ToolCallResult,
    ) -> Result<Reply, SessionError> {
        let expected = self
            .outstanding
            .take()
            .ok_or(SessionError::NoPendingToolCall)?;
        if expected.id != result.id {
            let err = SessionError::UnexpectedToolResult {
                expected: expected.id.clone(),
                got: result.id,
            };
            self.outstanding = Some(expected);
            return Err(err);
        }

        self.answered.push(result);
        if let Some(next) = self.queued.pop_front() {
            self.outstanding = Some(next.clone());
            return Ok(Reply::ToolCall(next));
        }

        let results = std::mem::take(&mut self.answered);
        self.context.add_tool_results(&results);
        self.request().await
    }

    /// Stop offering tools until the next [`ChatSession::send`]
    pub fn disable_tools(&mut self) {
        if self.tools_enabled {
            tracing::debug!("Tools disabled for the rest of the turn");
        }
        self.tools_enabled = false;
    }

    pub fn tools_enabled(&self) -> bool {
        self.tools_enabled
    }

    /// Mark the start of a turn; [`ChatSession::rollback_turn`] returns here
    pub fn begin_turn(&mut self) {
        self.turn_start = Some(self.context.len());
        self.tools_enabled = true;
        self.turn_usage = TokenUsage::default();
    }

    /// Undo everything the current turn added. No-op outside a turn.
    pub fn rollback_turn(&mut self) {
        if let Some(start) = self.turn_start.take() {
            tracing::debug!(
                "Rolling back turn ({} message(s) dropped)",
                self.context.len().saturating_sub(start)
            );
            self.context.truncate(start);
        }
        self.clear_pending();
        self.tools_enabled = true;
    }

    /// Keep what the current turn added
    pub fn end_turn(&mut self) {
        self.turn_start = None;
    }

    /// Tool calls handed out or queued that have no result yet
    pub fn pending_count(&self) -> usize {
        self.queued.len() + usize::from(self.outstanding.is_some())
    }

    pub fn history(&self) -> &[Message] {
        self.context.messages()
    }

    /// Forget the conversation (the system instruction stays)
    pub fn reset(&mut self) {
        self.context.clear();
        self.clear_pending();
        self.turn_start = None;
        self.tools_enabled = true;
    }

    /// Tokens spent since the current turn began
    pub fn turn_usage(&self) -> &TokenUsage {
        &self.turn_usage
    }

    pub fn total_usage(&self) -> &TokenUsage {
        &self.total_usage
    }

    pub fn model(&self) -> &str {
        self.llm.model()
    }

    fn clear_pending(&mut self) {
        self.outstanding = None;
        self.queued.clear();
        self.answered.clear();
    }

    async fn request(&mut self) -> Result<Reply, SessionError> {
        let tools = (self.tools_enabled && !self.tools.is_empty()).then_some(self.tools.as_slice());

        tracing::debug!(
            "Sending {} message(s) to {} (tools: {})",
            self.context.len(),
            self.llm.name(),
            tools.map_or(0, |t| t.len())
        );

        let result = self.llm.chat(self.context.messages(), tools).await;
        match result {
            Ok(response) => Ok(self.accept(response)),
            Err(e) => {
                self.rollback_turn();
                Err(SessionError::Provider(e))
            }
        }
    }

    fn accept(&mut self, response: LlmResponse) -> Reply {
        if let Some(usage) = response.usage() {
            self.turn_usage.add(usage);
            self.total_usage.add(usage);
        }

        let text = response.text().filter(|t| !t.trim().is_empty());
        let calls = response.tool_calls();

        if calls.is_empty() || !self.tools_enabled {
            if !calls.is_empty() {
                tracing::warn!(
                    "Dropping {} tool call(s) requested after tools were disabled",
                    calls.len()
                );
            }
            let text = text.unwrap_or_default().to_string();
            self.context.add_assistant(text.clone());
            self.end_turn();
            return Reply::Final(text);
        }

        self.context.add_assistant_tool_calls(text, calls);
        self.queued = calls
            .iter()
            .map(|call| ToolCallRequest {
                id: call.id.clone(),
                name: call.name.clone(),
                arguments: arguments_object(&call.name, &call.arguments),
            })
            .collect();

        match self.queued.pop_front() {
            Some(first) => {
                self.outstanding = Some(first.clone());
                Reply::ToolCall(first)
            }
            None => Reply::Final(String::new()),
        }
    }
}

// Non-object arguments are a protocol slip; validation reports what's missing
fn arguments_object(tool: &str, arguments: &Value) -> Map<String, Value> {
    match arguments {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            tracing::warn!(
                "Tool call '{}' carried non-object arguments ({}), using none",
                tool,
                other
            );
            Map::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ContentPart, Role, ScriptedProvider, ToolCall};
    use serde_json::json;

    fn search_def() -> ToolDefinition {
        ToolDefinition {
            name: "web_search".to_string(),
            description: "search".to_string(),
            parameters: json!({"type": "object"}),
        }
    }

    fn session(provider: &Arc<ScriptedProvider>) -> ChatSession {
        ChatSession::new(provider.clone(), "system", vec![search_def()])
    }

    fn ok(request: &ToolCallRequest, content: &str) -> ToolCallResult {
        ToolCallResult {
            id: request.id.clone(),
            name: request.name.clone(),
            content: content.to_string(),
            is_error: false,
        }
    }

    fn expect_call(reply: Reply) -> ToolCallRequest {
        match reply {
            Reply::ToolCall(request) => request,
            other => panic!("Expected ToolCall, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_plain_answer() {
        let provider = Arc::new(ScriptedProvider::new().then_text("42"));
        let mut session = session(&provider);

        let reply = session.send("meaning of life?").await.unwrap();
        assert_eq!(reply, Reply::Final("42".to_string()));
        assert_eq!(session.history().len(), 3);
        assert_eq!(provider.requests()[0].tool_names, vec!["web_search"]);
    }

    #[tokio::test]
    async fn test_tool_call_round_trip() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .then_tool_call("web_search", json!({"query": "x"}))
                .then_text("x is y"),
        );
        let mut session = session(&provider);

        let request = expect_call(session.send("what is x?").await.unwrap());
        assert_eq!(request.name, "web_search");
        assert_eq!(request.arguments["query"], "x");
        assert_eq!(session.pending_count(), 1);

        let reply = session
            .respond_to_tool_call(ok(&request, "x is y, says the web"))
            .await
            .unwrap();
        assert_eq!(reply, Reply::Final("x is y".to_string()));
        assert_eq!(session.pending_count(), 0);

        let second = &provider.requests()[1].messages;
        let last = second.last().unwrap();
        assert_eq!(last.role, Role::Tool);
        assert!(matches!(
            &last.content.parts()[0],
            ContentPart::ToolResult { tool_use_id, .. } if *tool_use_id == request.id
        ));
    }

    #[tokio::test]
    async fn test_multiple_calls_answered_together() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .then_tool_calls(vec![
                    ("web_search", json!({"query": "a"})),
                    ("web_search", json!({"query": "b"})),
                ])
                .then_text("done"),
        );
        let mut session = session(&provider);

        let first = expect_call(session.send("a and b?").await.unwrap());
        let second = expect_call(session.respond_to_tool_call(ok(&first, "A")).await.unwrap());
        assert_eq!(second.arguments["query"], "b");
        // Second call came from the queue, not the network
        assert_eq!(provider.call_count(), 1);

        let reply = session.respond_to_tool_call(ok(&second, "B")).await.unwrap();
        assert_eq!(reply, Reply::Final("done".to_string()));

        let last = provider.requests()[1].messages.last().cloned().unwrap();
        assert_eq!(last.content.parts().len(), 2);
    }

    #[tokio::test]
    async fn test_send_rejected_while_calls_pending() {
        let provider =
            Arc::new(ScriptedProvider::new().then_tool_call("web_search", json!({"query": "x"})));
        let mut session = session(&provider);
        expect_call(session.send("x?").await.unwrap());

        assert!(matches!(
            session.send("another").await,
            Err(SessionError::ToolCallsPending(1))
        ));
    }

    #[tokio::test]
    async fn test_mismatched_result_keeps_call_pending() {
        let provider =
            Arc::new(ScriptedProvider::new().then_tool_call("web_search", json!({"query": "x"})));
        let mut session = session(&provider);
        let request = expect_call(session.send("x?").await.unwrap());

        let wrong = ToolCallResult {
            id: "other".to_string(),
            ..ok(&request, "nope")
        };
        assert!(matches!(
            session.respond_to_tool_call(wrong).await,
            Err(SessionError::UnexpectedToolResult { .. })
        ));
        assert_eq!(session.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_result_without_call_is_rejected() {
        let provider = Arc::new(ScriptedProvider::new());
        let mut session = session(&provider);
        let stray = ToolCallResult {
            id: "c".to_string(),
            name: "web_search".to_string(),
            content: String::new(),
            is_error: false,
        };
        assert!(matches!(
            session.respond_to_tool_call(stray).await,
            Err(SessionError::NoPendingToolCall)
        ));
    }

    #[tokio::test]
    async fn test_provider_error_rolls_back_turn() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .then_error(LlmError::RateLimited("slow down".to_string()))
                .then_text("fine now"),
        );
        let mut session = session(&provider);

        let err = session.send("hello").await.unwrap_err();
        assert!(matches!(err, SessionError::Provider(LlmError::RateLimited(_))));
        assert_eq!(session.history().len(), 1);

        let reply = session.send("hello again").await.unwrap();
        assert_eq!(reply, Reply::Final("fine now".to_string()));
    }

    #[tokio::test]
    async fn test_disabled_tools_drop_late_calls() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .then_tool_call("web_search", json!({"query": "x"}))
                .then_tool_call("web_search", json!({"query": "again"})),
        );
        let mut session = session(&provider);
        let request = expect_call(session.send("x?").await.unwrap());

        session.disable_tools();
        let reply = session.respond_to_tool_call(ok(&request, "r")).await.unwrap();
        assert_eq!(reply, Reply::Final(String::new()));
        assert!(provider.requests()[1].tool_names.is_empty());
        assert_eq!(session.pending_count(), 0);

        // Next turn offers tools again
        session.begin_turn();
        assert!(session.tools_enabled());
    }

    #[tokio::test]
    async fn test_mixed_reply_is_a_tool_call() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .then(Ok(LlmResponse::from_parts(
                    Some("Let me look.".to_string()),
                    vec![ToolCall {
                        id: "c1".to_string(),
                        name: "web_search".to_string(),
                        arguments: json!("not an object"),
                        thought_signature: None,
                    }],
                    None,
                )))
                .then_text("ok"),
        );
        let mut session = session(&provider);

        let request = expect_call(session.send("q").await.unwrap());
        assert!(request.arguments.is_empty());
        let assistant = &session.history()[2];
        assert!(assistant
            .content
            .parts()
            .iter()
            .any(|p| matches!(p, ContentPart::Text { text } if text == "Let me look.")));
    }

    #[tokio::test]
    async fn test_reset_keeps_system_instruction() {
        let provider = Arc::new(ScriptedProvider::new().then_text("hi"));
        let mut session = session(&provider);
        session.send("hello").await.unwrap();

        session.reset();
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.history()[0].role, Role::System);
    }

    #[tokio::test]
    async fn test_usage_accumulates() {
        let usage = TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
            total_tokens: 15,
        };
        let provider = Arc::new(
            ScriptedProvider::new()
                .then(Ok(LlmResponse::from_parts(
                    Some("a".to_string()),
                    vec![],
                    Some(usage.clone()),
                )))
                .then(Ok(LlmResponse::from_parts(
                    Some("b".to_string()),
                    vec![],
                    Some(usage),
                ))),
        );
        let mut session = session(&provider);
        session.send("1").await.unwrap();
        session.send("2").await.unwrap();

        assert_eq!(session.turn_usage().total_tokens, 15);
        assert_eq!(session.total_usage().total_tokens, 30);
    }
}
