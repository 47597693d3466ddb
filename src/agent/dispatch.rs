//! Dispatch loop: drives one user turn through model replies and tool runs
//!
//! ```text
//! AwaitingUserInput -> ModelThinking -> Done
//!                            |    ^
//!                            v    |
//!                ToolPending -> ToolExecuting
//! ```
//!
//! Every [`Reply::ToolCall`] is answered with exactly one result before the
//! session is asked for anything else. After `max_tool_rounds` executions the
//! remaining calls are refused and tools are switched off for the turn, so a
//! turn always ends.

use super::{ChatSession, Reply, SessionError};
use crate::config::AgentConfig;
use crate::llm::{LlmError, LlmProvider, TokenUsage};
use crate::tools::{ToolCallResult, ToolRegistry};
use std::sync::Arc;

/// Where the loop is within a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    AwaitingUserInput,
    ModelThinking,
    ToolPending,
    ToolExecuting,
    Done,
}

/// Progress notifications for whoever is watching the turn
#[derive(Debug, Clone, PartialEq)]
pub enum LoopEvent {
    Thinking,
    ToolRequested { name: String, arguments: String },
    ToolCompleted {
        name: String,
        preview: String,
        success: bool,
    },
}

type EventHandler = Box<dyn Fn(&LoopEvent) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Tool executions allowed per turn
    pub max_tool_rounds: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { max_tool_rounds: 5 }
    }
}

impl From<&AgentConfig> for DispatchConfig {
    fn from(config: &AgentConfig) -> Self {
        Self {
            max_tool_rounds: config.max_tool_rounds,
        }
    }
}

/// Log entry for a tool call
#[derive(Debug, Clone)]
pub struct ToolCallLog {
    pub tool: String,
    pub args: serde_json::Value,
    pub result_preview: String,
    pub is_error: bool,
}

/// Everything a finished turn produced
#[derive(Debug, Clone)]
pub struct TurnReport {
    pub text: String,
    pub tool_calls_made: usize,
    pub tool_log: Vec<ToolCallLog>,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone)]
pub enum TurnOutcome {
    /// The user asked to leave; nothing was sent
    Quit,
    /// Blank input, ignored
    Empty,
    Answer(TurnReport),
    /// The turn was rolled back; the message is fit for the user
    Failed(String),
}

/// `exit` or `quit`, any case, surrounding whitespace ignored
pub fn is_quit_command(input: &str) -> bool {
    let input = input.trim();
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

pub struct DispatchLoop {
    session: ChatSession,
    registry: ToolRegistry,
    config: DispatchConfig,
    state: LoopState,
    on_event: Option<EventHandler>,
}

impl DispatchLoop {
    /// Build a loop whose session offers every tool in `registry`
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        registry: ToolRegistry,
        system_instruction: &str,
        config: DispatchConfig,
    ) -> Self {
        let session = ChatSession::new(llm, system_instruction, registry.definitions());
        Self {
            session,
            registry,
            config,
            state: LoopState::AwaitingUserInput,
            on_event: None,
        }
    }

    /// Receive [`LoopEvent`]s as the turn progresses
    pub fn with_event_handler(
        mut self,
        handler: impl Fn(&LoopEvent) + Send + Sync + 'static,
    ) -> Self {
        self.set_event_handler(handler);
        self
    }

    /// Replace the event handler on a loop that is already built
    pub fn set_event_handler(&mut self, handler: impl Fn(&LoopEvent) + Send + Sync + 'static) {
        self.on_event = Some(Box::new(handler));
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    /// Start a fresh conversation
    pub fn reset(&mut self) {
        self.session.reset();
        self.state = LoopState::AwaitingUserInput;
    }

    /// Run one user turn to completion
    pub async fn run_turn(&mut self, input: &str) -> TurnOutcome {
        if is_quit_command(input) {
            self.state = LoopState::Done;
            return TurnOutcome::Quit;
        }
        let input = input.trim();
        if input.is_empty() {
            return TurnOutcome::Empty;
        }

        let result = self.drive(input).await;
        let outcome = match result {
            Ok(report) => TurnOutcome::Answer(report),
            Err(e) => {
                self.session.rollback_turn();
                tracing::error!("Turn failed: {}", e);
                TurnOutcome::Failed(describe_failure(&e))
            }
        };
        self.state = LoopState::AwaitingUserInput;
        outcome
    }

    async fn drive(&mut self, input: &str) -> Result<TurnReport, SessionError> {
        let mut tool_calls_made = 0;
        let mut tool_log = Vec::new();

        self.enter(LoopState::ModelThinking);
        let mut reply = self.session.send(input).await?;

        loop {
            let request = match reply {
                Reply::Final(text) => {
                    self.state = LoopState::Done;
                    return Ok(TurnReport {
                        text,
                        tool_calls_made,
                        tool_log,
                        usage: self.session.turn_usage().clone(),
                    });
                }
                Reply::ToolCall(request) => request,
            };

            self.state = LoopState::ToolPending;
            let arguments = serde_json::Value::Object(request.arguments.clone());
            self.emit(LoopEvent::ToolRequested {
                name: request.name.clone(),
                arguments: arguments.to_string(),
            });

            let result = if tool_calls_made >= self.config.max_tool_rounds {
                tracing::warn!(
                    "Tool budget of {} exhausted, refusing '{}'",
                    self.config.max_tool_rounds,
                    request.name
                );
                self.session.disable_tools();
                ToolCallResult::error(
                    &request,
                    format!(
                        "Tool call limit of {} reached for this question. \
                         Answer with the information already gathered.",
                        self.config.max_tool_rounds
                    ),
                )
            } else {
                self.state = LoopState::ToolExecuting;
                tracing::info!("Executing tool '{}' with {}", request.name, arguments);
                tool_calls_made += 1;
                self.registry.execute(&request).await
            };

            let preview = truncate_preview(&result.content, 200);
            self.emit(LoopEvent::ToolCompleted {
                name: result.name.clone(),
                preview: preview.clone(),
                success: !result.is_error,
            });
            tool_log.push(ToolCallLog {
                tool: request.name.clone(),
                args: arguments,
                result_preview: preview,
                is_error: result.is_error,
            });

            self.enter(LoopState::ModelThinking);
            reply = self.session.respond_to_tool_call(result).await?;
        }
    }

    fn enter(&mut self, state: LoopState) {
        self.state = state;
        if state == LoopState::ModelThinking {
            self.emit(LoopEvent::Thinking);
        }
    }

    fn emit(&self, event: LoopEvent) {
        if let Some(handler) = &self.on_event {
            handler(&event);
        }
    }
}

fn describe_failure(error: &SessionError) -> String {
    match error {
        SessionError::Provider(LlmError::Unauthorized(_)) => {
            format!("{} (check GEMINI_API_KEY)", error)
        }
        SessionError::Provider(e) if e.is_transient() => {
            format!("{} (try again in a moment)", error)
        }
        _ => error.to_string(),
    }
}

/// Truncate preview text to max length
fn truncate_preview(text: &str, max_len: usize) -> String {
    if text.len() > max_len {
        format!("{}...", truncate_at_char_boundary(text, max_len))
    } else {
        text.to_string()
    }
}

/// Truncate at UTF-8 character boundary
fn truncate_at_char_boundary(s: &str, max_bytes: usize) -> &str {
    if max_bytes >= s.len() {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
