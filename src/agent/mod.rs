//! Research agent: chat session and the loop that runs tools for it

mod context;
mod dispatch;
mod session;

pub use context::ConversationContext;
pub use dispatch::{
    is_quit_command, DispatchConfig, DispatchLoop, LoopEvent, LoopState, ToolCallLog,
    TurnOutcome, TurnReport,
};
pub use session::{ChatSession, Reply, SessionError};
