//! explorer: a research chat assistant for the terminal
//!
//! This library provides:
//! - A Gemini chat session that can call local tools
//! - A `web_search` tool backed by the Google Custom Search JSON API
//! - The dispatch loop that answers every tool call before the next turn
//! - A line-oriented console front end

pub mod agent;
pub mod config;
pub mod llm;
pub mod search;
pub mod tools;
pub mod transport;

pub use config::Config;
