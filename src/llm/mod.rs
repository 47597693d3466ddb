//! LLM provider implementations

use crate::config::{Config, Credentials};

mod error;
mod gemini;
mod types;

// Scripted provider for tests (feature-gated)
#[cfg(feature = "test-sim")]
pub mod scripted;
#[cfg(feature = "test-sim")]
pub use scripted::ScriptedProvider;

pub use error::LlmError;
pub use gemini::GeminiProvider;
pub use types::*;

use anyhow::Result;
use async_trait::async_trait;

/// Trait for LLM providers
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Get the provider name
    fn name(&self) -> &str;

    /// Model identifier requests are sent to
    fn model(&self) -> &str;

    /// Send a chat completion request (non-streaming)
    ///
    /// `tools` are the declarations the model may call; `None` or an empty
    /// slice sends a plain text request.
    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<LlmResponse, LlmError>;
}

/// Create the configured LLM provider
///
/// `model` overrides `config.llm.model` (from the `--model` flag).
pub fn create_provider(
    config: &Config,
    credentials: &Credentials,
    model: Option<&str>,
) -> Result<Box<dyn LlmProvider>> {
    let mut provider = GeminiProvider::new(&credentials.model_api_key, &config.llm)?;
    if let Some(m) = model {
        provider = provider.with_model(m);
    }
    tracing::debug!("Using provider gemini, model {}", provider.model());
    Ok(Box::new(provider))
}
