//! Google Gemini LLM provider implementation
//!
//! SECURITY: the API key is sent in the `x-goog-api-key` header to the
//! configured endpoint only, never in the URL, so it cannot leak through logs.

use super::{LlmError, LlmProvider, LlmResponse, Message, MessageContent, Role, TokenUsage};
use super::{ContentPart, ToolCall, ToolDefinition};
use crate::config::LlmConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: usize,
    temperature: f32,
}

impl GeminiProvider {
    pub fn new(api_key: &str, config: &LlmConfig) -> Result<Self> {
        if api_key.trim().is_empty() {
            anyhow::bail!("Gemini API key is empty");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to build HTTP client for Gemini")?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    fn convert_messages(&self, messages: &[Message]) -> (Option<String>, Vec<GeminiContent>) {
        let mut system_instruction = None;
        let mut contents = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => {
                    if let Some(text) = msg.content.as_text() {
                        system_instruction = Some(text.to_string());
                    }
                }
                Role::User => {
                    if let Some(text) = msg.content.as_text() {
                        contents.push(GeminiContent::text("user", text));
                    }
                }
                Role::Assistant => {
                    let parts = match &msg.content {
                        MessageContent::Text(text) => vec![GeminiPart::Text { text: text.clone() }],
                        MessageContent::Parts(parts) => parts
                            .iter()
                            .filter_map(|p| match p {
                                ContentPart::Text { text } => {
                                    Some(GeminiPart::Text { text: text.clone() })
                                }
                                ContentPart::ToolUse {
                                    name,
                                    input,
                                    thought_signature,
                                    ..
                                } => Some(GeminiPart::FunctionCall {
                                    function_call: GeminiFunctionCall {
                                        name: name.clone(),
                                        args: input.clone(),
                                    },
                                    thought_signature: thought_signature.clone(),
                                }),
                                ContentPart::ToolResult { .. } => None,
                            })
                            .collect(),
                    };
                    if !parts.is_empty() {
                        contents.push(GeminiContent {
                            role: "model".to_string(),
                            parts,
                        });
                    }
                }
                Role::Tool => {
                    let parts: Vec<GeminiPart> = msg
                        .content
                        .parts()
                        .iter()
                        .filter_map(|p| match p {
                            ContentPart::ToolResult {
                                name,
                                content,
                                is_error,
                                ..
                            } => {
                                let key = if *is_error { "error" } else { "result" };
                                let mut response = serde_json::Map::new();
                                response.insert(
                                    key.to_string(),
                                    serde_json::Value::String(content.clone()),
                                );
                                Some(GeminiPart::FunctionResponse {
                                    function_response: GeminiFunctionResponse {
                                        name: name.clone(),
                                        response: serde_json::Value::Object(response),
                                    },
                                })
                            }
                            _ => None,
                        })
                        .collect();
                    if !parts.is_empty() {
                        contents.push(GeminiContent {
                            role: "user".to_string(),
                            parts,
                        });
                    }
                }
            }
        }

        (system_instruction, contents)
    }

    fn convert_tools(&self, tools: &[ToolDefinition]) -> Vec<GeminiFunctionDeclaration> {
        tools
            .iter()
            .map(|t| GeminiFunctionDeclaration {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.parameters.clone(),
            })
            .collect()
    }

    async fn send_request(&self, request: &GeminiRequest) -> Result<GeminiResponse, LlmError> {
        let url = format!("{}/{}:generateContent", self.base_url, self.model);
        tracing::debug!(
            "Gemini request: model={} contents={} tools={}",
            self.model,
            request.contents.len(),
            request.tools.is_some()
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(LlmError::from_network_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::from_http_status(status, error_text));
        }

        response
            .json::<GeminiResponse>()
            .await
            .map_err(|e| LlmError::InvalidResponse(format!("Gemini response: {}", e)))
    }

    fn parse_response(response: GeminiResponse) -> Result<LlmResponse, LlmError> {
        let usage = response.usage_metadata.map(|u| TokenUsage {
            input_tokens: u.prompt_token_count,
            output_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        });

        let Some(candidate) = response.candidates.into_iter().next() else {
            if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
                return Err(LlmError::InvalidResponse(format!(
                    "prompt was blocked ({})",
                    reason
                )));
            }
            return Ok(LlmResponse::from_parts(None, Vec::new(), usage));
        };

        let mut text_parts = Vec::new();
        let mut tool_calls = Vec::new();

        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            match part {
                GeminiPart::Text { text } => text_parts.push(text),
                GeminiPart::FunctionCall {
                    function_call,
                    thought_signature,
                } => {
                    // Gemini doesn't provide call ids
                    tool_calls.push(ToolCall {
                        id: format!("gemini_{}_{}", function_call.name, uuid::Uuid::new_v4().simple()),
                        name: function_call.name,
                        arguments: function_call.args,
                        thought_signature,
                    });
                }
                GeminiPart::FunctionResponse { .. } => {}
                GeminiPart::Other(value) => {
                    tracing::warn!("Ignoring unsupported Gemini part: {}", value);
                }
            }
        }

        let text = Some(text_parts.join("")).filter(|t| !t.trim().is_empty());
        Ok(LlmResponse::from_parts(text, tool_calls, usage))
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<LlmResponse, LlmError> {
        let (system_instruction, contents) = self.convert_messages(messages);

        let mut request = GeminiRequest {
            contents,
            system_instruction: system_instruction.map(|text| GeminiSystemInstruction {
                parts: vec![GeminiPart::Text { text }],
            }),
            generation_config: Some(GeminiGenerationConfig {
                max_output_tokens: Some(self.max_tokens),
                temperature: Some(self.temperature),
            }),
            tools: None,
        };

        if let Some(tools) = tools {
            if !tools.is_empty() {
                request.tools = Some(vec![GeminiTools {
                    function_declarations: self.convert_tools(tools),
                }]);
            }
        }

        let response = self.send_request(&request).await?;
        Self::parse_response(response)
    }
}

// Gemini API types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<GeminiTools>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

impl GeminiContent {
    fn text(role: &str, text: &str) -> Self {
        Self {
            role: role.to_string(),
            parts: vec![GeminiPart::Text {
                text: text.to_string(),
            }],
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: GeminiFunctionCall,
        /// Sibling of `functionCall` on thinking models, required when the call is replayed
        #[serde(
            rename = "thoughtSignature",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        thought_signature: Option<String>,
    },
    FunctionResponse {
        #[serde(rename = "functionResponse")]
        function_response: GeminiFunctionResponse,
    },
    /// Part kinds we don't handle (inline data, executable code, ...)
    Other(serde_json::Value),
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiFunctionCall {
    name: String,
    #[serde(default)]
    args: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiFunctionResponse {
    name: String,
    response: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct GeminiTools {
    #[serde(rename = "functionDeclarations")]
    function_declarations: Vec<GeminiFunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct GeminiFunctionDeclaration {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsageMetadata>,
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}
