//! `web_search`: the one capability the model can ask for

use super::{ParamType, ParameterSpec, Tool, ToolResult, ToolSchema, ValidatedArgs};
use crate::search::{self, SearchClient};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

pub const WEB_SEARCH_TOOL_NAME: &str = "web_search";

pub struct WebSearchTool {
    client: Arc<SearchClient>,
    max_results: usize,
}

impl WebSearchTool {
    pub fn new(client: Arc<SearchClient>) -> Self {
        let max_results = client.default_max_results();
        Self {
            client,
            max_results,
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        WEB_SEARCH_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Performs a web search to find up-to-date information, answer questions about \
         recent events, or research topics. Returns the title, link and snippet of the top results."
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new().param(ParameterSpec::required(
            "query",
            ParamType::String,
            "The search query.",
        ))
    }

    async fn execute(&self, args: ValidatedArgs) -> Result<ToolResult> {
        let query = args.str("query").unwrap_or_default();

        // Search failures are reported to the model as text, it can rephrase or answer without
        match self.client.search(query, self.max_results).await {
            Ok(results) => {
                tracing::debug!("web_search '{}' returned {} result(s)", query, results.len());
                Ok(ToolResult::success(search::format_for_model(&results)))
            }
            Err(e) => {
                tracing::warn!("web_search '{}' failed: {}", query, e);
                Ok(ToolResult::error(format!("Error during search: {}", e)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SearchConfig, SearchCredentials};
    use crate::tools::{ToolCallRequest, ToolRegistry};
    use serde_json::json;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn tool_for(server: &MockServer) -> WebSearchTool {
        let settings = SearchConfig {
            endpoint: server.uri(),
            ..SearchConfig::default()
        };
        let credentials = SearchCredentials {
            api_key: "k".to_string(),
            engine_id: "cx".to_string(),
        };
        WebSearchTool::new(Arc::new(SearchClient::new(&settings, &credentials).unwrap()))
    }

    fn request(args: serde_json::Value) -> ToolCallRequest {
        ToolCallRequest {
            id: "call_1".to_string(),
            name: WEB_SEARCH_TOOL_NAME.to_string(),
            arguments: args.as_object().cloned().unwrap_or_default(),
        }
    }

    #[tokio::test]
    async fn test_declaration_matches_executor() {
        let server = MockServer::start().await;
        let def = tool_for(&server).to_definition();
        assert_eq!(def.name, "web_search");
        assert_eq!(def.parameters["properties"]["query"]["type"], "string");
        assert_eq!(def.parameters["required"], json!(["query"]));
    }

    #[tokio::test]
    async fn test_two_results_reach_the_model() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("q", "x"))
            .and(query_param("num", "3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [
                    {"title": "First", "link": "https://a.example", "snippet": "alpha"},
                    {"title": "Second", "link": "https://b.example", "snippet": "beta"}
                ]
            })))
            .mount(&server)
            .await;

        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(tool_for(&server)));
        let result = registry.execute(&request(json!({"query": "x"}))).await;

        assert!(!result.is_error);
        assert!(result.content.contains("First"));
        assert!(result.content.contains("alpha"));
        assert!(result.content.contains("Second"));
        assert!(result.content.contains("beta"));
    }

    #[tokio::test]
    async fn test_empty_results_text() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"kind": "x"})))
            .mount(&server)
            .await;

        // Empty query never reaches the server
        let result = tool_for(&server)
            .execute(ValidatedArgs::default())
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.output.contains("search query is empty"));

        let args = ToolSchema::new()
            .param(ParameterSpec::required("query", ParamType::String, "q"))
            .validate(&json!({"query": "nothing"}))
            .unwrap();
        let result = tool_for(&server).execute(args).await.unwrap();
        assert!(result.success);
        assert_eq!(result.output, crate::search::NO_RESULTS_TEXT);
    }

    #[tokio::test]
    async fn test_http_failure_becomes_error_text() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(tool_for(&server)));
        let result = registry.execute(&request(json!({"query": "x"}))).await;
        assert!(result.is_error);
        assert!(result.content.starts_with("Error during search:"));
    }
}
