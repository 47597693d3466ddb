//! Google Custom Search JSON API client
//!
//! One GET per query, no retries. Transport and HTTP failures come back as
//! typed [`SearchError`]s; a body without results (or one we can't parse) is
//! simply zero results.

use crate::config::{ConfigError, SearchConfig, SearchCredentials};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// The API rejects `num` outside 1..=10
pub const MAX_RESULTS_PER_QUERY: usize = 10;

/// Returned to the model when a search comes back empty
pub const NO_RESULTS_TEXT: &str = "No relevant search results found.";

/// One search hit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub link: String,
    pub snippet: String,
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search query is empty")]
    EmptyQuery,

    #[error("search request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("search API returned HTTP {status}: {body}")]
    Http {
        status: reqwest::StatusCode,
        body: String,
    },
}

pub struct SearchClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    engine_id: String,
    default_max_results: usize,
}

impl SearchClient {
    /// Build a client; fails before any network activity when credentials are empty
    pub fn new(settings: &SearchConfig, credentials: &SearchCredentials) -> Result<Self, ConfigError> {
        if credentials.api_key.trim().is_empty() {
            return Err(ConfigError::EmptyValue("search API key"));
        }
        if credentials.engine_id.trim().is_empty() {
            return Err(ConfigError::EmptyValue("search engine id"));
        }

        // Building only fails if the TLS backend can't initialize, keep a usable default then
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Falling back to default HTTP client for search: {}", e);
                reqwest::Client::new()
            });

        Ok(Self {
            client,
            endpoint: settings.endpoint.clone(),
            api_key: credentials.api_key.clone(),
            engine_id: credentials.engine_id.clone(),
            default_max_results: clamp_max_results(settings.max_results),
        })
    }

    /// Result count used when the caller doesn't pick one
    pub fn default_max_results(&self) -> usize {
        self.default_max_results
    }

    /// Run one query, returning at most `max_results` hits
    pub async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(SearchError::EmptyQuery);
        }
        let max_results = clamp_max_results(max_results);

        tracing::info!("Searching the web for '{}' (max {})", query, max_results);

        let num = max_results.to_string();
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("key", self.api_key.as_str()),
                ("cx", self.engine_id.as_str()),
                ("q", query),
                ("num", num.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::Http { status, body });
        }

        let body = response.text().await?;
        Ok(parse_results(&body, max_results))
    }
}

fn clamp_max_results(n: usize) -> usize {
    n.clamp(1, MAX_RESULTS_PER_QUERY)
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Option<Vec<SearchItem>>,
}

/// Any field may be absent or `null` on a single item
#[derive(Debug, Deserialize)]
struct SearchItem {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    snippet: Option<String>,
}

/// Parse a Custom Search body; anything unexpected is treated as no results
pub fn parse_results(body: &str, max_results: usize) -> Vec<SearchResult> {
    let parsed: SearchResponse = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!("Unreadable search response, treating as empty: {}", e);
            return Vec::new();
        }
    };

    parsed
        .items
        .unwrap_or_default()
        .into_iter()
        .take(max_results)
        .map(|item| SearchResult {
            title: item.title.unwrap_or_default(),
            link: item.link.unwrap_or_default(),
            snippet: item.snippet.unwrap_or_default().trim().to_string(),
        })
        .collect()
}

/// Render results as the text handed back to the model
pub fn format_for_model(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return NO_RESULTS_TEXT.to_string();
    }
    results
        .iter()
        .map(|r| format!("Title: {}\nLink: {}\nSnippet: {}", r.title, r.link, r.snippet))
        .collect::<Vec<_>>()
        .join("\n---\n")
}

/// Render results for a person reading the terminal
pub fn format_for_console(results: &[SearchResult]) -> String {
    let mut out = String::new();
    for (i, r) in results.iter().enumerate() {
        out.push_str(&format!(
            "--- Result {} ---\nTitle: {}\nLink: {}\nSnippet: {}\n\n",
            i + 1,
            r.title,
            r.link,
            r.snippet
        ));
    }
    out
}
