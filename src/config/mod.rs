//! Configuration management for explorer
//!
//! Two halves, loaded once at startup and passed by reference afterwards:
//! - [`Config`]: tunables read from a TOML file (all fields have defaults)
//! - [`Credentials`]: secrets read from the process environment, which
//!   [`load_dotenv`] may first seed from `.env` files in the working directory

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable holding the Gemini API key
pub const MODEL_API_KEY_VAR: &str = "GEMINI_API_KEY";
/// Accepted fallback for the model key
pub const MODEL_API_KEY_FALLBACK_VAR: &str = "GOOGLE_API_KEY";
/// Environment variable holding the Custom Search API key
pub const SEARCH_API_KEY_VAR: &str = "CUSTOM_SEARCH_API_KEY";
/// Environment variable holding the Custom Search engine id (`cx`)
pub const SEARCH_ENGINE_ID_VAR: &str = "SEARCH_ENGINE_ID";
/// Accepted fallback for the engine id
pub const SEARCH_ENGINE_ID_FALLBACK_VAR: &str = "CUSTOM_SEARCH_ENGINE_ID";

/// Env files read from the working directory, in order
pub const DOTENV_FILES: &[&str] = &[".env", ".env.search_agent", ".env.search_tools"];

const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a helpful research assistant. \
When a question needs current or factual information, use the web_search tool to find it. \
After searching, synthesize the results into a concise, easy-to-understand answer. \
Do not make up information; base your answer on the search results you were given.";

/// Startup configuration failures. These are the only errors allowed to end the process.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// One or more required environment variables are unset or empty
    #[error("missing required environment variable(s): {}", .0.join(", "))]
    MissingVars(Vec<String>),

    /// A single credential handed to a client constructor was empty
    #[error("{0} is empty")]
    EmptyValue(&'static str),

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    pub max_tokens: usize,
    pub temperature: f32,
    pub system_instruction: String,
    /// Gemini models endpoint, overridable for proxies and tests
    pub base_url: String,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash".to_string(),
            max_tokens: 2048,
            temperature: 0.7,
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta/models".to_string(),
            request_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub endpoint: String,
    pub max_results: usize,
    pub request_timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://www.googleapis.com/customsearch/v1".to_string(),
            max_results: 3,
            request_timeout_secs: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Tool executions allowed per turn before tools are switched off
    pub max_tool_rounds: usize,
    pub tool_timeout_secs: u64,
    /// Print progress lines (tool requested, tool finished) to stdout
    pub show_progress: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: 5,
            tool_timeout_secs: 30,
            show_progress: true,
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from the default location when `None`.
    ///
    /// A missing file yields the defaults; an unreadable or malformed one is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::config_path() {
                Some(p) => p,
                None => return Ok(Config::default()),
            },
        };

        if !config_path.exists() {
            tracing::debug!("No config file at {}, using defaults", config_path.display());
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
            path: config_path.clone(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: config_path,
            source,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Get the default configuration file path
    pub fn config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "explorer")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Secrets needed by the model and search clients
#[derive(Clone)]
pub struct Credentials {
    pub model_api_key: String,
    pub search: SearchCredentials,
}

/// Secrets needed by the search client alone
#[derive(Clone)]
pub struct SearchCredentials {
    pub api_key: String,
    pub engine_id: String,
}

// Keys never end up in logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("model_api_key", &"<redacted>")
            .field("search", &self.search)
            .finish()
    }
}

impl std::fmt::Debug for SearchCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchCredentials")
            .field("api_key", &"<redacted>")
            .field("engine_id", &self.engine_id)
            .finish()
    }
}

/// Seed the process environment from [`DOTENV_FILES`]
///
/// Variables already set are never overwritten, so the real environment wins
/// over any file and earlier files win over later ones. Missing files are skipped.
pub fn load_dotenv() {
    for name in DOTENV_FILES {
        match dotenvy::from_filename(name) {
            Ok(path) => tracing::debug!("Loaded environment from {}", path.display()),
            Err(e) if e.not_found() => {}
            Err(e) => tracing::warn!("Ignoring {}: {}", name, e),
        }
    }
}

impl Credentials {
    /// Read all credentials from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read credentials through `lookup`, reporting every missing variable at once
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |primary: &str, fallback: Option<&str>| {
            std::iter::once(primary)
                .chain(fallback)
                .filter_map(|name| lookup(name))
                .map(|v| v.trim().to_string())
                .find(|v| !v.is_empty())
        };

        let model_api_key = get(MODEL_API_KEY_VAR, Some(MODEL_API_KEY_FALLBACK_VAR));
        let search_api_key = get(SEARCH_API_KEY_VAR, None);
        let engine_id = get(SEARCH_ENGINE_ID_VAR, Some(SEARCH_ENGINE_ID_FALLBACK_VAR));

        let mut missing = Vec::new();
        if model_api_key.is_none() {
            missing.push(format!("{} (or {})", MODEL_API_KEY_VAR, MODEL_API_KEY_FALLBACK_VAR));
        }
        if search_api_key.is_none() {
            missing.push(SEARCH_API_KEY_VAR.to_string());
        }
        if engine_id.is_none() {
            missing.push(format!(
                "{} (or {})",
                SEARCH_ENGINE_ID_VAR, SEARCH_ENGINE_ID_FALLBACK_VAR
            ));
        }

        match (model_api_key, search_api_key, engine_id) {
            (Some(model_api_key), Some(api_key), Some(engine_id)) => Ok(Self {
                model_api_key,
                search: SearchCredentials { api_key, engine_id },
            }),
            _ => Err(ConfigError::MissingVars(missing)),
        }
    }

    /// Read only the search credentials (used by the `search` subcommand)
    pub fn search_from_env() -> Result<SearchCredentials, ConfigError> {
        Self::search_from_lookup(|name| std::env::var(name).ok())
    }

    pub fn search_from_lookup<F>(lookup: F) -> Result<SearchCredentials, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Borrow the full check but ignore a missing model key
        let with_dummy_model = |name: &str| {
            if name == MODEL_API_KEY_VAR {
                Some("unused".to_string())
            } else {
                lookup(name)
            }
        };
        Self::from_lookup(with_dummy_model).map(|c| c.search)
    }
}
