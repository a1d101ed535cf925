//! Configuration management.
//!
//! Configuration is read from a TOML file, then environment variables are
//! applied on top. Every field has a default, so an absent file is fine.
//!
//! ```toml
//! data_dir = "data"
//!
//! [llm]
//! provider = "groq"
//! model = "llama-3.3-70b-versatile"
//!
//! [orchestrator]
//! max_cycles = 5
//! tool_timeout_ms = 10000
//!
//! [access]
//! default_level = "public"
//!
//! [access.sessions]
//! hr-admin = "confidential"
//!
//! [[remote]]
//! base_url = "http://127.0.0.1:7402"
//! ```

use crate::adapters::RemoteAdapterConfig;
use crate::models::AccessLevel;
use crate::orchestrator::OrchestratorConfig;
use crate::security::AccessPolicy;
use crate::{Error, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for ragmcp.
#[derive(Debug, Clone)]
pub struct RagMcpConfig {
    /// Root directory for data files.
    pub data_dir: PathBuf,
    /// Model provider configuration.
    pub llm: LlmConfig,
    /// Orchestrator loop limits and timeouts.
    pub orchestrator: OrchestratorConfig,
    /// Backing data locations.
    pub data: DataConfig,
    /// Semantic index search parameters.
    pub retrieval: RetrievalConfig,
    /// Session access levels.
    pub access: AccessPolicy,
    /// Logging section, resolved later together with CLI flags.
    pub logging: Option<LoggingSettings>,
    /// Adapters reached over HTTP instead of in-process.
    pub remote: Vec<RemoteAdapterConfig>,
}

/// Model provider configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Provider.
    pub provider: LlmProvider,
    /// Model name.
    pub model: String,
    /// API key; falls back to the provider's environment variable.
    pub api_key: Option<SecretString>,
    /// Base URL of the chat-completions API.
    pub base_url: String,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Completion token limit.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Retries for transient failures.
    pub max_retries: u32,
    /// Backoff step between retries in milliseconds.
    pub retry_backoff_ms: u64,
    /// Consecutive failures before the breaker opens.
    pub breaker_failure_threshold: u32,
    /// Milliseconds the breaker stays open.
    pub breaker_reset_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self::for_provider(LlmProvider::default())
    }
}

impl LlmConfig {
    /// Defaults for one provider.
    #[must_use]
    pub fn for_provider(provider: LlmProvider) -> Self {
        Self {
            provider,
            model: provider.default_model().to_string(),
            api_key: None,
            base_url: provider.default_base_url().to_string(),
            timeout_ms: 30_000,
            connect_timeout_ms: 3_000,
            max_tokens: 4096,
            temperature: 0.2,
            max_retries: 2,
            retry_backoff_ms: 250,
            breaker_failure_threshold: 5,
            breaker_reset_ms: 30_000,
        }
    }
}

/// Supported model providers. All speak the OpenAI chat-completions format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LlmProvider {
    /// Groq cloud.
    #[default]
    Groq,
    /// `OpenAI`.
    OpenAi,
    /// Ollama (local).
    Ollama,
    /// LM Studio (local).
    LmStudio,
}

impl LlmProvider {
    /// Parses a provider string. Unknown names fall back to Groq.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "openai" => Self::OpenAi,
            "ollama" => Self::Ollama,
            "lmstudio" | "lm_studio" | "lm-studio" => Self::LmStudio,
            _ => Self::Groq,
        }
    }

    /// Returns the provider as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Groq => "groq",
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
            Self::LmStudio => "lmstudio",
        }
    }

    /// Default API base URL.
    #[must_use]
    pub const fn default_base_url(&self) -> &'static str {
        match self {
            Self::Groq => "https://api.groq.com/openai/v1",
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Ollama => "http://localhost:11434/v1",
            Self::LmStudio => "http://localhost:1234/v1",
        }
    }

    /// Default model name.
    #[must_use]
    pub const fn default_model(&self) -> &'static str {
        match self {
            Self::Groq => "llama-3.3-70b-versatile",
            Self::OpenAi => "gpt-4o-mini",
            Self::Ollama => "llama3.1",
            Self::LmStudio => "local-model",
        }
    }

    /// Environment variable holding the API key, for hosted providers.
    #[must_use]
    pub const fn api_key_env(&self) -> Option<&'static str> {
        match self {
            Self::Groq => Some("GROQ_API_KEY"),
            Self::OpenAi => Some("OPENAI_API_KEY"),
            Self::Ollama | Self::LmStudio => None,
        }
    }
}

/// Locations of the three backing data sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataConfig {
    /// `SQLite` employee database.
    pub records_db: PathBuf,
    /// Directory of announcement `.txt` files.
    pub announcements_dir: PathBuf,
    /// Directory of policy documents.
    pub policies_dir: PathBuf,
}

impl DataConfig {
    /// Standard layout under one data directory.
    #[must_use]
    pub fn under(data_dir: &Path) -> Self {
        Self {
            records_db: data_dir.join("employees.db"),
            announcements_dir: data_dir.join("announcements"),
            policies_dir: data_dir.join("policies"),
        }
    }
}

/// Semantic index search parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalConfig {
    /// Results per search unless the model asks otherwise.
    pub top_k: usize,
    /// Similarity threshold below which nothing is returned.
    pub min_score: f32,
    /// Hash embedding dimensions. The semantic model has a fixed size.
    pub dimensions: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            min_score: 0.25,
            dimensions: 256,
        }
    }
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Data directory.
    pub data_dir: Option<String>,
    /// LLM section.
    pub llm: Option<ConfigFileLlm>,
    /// Orchestrator section.
    pub orchestrator: Option<ConfigFileOrchestrator>,
    /// Data section.
    pub data: Option<ConfigFileData>,
    /// Retrieval section.
    pub retrieval: Option<ConfigFileRetrieval>,
    /// Access section.
    pub access: Option<ConfigFileAccess>,
    /// Logging section.
    pub logging: Option<LoggingSettings>,
    /// Remote adapters.
    #[serde(default)]
    pub remote: Vec<RemoteAdapterConfig>,
}

/// LLM section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileLlm {
    /// Provider name.
    pub provider: Option<String>,
    /// Model name.
    pub model: Option<String>,
    /// API key, or `${VAR}` to read it from the environment.
    pub api_key: Option<String>,
    /// Base URL.
    pub base_url: Option<String>,
    /// Request timeout.
    pub timeout_ms: Option<u64>,
    /// Connect timeout.
    pub connect_timeout_ms: Option<u64>,
    /// Completion token limit.
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Retries.
    pub max_retries: Option<u32>,
    /// Retry backoff.
    pub retry_backoff_ms: Option<u64>,
    /// Breaker threshold.
    pub breaker_failure_threshold: Option<u32>,
    /// Breaker reset.
    pub breaker_reset_ms: Option<u64>,
}

/// Orchestrator section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileOrchestrator {
    /// Planning/dispatch cycle cap.
    pub max_cycles: Option<usize>,
    /// Per tool call timeout.
    pub tool_timeout_ms: Option<u64>,
    /// Whole query timeout.
    pub query_timeout_ms: Option<u64>,
    /// Concurrent tool calls per step.
    pub max_parallel_tools: Option<usize>,
}

/// Data section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileData {
    /// Employee database path.
    pub records_db: Option<String>,
    /// Announcements directory.
    pub announcements_dir: Option<String>,
    /// Policies directory.
    pub policies_dir: Option<String>,
}

/// Retrieval section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileRetrieval {
    /// Default result count.
    pub top_k: Option<usize>,
    /// Similarity threshold.
    pub min_score: Option<f32>,
    /// Embedding dimensions.
    pub dimensions: Option<usize>,
}

/// Access section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileAccess {
    /// Level for sessions without an explicit mapping.
    pub default_level: Option<String>,
    /// Session id to level.
    #[serde(default)]
    pub sessions: HashMap<String, String>,
}

/// Logging section in config file.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingSettings {
    /// `pretty` or `json`.
    pub format: Option<String>,
    /// `EnvFilter` directive.
    pub level: Option<String>,
    /// Log file path.
    pub file: Option<String>,
}

impl Default for RagMcpConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from("data");
        Self {
            data: DataConfig::under(&data_dir),
            data_dir,
            llm: LlmConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            retrieval: RetrievalConfig::default(),
            access: AccessPolicy::default(),
            logging: None,
            remote: Vec::new(),
        }
    }
}

impl RagMcpConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML for this schema or
    /// names an unknown access level.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(contents).map_err(|e| Error::OperationFailed {
            operation: "parse_config_file".to_string(),
            cause: e.to_string(),
        })?;
        Self::from_config_file(file)
    }

    /// Loads configuration from the default location.
    ///
    /// Checks `<config_dir>/ragmcp/config.toml`, then
    /// `~/.config/ragmcp/config.toml`. Returns defaults if neither exists or
    /// parses.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Self::default();
        };

        let candidates = [
            base_dirs.config_dir().join("ragmcp").join("config.toml"),
            base_dirs
                .home_dir()
                .join(".config")
                .join("ragmcp")
                .join("config.toml"),
        ];
        for path in candidates.iter().filter(|p| p.exists()) {
            match Self::load_from_file(path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable config file");
                },
            }
        }

        Self::default()
    }

    /// Converts a `ConfigFile` to `RagMcpConfig`.
    fn from_config_file(file: ConfigFile) -> Result<Self> {
        let mut config = Self::default();

        if let Some(data_dir) = file.data_dir {
            config = config.with_data_dir(data_dir);
        }
        if let Some(data) = file.data {
            if let Some(v) = data.records_db {
                config.data.records_db = PathBuf::from(v);
            }
            if let Some(v) = data.announcements_dir {
                config.data.announcements_dir = PathBuf::from(v);
            }
            if let Some(v) = data.policies_dir {
                config.data.policies_dir = PathBuf::from(v);
            }
        }
        if let Some(llm) = file.llm {
            config.llm = Self::llm_from_file(llm);
        }
        if let Some(orch) = file.orchestrator {
            if let Some(v) = orch.max_cycles {
                config.orchestrator.max_cycles = v.max(1);
            }
            if let Some(v) = orch.tool_timeout_ms {
                config.orchestrator.tool_timeout = Duration::from_millis(v);
            }
            if let Some(v) = orch.query_timeout_ms {
                config.orchestrator.query_timeout = Duration::from_millis(v);
            }
            if let Some(v) = orch.max_parallel_tools {
                config.orchestrator.max_parallel_tools = v.max(1);
            }
        }
        if let Some(retrieval) = file.retrieval {
            if let Some(v) = retrieval.top_k {
                config.retrieval.top_k = v.max(1);
            }
            if let Some(v) = retrieval.min_score {
                config.retrieval.min_score = v.clamp(0.0, 1.0);
            }
            if let Some(v) = retrieval.dimensions {
                config.retrieval.dimensions = v.max(1);
            }
        }
        if let Some(access) = file.access {
            let default_level = access
                .default_level
                .as_deref()
                .map(str::parse::<AccessLevel>)
                .transpose()?
                .unwrap_or_default();
            let mut policy = AccessPolicy::new(default_level);
            for (session, level) in access.sessions {
                policy = policy.with_session(session, level.parse()?);
            }
            config.access = policy;
        }
        config.logging = file.logging;
        config.remote = file.remote;

        Ok(config)
    }

    fn llm_from_file(llm: ConfigFileLlm) -> LlmConfig {
        let provider = llm
            .provider
            .as_deref()
            .map(LlmProvider::parse)
            .unwrap_or_default();
        let mut config = LlmConfig::for_provider(provider);

        if let Some(v) = llm.model {
            config.model = v;
        }
        if let Some(v) = llm.api_key.as_deref().and_then(resolve_env_reference) {
            config.api_key = Some(SecretString::from(v));
        }
        if let Some(v) = llm.base_url {
            config.base_url = v;
        }
        if let Some(v) = llm.timeout_ms {
            config.timeout_ms = v;
        }
        if let Some(v) = llm.connect_timeout_ms {
            config.connect_timeout_ms = v;
        }
        if let Some(v) = llm.max_tokens {
            config.max_tokens = v;
        }
        if let Some(v) = llm.temperature {
            config.temperature = v;
        }
        if let Some(v) = llm.max_retries {
            config.max_retries = v;
        }
        if let Some(v) = llm.retry_backoff_ms {
            config.retry_backoff_ms = v;
        }
        if let Some(v) = llm.breaker_failure_threshold {
            config.breaker_failure_threshold = v.max(1);
        }
        if let Some(v) = llm.breaker_reset_ms {
            config.breaker_reset_ms = v;
        }
        config
    }

    /// Applies `RAGMCP_*` environment variable overrides.
    ///
    /// Unparseable values are ignored with a warning.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("RAGMCP_LLM_PROVIDER") {
            let provider = LlmProvider::parse(&v);
            if provider != self.llm.provider {
                let previous = std::mem::replace(&mut self.llm, LlmConfig::for_provider(provider));
                self.llm.api_key = previous.api_key;
                self.llm.timeout_ms = previous.timeout_ms;
                self.llm.max_tokens = previous.max_tokens;
            }
        }
        if let Ok(v) = std::env::var("RAGMCP_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("RAGMCP_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = env_parse::<u64>("RAGMCP_LLM_TIMEOUT_MS") {
            self.llm.timeout_ms = v;
        }
        if let Some(v) = env_parse::<usize>("RAGMCP_MAX_CYCLES") {
            self.orchestrator.max_cycles = v.max(1);
        }
        if let Some(v) = env_parse::<u64>("RAGMCP_TOOL_TIMEOUT_MS") {
            self.orchestrator.tool_timeout = Duration::from_millis(v);
        }
        if let Some(v) = env_parse::<u64>("RAGMCP_QUERY_TIMEOUT_MS") {
            self.orchestrator.query_timeout = Duration::from_millis(v);
        }
        if let Ok(v) = std::env::var("RAGMCP_DATA_DIR") {
            self = self.with_data_dir(v);
        }
        if let Some(level) = env_parse::<AccessLevel>("RAGMCP_ACCESS_LEVEL") {
            self.access = self.access.with_default_level(level);
        }
        self
    }

    /// Sets the data directory and re-derives the data file locations.
    #[must_use]
    pub fn with_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = path.into();
        self.data = DataConfig::under(&self.data_dir);
        self
    }
}

/// Expands a `${VAR}` reference; plain values pass through.
fn resolve_env_reference(value: &str) -> Option<String> {
    let trimmed = value.trim();
    match trimmed.strip_prefix("${").and_then(|v| v.strip_suffix('}')) {
        Some(var) => std::env::var(var).ok().filter(|v| !v.is_empty()),
        None if trimmed.is_empty() => None,
        None => Some(trimmed.to_string()),
    }
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    let raw = std::env::var(var).ok()?;
    let parsed = raw.trim().parse().ok();
    if parsed.is_none() {
        tracing::warn!(var = var, value = %raw, "Ignoring unparseable environment override");
    }
    parsed
}
