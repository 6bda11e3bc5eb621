use crate::core::LLMError;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

include!(concat!(env!("OUT_DIR"), "/config_embedded.rs"));

const ENV_PREFIX: &str = "RELAY";
const PROJECT_ROOT_PLACEHOLDER: &str = "{{PROJECT_ROOT}}";

#[derive(Debug, Deserialize, Clone)]
pub struct OpenAIConfig {
    pub base_url: String,
    pub default_model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    pub timeout_secs: u64,
    pub max_results: usize,
    pub brave_base_url: String,
    pub duckduckgo_base_url: String,
    pub max_body_bytes: usize,
    #[serde(default)]
    pub brave_api_key: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub max_body_bytes: usize,
    pub max_length: usize,
    pub min_candidate_chars: usize,
    pub min_content_chars: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilesystemConfig {
    pub root: PathBuf,
}

/// Launch description of one out-of-process tool server.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct RpcServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Per-request wait for an answer; 30 seconds when unset
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

impl RpcServerConfig {
    /// Replaces every `{{PROJECT_ROOT}}` placeholder with `root`.
    #[must_use]
    pub fn with_project_root(mut self, root: &Path) -> Self {
        let root = root.to_string_lossy();
        let replace = |s: &str| s.replace(PROJECT_ROOT_PLACEHOLDER, &root);

        self.command = replace(&self.command);
        self.args = self.args.iter().map(|a| replace(a)).collect();
        self.env = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), replace(v)))
            .collect();
        self.cwd = self
            .cwd
            .map(|cwd| PathBuf::from(replace(&cwd.to_string_lossy())));
        self
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ToolBackend {
    /// Tools run in-process.
    #[value(name = "direct")]
    Direct,
    /// Tools run in external processes reached over the RPC channel.
    #[value(name = "rpc")]
    Rpc,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub enable_tools: bool,
    pub tool_backend: ToolBackend,
    pub listen: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    pub openai: OpenAIConfig,
    pub search: SearchConfig,
    pub fetch: FetchConfig,
    pub filesystem: FilesystemConfig,
    #[serde(default)]
    pub rpc_servers: Vec<RpcServerConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_sources(None, false).expect("Invalid default config")
    }
}

impl Config {
    /// Loads the embedded defaults, then `path` (or `config.toml` when it
    /// exists), then `RELAY_*` variables, then the legacy environment toggles.
    pub fn load(path: Option<&Path>) -> Result<Self, LLMError> {
        let mut config = Self::from_sources(path, true)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// With `layered` unset only the embedded defaults are read.
    fn from_sources(path: Option<&Path>, layered: bool) -> Result<Self, LLMError> {
        let mut builder = config::Config::builder().add_source(config::File::from_str(
            DEFAULT_CONFIG,
            config::FileFormat::Toml,
        ));

        if layered {
            builder = match path {
                Some(path) => builder.add_source(config::File::from(path).required(true)),
                None => builder.add_source(config::File::with_name("config.toml").required(false)),
            };
            builder = builder.add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        builder
            .build()
            .and_then(config::Config::try_deserialize)
            .map_err(|e| LLMError::ConfigError(format!("Failed to load config: {e}")))
    }

    /// Applies the variable names the hosting environment already uses.
    pub fn apply_env_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = var("OPENAI_API_KEY").filter(|k| !k.is_empty()) {
            self.api_key = Some(key);
        }
        if let Some(base_url) = var("OPENAI_API_BASE_URL") {
            let base_url = base_url.trim().trim_end_matches('/');
            if !base_url.is_empty() {
                self.openai.base_url = base_url.to_string();
            }
        }
        if let Some(model) = var("OPENAI_API_MODEL").filter(|m| !m.is_empty()) {
            self.openai.default_model = model;
        }
        if let Some(temperature) = var("OPENAI_API_TEMPERATURE").and_then(|t| t.parse().ok()) {
            self.openai.temperature = temperature;
        }
        if let Some(enable) = var("ENABLE_MCP") {
            self.enable_tools = enable == "true";
        }
        match var("TOOL_BACKEND").as_deref() {
            Some("direct") => self.tool_backend = ToolBackend::Direct,
            Some("rpc") => self.tool_backend = ToolBackend::Rpc,
            _ => {}
        }
        if let Some(key) = var("BRAVE_SEARCH_API_KEY").filter(|k| !k.is_empty()) {
            self.search.brave_api_key = Some(key);
        }
        if let Some(root) = var("MCP_FS_BASE_PATH").filter(|r| !r.is_empty()) {
            self.filesystem.root = PathBuf::from(root);
        }
    }

    pub fn get_model(&self) -> &str {
        &self.openai.default_model
    }

    /// The chat completions URL derived from the configured base URL.
    pub fn completions_url(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.openai.base_url.trim_end_matches('/')
        )
    }

    /// RPC server launch descriptions with placeholders resolved against `root`.
    pub fn resolved_rpc_servers(&self, root: &Path) -> Vec<RpcServerConfig> {
        self.rpc_servers
            .iter()
            .cloned()
            .map(|server| server.with_project_root(root))
            .collect()
    }
}
