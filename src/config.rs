use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::Error;

/// Aliases served by `/v1/models` when the config file does not list its own.
pub static DEFAULT_MODEL_MAPPING: Lazy<BTreeMap<String, String>> = Lazy::new(|| {
    [
        ("ddg/gpt-4o-mini", "gpt-4o-mini"),
        ("ddg/claude-3-haiku", "claude-3-haiku-20240307"),
        ("ddg/mixtral-8x7b", "mistralai/Mixtral-8x7B-Instruct-v0.1"),
        (
            "ddg/meta-Llama-3-1-70B-Instruct-Turbo",
            "meta-llama/Meta-Llama-3.1-70B-Instruct-Turbo",
        ),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
});

/// Browser user agents rotated through when `user_agent` is left empty.
pub static DEFAULT_USER_AGENTS: Lazy<Vec<String>> = Lazy::new(|| {
    [
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Edge/120.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    ]
    .into_iter()
    .map(String::from)
    .collect()
});

/// Service configuration loaded from a TOML file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u32,

    #[serde(default = "default_host")]
    pub host: String,

    /// Fixed user agent for upstream calls. Empty means "pick from `user_agents`".
    #[serde(default)]
    pub user_agent: String,

    #[serde(default = "default_user_agents")]
    pub user_agents: Vec<String>,

    /// Bearer token allow-list. Empty disables inbound auth.
    #[serde(default)]
    pub tokens: Vec<String>,

    #[serde(default = "default_api_url")]
    pub ddg_chat_api_url: String,

    /// Client-facing model alias -> upstream model name.
    #[serde(default = "default_model_mapping")]
    pub model_mapping: BTreeMap<String, String>,

    /// Deadline for one completion, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_port() -> u32 {
    8787
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_user_agents() -> Vec<String> {
    DEFAULT_USER_AGENTS.clone()
}

fn default_api_url() -> String {
    "https://duckduckgo.com".to_string()
}

fn default_model_mapping() -> BTreeMap<String, String> {
    DEFAULT_MODEL_MAPPING.clone()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            user_agent: String::new(),
            user_agents: default_user_agents(),
            tokens: Vec::new(),
            ddg_chat_api_url: default_api_url(),
            model_mapping: default_model_mapping(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Config {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            anyhow::bail!("config file does not exist: {}", path.display());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to load config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).with_context(|| "Failed to decode config TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !(1..=65535).contains(&self.port) {
            return Err(Error::Config(format!("invalid port: {}", self.port)));
        }

        let host_ok = !self.host.is_empty()
            && self
                .host
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
        if !host_ok {
            return Err(Error::Config(format!("invalid host: {}", self.host)));
        }

        if self.ddg_chat_api_url.trim().is_empty() {
            return Err(Error::Config("DDG Chat API URL is required".into()));
        }

        if self.user_agent.is_empty() && self.user_agents.is_empty() {
            return Err(Error::Config(
                "either user_agent or a non-empty user_agents pool is required".into(),
            ));
        }

        if self.timeout_secs == 0 {
            return Err(Error::Config("timeout_secs must be positive".into()));
        }

        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Upstream base URL without a trailing slash.
    pub fn api_base(&self) -> String {
        self.ddg_chat_api_url.trim_end_matches('/').to_string()
    }

    pub fn user_agent_policy(&self) -> UserAgentPolicy {
        if self.user_agent.is_empty() {
            UserAgentPolicy::Rotate(self.user_agents.clone())
        } else {
            UserAgentPolicy::Fixed(self.user_agent.clone())
        }
    }
}

/// How the user-agent header is chosen for each upstream attempt.
#[derive(Debug, Clone)]
pub enum UserAgentPolicy {
    Fixed(String),
    Rotate(Vec<String>),
}

impl UserAgentPolicy {
    pub fn pick(&self) -> String {
        match self {
            UserAgentPolicy::Fixed(ua) => ua.clone(),
            UserAgentPolicy::Rotate(pool) => pool
                .choose(&mut rand::thread_rng())
                .cloned()
                .unwrap_or_else(|| DEFAULT_USER_AGENTS[0].clone()),
        }
    }
}
