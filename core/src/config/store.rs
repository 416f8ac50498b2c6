//! Configuration Store
//!
//! Handles loading/saving the TOML config file and layering environment
//! overrides on top of it.

use super::aws::AwsSettings;
use crate::error::{AgentError, Result};
use crate::mcp::McpServerConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const HOST_VAR: &str = "DELEGATED_AGENT_HOST";
pub const PORT_VAR: &str = "DELEGATED_AGENT_PORT";
pub const BOT_MODEL_VAR: &str = "DELEGATED_AGENT_BOT_MODEL";
pub const DELEGATE_MODEL_VAR: &str = "DELEGATED_AGENT_DELEGATE_MODEL";

/// Unified configuration
///
/// Combines runner, bot, delegate agent and tool settings into a single file.
/// AWS credentials are never part of the file; they come from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Config file format version
    #[serde(default = "default_version")]
    pub version: String,

    /// HTTP runner settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Front conversation settings
    #[serde(default)]
    pub bot: BotConfig,

    /// Delegate agent settings
    #[serde(default)]
    pub delegate: DelegateConfig,

    /// Weather tool settings
    #[serde(default)]
    pub weather: WeatherConfig,

    #[serde(skip)]
    pub aws: AwsSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            server: ServerConfig::default(),
            bot: BotConfig::default(),
            delegate: DelegateConfig::default(),
            weather: WeatherConfig::default(),
            aws: AwsSettings::default(),
        }
    }
}

impl Config {
    /// Load the config file (if any), then apply environment overrides
    pub fn load() -> Result<Self> {
        let mut config = match super::find_config_file() {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading configuration file");
                Self::load_from(&path)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from file
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&content).map_err(|e| AgentError::InvalidConfig {
            message: format!("{}: {}", path.as_ref().display(), e),
        })
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| AgentError::InvalidConfig {
            message: e.to_string(),
        })?;
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> Option<PathBuf> {
        super::get_config_dir().map(|d| d.join("config.toml"))
    }

    /// Apply environment overrides and read AWS settings through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(host) = non_empty(HOST_VAR) {
            self.server.host = host;
        }
        if let Some(port) = non_empty(PORT_VAR) {
            self.server.port = port.trim().parse().map_err(|_| AgentError::InvalidConfig {
                message: format!("{} must be a port number, got '{}'", PORT_VAR, port),
            })?;
        }
        if let Some(model) = non_empty(BOT_MODEL_VAR) {
            self.bot.model_id = model;
        }
        if let Some(model) = non_empty(DELEGATE_MODEL_VAR) {
            self.delegate.model_id = model;
        }

        self.aws = AwsSettings::from_lookup(&lookup);
        Ok(())
    }
}

/// HTTP runner settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Public proxy host name (no protocol) used when advertising socket URLs
    #[serde(default)]
    pub proxy: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            proxy: None,
        }
    }
}

/// Front conversation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default = "default_bot_model")]
    pub model_id: String,

    #[serde(default = "default_system_instruction")]
    pub system_instruction: String,

    /// First user turn seeded into every conversation
    #[serde(default = "default_greeting")]
    pub greeting: String,

    /// Upper bound on tool round trips within one assistant turn
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,

    #[serde(default = "default_bot_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Seconds a session may go without a socket before it is closed
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            model_id: default_bot_model(),
            system_instruction: default_system_instruction(),
            greeting: default_greeting(),
            max_tool_rounds: default_max_tool_rounds(),
            max_tokens: default_bot_max_tokens(),
            temperature: default_temperature(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

/// Delegate agent settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegateConfig {
    #[serde(default = "default_delegate_model")]
    pub model_id: String,

    #[serde(default)]
    pub system_prompt: Option<String>,

    /// Maximum model calls per query
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    #[serde(default = "default_delegate_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Per-request timeout for MCP servers
    #[serde(default = "default_mcp_timeout")]
    pub mcp_timeout_secs: u64,

    #[serde(default = "default_mcp_servers")]
    pub mcp_servers: Vec<McpServerConfig>,
}

impl Default for DelegateConfig {
    fn default() -> Self {
        Self {
            model_id: default_delegate_model(),
            system_prompt: None,
            max_iterations: default_max_iterations(),
            max_tokens: default_delegate_max_tokens(),
            temperature: default_temperature(),
            mcp_timeout_secs: default_mcp_timeout(),
            mcp_servers: default_mcp_servers(),
        }
    }
}

/// Weather tool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    #[serde(default = "default_weather_url")]
    pub base_url: String,

    #[serde(default = "default_weather_timeout")]
    pub timeout_secs: u64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            base_url: default_weather_url(),
            timeout_secs: default_weather_timeout(),
        }
    }
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    7860
}

fn default_bot_model() -> String {
    "amazon.nova-pro-v1:0".to_string()
}

fn default_system_instruction() -> String {
    String::from(
        "You are a helpful health assistant designed to provide general health information. \
        When users ask about location-based information or weather conditions, use the handle_query \
        function to delegate the request to an agent that has access to location and weather tools. \
        Keep your responses short, generally two or three sentences. \
        Remember that you are providing general information only, not medical advice.",
    )
}

fn default_greeting() -> String {
    "Hello, I'm interested in health information.".to_string()
}

fn default_max_tool_rounds() -> usize {
    5
}

fn default_bot_max_tokens() -> u32 {
    1024
}

fn default_temperature() -> f32 {
    0.7
}

fn default_idle_timeout() -> u64 {
    30
}

fn default_delegate_model() -> String {
    "amazon.nova-lite-v1:0".to_string()
}

fn default_max_iterations() -> usize {
    10
}

fn default_delegate_max_tokens() -> u32 {
    2048
}

fn default_mcp_timeout() -> u64 {
    60
}

fn default_mcp_servers() -> Vec<McpServerConfig> {
    let mut env = BTreeMap::new();
    env.insert("FASTMCP_LOG_LEVEL".to_string(), "ERROR".to_string());
    vec![McpServerConfig {
        name: "aws-location".to_string(),
        command: "uvx".to_string(),
        args: vec!["awslabs.aws-location-mcp-server@latest".to_string()],
        env,
        inherit_aws_env: true,
    }]
}

fn default_weather_url() -> String {
    "https://api.open-meteo.com/v1/forecast".to_string()
}

fn default_weather_timeout() -> u64 {
    15
}
