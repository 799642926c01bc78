use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{TapClawError, TapClawResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    pub active_provider: String,
    pub providers: HashMap<String, ProviderEntry>,
    /// Role-to-model mapping. If a role is absent, falls back to active_provider defaults.
    #[serde(default)]
    pub roles: RolesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub display_name: String,
    /// Full chat-completions endpoint (OpenAI-compatible).
    pub api_base: String,
    /// Default model for this provider (used as fallback when no role config exists).
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Optional API key stored in config.toml (falls back to env var TAPCLAW_<ID>_API_KEY).
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RolesConfig {
    /// Tool-calling model that picks the next device action.
    pub planner: Option<RoleEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleEntry {
    /// Must match a key under [llm.providers.*].
    pub provider: String,
    /// Model name sent to the API.
    pub model: String,
    /// Use SSE streaming.
    #[serde(default)]
    pub stream: bool,
    /// Overrides the provider-level temperature for this role.
    pub temperature: Option<f64>,
}

fn default_temperature() -> f64 {
    0.1
}

/// Bounds and pacing of one agent session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Pause after a successful click/type/scroll/back before the next capture.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Pause after a successful app launch.
    #[serde(default = "default_app_launch_delay_ms")]
    pub app_launch_delay_ms: u64,
    #[serde(default = "default_planner_timeout_secs")]
    pub planner_timeout_secs: u64,
    #[serde(default = "default_action_timeout_secs")]
    pub action_timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Replaces the built-in system prompt when set.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            settle_delay_ms: default_settle_delay_ms(),
            app_launch_delay_ms: default_app_launch_delay_ms(),
            planner_timeout_secs: default_planner_timeout_secs(),
            action_timeout_secs: default_action_timeout_secs(),
            max_tokens: default_max_tokens(),
            system_prompt: None,
        }
    }
}

fn default_max_iterations() -> u32 {
    100
}

fn default_settle_delay_ms() -> u64 {
    500
}

fn default_app_launch_delay_ms() -> u64 {
    2000
}

fn default_planner_timeout_secs() -> u64 {
    120
}

fn default_action_timeout_secs() -> u64 {
    10
}

fn default_max_tokens() -> u32 {
    1600
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionConfig {
    /// Directory for `session_<id>.jsonl` files. Defaults to the platform data dir.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

impl AppConfig {
    /// API key for a provider: env var `TAPCLAW_<ID>_API_KEY`, then config.toml.
    pub fn api_key_for(&self, provider_id: &str) -> String {
        std::env::var(format!("TAPCLAW_{}_API_KEY", provider_id.to_uppercase()))
            .ok()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| {
                self.llm
                    .providers
                    .get(provider_id)
                    .and_then(|p| p.api_key.clone())
            })
            .unwrap_or_default()
    }
}

fn resolve_config_path() -> TapClawResult<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    Err(TapClawError::Config(
        "config.toml not found next to executable or in working directory".into(),
    ))
}

pub fn load_config() -> TapClawResult<AppConfig> {
    let path = resolve_config_path()?;
    load_config_from(&path)
}

pub fn load_config_from(path: &Path) -> TapClawResult<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), provider = %config.llm.active_provider, "config loaded");
    Ok(config)
}

pub fn save_config(config: &AppConfig) -> TapClawResult<()> {
    let path = resolve_config_path()?;
    save_config_to(config, &path)
}

pub fn save_config_to(config: &AppConfig, path: &Path) -> TapClawResult<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}
