//! Configuration management for autoloop
//!
//! Every tunable the loop uses lives in one immutable [`Config`], built once at
//! startup and passed by reference into each component.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod paths;

pub use paths::{config_path, data_dir, local_config_path, resolve_config_path};

/// Errors in configuration handling
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("CONFIG IO ERROR: {0}")]
    Io(#[from] std::io::Error),

    #[error("CONFIG PARSE FAILED: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CONFIG NOT FOUND: {0}")]
    NotFound(PathBuf),

    #[error("MISSING CREDENTIAL: environment variable {0} is not set")]
    MissingCredential(String),

    #[error("INVALID CONFIG: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Instructions document settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstructionsConfig {
    #[serde(default = "default_instructions_path")]
    pub path: String,
    #[serde(default = "default_fallback_path")]
    pub fallback_path: Option<String>,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
}

impl Default for InstructionsConfig {
    fn default() -> Self {
        Self {
            path: default_instructions_path(),
            fallback_path: default_fallback_path(),
            max_bytes: default_max_bytes(),
        }
    }
}

fn default_instructions_path() -> String {
    "AGENTS.md".to_string()
}

fn default_fallback_path() -> Option<String> {
    Some("copilot-instructions.md".to_string())
}

fn default_max_bytes() -> u64 {
    256 * 1024
}

/// Workspace inventory settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default = "default_root")]
    pub root: String,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            max_files: default_max_files(),
        }
    }
}

fn default_root() -> String {
    ".".to_string()
}

fn default_max_files() -> usize {
    80
}

/// Which inference API the candidates are served from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Gemini,
    /// Any OpenAI-compatible `/chat/completions` endpoint (OpenAI, OpenRouter, vLLM)
    OpenAi,
}

/// Model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub provider: ProviderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Tried in order, cheapest first
    #[serde(default = "default_candidates")]
    pub candidates: Vec<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            api_base: None,
            api_key_env: default_api_key_env(),
            candidates: default_candidates(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

fn default_candidates() -> Vec<String> {
    vec![
        "gemini-1.5-flash-8b".to_string(),
        "gemini-1.5-flash".to_string(),
        "gemini-1.5-pro".to_string(),
    ]
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_temperature() -> f32 {
    0.7
}

/// Retry policy for a single model candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries_per_model: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
    #[serde(default = "default_transient_delay_ms")]
    pub transient_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries_per_model: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
            transient_delay_ms: default_transient_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// Zero delays everywhere. Handy for tests and dry runs.
    pub fn immediate(max_retries_per_model: u32) -> Self {
        Self {
            max_retries_per_model,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter_ms: 0,
            transient_delay_ms: 0,
        }
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn jitter(&self) -> Duration {
        Duration::from_millis(self.jitter_ms)
    }

    pub fn transient_delay(&self) -> Duration {
        Duration::from_millis(self.transient_delay_ms)
    }
}

fn default_max_retries() -> u32 {
    6
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter_ms() -> u64 {
    500
}

fn default_transient_delay_ms() -> u64 {
    1_500
}

/// Loop controller settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_max_cycles")]
    pub max_cycles: u32,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    #[serde(default = "default_observation_max_chars")]
    pub observation_max_chars: usize,
    /// `None` disables the timeout
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: Option<u64>,
    /// Shell program and leading arguments; the command string is appended.
    /// `None` picks the host shell.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<Vec<String>>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_cycles: default_max_cycles(),
            cooldown_ms: default_cooldown_ms(),
            observation_max_chars: default_observation_max_chars(),
            command_timeout_secs: default_command_timeout_secs(),
            shell: None,
        }
    }
}

impl RunConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }
}

fn default_max_cycles() -> u32 {
    30
}

fn default_cooldown_ms() -> u64 {
    10_000
}

fn default_observation_max_chars() -> usize {
    1_500
}

fn default_command_timeout_secs() -> Option<u64> {
    Some(600)
}

/// Command denylist
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    #[serde(default = "default_denylist")]
    pub denylist: Vec<String>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            denylist: default_denylist(),
        }
    }
}

fn default_denylist() -> Vec<String> {
    [
        "shutdown",
        "reboot",
        "format",
        "mkfs",
        "diskpart",
        "bcdedit",
        "del /s",
        "rd /s",
        "cipher /w",
        "remove-item -recurse -force c:\\",
        "rm -rf /",
        "dd if=",
        "shred",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub instructions: InstructionsConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
}

impl Config {
    /// Load using the standard resolution order, falling back to defaults
    pub async fn load() -> Result<Self> {
        match resolve_config_path(None) {
            Some(path) => Self::load_from(&path).await,
            None => {
                info!("◆ NO CONFIG FILE FOUND, USING DEFAULTS");
                Ok(Config::default())
            }
        }
    }

    /// Load from a specific location. Missing file yields defaults.
    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("◆ NO CONFIG FOUND AT {:?}, USING DEFAULTS", path);
            return Ok(Config::default());
        }

        debug!("◆ READING CONFIG FROM {:?}", path);
        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a location that must exist
    pub async fn load_required(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        Self::load_from(path).await
    }

    /// Save to specific location
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        debug!("◆ WRITING CONFIG TO {:?}", path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Reject values the loop cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.model.candidates.is_empty() {
            return Err(ConfigError::Invalid(
                "model.candidates must name at least one model".to_string(),
            ));
        }
        if self.run.max_cycles == 0 {
            return Err(ConfigError::Invalid(
                "run.max_cycles must be at least 1".to_string(),
            ));
        }
        if self.retry.max_retries_per_model == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_retries_per_model must be at least 1".to_string(),
            ));
        }
        if matches!(&self.run.shell, Some(shell) if shell.is_empty()) {
            return Err(ConfigError::Invalid(
                "run.shell must name a program when set".to_string(),
            ));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            warn!(
                "◆ retry.max_delay_ms ({}) is below base_delay_ms ({}); backoff is capped immediately",
                self.retry.max_delay_ms, self.retry.base_delay_ms
            );
        }
        Ok(())
    }

    /// Workspace root, with `~` expanded
    pub fn workspace_root(&self) -> PathBuf {
        expand_home(&self.workspace.root)
    }

    /// Instructions path, relative paths resolved against the workspace root
    pub fn instructions_path(&self) -> PathBuf {
        self.resolve_in_workspace(&self.instructions.path)
    }

    /// Fallback instructions path, if configured
    pub fn fallback_path(&self) -> Option<PathBuf> {
        self.instructions
            .fallback_path
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(|p| self.resolve_in_workspace(p))
    }

    fn resolve_in_workspace(&self, path: &str) -> PathBuf {
        let expanded = expand_home(path);
        if expanded.is_absolute() {
            expanded
        } else {
            self.workspace_root().join(expanded)
        }
    }

    /// Read the model credential from the environment
    pub fn api_key(&self) -> Result<String> {
        match std::env::var(&self.model.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
            _ => Err(ConfigError::MissingCredential(
                self.model.api_key_env.clone(),
            )),
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

/// Write a default config file
pub async fn init(path: &Path, force: bool) -> Result<Config> {
    if path.exists() && !force {
        warn!("◆ CONFIG ALREADY EXISTS AT {:?}", path);
        return Config::load_from(path).await;
    }

    let config = Config::default();
    config.save_to(path).await?;
    info!("◆ CONFIG WRITTEN TO {:?}", path);
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.instructions.path, "AGENTS.md");
        assert_eq!(
            config.instructions.fallback_path.as_deref(),
            Some("copilot-instructions.md")
        );
        assert_eq!(config.instructions.max_bytes, 262_144);
        assert_eq!(config.workspace.max_files, 80);
        assert_eq!(config.model.provider, ProviderKind::Gemini);
        assert_eq!(config.model.candidates.len(), 3);
        assert_eq!(config.model.candidates[0], "gemini-1.5-flash-8b");
        assert_eq!(config.retry.max_retries_per_model, 6);
        assert_eq!(config.retry.max_delay(), Duration::from_secs(30));
        assert_eq!(config.run.max_cycles, 30);
        assert_eq!(config.run.cooldown(), Duration::from_secs(10));
        assert_eq!(config.run.observation_max_chars, 1500);
        assert_eq!(config.run.command_timeout(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: Config = serde_json::from_str(r#"{"run": {"max_cycles": 3}}"#).unwrap();
        assert_eq!(config.run.max_cycles, 3);
        assert_eq!(config.run.observation_max_chars, 1500);
        assert_eq!(config.workspace.max_files, 80);
    }

    #[test]
    fn test_provider_kind_serialization() {
        let json = serde_json::to_string(&ProviderKind::OpenAi).unwrap();
        assert_eq!(json, "\"openai\"");
        let kind: ProviderKind = serde_json::from_str("\"gemini\"").unwrap();
        assert_eq!(kind, ProviderKind::Gemini);
    }

    #[test]
    fn test_null_timeout_disables_it() {
        let config: Config =
            serde_json::from_str(r#"{"run": {"command_timeout_secs": null}}"#).unwrap();
        assert_eq!(config.run.command_timeout(), None);
    }

    #[test]
    fn test_validate_rejects_empty_candidates() {
        let mut config = Config::default();
        config.model.candidates.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_zero_cycles() {
        let mut config = Config::default();
        config.run.max_cycles = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_relative_instructions_resolve_against_workspace() {
        let mut config = Config::default();
        config.workspace.root = "/srv/project".to_string();
        assert_eq!(
            config.instructions_path(),
            PathBuf::from("/srv/project/AGENTS.md")
        );
        assert_eq!(
            config.fallback_path(),
            Some(PathBuf::from("/srv/project/copilot-instructions.md"))
        );
    }

    #[test]
    fn test_empty_fallback_is_none() {
        let mut config = Config::default();
        config.instructions.fallback_path = Some(String::new());
        assert!(config.fallback_path().is_none());
    }

    #[test]
    fn test_immediate_retry_has_no_delays() {
        let retry = RetryConfig::immediate(2);
        assert_eq!(retry.max_retries_per_model, 2);
        assert_eq!(retry.base_delay(), Duration::ZERO);
        assert_eq!(retry.transient_delay(), Duration::ZERO);
        assert_eq!(retry.jitter(), Duration::ZERO);
    }
}
