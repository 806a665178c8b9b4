//! Configuration loading, validation, and management for SwarmClaw.
//!
//! Loads configuration from `~/.swarmclaw/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use swarmclaw_core::goal::ComplexityThresholds;

/// The root configuration structure.
///
/// Maps directly to `~/.swarmclaw/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Generative backend
    #[serde(default)]
    pub backend: BackendConfig,

    /// Tier 3 retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Context assembly limits
    #[serde(default)]
    pub context: ContextConfig,

    /// Recruitment-rule thresholds
    #[serde(default)]
    pub complexity: ComplexityConfig,

    /// Swarm-wide resource limits
    #[serde(default)]
    pub budget: BudgetConfig,

    #[serde(default)]
    pub pricing: PricingConfig,

    /// Which sub-types each strategy claims
    #[serde(default)]
    pub strategies: StrategyConfig,

    #[serde(default)]
    pub events: EventsConfig,

    /// Run-state checkpointing
    #[serde(default)]
    pub persistence: PersistenceConfig,

    #[serde(default)]
    pub authorization: AuthorizationConfig,
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_request_timeout() -> u64 {
    60
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

/// OpenAI-compatible backend settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Exponential backoff: `base_delay_ms * multiplier^(attempt-1)`, capped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay() -> u64 {
    200
}
fn default_max_delay() -> u64 {
    5000
}
fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            multiplier: default_multiplier(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Per-attempt timeout enforced by Tier 3
    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: u64,

    /// Concurrent subroutines per routine run
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Keep every attempt's result instead of only the last
    #[serde(default)]
    pub keep_attempt_history: bool,

    #[serde(default = "default_max_turns")]
    pub max_conversation_turns: u32,

    #[serde(default = "default_max_reasoning_steps")]
    pub max_reasoning_steps: u32,
}

fn default_step_timeout() -> u64 {
    120
}
fn default_max_concurrency() -> usize {
    4
}
fn default_max_turns() -> u32 {
    8
}
fn default_max_reasoning_steps() -> u32 {
    6
}

impl ExecutionConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            step_timeout_secs: default_step_timeout(),
            max_concurrency: default_max_concurrency(),
            keep_attempt_history: false,
            max_conversation_turns: default_max_turns(),
            max_reasoning_steps: default_max_reasoning_steps(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Token budget for the conversation history window
    #[serde(default = "default_history_tokens")]
    pub max_history_tokens: usize,

    /// Strings in the blackboard preview longer than this are truncated
    #[serde(default = "default_preview_chars")]
    pub max_preview_chars: usize,

    /// Directory holding `<role>.md` instruction templates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_dir: Option<PathBuf>,
}

fn default_history_tokens() -> usize {
    2048
}
fn default_preview_chars() -> usize {
    200
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_history_tokens: default_history_tokens(),
            max_preview_chars: default_preview_chars(),
            template_dir: None,
        }
    }
}

/// Thresholds that make a goal "complex". These are policy, so they live
/// here rather than in code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplexityConfig {
    #[serde(default = "default_min_domains")]
    pub min_domains: usize,

    #[serde(default = "default_max_duration_minutes")]
    pub max_duration_minutes: u32,

    #[serde(default = "default_max_goal_steps")]
    pub max_reasoning_steps: u32,

    /// Roles the recruitment rule applies to
    #[serde(default = "default_leadership_roles")]
    pub leadership_roles: Vec<String>,
}

fn default_min_domains() -> usize {
    2
}
fn default_max_duration_minutes() -> u32 {
    120
}
fn default_max_goal_steps() -> u32 {
    500
}
fn default_leadership_roles() -> Vec<String> {
    vec!["leader".into(), "coordinator".into(), "delegator".into()]
}

impl ComplexityConfig {
    pub fn thresholds(&self) -> ComplexityThresholds {
        ComplexityThresholds {
            min_domains: self.min_domains,
            max_duration_minutes: self.max_duration_minutes,
            max_reasoning_steps: self.max_reasoning_steps,
        }
    }
}

impl Default for ComplexityConfig {
    fn default() -> Self {
        Self {
            min_domains: default_min_domains(),
            max_duration_minutes: default_max_duration_minutes(),
            max_reasoning_steps: default_max_goal_steps(),
            leadership_roles: default_leadership_roles(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Credits a swarm may spend before it is ended (unset = unlimited)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_credits: Option<u64>,

    /// Wall-clock limit for a swarm (unset = unlimited)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_duration_secs: Option<u64>,

    /// How long `end_swarm` waits for in-flight routines to acknowledge cancellation
    #[serde(default = "default_cancel_grace")]
    pub cancel_grace_ms: u64,
}

fn default_cancel_grace() -> u64 {
    5000
}

impl BudgetConfig {
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_credits: None,
            max_duration_secs: None,
            cancel_grace_ms: default_cancel_grace(),
        }
    }
}

/// How resource usage converts to credits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    #[serde(default = "default_one")]
    pub credits_per_1k_tokens: u64,

    #[serde(default = "default_one")]
    pub credits_per_tool_call: u64,
}

fn default_one() -> u64 {
    1
}

impl PricingConfig {
    /// Credits for `tokens` backend tokens, rounded up.
    pub fn token_credits(&self, tokens: u64) -> u64 {
        tokens.saturating_mul(self.credits_per_1k_tokens).div_ceil(1000)
    }
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            credits_per_1k_tokens: 1,
            credits_per_tool_call: 1,
        }
    }
}

/// Sub-type prefixes each non-conversational strategy claims. The
/// conversational strategy handles whatever is left.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    #[serde(default = "default_deterministic_sub_types")]
    pub deterministic_sub_types: Vec<String>,

    #[serde(default = "default_reasoning_sub_types")]
    pub reasoning_sub_types: Vec<String>,
}

fn default_deterministic_sub_types() -> Vec<String> {
    vec!["deterministic".into()]
}
fn default_reasoning_sub_types() -> Vec<String> {
    vec!["reasoning".into()]
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            deterministic_sub_types: default_deterministic_sub_types(),
            reasoning_sub_types: default_reasoning_sub_types(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Buffer size of the broadcast tap
    #[serde(default = "default_event_capacity")]
    pub capacity: usize,
}

fn default_event_capacity() -> usize {
    256
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: default_event_capacity(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceBackend {
    #[default]
    Memory,
    File,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default)]
    pub backend: PersistenceBackend,

    /// Snapshot directory for the file backend (default `~/.swarmclaw/runs`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl PersistenceConfig {
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(|| EngineConfig::config_dir().join("runs"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    #[default]
    Allow,
    Deny,
}

/// One authorization rule. Unset fields and `*` match anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationRule {
    pub effect: Effect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
}

/// First matching rule wins; `default_effect` applies when none match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthorizationConfig {
    #[serde(default)]
    pub default_effect: Effect,

    #[serde(default)]
    pub rules: Vec<AuthorizationRule>,
}

impl EngineConfig {
    /// Load configuration from the default path (~/.swarmclaw/config.toml).
    ///
    /// Also checks environment variables:
    /// - `SWARMCLAW_API_KEY` (then `OPENAI_API_KEY`)
    /// - `SWARMCLAW_MODEL`
    /// - `SWARMCLAW_API_URL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup` (normally `std::env::var`).
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.backend.api_key.is_none() {
            self.backend.api_key =
                lookup("SWARMCLAW_API_KEY").or_else(|| lookup("OPENAI_API_KEY"));
        }
        if let Some(model) = lookup("SWARMCLAW_MODEL") {
            self.backend.model = model;
        }
        if let Some(url) = lookup("SWARMCLAW_API_URL") {
            self.backend.api_url = url;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".swarmclaw")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend.temperature < 0.0 || self.backend.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "backend.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".into(),
            ));
        }

        if self.retry.multiplier < 1.0 {
            return Err(ConfigError::ValidationError(
                "retry.multiplier must be >= 1.0".into(),
            ));
        }

        if self.execution.max_concurrency == 0 {
            return Err(ConfigError::ValidationError(
                "execution.max_concurrency must be at least 1".into(),
            ));
        }

        if self
            .complexity
            .leadership_roles
            .iter()
            .any(|r| r.trim().is_empty())
        {
            return Err(ConfigError::ValidationError(
                "complexity.leadership_roles must not contain empty names".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.backend.api_key.is_some()
    }

    /// Generate a default config TOML string (for the `config` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
