use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration loaded from `~/.runwarden/config.toml`
/// (or the path in `RUNWARDEN_CONFIG`).
///
/// **Security**: This struct never stores API keys. Provider sections only
/// name the env var a key is read from; see [`CredentialProvider`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    /// Per-model price overrides applied on top of the adapters' catalogs.
    #[serde(default)]
    pub pricing: Vec<PricingOverride>,
}

impl Config {
    /// Load config from `RUNWARDEN_CONFIG` or `~/.runwarden/config.toml`,
    /// falling back to defaults when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            let cfg = Config::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let cfg: Config = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Semantic validation for settings that are not fully expressible via type checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.general.log_format.as_str(), "human" | "json") {
            return Err(ConfigError::Validation(format!(
                "general.log_format must be \"human\" or \"json\", got {:?}",
                self.general.log_format
            )));
        }
        if self.orchestrator.max_concurrent_runs == 0 {
            return Err(ConfigError::Validation(
                "orchestrator.max_concurrent_runs must be at least 1".into(),
            ));
        }
        if self.orchestrator.default_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "orchestrator.default_timeout_secs must be at least 1".into(),
            ));
        }
        if self.orchestrator.budget_window_days == 0 {
            return Err(ConfigError::Validation(
                "orchestrator.budget_window_days must be at least 1".into(),
            ));
        }
        if self.storage.backend == StorageBackend::Sqlite && self.storage.path.is_none() {
            return Err(ConfigError::Validation(
                "storage.path is required when storage.backend = \"sqlite\"".into(),
            ));
        }
        for p in &self.pricing {
            if p.input_per_1k < 0.0 || p.output_per_1k < 0.0 {
                return Err(ConfigError::Validation(format!(
                    "pricing for {} has a negative rate",
                    p.model
                )));
            }
        }
        Ok(())
    }

    fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var("RUNWARDEN_CONFIG") {
            return PathBuf::from(path);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".runwarden")
            .join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// `"human"` or `"json"`.
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "human".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_daemon_host")]
    pub host: String,
    #[serde(default = "default_daemon_port")]
    pub port: u16,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            host: default_daemon_host(),
            port: default_daemon_port(),
        }
    }
}

fn default_daemon_host() -> String {
    "127.0.0.1".into()
}
fn default_daemon_port() -> u16 {
    9470
}

/// Whether a failed price lookup blocks run creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetMode {
    /// A failed ledger lookup is logged and the run proceeds.
    #[default]
    Advisory,
    /// A failed ledger lookup rejects the run with `BudgetUnavailable`.
    Strict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    #[serde(default)]
    pub budget_mode: BudgetMode,
    #[serde(default = "default_budget_window_days")]
    pub budget_window_days: u32,
    /// Simulated latency of the default briefing loader.
    #[serde(default = "default_briefing_delay_ms")]
    pub briefing_delay_ms: u64,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: default_max_concurrent_runs(),
            default_timeout_secs: default_timeout_secs(),
            budget_mode: BudgetMode::default(),
            budget_window_days: default_budget_window_days(),
            briefing_delay_ms: default_briefing_delay_ms(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

fn default_max_concurrent_runs() -> usize {
    16
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_budget_window_days() -> u32 {
    30
}
fn default_briefing_delay_ms() -> u64 {
    50
}
fn default_shutdown_grace_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Database file for the sqlite backend.
    #[serde(default)]
    pub path: Option<String>,
}

/// Connection settings for one provider backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Override of the backend's public endpoint.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Name of the env var holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl ProviderSettings {
    fn with_env(env: &str) -> Self {
        Self {
            enabled: true,
            base_url: None,
            api_key_env: Some(env.into()),
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default = "default_openai")]
    pub openai: ProviderSettings,
    #[serde(default = "default_anthropic")]
    pub anthropic: ProviderSettings,
    #[serde(default = "default_gemini")]
    pub gemini: ProviderSettings,
    #[serde(default = "default_ollama")]
    pub ollama: ProviderSettings,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            openai: default_openai(),
            anthropic: default_anthropic(),
            gemini: default_gemini(),
            ollama: default_ollama(),
        }
    }
}

impl ProvidersConfig {
    /// `(registry name, settings)` pairs in registration order.
    pub fn entries(&self) -> [(&'static str, &ProviderSettings); 4] {
        [
            ("openai", &self.openai),
            ("anthropic", &self.anthropic),
            ("gemini", &self.gemini),
            ("ollama", &self.ollama),
        ]
    }
}

fn default_openai() -> ProviderSettings {
    ProviderSettings::with_env("OPENAI_API_KEY")
}
fn default_anthropic() -> ProviderSettings {
    ProviderSettings::with_env("ANTHROPIC_API_KEY")
}
fn default_gemini() -> ProviderSettings {
    ProviderSettings::with_env("GEMINI_API_KEY")
}
fn default_ollama() -> ProviderSettings {
    ProviderSettings {
        enabled: true,
        base_url: Some("http://localhost:11434".into()),
        api_key_env: None,
    }
}

/// A `[[pricing]]` entry, USD per 1K tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingOverride {
    pub model: String,
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

// ---------------------------------------------------------------------------
// CredentialProvider
// ---------------------------------------------------------------------------

/// Resolves provider credentials from the environment at runtime.
pub struct CredentialProvider;

impl CredentialProvider {
    /// Read the key named by `settings.api_key_env`, ignoring blank values.
    pub fn api_key(settings: &ProviderSettings) -> Option<String> {
        let env = settings.api_key_env.as_deref()?;
        Self::from_env(env)
    }

    pub fn from_env(var: &str) -> Option<String> {
        std::env::var(var)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}
