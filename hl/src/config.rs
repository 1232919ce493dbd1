//! healloop configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::cost::PriceTable;
use crate::r#loop::{ImprovementConfig, RetryConfig, ValidationConfig};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level used when --log-level is not given
    #[serde(rename = "log-level", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// LLM provider configuration
    pub llm: LlmConfig,

    /// Retry engine defaults
    pub retry: RetryConfig,

    /// Validation loop defaults
    pub validation: ValidationConfig,

    /// Improvement tracker defaults
    pub improvement: ImprovementConfig,

    /// Extra or overriding resource prices
    pub pricing: Vec<PriceEntry>,

    /// Event channel configuration
    pub events: EventsConfig,

    /// Storage configuration
    pub storage: StorageConfig,
}

impl Config {
    /// Check values that serde cannot
    pub fn validate(&self) -> Result<()> {
        self.retry.validate().context("invalid retry config")?;
        self.validation.validate().context("invalid validation config")?;
        self.improvement.validate().context("invalid improvement config")?;
        for entry in &self.pricing {
            if entry.resource.trim().is_empty() {
                return Err(eyre::eyre!("pricing entry with empty resource name"));
            }
            if !(entry.input_per_million >= 0.0 && entry.output_per_million >= 0.0) {
                return Err(eyre::eyre!("pricing for {} must be non-negative", entry.resource));
            }
        }
        if self.events.capacity == 0 {
            return Err(eyre::eyre!("events.capacity must be at least 1"));
        }
        Ok(())
    }

    /// Price table: built-in models overlaid with configured entries
    pub fn price_table(&self) -> PriceTable {
        PriceTable::from_entries(&self.pricing)
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .healloop.yml
        let local_config = PathBuf::from(".healloop.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/healloop/healloop.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("healloop").join("healloop.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is set up
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        Self::load(config_path).ok().and_then(|c| c.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name (currently only "anthropic" supported)
    pub provider: String,

    /// Model identifier; also the pricing resource id
    pub model: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Maximum tokens per response
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-5".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            max_tokens: 4096,
            timeout_ms: 120_000,
        }
    }
}

/// One configured resource price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceEntry {
    pub resource: String,

    /// USD per million input units
    #[serde(rename = "input-per-million")]
    pub input_per_million: f64,

    /// USD per million output units
    #[serde(rename = "output-per-million")]
    pub output_per_million: f64,
}

/// Event channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Bounded channel capacity; events beyond it are dropped
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: crate::events::DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding per-session JSONL logs
    #[serde(rename = "sessions-dir")]
    pub sessions_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        // Use XDG data directory (~/.local/share/healloop/sessions on Linux)
        let sessions_dir = dirs::data_dir()
            .map(|d| d.join("healloop").join("sessions"))
            .unwrap_or_else(|| PathBuf::from(".healloop/sessions"))
            .to_string_lossy()
            .into_owned();

        Self { sessions_dir }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::{Price, Pricing};
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.llm.provider, "anthropic");
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.improvement.max_cycles, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
llm:
  model: claude-opus-4-5
  api-key-env: MY_API_KEY

retry:
  max-attempts: 5
  pause-ms: 0

validation:
  max-attempts: 4
  max-unproductive-repairs: 1

improvement:
  target-success-rate: 0.8
  max-cost: 1.5

pricing:
  - resource: local-model
    input-per-million: 0.5
    output-per-million: 1.0

storage:
  sessions-dir: /tmp/sessions
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.llm.model, "claude-opus-4-5");
        assert_eq!(config.llm.api_key_env, "MY_API_KEY");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.validation.max_attempts, 4);
        assert_eq!(config.validation.max_unproductive_repairs, 1);
        assert_eq!(config.improvement.target_success_rate, 0.8);
        assert_eq!(config.storage.sessions_dir, "/tmp/sessions");

        let table = config.price_table();
        assert_eq!(table.price("local-model"), Some(Price::per_million(0.5, 1.0)));
        assert!(table.price("claude-sonnet-4-5").is_some());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
retry:
  max-attempts: 7
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.retry.max_attempts, 7);
        assert_eq!(config.retry.baseline_strategy, "Initial exploration with standard approach");
        assert_eq!(config.llm.provider, "anthropic");
        assert_eq!(config.improvement.max_cycles, 5);
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config = Config::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_negative_price() {
        let mut config = Config::default();
        config.pricing.push(PriceEntry {
            resource: "x".to_string(),
            input_per_million: -1.0,
            output_per_million: 1.0,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "log-level: DEBUG\nretry:\n  max-attempts: 9").unwrap();
        let path = file.path().to_path_buf();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.retry.max_attempts, 9);
        assert_eq!(Config::load_log_level(Some(&path)).as_deref(), Some("DEBUG"));
    }

    #[test]
    fn test_load_explicit_missing_path_fails() {
        let path = PathBuf::from("/definitely/not/here/healloop.yml");
        assert!(Config::load(Some(&path)).is_err());
    }
}
