//! Engine configuration.
//!
//! Loaded from TOML; every field has a default so an empty file (or no file)
//! is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default model used when none is configured.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("failed to parse config at {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of acts planned for a new campaign.
    #[serde(default = "default_act_count")]
    pub act_count: u32,

    /// How many log entries the located context includes.
    #[serde(default = "default_recent_log_limit")]
    pub recent_log_limit: usize,

    /// How much of each entity's information is shown when asking the
    /// generation service to match a reference.
    #[serde(default = "default_entity_info_preview_chars")]
    pub entity_info_preview_chars: usize,

    /// Lifetime of the GM speaking lease.
    #[serde(default = "default_speaking_lease_secs")]
    pub speaking_lease_secs: u64,

    #[serde(default)]
    pub generation: GenerationConfig,
}

/// Settings for the generation service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Used for free-text narrative calls.
    #[serde(default = "default_creative_temperature")]
    pub creative_temperature: f32,

    /// Used for schema-constrained calls.
    #[serde(default = "default_structured_temperature")]
    pub structured_temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_act_count() -> u32 {
    3
}
fn default_recent_log_limit() -> usize {
    20
}
fn default_entity_info_preview_chars() -> usize {
    200
}
fn default_speaking_lease_secs() -> u64 {
    120
}
fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_creative_temperature() -> f32 {
    1.0
}
fn default_structured_temperature() -> f32 {
    0.2
}
fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            act_count: default_act_count(),
            recent_log_limit: default_recent_log_limit(),
            entity_info_preview_chars: default_entity_info_preview_chars(),
            speaking_lease_secs: default_speaking_lease_secs(),
            generation: GenerationConfig::default(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_tokens: default_max_tokens(),
            creative_temperature: default_creative_temperature(),
            structured_temperature: default_structured_temperature(),
            api_base: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl EngineConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!(path = %path.display(), "no config file found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Parse from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::from("<string>"),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `CAMPAIGN_MODEL` and `CAMPAIGN_ACT_COUNT` if set.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(model) = std::env::var("CAMPAIGN_MODEL") {
            if !model.trim().is_empty() {
                self.generation.model = model.trim().to_string();
            }
        }

        if let Ok(count) = std::env::var("CAMPAIGN_ACT_COUNT") {
            self.act_count = count.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("CAMPAIGN_ACT_COUNT is not a number: {count}"))
            })?;
        }

        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.act_count == 0 {
            return Err(ConfigError::Invalid("act_count must be at least 1".into()));
        }
        if self.recent_log_limit == 0 {
            return Err(ConfigError::Invalid(
                "recent_log_limit must be at least 1".into(),
            ));
        }
        if self.speaking_lease_secs == 0 {
            return Err(ConfigError::Invalid(
                "speaking_lease_secs must be at least 1".into(),
            ));
        }
        for (name, value) in [
            ("creative_temperature", self.generation.creative_temperature),
            ("structured_temperature", self.generation.structured_temperature),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be between 0.0 and 1.0"
                )));
            }
        }
        if self.generation.max_tokens == 0 {
            return Err(ConfigError::Invalid("max_tokens must be at least 1".into()));
        }
        Ok(())
    }

    pub fn with_act_count(mut self, count: u32) -> Self {
        self.act_count = count;
        self
    }

    pub fn with_recent_log_limit(mut self, limit: usize) -> Self {
        self.recent_log_limit = limit;
        self
    }

    pub fn with_speaking_lease_secs(mut self, secs: u64) -> Self {
        self.speaking_lease_secs = secs;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.generation.model = model.into();
        self
    }

    pub fn speaking_lease_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.speaking_lease_secs).unwrap_or(i64::MAX / 1000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.act_count, 3);
        assert_eq!(config.recent_log_limit, 20);
        assert_eq!(config.entity_info_preview_chars, 200);
        assert_eq!(config.speaking_lease_secs, 120);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_partial_toml() {
        let config = EngineConfig::from_toml_str(
            r#"
            act_count = 5

            [generation]
            model = "claude-haiku"
            structured_temperature = 0.0
            "#,
        )
        .unwrap();
        assert_eq!(config.act_count, 5);
        assert_eq!(config.recent_log_limit, 20);
        assert_eq!(config.generation.model, "claude-haiku");
        assert_eq!(config.generation.structured_temperature, 0.0);
        assert_eq!(config.generation.max_tokens, 4096);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(EngineConfig::default().with_act_count(0).validate().is_err());
        assert!(EngineConfig::default().with_recent_log_limit(0).validate().is_err());

        let mut hot = EngineConfig::default();
        hot.generation.creative_temperature = 1.4;
        assert!(matches!(hot.validate(), Err(ConfigError::Invalid(_))));

        assert!(EngineConfig::from_toml_str("act_count = 0").is_err());
        assert!(matches!(
            EngineConfig::from_toml_str("act_count = \"three\""),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("campaign.toml");
        std::fs::write(&path, "recent_log_limit = 7\nspeaking_lease_secs = 30\n").unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.recent_log_limit, 7);
        assert_eq!(config.speaking_lease_ttl(), chrono::Duration::seconds(30));
    }
}
