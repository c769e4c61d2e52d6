//! Configuration loading, validation, and management for Lorekeep.
//!
//! Loads configuration from `~/.lorekeep/config.toml` with environment
//! variable overrides. Validates all settings at startup and builds the
//! [`Registry`] every component is handed.

use lorekeep_core::{BoundRule, CapabilityBounds, LimiterVocabulary, Registry, VersionPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// The root configuration structure.
///
/// Maps directly to `~/.lorekeep/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Exchange size budget
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Generation exchange behavior
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Run store backend
    #[serde(default)]
    pub storage: StorageConfig,

    /// Version-compatibility policy for the merge engine
    #[serde(default)]
    pub versions: VersionsConfig,

    /// Capability bounds; entries replace the built-in rule for the same field
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bounds: Vec<BoundConfig>,

    /// Guard vocabulary
    #[serde(default)]
    pub guards: GuardsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Hard per-exchange limit, in characters
    #[serde(default = "default_hard_limit")]
    pub hard_limit: usize,

    /// Characters reserved for carried-forward decisions
    #[serde(default = "default_decision_budget")]
    pub decision_budget: usize,

    /// Characters reserved for outstanding questions
    #[serde(default = "default_question_budget")]
    pub question_budget: usize,

    #[serde(default = "default_max_chunks")]
    pub max_chunks: usize,
}

fn default_hard_limit() -> usize {
    8000
}
fn default_decision_budget() -> usize {
    800
}
fn default_question_budget() -> usize {
    600
}
fn default_max_chunks() -> usize {
    24
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            hard_limit: default_hard_limit(),
            decision_budget: default_decision_budget(),
            question_budget: default_question_budget(),
            max_chunks: default_max_chunks(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// How many times an exchange is retried after an unparseable reply
    #[serde(default = "default_parse_retries")]
    pub parse_retries: u32,

    /// Override the built-in system instructions entirely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instructions: Option<String>,
}

fn default_parse_retries() -> u32 {
    2
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            parse_retries: default_parse_retries(),
            system_instructions: None,
        }
    }
}

/// Which `RunStore` implementation backs the binary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    #[default]
    File,
    Sqlite,
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Memory => "memory",
            Self::File => "file",
            Self::Sqlite => "sqlite",
        })
    }
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "in-memory" => Ok(Self::Memory),
            "file" | "json" => Ok(Self::File),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(ConfigError::ValidationError(format!(
                "unknown store backend '{other}' (expected memory, file, or sqlite)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Data directory (file backend) or database file (sqlite backend).
    /// Defaults to `~/.lorekeep/runs` and `~/.lorekeep/lorekeep.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionsConfig {
    #[serde(default = "default_version_field")]
    pub field: String,

    /// Canonical versions, oldest first
    #[serde(default = "default_canonical_versions")]
    pub canonical: Vec<String>,

    /// Loose variant → canonical version
    #[serde(default = "default_version_aliases")]
    pub aliases: BTreeMap<String, String>,
}

fn default_version_field() -> String {
    VersionPolicy::default().field
}
fn default_canonical_versions() -> Vec<String> {
    VersionPolicy::default().canonical
}
fn default_version_aliases() -> BTreeMap<String, String> {
    VersionPolicy::default().aliases
}

impl Default for VersionsConfig {
    fn default() -> Self {
        Self {
            field: default_version_field(),
            canonical: default_canonical_versions(),
            aliases: default_version_aliases(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundConfig {
    pub field: String,
    #[serde(default)]
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardsConfig {
    /// Impact levels that require a usage limiter
    #[serde(default = "default_high_impact")]
    pub high_impact: Vec<String>,

    #[serde(default = "default_limited")]
    pub limited_usage: Vec<String>,

    #[serde(default = "default_unlimited")]
    pub unlimited_usage: Vec<String>,

    /// Entity fields holding abilities or rewards
    #[serde(default = "default_ability_fields")]
    pub ability_fields: Vec<String>,

    /// Entity field that waives capability bounds
    #[serde(default = "default_override_field")]
    pub override_field: String,
}

fn default_high_impact() -> Vec<String> {
    LimiterVocabulary::default().high_impact
}
fn default_limited() -> Vec<String> {
    LimiterVocabulary::default().limited
}
fn default_unlimited() -> Vec<String> {
    LimiterVocabulary::default().unlimited
}
fn default_ability_fields() -> Vec<String> {
    LimiterVocabulary::default().ability_fields
}
fn default_override_field() -> String {
    CapabilityBounds::default().override_field
}

impl Default for GuardsConfig {
    fn default() -> Self {
        Self {
            high_impact: default_high_impact(),
            limited_usage: default_limited(),
            unlimited_usage: default_unlimited(),
            ability_fields: default_ability_fields(),
            override_field: default_override_field(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.lorekeep/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `LOREKEEP_HARD_LIMIT`
    /// - `LOREKEEP_STORE`
    /// - `LOREKEEP_DATA_DIR`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
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

    /// Apply environment overrides through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(raw) = lookup("LOREKEEP_HARD_LIMIT") {
            self.budget.hard_limit = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!("LOREKEEP_HARD_LIMIT must be a positive integer, got '{raw}'"))
            })?;
        }
        if let Some(raw) = lookup("LOREKEEP_STORE") {
            self.storage.backend = raw.parse()?;
        }
        if let Some(dir) = lookup("LOREKEEP_DATA_DIR") {
            self.storage.path = Some(dir);
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".lorekeep")
    }

    /// Where the selected backend keeps its data.
    pub fn storage_path(&self) -> PathBuf {
        match &self.storage.path {
            Some(path) => PathBuf::from(path),
            None => match self.storage.backend {
                StoreBackend::Sqlite => Self::config_dir().join("lorekeep.db"),
                _ => Self::config_dir().join("runs"),
            },
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let budget = &self.budget;
        if budget.hard_limit == 0 {
            return Err(ConfigError::ValidationError("budget.hard_limit must be > 0".into()));
        }
        if budget.decision_budget + budget.question_budget >= budget.hard_limit {
            return Err(ConfigError::ValidationError(
                "budget.decision_budget + budget.question_budget must be below budget.hard_limit".into(),
            ));
        }
        if budget.max_chunks == 0 {
            return Err(ConfigError::ValidationError("budget.max_chunks must be >= 1".into()));
        }

        if self.versions.field.trim().is_empty() {
            return Err(ConfigError::ValidationError("versions.field must not be empty".into()));
        }
        if self.versions.canonical.is_empty() {
            return Err(ConfigError::ValidationError(
                "versions.canonical must list at least one version".into(),
            ));
        }
        if let Some((alias, target)) = self
            .versions
            .aliases
            .iter()
            .find(|(_, target)| !self.versions.canonical.contains(target))
        {
            return Err(ConfigError::ValidationError(format!(
                "version alias '{alias}' points at '{target}', which is not a canonical version"
            )));
        }

        for bound in &self.bounds {
            if bound.field.trim().is_empty() {
                return Err(ConfigError::ValidationError("bounds entry with empty field".into()));
            }
            if !(bound.min <= bound.max) {
                return Err(ConfigError::ValidationError(format!(
                    "bounds for '{}': min {} exceeds max {}",
                    bound.field, bound.min, bound.max
                )));
            }
        }

        Ok(())
    }

    /// Build the registry from this configuration.
    pub fn registry(&self) -> Registry {
        let mut bounds = CapabilityBounds {
            override_field: self.guards.override_field.clone(),
            ..CapabilityBounds::default()
        };
        for configured in &self.bounds {
            let rule = BoundRule::new(configured.field.clone(), configured.min, configured.max);
            match bounds.rules.iter_mut().find(|r| r.field == rule.field) {
                Some(existing) => *existing = rule,
                None => bounds.rules.push(rule),
            }
        }

        Registry {
            versions: VersionPolicy {
                field: self.versions.field.clone(),
                canonical: self.versions.canonical.clone(),
                aliases: self.versions.aliases.clone(),
            },
            bounds,
            limiter: LimiterVocabulary {
                ability_fields: self.guards.ability_fields.clone(),
                high_impact: self.guards.high_impact.clone(),
                limited: self.guards.limited_usage.clone(),
                unlimited: self.guards.unlimited_usage.clone(),
                ..LimiterVocabulary::default()
            },
        }
    }

    /// Generate a default config TOML string (for `config --default`).
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.budget.hard_limit, 8000);
        assert_eq!(config.storage.backend, StoreBackend::File);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.budget.hard_limit, config.budget.hard_limit);
        assert_eq!(parsed.versions.canonical, config.versions.canonical);
    }

    #[test]
    fn oversized_sub_budgets_rejected() {
        let mut config = AppConfig::default();
        config.budget.decision_budget = 7000;
        config.budget.question_budget = 1000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn alias_to_unknown_version_rejected() {
        let mut config = AppConfig::default();
        config.versions.aliases.insert("4e".into(), "4e-2008".into());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("4e-2008"));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.budget.max_chunks, 24);
    }

    #[test]
    fn load_from_file_with_partial_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[budget]
hard_limit = 12000

[storage]
backend = "sqlite"

[[bounds]]
field = "speed"
max = 90

[[bounds]]
field = "teleportRange"
max = 500
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.budget.hard_limit, 12000);
        assert_eq!(config.budget.decision_budget, 800);
        assert_eq!(config.storage.backend, StoreBackend::Sqlite);

        let registry = config.registry();
        assert_eq!(registry.bounds.rule("speed").unwrap().max, 90.0);
        assert_eq!(registry.bounds.rule("teleportRange").unwrap().max, 500.0);
        assert!(registry.bounds.rule("flySpeed").is_some());
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[budget\nhard_limit = ").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("LOREKEEP_HARD_LIMIT", "4000"),
            ("LOREKEEP_STORE", "memory"),
            ("LOREKEEP_DATA_DIR", "/var/lib/lorekeep"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.budget.hard_limit, 4000);
        assert_eq!(config.storage.backend, StoreBackend::Memory);
        assert_eq!(config.storage_path(), PathBuf::from("/var/lib/lorekeep"));
    }

    #[test]
    fn bad_env_hard_limit_rejected() {
        let mut config = AppConfig::default();
        let result = config.apply_env(|key| (key == "LOREKEEP_HARD_LIMIT").then(|| "lots".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("hard_limit = 8000"));
        assert!(toml_str.contains("rulesVersion"));
    }

    #[test]
    fn registry_carries_guard_vocabulary() {
        let mut config = AppConfig::default();
        config.guards.override_field = "homebrew".into();
        config.guards.high_impact.push("mythic".into());
        let registry = config.registry();
        assert_eq!(registry.bounds.override_field, "homebrew");
        assert!(registry.limiter.high_impact.contains(&"mythic".to_string()));
    }
}
