//! Configuration loading and config file resolution
//!
//! Configuration is a single TOML file. Its location is resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. `CATALOG_FUSION_CONFIG` environment variable
//! 3. User config directory (`~/.config/catalog-fusion/config.toml`)
//! 4. System config (`/etc/catalog-fusion/config.toml`, Linux only)
//!
//! A missing file is not fatal: the compiled defaults are used and a warning is logged.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "CATALOG_FUSION_CONFIG";

/// Directory name used under the platform config directory
const APP_DIR: &str = "catalog-fusion";

/// Top-level configuration loaded from TOML
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Rule file to compile (builtin catalog rules when absent)
    #[serde(default)]
    pub rules_path: Option<PathBuf>,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Confidence scoring tunables
    #[serde(default)]
    pub confidence: ConfidenceConfig,

    /// Batch resolution settings
    #[serde(default)]
    pub batch: BatchConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Source reliability and disagreement penalty used when scoring resolved attributes
///
/// ```toml
/// [confidence]
/// default_reliability = 1.0
/// disagreement_penalty = 0.25
///
/// [confidence.reliability]
/// google_books_title = 0.9
/// marc_title = 0.7
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceConfig {
    /// Reliability assumed for relations without an explicit entry (0.0-1.0)
    #[serde(default = "default_reliability")]
    pub default_reliability: f64,

    /// Confidence subtracted per disagreeing alternative (0.0-1.0)
    #[serde(default = "default_disagreement_penalty")]
    pub disagreement_penalty: f64,

    /// Per-relation reliability (relation name → 0.0-1.0)
    #[serde(default)]
    pub reliability: BTreeMap<String, f64>,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            default_reliability: default_reliability(),
            disagreement_penalty: default_disagreement_penalty(),
            reliability: BTreeMap::new(),
        }
    }
}

/// Batch resolution settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Number of keys evaluated concurrently
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_reliability() -> f64 {
    1.0
}

fn default_disagreement_penalty() -> f64 {
    0.25
}

fn default_workers() -> usize {
    4
}

impl TomlConfig {
    /// Check value ranges that serde cannot express
    pub fn validate(&self) -> Result<()> {
        let unit = |name: &str, value: f64| -> Result<()> {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(Error::Config(format!(
                    "{} must be within 0.0..=1.0, got {}",
                    name, value
                )))
            }
        };

        unit("confidence.default_reliability", self.confidence.default_reliability)?;
        unit("confidence.disagreement_penalty", self.confidence.disagreement_penalty)?;
        for (relation, value) in &self.confidence.reliability {
            unit(&format!("confidence.reliability.{}", relation), *value)?;
        }

        if self.batch.workers == 0 {
            return Err(Error::Config("batch.workers must be at least 1".to_string()));
        }

        Ok(())
    }
}

/// Resolve the config file path following the documented priority order
///
/// Returns `None` when no candidate applies. Paths from the command line or the
/// environment are returned even if the file does not exist; the loader decides
/// how to handle that.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: User config directory
    if let Some(path) = user_config_path() {
        if path.exists() {
            return Some(path);
        }
    }

    // Priority 4: System config
    if cfg!(target_os = "linux") {
        let system = PathBuf::from("/etc").join(APP_DIR).join("config.toml");
        if system.exists() {
            return Some(system);
        }
    }

    None
}

/// `~/.config/catalog-fusion/config.toml` (platform equivalent), if a config dir exists
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml"))
}

/// Write the compiled defaults to `path`
///
/// An existing file is left alone unless `force` is set. Returns whether a file
/// was written.
pub fn init_config(path: &Path, force: bool) -> Result<bool> {
    if path.exists() && !force {
        info!("Config file {} already exists, leaving it unchanged", path.display());
        return Ok(false);
    }

    write_toml_config(&TomlConfig::default(), path)?;
    info!("Default configuration written to {}", path.display());
    Ok(true)
}

/// Read, parse and validate a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    config.validate()?;
    Ok(config)
}

/// Load configuration with graceful degradation
///
/// A missing file falls back to compiled defaults with a warning. A file that exists
/// but does not parse or validate is an error.
pub fn load_config(cli_arg: Option<&Path>) -> Result<TomlConfig> {
    let Some(path) = resolve_config_path(cli_arg) else {
        info!("No config file found, using compiled defaults");
        return Ok(TomlConfig::default());
    };

    if !path.exists() {
        warn!(
            "Config file {} does not exist, using compiled defaults",
            path.display()
        );
        return Ok(TomlConfig::default());
    }

    let config = load_toml_config(&path)?;
    info!("Configuration loaded from {}", path.display());
    Ok(config)
}

/// Write config atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    std::fs::write(&temp_path, content)?;
    if let Err(e) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(Error::Io(e));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TomlConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.batch.workers, 4);
        assert_eq!(config.confidence.default_reliability, 1.0);
    }

    #[test]
    fn test_partial_toml_uses_field_defaults() {
        let config: TomlConfig = toml::from_str(
            r#"
            [confidence.reliability]
            marc_title = 0.7
            "#,
        )
        .unwrap();

        assert_eq!(config.confidence.disagreement_penalty, 0.25);
        assert_eq!(config.confidence.reliability.get("marc_title"), Some(&0.7));
        assert!(config.rules_path.is_none());
    }

    #[test]
    fn test_validate_rejects_out_of_range_reliability() {
        let mut config = TomlConfig::default();
        config.confidence.reliability.insert("loc_title".to_string(), 1.5);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = TomlConfig::default();
        config.batch.workers = 0;
        assert!(config.validate().is_err());
    }
}
