//! Configuration loading for linkbroker.
//!
//! Settings come from an optional JSON file, then environment overrides
//! (`HOST`, `PORT`, `LINKBROKER_LOG`), then CLI flags.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Get the linkbroker config directory.
pub fn get_config_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("com", "linkbroker", "linkbroker")
        .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;

    Ok(dirs.config_dir().to_path_buf())
}

/// Get the default settings file path.
pub fn get_settings_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("settings.json"))
}

/// Load settings from `path`, or from the default location when it exists.
///
/// An explicit path that does not exist is an error; a missing default file
/// just means defaults.
pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let mut settings = match path {
        Some(path) => {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "Settings file not found at {}",
                    path.display()
                )));
            }
            read_settings_file(path)?
        }
        None => match get_settings_path() {
            Ok(default_path) if default_path.exists() => read_settings_file(&default_path)?,
            _ => Settings::default(),
        },
    };

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok())?;
    validate_settings(&settings)?;

    Ok(settings)
}

fn read_settings_file(path: &Path) -> Result<Settings> {
    let content = std::fs::read_to_string(path)?;
    let settings: Settings = serde_json::from_str(&content)?;
    tracing::debug!("Loaded settings from {}", path.display());
    Ok(settings)
}

/// Apply environment overrides using `lookup` to read variables.
pub fn apply_env_overrides<F>(settings: &mut Settings, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup("HOST").filter(|h| !h.is_empty()) {
        settings.server.host = host;
    }

    if let Some(port) = lookup("PORT").filter(|p| !p.is_empty()) {
        settings.server.port = port
            .parse()
            .map_err(|_| Error::Config(format!("Invalid PORT value '{}'", port)))?;
    }

    if let Some(level) = lookup("LINKBROKER_LOG").filter(|l| !l.is_empty()) {
        settings.logging.level = level;
    }

    Ok(())
}

/// Reject settings the broker cannot run with.
pub fn validate_settings(settings: &Settings) -> Result<()> {
    if settings.server.host.trim().is_empty() {
        return Err(Error::Config("server.host must not be empty".to_string()));
    }
    if settings.broker.sweep_interval_secs == 0 {
        return Err(Error::Config(
            "broker.sweep_interval_secs must be greater than zero".to_string(),
        ));
    }
    if settings.broker.default_conversation_limit == 0 {
        return Err(Error::Config(
            "broker.default_conversation_limit must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

/// Listener configuration.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8765
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Broker core tuning.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BrokerConfig {
    /// How long a superseded instance id still resolves to its replacement.
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_conversation_limit")]
    pub default_conversation_limit: usize,
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
}

fn default_grace_period_secs() -> u64 {
    crate::registry::DEFAULT_GRACE_PERIOD_SECS
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_conversation_limit() -> usize {
    100
}

fn default_max_retries() -> u32 {
    crate::protocol::DEFAULT_MAX_RETRIES
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: default_grace_period_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            default_conversation_limit: default_conversation_limit(),
            default_max_retries: default_max_retries(),
        }
    }
}

impl BrokerConfig {
    /// Grace period as a duration, clamped to the largest representable one.
    pub fn grace_period(&self) -> chrono::Duration {
        i64::try_from(self.grace_period_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Logging configuration.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Also write a daily-rolling log file.
    #[serde(default)]
    pub file: bool,
    pub log_dir: Option<PathBuf>,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: false,
            log_dir: None,
            json: false,
        }
    }
}

/// linkbroker settings.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub broker: BrokerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_grace_period_clamps_huge_values() {
        let mut broker = BrokerConfig::default();
        assert_eq!(broker.grace_period(), chrono::Duration::seconds(300));

        broker.grace_period_secs = u64::MAX;
        assert_eq!(broker.grace_period(), chrono::Duration::MAX);

        broker.grace_period_secs = i64::MAX as u64 / 10;
        assert_eq!(broker.grace_period(), chrono::Duration::MAX);
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 8765);
        assert_eq!(settings.broker.grace_period_secs, 300);
        assert_eq!(settings.broker.default_max_retries, 3);
        assert!(validate_settings(&settings).is_ok());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server":{"port":9000},"broker":{"grace_period_secs":10}}"#)
            .unwrap();

        let settings = read_settings_file(&path).unwrap();
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.broker.grace_period_secs, 10);
        assert_eq!(settings.broker.sweep_interval_secs, 60);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nope.json");
        assert!(matches!(load_settings(Some(&path)), Err(Error::Config(_))));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [("HOST", "127.0.0.1"), ("PORT", "9100"), ("LINKBROKER_LOG", "debug")]
            .into_iter()
            .collect();
        let mut settings = Settings::default();
        apply_env_overrides(&mut settings, |k| env.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn test_invalid_port_rejected() {
        let mut settings = Settings::default();
        let result = apply_env_overrides(&mut settings, |k| (k == "PORT").then(|| "http".to_string()));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_sweep_interval() {
        let mut settings = Settings::default();
        settings.broker.sweep_interval_secs = 0;
        assert!(validate_settings(&settings).is_err());
    }
}
