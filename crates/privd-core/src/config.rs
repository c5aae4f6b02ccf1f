//! Configuration parsing and management.
//!
//! Handles the daemon's TOML configuration file. All paths can be overridden
//! on the command line; the file only has to exist for non-default
//! deployments.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level privd configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PrivdConfig {
    /// Daemon configuration.
    #[serde(default)]
    pub daemon: DaemonConfig,
}

impl PrivdConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }
}

/// Daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Directory holding the daemon's Unix sockets.
    #[serde(default = "default_runtime_dir")]
    pub runtime_dir: PathBuf,

    /// Path to the privilege database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Path to the PID file (also the single-instance lock).
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            runtime_dir: default_runtime_dir(),
            db_path: default_db_path(),
            pid_file: default_pid_file(),
        }
    }
}

/// Default runtime directory for sockets.
///
/// Priority:
/// 1. `$XDG_RUNTIME_DIR/privd` if `XDG_RUNTIME_DIR` is set
/// 2. `/run/privd` as fallback
#[must_use]
pub fn default_runtime_dir() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR").map_or_else(
        |_| PathBuf::from("/run/privd"),
        |runtime_dir| PathBuf::from(runtime_dir).join("privd"),
    )
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/privd/privilege.db")
}

fn default_pid_file() -> PathBuf {
    default_runtime_dir().join("privd.pid")
}

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read configuration file: {0}")]
    Io(#[source] std::io::Error),

    /// Configuration file is not valid TOML.
    #[error("failed to parse configuration: {0}")]
    Parse(#[source] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_paths() {
        let config = PrivdConfig::default();
        assert!(config.daemon.runtime_dir.ends_with("privd"));
        assert_eq!(
            config.daemon.db_path,
            PathBuf::from("/var/lib/privd/privilege.db")
        );
        assert!(config.daemon.pid_file.ends_with("privd.pid"));
    }

    #[test]
    fn parses_daemon_section() {
        let config = PrivdConfig::from_toml(
            "[daemon]\n\
             runtime_dir = \"/tmp/privd-test\"\n\
             db_path = \"/tmp/privd-test/privilege.db\"\n",
        )
        .expect("config should parse");

        assert_eq!(config.daemon.runtime_dir, PathBuf::from("/tmp/privd-test"));
        assert_eq!(
            config.daemon.db_path,
            PathBuf::from("/tmp/privd-test/privilege.db")
        );
        // Unset keys fall back to defaults.
        assert!(config.daemon.pid_file.ends_with("privd.pid"));
    }

    #[test]
    fn missing_sections_use_defaults() {
        let config = PrivdConfig::from_toml("").expect("empty config should parse");
        assert_eq!(config.daemon.db_path, default_db_path());
    }

    #[test]
    fn invalid_toml_is_a_parse_error() {
        let err = PrivdConfig::from_toml("[daemon\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn from_file_reads_config() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("privd.toml");
        std::fs::write(&path, "[daemon]\ndb_path = \"/tmp/x.db\"\n").expect("write config");

        let config = PrivdConfig::from_file(&path).expect("config should load");
        assert_eq!(config.daemon.db_path, PathBuf::from("/tmp/x.db"));
    }
}
