//! On-disk configuration, loaded once at startup (and optionally reloaded) into a
//! [`crate::tunables::Tunables`] registry.

use std::fmt;
use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;

/// The on-disk shape of the server's configuration file (TOML).
///
/// Field names mirror the tunable keys of the spec directly so that reading the config file next
/// to the registry leaves no translation to double-check.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Address the reactor's listener binds to.
    pub bind_addr: SocketAddr,
    /// Number of executor worker threads.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Positive integer; non-positive falls back to the registry's own default.
    #[serde(default)]
    pub max_pending_ops: i64,
    /// Clamped to >= 1 by the registry.
    #[serde(default = "default_max_pending_bytes")]
    pub max_pending_bytes: i64,
    /// Clamped to >= 256 by the registry.
    #[serde(default = "default_max_read_ahead")]
    pub max_read_ahead: i64,
    /// A non-positive value disables the inactivity timer.
    #[serde(default = "default_inactivity_timeout_secs")]
    pub inactivity_timeout_secs: i64,
    /// Clamped to >= 1 by the registry.
    #[serde(default = "default_max_write_behind")]
    pub max_write_behind: i64,
    /// Arbitrary non-negative integer.
    #[serde(default = "default_compaction_threshold")]
    pub input_compaction_threshold: i64,
    /// Arbitrary non-negative integer.
    #[serde(default = "default_compaction_threshold")]
    pub output_compaction_threshold: i64,
    /// Boolean; non-zero means on.
    #[serde(default)]
    pub audit_logging: bool,
}

fn default_worker_threads() -> usize {
    4
}

fn default_max_pending_bytes() -> i64 {
    1 << 20
}

fn default_max_read_ahead() -> i64 {
    16 * 1024
}

fn default_inactivity_timeout_secs() -> i64 {
    60
}

fn default_max_write_behind() -> i64 {
    1 << 20
}

fn default_compaction_threshold() -> i64 {
    4096
}

/// Failure loading or validating a [`ServerConfig`].
#[derive(Debug)]
pub enum ConfigError {
    /// The config file could not be read.
    Io(std::io::Error),
    /// The file's contents were not valid TOML, or did not match the expected shape.
    Parse(toml::de::Error),
    /// A value was present but nonsensical enough to reject rather than silently clamp
    /// (the registry's own clamps handle the merely-too-small cases; this is for e.g. negative
    /// worker thread counts, which have no sensible floor to clamp to).
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "could not read config file: {err}"),
            ConfigError::Parse(err) => write!(f, "could not parse config file: {err}"),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(err) => Some(err),
            ConfigError::Parse(err) => Some(err),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl ServerConfig {
    /// Loads and validates a config file from `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::parse(&text)
    }

    /// Parses config already read into memory (used by [`ServerConfig::load`] and by tests).
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = toml::from_str(text).map_err(ConfigError::Parse)?;
        if config.worker_threads == 0 {
            return Err(ConfigError::Invalid(
                "worker_threads must be at least 1".into(),
            ));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config_applying_defaults() {
        let config = ServerConfig::parse("bind_addr = \"127.0.0.1:7654\"\n").unwrap();
        assert_eq!(4, config.worker_threads);
        assert_eq!(16 * 1024, config.max_read_ahead);
        assert!(!config.audit_logging);
    }

    #[test]
    fn rejects_zero_worker_threads() {
        let err = ServerConfig::parse(
            "bind_addr = \"127.0.0.1:7654\"\nworker_threads = 0\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_unknown_fields() {
        let err = ServerConfig::parse(
            "bind_addr = \"127.0.0.1:7654\"\nnonexistent_field = 1\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn rejects_malformed_toml() {
        let err = ServerConfig::parse("this is not toml {{{").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
