//! Typed configuration.
//!
//! All sections deserialize with defaults, so an empty document is a valid
//! configuration. TOML loading is available behind the `config-file` feature:
//!
//! ```toml
//! [retry]
//! max_retries = 5
//! interval_ms = 250
//!
//! [runtime]
//! clock = "virtual"
//! poll_budget = 10000
//! ```

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Default number of attempts made by [`with_retries`](crate::retry::with_retries).
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default pause between attempts, in milliseconds.
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 300;

/// Errors raised while loading configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file {path}: {message}")]
    Io {
        /// Path that was read.
        path: String,
        /// Underlying I/O error message.
        message: String,
    },
    /// The document is not valid for the expected schema.
    #[error("failed to parse config: {0}")]
    Parse(String),
    /// A value parsed but is out of range.
    #[error("invalid config value for `{field}`: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: &'static str,
    },
}

/// Retry behaviour for [`with_retries`](crate::retry::with_retries).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one.
    pub max_retries: u32,
    /// Pause between a failed attempt and the next one, in milliseconds.
    #[serde(rename = "interval_ms", with = "millis")]
    pub interval: Duration,
}

impl RetryPolicy {
    /// Creates a policy with the given attempt count and interval.
    #[must_use]
    pub const fn new(max_retries: u32, interval: Duration) -> Self {
        Self {
            max_retries,
            interval,
        }
    }

    /// Returns a copy with a different attempt count.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Returns a copy with a different interval.
    #[must_use]
    pub const fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_RETRIES,
            Duration::from_millis(DEFAULT_RETRY_INTERVAL_MS),
        )
    }
}

/// Which clock a [`LocalRuntime`](crate::runtime::LocalRuntime) drives its timers with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockKind {
    /// Monotonic wall clock; the runtime parks until the next deadline.
    #[default]
    Wall,
    /// Virtual clock; the runtime jumps straight to the next deadline.
    Virtual,
}

/// Runtime settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Clock used for timers.
    pub clock: ClockKind,
    /// Maximum number of task polls a single `block_on` or
    /// `run_until_stalled` call may perform.
    pub poll_budget: Option<usize>,
}

impl RuntimeConfig {
    /// Wall-clock runtime with no poll budget.
    #[must_use]
    pub const fn wall() -> Self {
        Self {
            clock: ClockKind::Wall,
            poll_budget: None,
        }
    }

    /// Virtual-clock runtime with no poll budget.
    #[must_use]
    pub const fn lab() -> Self {
        Self {
            clock: ClockKind::Virtual,
            poll_budget: None,
        }
    }

    /// Returns a copy with the given poll budget.
    #[must_use]
    pub const fn poll_budget(mut self, budget: usize) -> Self {
        self.poll_budget = Some(budget);
        self
    }
}

/// Top-level configuration document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Retry section.
    pub retry: RetryPolicy,
    /// Runtime section.
    pub runtime: RuntimeConfig,
}

impl Config {
    /// Checks value ranges that the schema cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runtime.poll_budget == Some(0) {
            return Err(ConfigError::Invalid {
                field: "runtime.poll_budget",
                reason: "must be greater than zero",
            });
        }
        Ok(())
    }
}

#[cfg(feature = "config-file")]
impl Config {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(source).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|err| ConfigError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        Self::from_toml_str(&source)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.interval, Duration::from_millis(300));
        assert_eq!(config.runtime.clock, ClockKind::Wall);
        assert_eq!(config.runtime.poll_budget, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builders_override_fields() {
        let policy = RetryPolicy::default()
            .max_retries(7)
            .interval(Duration::from_millis(5));
        assert_eq!(policy, RetryPolicy::new(7, Duration::from_millis(5)));

        let runtime = RuntimeConfig::lab().poll_budget(42);
        assert_eq!(runtime.clock, ClockKind::Virtual);
        assert_eq!(runtime.poll_budget, Some(42));
    }

    #[test]
    fn zero_poll_budget_is_rejected() {
        let config = Config {
            runtime: RuntimeConfig::wall().poll_budget(0),
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "runtime.poll_budget",
                ..
            })
        ));
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn parses_toml_document() {
        let config = Config::from_toml_str(
            r#"
            [retry]
            max_retries = 5
            interval_ms = 250

            [runtime]
            clock = "virtual"
            poll_budget = 100
            "#,
        )
        .expect("valid config");
        assert_eq!(config.retry, RetryPolicy::new(5, Duration::from_millis(250)));
        assert_eq!(config.runtime, RuntimeConfig::lab().poll_budget(100));
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn partial_toml_keeps_defaults() {
        let config = Config::from_toml_str("[retry]\nmax_retries = 1\n").expect("valid config");
        assert_eq!(config.retry.max_retries, 1);
        assert_eq!(config.retry.interval, Duration::from_millis(300));
        assert_eq!(config.runtime, RuntimeConfig::default());
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn reads_config_from_file() {
        use std::io::Write as _;

        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[runtime]\nclock = \"wall\"").expect("write config");
        let config = Config::from_file(file.path()).expect("valid config");
        assert_eq!(config.runtime.clock, ClockKind::Wall);

        let missing = Config::from_file(file.path().with_extension("missing"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
