//! Engine configuration
//!
//! Loaded from TOML or built in code:
//!
//! ```toml
//! concurrency = 4
//! poll_interval_ms = 1000
//! strict_concurrency = false
//! thread_name = "migrate-worker"
//! ```

use crate::error::{ConfigError, EngineError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Pool size used when the caller does not pass one
    pub concurrency: usize,
    /// Interval between status polls, in milliseconds
    pub poll_interval_ms: u64,
    /// Reject a second `start` whose concurrency differs from the live pool
    pub strict_concurrency: bool,
    /// Name given to pool threads
    pub thread_name: String,
}

impl EngineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With pool size
    #[inline]
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// With poll interval
    #[inline]
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With strict concurrency checking
    #[inline]
    #[must_use]
    pub fn with_strict_concurrency(mut self, strict: bool) -> Self {
        self.strict_concurrency = strict;
        self
    }

    /// With pool thread name
    #[inline]
    #[must_use]
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Poll interval as a `Duration`
    #[inline]
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Parse and validate TOML
    ///
    /// # Errors
    /// Returns `ConfigError` on malformed TOML, unknown keys, or invalid values
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.check()?;
        Ok(config)
    }

    /// Read, parse, and validate a TOML file
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read or is invalid
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&input)
    }

    /// Render as TOML
    ///
    /// # Errors
    /// Returns `ConfigError::Render` if serialization fails
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }

    /// Validate values
    ///
    /// # Errors
    /// Returns `EngineError::InvalidConfiguration` describing the first bad value
    pub fn validate(&self) -> Result<(), EngineError> {
        self.check().map_err(|e| EngineError::InvalidConfiguration(e.to_string()))
    }

    fn check(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "concurrency",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "poll_interval_ms",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.thread_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "thread_name",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval_ms: 1000,
            strict_concurrency: false,
            thread_name: "migrate-worker".to_string(),
        }
    }
}
