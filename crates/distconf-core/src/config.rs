//! Keeper runtime configuration
//!
//! Loaded from TOML, optionally overridden from `DISTCONF_*` environment
//! variables, then validated before a keeper is started.

use crate::errors::{DistconfError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "DISTCONF_";

/// Tunables of a single keeper
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeeperConfig {
    /// Soft timeout of locally generated scatter tasks
    pub quorum_check_timeout_ms: u64,
    /// Lower bound of the randomized bind retry delay
    pub bind_retry_min_ms: u64,
    /// Upper bound of the randomized bind retry delay
    pub bind_retry_max_ms: u64,
    /// Seed for parent selection and retry jitter; random when unset
    pub rng_seed: Option<u64>,
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            quorum_check_timeout_ms: 5_000,
            bind_retry_min_ms: 100,
            bind_retry_max_ms: 1_000,
            rng_seed: None,
        }
    }
}

impl KeeperConfig {
    /// Parse a TOML document; missing keys take their defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: KeeperConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DistconfError::config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| DistconfError::serialization(e.to_string()))
    }

    /// Apply `DISTCONF_*` overrides from the process environment
    pub fn merge_with_env(&mut self) -> Result<()> {
        self.merge_with_vars(std::env::vars())
    }

    /// Apply overrides from `(key, value)` pairs, ignoring unrelated keys
    pub fn merge_with_vars<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if let Some(name) = key.strip_prefix(ENV_PREFIX) {
                self.set_from_string(&name.to_lowercase(), &value)?;
            }
        }
        self.validate()
    }

    /// Set a single value by key name (for CLI and environment overrides)
    pub fn set_from_string(&mut self, key: &str, value: &str) -> Result<()> {
        let parse = |value: &str| {
            value
                .parse::<u64>()
                .map_err(|e| DistconfError::config(format!("Invalid value for {key}: {e}")))
        };
        match key {
            "quorum_check_timeout_ms" => self.quorum_check_timeout_ms = parse(value)?,
            "bind_retry_min_ms" => self.bind_retry_min_ms = parse(value)?,
            "bind_retry_max_ms" => self.bind_retry_max_ms = parse(value)?,
            "rng_seed" => self.rng_seed = Some(parse(value)?),
            other => {
                return Err(DistconfError::config(format!(
                    "Unknown configuration key: {other}"
                )))
            }
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.quorum_check_timeout_ms == 0 {
            return Err(DistconfError::config(
                "quorum_check_timeout_ms must be positive",
            ));
        }
        if self.bind_retry_min_ms > self.bind_retry_max_ms {
            return Err(DistconfError::config(format!(
                "bind_retry_min_ms ({}) exceeds bind_retry_max_ms ({})",
                self.bind_retry_min_ms, self.bind_retry_max_ms
            )));
        }
        Ok(())
    }

    /// Soft timeout of locally generated scatter tasks
    pub fn quorum_check_timeout(&self) -> Duration {
        Duration::from_millis(self.quorum_check_timeout_ms)
    }

    /// Bounds of the bind retry delay
    pub fn bind_retry_range(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.bind_retry_min_ms),
            Duration::from_millis(self.bind_retry_max_ms),
        )
    }
}
