//! Driver configuration
//!
//! Loaded from environment variables or a TOML document; every field has a
//! default.
//!
//! ```toml
//! provider_timeout_secs = 30
//! write_policy = "all"
//! max_repair_attempts = 16
//! ```

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("Invalid configuration file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// When a multi-provider write or delete counts as failed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WritePolicy {
    /// Any provider failure is fatal
    #[default]
    All,
    /// Fatal only if fewer than the reconstruction threshold succeeded
    Threshold,
}

impl FromStr for WritePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(WritePolicy::All),
            "threshold" => Ok(WritePolicy::Threshold),
            other => Err(ConfigError::InvalidValue(
                "write_policy".to_string(),
                other.to_string(),
            )),
        }
    }
}

/// Runtime configuration for a Daruma instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DarumaConfig {
    /// Deadline for a single provider call, in seconds
    pub provider_timeout_secs: u64,

    pub write_policy: WritePolicy,

    /// Upper bound on diagnose/repair and retry iterations per operation
    pub max_repair_attempts: usize,
}

impl Default for DarumaConfig {
    fn default() -> Self {
        Self {
            provider_timeout_secs: 30,
            write_policy: WritePolicy::All,
            max_repair_attempts: 16,
        }
    }
}

impl DarumaConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let provider_timeout_secs = std::env::var("DARUMA_PROVIDER_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.provider_timeout_secs);

        let write_policy = match std::env::var("DARUMA_WRITE_POLICY") {
            Ok(v) => v.parse()?,
            Err(_) => defaults.write_policy,
        };

        let max_repair_attempts = std::env::var("DARUMA_MAX_REPAIR_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_repair_attempts);

        Self {
            provider_timeout_secs,
            write_policy,
            max_repair_attempts,
        }
        .validated()
    }

    /// Parse a TOML document; missing fields take their defaults
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validated()
    }

    fn validated(self) -> Result<Self, ConfigError> {
        if self.provider_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "provider_timeout_secs".to_string(),
                "0".to_string(),
            ));
        }
        if self.max_repair_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "max_repair_attempts".to_string(),
                "0".to_string(),
            ));
        }
        Ok(self)
    }

    /// Get provider timeout as Duration
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DarumaConfig::default();
        assert_eq!(config.provider_timeout(), Duration::from_secs(30));
        assert_eq!(config.write_policy, WritePolicy::All);
        assert_eq!(config.max_repair_attempts, 16);
    }

    #[test]
    fn test_from_toml() {
        let config = DarumaConfig::from_toml_str(
            r#"
            provider_timeout_secs = 5
            write_policy = "threshold"
            "#,
        )
        .unwrap();
        assert_eq!(config.provider_timeout_secs, 5);
        assert_eq!(config.write_policy, WritePolicy::Threshold);
        assert_eq!(config.max_repair_attempts, 16);
    }

    #[test]
    fn test_from_toml_rejects_bad_values() {
        assert!(matches!(
            DarumaConfig::from_toml_str("write_policy = \"some\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            DarumaConfig::from_toml_str("max_repair_attempts = 0"),
            Err(ConfigError::InvalidValue(_, _))
        ));
    }

    // The only test that touches DARUMA_* variables, so nothing races it
    #[test]
    fn test_from_env() {
        const VARS: [&str; 3] = [
            "DARUMA_PROVIDER_TIMEOUT_SECS",
            "DARUMA_WRITE_POLICY",
            "DARUMA_MAX_REPAIR_ATTEMPTS",
        ];
        for var in VARS {
            std::env::remove_var(var);
        }
        assert_eq!(DarumaConfig::from_env().unwrap(), DarumaConfig::default());

        std::env::set_var("DARUMA_PROVIDER_TIMEOUT_SECS", "5");
        std::env::set_var("DARUMA_WRITE_POLICY", "Threshold");
        std::env::set_var("DARUMA_MAX_REPAIR_ATTEMPTS", "4");
        let config = DarumaConfig::from_env().unwrap();
        assert_eq!(config.provider_timeout(), Duration::from_secs(5));
        assert_eq!(config.write_policy, WritePolicy::Threshold);
        assert_eq!(config.max_repair_attempts, 4);

        std::env::set_var("DARUMA_MAX_REPAIR_ATTEMPTS", "0");
        assert!(matches!(
            DarumaConfig::from_env(),
            Err(ConfigError::InvalidValue(field, _)) if field == "max_repair_attempts"
        ));

        std::env::set_var("DARUMA_MAX_REPAIR_ATTEMPTS", "4");
        std::env::set_var("DARUMA_WRITE_POLICY", "quorum");
        assert!(matches!(
            DarumaConfig::from_env(),
            Err(ConfigError::InvalidValue(field, _)) if field == "write_policy"
        ));

        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_write_policy_from_str() {
        assert_eq!("ALL".parse::<WritePolicy>().unwrap(), WritePolicy::All);
        assert_eq!(
            " threshold ".parse::<WritePolicy>().unwrap(),
            WritePolicy::Threshold
        );
        assert!("quorum".parse::<WritePolicy>().is_err());
    }
}
