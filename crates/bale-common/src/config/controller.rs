//! Record controller configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::constants::{DEFAULT_HEADER_PROBE, DEFAULT_REGISTRY_INCREMENT, ENVELOPE_HEADER_SIZE};
use crate::error::{BaleError, BaleResult};

/// How a controller grows a record whose slack cannot absorb a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpansionPolicy {
    /// Copy the growing record into a private buffer before growing it.
    ///
    /// Array-mates are unaffected until they grow themselves.
    #[default]
    Expulse,
    /// Grow the shared buffer in place and shift every array-mate that lives
    /// after the insertion point.
    Single,
    /// Every record owns its own buffer from load onwards; growth touches
    /// only that buffer.
    Multiple,
}

impl ExpansionPolicy {
    /// Returns true if records loaded under this policy share one buffer
    /// per envelope.
    #[must_use]
    pub const fn shares_buffers(self) -> bool {
        !matches!(self, Self::Multiple)
    }
}

/// Record controller configuration.
///
/// # Example
///
/// ```rust
/// use bale_common::config::{ControllerConfig, ExpansionPolicy};
///
/// let config = ControllerConfig::from_toml_str("expansion_policy = \"single\"").unwrap();
/// assert_eq!(config.expansion_policy, ExpansionPolicy::Single);
/// assert_eq!(config.registry_increment, 16);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Growth strategy for records whose slack is exhausted.
    /// Default: expulse
    pub expansion_policy: ExpansionPolicy,

    /// Number of registry slots added when the registry is full.
    /// Default: 16
    pub registry_increment: usize,

    /// Slack bytes reserved after every physical growth, amortizing
    /// future growth.
    /// Default: 0
    pub default_slack: usize,

    /// Number of bytes requested when probing an envelope header from a
    /// source that cannot enumerate its instance ids.
    /// Default: 64
    pub max_header_probe: usize,

    /// Hand records locked by another thread to a background saver instead
    /// of skipping them.
    /// Default: true
    pub deferred_saves: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            expansion_policy: ExpansionPolicy::default(),
            registry_increment: DEFAULT_REGISTRY_INCREMENT,
            default_slack: 0,
            max_header_probe: DEFAULT_HEADER_PROBE,
            deferred_saves: true,
        }
    }
}

impl ControllerConfig {
    /// Creates a new default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a small configuration for testing.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            registry_increment: 2,
            ..Default::default()
        }
    }

    /// Sets the expansion policy.
    #[must_use]
    pub fn with_expansion_policy(mut self, policy: ExpansionPolicy) -> Self {
        self.expansion_policy = policy;
        self
    }

    /// Sets the registry increment.
    #[must_use]
    pub fn with_registry_increment(mut self, increment: usize) -> Self {
        self.registry_increment = increment;
        self
    }

    /// Sets the default slack.
    #[must_use]
    pub fn with_default_slack(mut self, slack: usize) -> Self {
        self.default_slack = slack;
        self
    }

    /// Sets whether contested records are saved in the background.
    #[must_use]
    pub fn with_deferred_saves(mut self, enabled: bool) -> Self {
        self.deferred_saves = enabled;
        self
    }

    /// Parses a configuration from TOML text.
    pub fn from_toml_str(content: &str) -> BaleResult<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| BaleError::invalid_config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a file.
    pub fn from_file(path: &Path) -> BaleResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Converts configuration to a TOML string.
    pub fn to_toml(&self) -> BaleResult<String> {
        toml::to_string_pretty(self).map_err(|e| BaleError::invalid_config(e.to_string()))
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> BaleResult<()> {
        if self.registry_increment == 0 {
            return Err(BaleError::invalid_config(
                "registry_increment must be at least 1",
            ));
        }

        if self.max_header_probe < ENVELOPE_HEADER_SIZE {
            return Err(BaleError::invalid_config(format!(
                "max_header_probe must be at least {ENVELOPE_HEADER_SIZE} bytes"
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.expansion_policy, ExpansionPolicy::Expulse);
        assert_eq!(config.registry_increment, DEFAULT_REGISTRY_INCREMENT);
        assert!(config.deferred_saves);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = ControllerConfig::for_testing()
            .with_expansion_policy(ExpansionPolicy::Multiple)
            .with_default_slack(32);
        let text = config.to_toml().unwrap();
        assert!(text.contains("expansion_policy = \"multiple\""));

        let parsed = ControllerConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_validation() {
        let bad = ControllerConfig::default().with_registry_increment(0);
        assert!(bad.validate().is_err());

        let err = ControllerConfig::from_toml_str("max_header_probe = 4").unwrap_err();
        assert!(err.to_string().contains("max_header_probe"));
    }

    #[test]
    fn test_unknown_policy_rejected() {
        assert!(ControllerConfig::from_toml_str("expansion_policy = \"spread\"").is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bale.toml");
        std::fs::write(&path, "registry_increment = 4\ndeferred_saves = false\n").unwrap();

        let config = ControllerConfig::from_file(&path).unwrap();
        assert_eq!(config.registry_increment, 4);
        assert!(!config.deferred_saves);
    }

    #[test]
    fn test_policy_sharing() {
        assert!(ExpansionPolicy::Expulse.shares_buffers());
        assert!(ExpansionPolicy::Single.shares_buffers());
        assert!(!ExpansionPolicy::Multiple.shares_buffers());
    }
}
