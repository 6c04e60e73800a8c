use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Receiver tuning
///
/// Every field has a default, so a config file only needs the values it
/// overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// How close (µs of common time) the last queued sample may come to
    /// playout before a substream reports itself about to underflow
    pub underflow_threshold_us: i64,
    /// Consecutive decode errors tolerated before the pump gives up
    pub max_decode_errors: u32,
    /// Consecutive slow decode errors tolerated before the pump gives up
    pub max_long_decode_errors: u32,
    /// A failed decode taking at least this long counts as a slow error
    pub long_decode_error_threshold_us: u64,
    /// Datagrams buffered between the socket and the receive stage
    pub receive_queue_depth: usize,
    pub stats_interval_secs: u64,
    pub stall_threshold_secs: u64,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            underflow_threshold_us: 50_000,
            max_decode_errors: 60,
            max_long_decode_errors: 3,
            long_decode_error_threshold_us: 1_000_000,
            receive_queue_depth: 256,
            stats_interval_secs: 30,
            stall_threshold_secs: 5,
        }
    }
}

impl ReceiverConfig {
    /// Load from a JSON file, or return defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_decode_errors == 0 || self.max_long_decode_errors == 0 {
            anyhow::bail!("decode error budgets must be at least 1");
        }
        if self.receive_queue_depth == 0 {
            anyhow::bail!("receive_queue_depth must be at least 1");
        }
        Ok(())
    }

    pub fn long_decode_error_threshold(&self) -> Duration {
        Duration::from_micros(self.long_decode_error_threshold_us)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    pub fn stall_threshold(&self) -> Duration {
        Duration::from_secs(self.stall_threshold_secs)
    }
}

/// Returns a version as specified in Cargo.toml
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn app_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_override() {
        let config = ReceiverConfig::from_json(r#"{ "max_decode_errors": 10 }"#).unwrap();
        assert_eq!(config.max_decode_errors, 10);
        assert_eq!(config.max_long_decode_errors, 3);
        assert_eq!(config.underflow_threshold_us, 50_000);
        assert_eq!(
            config.long_decode_error_threshold(),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn test_rejects_zero_budget() {
        assert!(ReceiverConfig::from_json(r#"{ "max_long_decode_errors": 0 }"#).is_err());
    }

    #[test]
    fn test_load_without_path() {
        assert_eq!(ReceiverConfig::load(None).unwrap(), ReceiverConfig::default());
    }
}
