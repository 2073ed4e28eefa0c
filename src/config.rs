//! Engine configuration.
//!
//! Every field has a default, so an empty JSON object (or no config at
//! all) yields the standard engine: 128-sample blocks and a 10 ms
//! parameter fade.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Tunable constants shared by the realtime and offline executors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Offline block size in samples. Must be a power of two.
    pub block_size: usize,
    /// Parameter fade duration in milliseconds.
    pub fade_ms: f64,
    /// Minimum interval between offline progress callbacks.
    pub progress_interval_ms: u64,
    /// The offline renderer yields to the scheduler every this many blocks.
    pub yield_every_blocks: usize,
    /// Capacity of the realtime command ring.
    pub command_queue_capacity: usize,
    /// Level below which a block counts as silent (dBFS).
    pub sleep_threshold_db: f64,
    /// Seconds of silence and user inactivity before sleep mode.
    pub sleep_after_secs: f64,
    /// Maximum undo history depth.
    pub history_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            block_size: 128,
            fade_ms: 10.0,
            progress_interval_ms: 16,
            yield_every_blocks: 8,
            command_queue_capacity: 256,
            sleep_threshold_db: -84.0,
            sleep_after_secs: 60.0,
            history_limit: 100,
        }
    }
}

impl EngineConfig {
    /// Parse a camelCase JSON config, filling missing fields with defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_size == 0 || !self.block_size.is_power_of_two() {
            return Err(ConfigError::Invalid {
                field: "blockSize",
                reason: format!("{} is not a non-zero power of two", self.block_size),
            });
        }
        if self.fade_ms.is_nan() || self.fade_ms <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "fadeMs",
                reason: format!("{} must be positive", self.fade_ms),
            });
        }
        if self.command_queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "commandQueueCapacity",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Fade duration in seconds.
    pub fn fade_secs(&self) -> f64 {
        self.fade_ms / 1000.0
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    /// Linear amplitude corresponding to `sleep_threshold_db`.
    pub fn sleep_threshold(&self) -> f32 {
        10.0_f64.powf(self.sleep_threshold_db / 20.0) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_yields_defaults() {
        let config = EngineConfig::from_json("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.block_size, 128);
        assert!((config.fade_secs() - 0.010).abs() < 1e-12);
    }

    #[test]
    fn partial_json_overrides() {
        let config = EngineConfig::from_json(r#"{"blockSize": 256, "fadeMs": 5}"#).unwrap();
        assert_eq!(config.block_size, 256);
        assert!((config.fade_ms - 5.0).abs() < 1e-12);
        assert_eq!(config.yield_every_blocks, 8);
    }

    #[test]
    fn rejects_non_power_of_two_block() {
        let err = EngineConfig::from_json(r#"{"blockSize": 100}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "blockSize", .. }));
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            EngineConfig::from_json("{blockSize"),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn sleep_threshold_is_minus_84_db() {
        let t = EngineConfig::default().sleep_threshold();
        assert!((t - 6.3096e-5).abs() < 1e-8, "got {t}");
    }
}
