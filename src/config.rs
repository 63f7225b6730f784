//! Engine configuration
//!
//! Loaded from JSON; every field is optional in the file. Out-of-range
//! values are clamped rather than rejected, like layer edits.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine::buffer::DEFAULT_SAMPLE_RATE;
use crate::error::Result;
use crate::layers::MAX_VOLUME;

const MIN_SAMPLE_RATE: u32 = 8_000;
const MAX_SAMPLE_RATE: u32 = 384_000;
const MIN_POLL_MS: u64 = 5;
const MAX_POLL_MS: u64 = 1_000;

/// Engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Sample rate of the live output device
    pub output_sample_rate: u32,
    /// Gain applied to the whole mix on export, in [0, 2]
    pub master_volume: f32,
    /// How often the transport position is polled (milliseconds)
    pub poll_interval_ms: u64,
    /// Export sample rate; `None` uses the output rate
    pub export_sample_rate: Option<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            output_sample_rate: DEFAULT_SAMPLE_RATE,
            master_volume: 1.0,
            poll_interval_ms: 50,
            export_sample_rate: None,
        }
    }
}

impl EngineConfig {
    /// Read a JSON config file and clamp it into range
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        Ok(config.validated())
    }

    /// Clamp every field into its supported range
    pub fn validated(mut self) -> Self {
        self.output_sample_rate = self.output_sample_rate.clamp(MIN_SAMPLE_RATE, MAX_SAMPLE_RATE);
        self.master_volume = clamp_master_volume(self.master_volume);
        self.poll_interval_ms = self.poll_interval_ms.clamp(MIN_POLL_MS, MAX_POLL_MS);
        self.export_sample_rate = self
            .export_sample_rate
            .map(|rate| rate.clamp(MIN_SAMPLE_RATE, MAX_SAMPLE_RATE));
        self
    }

    /// Sample rate used for offline export
    pub fn effective_export_rate(&self) -> u32 {
        self.export_sample_rate.unwrap_or(self.output_sample_rate)
    }
}

/// Clamp a master volume into [0, 2]; non-finite values become unity
pub fn clamp_master_volume(volume: f32) -> f32 {
    if volume.is_finite() {
        volume.clamp(0.0, MAX_VOLUME)
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.output_sample_rate, 48_000);
        assert_eq!(config.master_volume, 1.0);
        assert_eq!(config.poll_interval_ms, 50);
        assert_eq!(config.effective_export_rate(), 48_000);
    }

    #[test]
    fn test_validated_clamps() {
        let config = EngineConfig {
            output_sample_rate: 10,
            master_volume: 7.5,
            poll_interval_ms: 0,
            export_sample_rate: Some(10_000_000),
        }
        .validated();
        assert_eq!(config.output_sample_rate, MIN_SAMPLE_RATE);
        assert_eq!(config.master_volume, 2.0);
        assert_eq!(config.poll_interval_ms, MIN_POLL_MS);
        assert_eq!(config.effective_export_rate(), MAX_SAMPLE_RATE);
    }

    #[test]
    fn test_load_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("layerdeck.json");
        fs::write(&path, r#"{ "master_volume": 0.5, "export_sample_rate": 44100 }"#).unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(
            config,
            EngineConfig {
                master_volume: 0.5,
                export_sample_rate: Some(44_100),
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_load_bad_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("layerdeck.json");
        fs::write(&path, "{ master_volume: }").unwrap();
        assert_eq!(
            EngineConfig::load(&path).unwrap_err().error_code(),
            "SERIALIZATION_ERROR"
        );
    }

    #[test]
    fn test_clamp_master_volume_nan() {
        assert_eq!(clamp_master_volume(f32::NAN), 1.0);
        assert_eq!(clamp_master_volume(-1.0), 0.0);
    }
}
