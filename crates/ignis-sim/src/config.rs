//! Run configuration shared by every case of a batch.

use crate::driver::IntegrationDriver;
use ignis_core::Result;
use ignis_delay::PeakDetector;
use ignis_wall::PRESSURE_SAMPLING_HZ;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Simulation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Simulated end time as a multiple of the experimental ignition delay
    pub end_time_factor: f64,
    /// Sampling rate of emulated pressure rises (Hz)
    pub pressure_sampling_hz: f64,
    /// Native integrator steps allowed per case
    pub max_steps: usize,
    /// Wall-clock budget per case (s)
    pub max_wall_time: Option<f64>,
    /// Skip cases whose trajectory file already exists
    pub restart: bool,
    /// Peak policy for ignition detection
    pub peak_detector: PeakDetector,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            end_time_factor: 100.0,
            pressure_sampling_hz: PRESSURE_SAMPLING_HZ,
            max_steps: 10_000_000,
            max_wall_time: None,
            restart: false,
            peak_detector: PeakDetector::default(),
        }
    }
}

impl RunConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Driver bounded by this configuration
    pub fn driver(&self) -> IntegrationDriver {
        let driver = IntegrationDriver::new().with_max_steps(self.max_steps);
        match self.max_wall_time {
            Some(secs) if secs > 0.0 && secs.is_finite() => driver.with_max_wall_time(Duration::from_secs_f64(secs)),
            _ => driver,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.end_time_factor, 100.0);
        assert_eq!(config.pressure_sampling_hz, 2.0e4);
        assert!(!config.restart);
        assert_eq!(config.driver().max_steps(), 10_000_000);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = RunConfig::from_json_str(r#"{"restart": true, "max_steps": 500, "max_wall_time": 2.5}"#).unwrap();
        assert!(config.restart);
        assert_eq!(config.max_steps, 500);
        assert_eq!(config.end_time_factor, 100.0);
        assert_eq!(config.peak_detector.min_distance, 1);
        assert_eq!(config.peak_detector.rel_tolerance, 1.0e-9);

        let driver = config.driver();
        assert_eq!(driver.max_steps(), 500);
        assert_eq!(driver.max_wall_time(), Some(Duration::from_millis(2500)));
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(RunConfig::from_json_str("{restart: yes}").is_err());
    }
}
