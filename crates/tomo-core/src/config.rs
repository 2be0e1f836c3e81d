//! Layered configuration using Figment.
//!
//! Configuration is resolved in order:
//! 1. Library defaults
//! 2. An optional TOML file
//! 3. Environment variables prefixed with `TOMO_` (`__` separates sections)
//!
//! # Example
//! ```no_run
//! use tomo_core::config::TomographConfig;
//!
//! let config = TomographConfig::load_from(Some("config/tomo.toml"))?;
//! config.validate()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! `TOMO_SEQUENCER__FRAME_SEND_EVERY_N=10` overrides
//! `sequencer.frame_send_every_n`.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{TomoError, TomoResult};

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "TOMO_";

/// Top-level simulator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TomographConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Simulated device geometry and limits
    #[serde(default)]
    pub device: DeviceConfig,
    /// Experiment sequencer timing and policy
    #[serde(default)]
    pub sequencer: SequencerConfig,
    /// Frame dispatch settings
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

/// Closed interval a motor axis may be driven to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisLimits {
    pub min: f64,
    pub max: f64,
}

impl AxisLimits {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Simulated device configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Horizontal motor limits
    #[serde(default = "default_axis_limits")]
    pub x_limits: AxisLimits,
    /// Vertical motor limits
    #[serde(default = "default_axis_limits")]
    pub y_limits: AxisLimits,
    /// Horizontal distance the object travels when moved out of the beam
    #[serde(default = "default_away_offset")]
    pub away_offset: f64,
    /// Detector width in pixels
    #[serde(default = "default_detector_size")]
    pub detector_width: u32,
    /// Detector height in pixels
    #[serde(default = "default_detector_size")]
    pub detector_height: u32,
    /// Nominal detector chip temperature (°C)
    #[serde(default = "default_chip_temp")]
    pub chip_temp: f64,
    /// Nominal detector housing temperature (°C)
    #[serde(default = "default_hous_temp")]
    pub hous_temp: f64,
    /// Seed for the simulated readout; `None` draws from the OS
    #[serde(default)]
    pub rng_seed: Option<u64>,
}

/// Sequencer timing and recovery policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencerConfig {
    /// Pause after closing the shutter before dark frames
    #[serde(default = "default_dark_settle", with = "humantime_serde")]
    pub dark_settle: Duration,
    /// Wait after each power-off and power-on of a source recovery
    #[serde(default = "default_recovery_settle", with = "humantime_serde")]
    pub source_recovery_settle: Duration,
    /// Voltage and current must both exceed this to pass the health check
    #[serde(default = "default_health_threshold")]
    pub source_health_threshold: f64,
    /// Power cycles attempted before continuing with an unhealthy source
    #[serde(default = "default_recovery_attempts")]
    pub max_recovery_attempts: u32,
    /// Every N-th frame is also sent to the live preview
    #[serde(default = "default_send_every_n")]
    pub frame_send_every_n: u64,
}

/// Frame dispatch configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Dispatch units allowed to encode/upload at the same time
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_axis_limits() -> AxisLimits {
    AxisLimits {
        min: -5000.0,
        max: 5000.0,
    }
}

fn default_away_offset() -> f64 {
    1000.0
}

fn default_detector_size() -> u32 {
    256
}

fn default_chip_temp() -> f64 {
    -20.0
}

fn default_hous_temp() -> f64 {
    25.0
}

fn default_dark_settle() -> Duration {
    Duration::from_secs(1)
}

fn default_recovery_settle() -> Duration {
    Duration::from_secs(5)
}

fn default_health_threshold() -> f64 {
    2.0
}

fn default_recovery_attempts() -> u32 {
    1
}

fn default_send_every_n() -> u64 {
    5
}

fn default_max_in_flight() -> usize {
    8
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            x_limits: default_axis_limits(),
            y_limits: default_axis_limits(),
            away_offset: default_away_offset(),
            detector_width: default_detector_size(),
            detector_height: default_detector_size(),
            chip_temp: default_chip_temp(),
            hous_temp: default_hous_temp(),
            rng_seed: None,
        }
    }
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            dark_settle: default_dark_settle(),
            source_recovery_settle: default_recovery_settle(),
            source_health_threshold: default_health_threshold(),
            max_recovery_attempts: default_recovery_attempts(),
            frame_send_every_n: default_send_every_n(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
        }
    }
}

impl Default for TomographConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            device: DeviceConfig::default(),
            sequencer: SequencerConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

impl TomographConfig {
    /// Defaults with every simulated wait set to zero, for unit tests.
    pub fn instant() -> Self {
        let mut config = Self::default();
        config.sequencer.dark_settle = Duration::ZERO;
        config.sequencer.source_recovery_settle = Duration::ZERO;
        config.device.detector_width = 16;
        config.device.detector_height = 16;
        config.device.rng_seed = Some(42);
        config
    }

    /// Build the provider chain without extracting it.
    pub fn figment<P: AsRef<Path>>(path: Option<P>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(TomographConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path.as_ref()));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load configuration from defaults, an optional file and the environment.
    pub fn load_from<P: AsRef<Path>>(path: Option<P>) -> Result<Self, figment::Error> {
        Self::figment(path).extract()
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> TomoResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(TomoError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        for (axis, limits) in [("x", self.device.x_limits), ("y", self.device.y_limits)] {
            if !(limits.min.is_finite() && limits.max.is_finite()) || limits.min > limits.max {
                return Err(TomoError::Configuration(format!(
                    "Invalid {}_limits [{}, {}]",
                    axis, limits.min, limits.max
                )));
            }
        }

        if !self.device.away_offset.is_finite() {
            return Err(TomoError::Configuration(
                "away_offset must be finite".to_string(),
            ));
        }

        if self.device.detector_width == 0 || self.device.detector_height == 0 {
            return Err(TomoError::Configuration(
                "Detector size must be non-zero".to_string(),
            ));
        }

        if self.sequencer.frame_send_every_n == 0 {
            return Err(TomoError::Configuration(
                "frame_send_every_n must be at least 1".to_string(),
            ));
        }

        if self.dispatch.max_in_flight == 0 {
            return Err(TomoError::Configuration(
                "max_in_flight must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
