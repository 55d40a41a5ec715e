// Timeouts, topics, winch configuration
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::winch::SeekSettings;

// Runtime loop frequency (angle telemetry)
pub const LOOP_HZ: u64 = 20;

// Seek loop tuning
pub const ANGLE_TOLERANCE_DEG: f64 = 3.0;
pub const SEEK_TIMEOUT: Duration = Duration::from_millis(2000);
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

// Zenoh topics
pub const TOPIC_CMD: &str = "winch/cmd"; // commands
pub const TOPIC_SEEK: &str = "winch/state/seek"; // seek results
pub const TOPIC_ANGLE: &str = "winch/state/angle"; // angle telemetry
pub const TOPIC_HEALTH: &str = "winch/state/health"; // health status

// Motor controller on the serial line
pub const MOTOR_PORT: &str = "/dev/ttyUSB0";
pub const MOTOR_BAUDRATE: u32 = 9600;
pub const MOTOR_ADDRESS: u8 = 13;

// ADC channel wired to the angle sensor
pub const SENSOR_PATH: &str = "/sys/bus/iio/devices/iio:device0/in_voltage0_raw";
pub const SENSOR_FULL_SCALE: u32 = 1023;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config {path:?}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Angle bounds as written in the config file
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CalibrationConfig {
    pub zero_angle: i32,
    pub max_angle: i32,
}

/// Everything needed to bring up one winch. Missing fields fall back to the
/// constants above.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WinchConfig {
    pub port: String,
    pub baudrate: u32,
    pub address: u8,
    pub sensor_path: PathBuf,
    pub sensor_full_scale: u32,
    pub calibration: Option<CalibrationConfig>,
    pub tolerance_deg: f64,
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for WinchConfig {
    fn default() -> Self {
        Self {
            port: MOTOR_PORT.to_string(),
            baudrate: MOTOR_BAUDRATE,
            address: MOTOR_ADDRESS,
            sensor_path: PathBuf::from(SENSOR_PATH),
            sensor_full_scale: SENSOR_FULL_SCALE,
            calibration: None,
            tolerance_deg: ANGLE_TOLERANCE_DEG,
            timeout_ms: SEEK_TIMEOUT.as_millis() as u64,
            poll_interval_ms: POLL_INTERVAL.as_millis() as u64,
        }
    }
}

impl WinchConfig {
    /// Load from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn seek_settings(&self) -> SeekSettings {
        SeekSettings {
            tolerance_deg: self.tolerance_deg,
            timeout: Duration::from_millis(self.timeout_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}
