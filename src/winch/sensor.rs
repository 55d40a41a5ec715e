// Analog angle sensor
//
// The sensor's 0.5 V..4.5 V active band maps to -180..+180 degrees
// (90 degrees per volt). Samples are 10-bit: 0 = 0 V, 1023 = 5 V.

use std::fs;
use std::path::{Path, PathBuf};

/// Full-scale value of a 10-bit sample
pub const RAW_FULL_SCALE: u16 = 1023;

/// Degrees per raw count and offset of the fixed sensor transform
const DEGREES_PER_COUNT: f64 = 0.4399;
const ANGLE_OFFSET: f64 = 225.0;

#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error("IO error reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Could not parse sample {value:?} from {path:?}")]
    Parse { path: PathBuf, value: String },

    #[error("Sample {value} exceeds full scale {full_scale}")]
    OutOfRange { value: u32, full_scale: u32 },
}

pub type Result<T> = std::result::Result<T, SensorError>;

/// A source of raw analog samples in the 0..=1023 range
pub trait AnalogSource {
    fn sample(&mut self) -> Result<u16>;
}

/// Convert a raw sample to whole degrees, truncating toward zero
pub fn raw_to_angle(raw: u16) -> i32 {
    (f64::from(raw) * DEGREES_PER_COUNT - ANGLE_OFFSET) as i32
}

/// ADC channel exposed by the Linux IIO subsystem, e.g.
/// `/sys/bus/iio/devices/iio:device0/in_voltage0_raw`.
///
/// Channels wider than 10 bits are rescaled onto 0..=1023 so the angle
/// transform sees the same units as a 10-bit converter.
pub struct IioAnalog {
    path: PathBuf,
    full_scale: u32,
}

impl IioAnalog {
    /// Open a 10-bit channel
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self::with_full_scale(path, u32::from(RAW_FULL_SCALE))
    }

    /// Open a channel whose maximum reading is `full_scale`
    pub fn with_full_scale(path: impl AsRef<Path>, full_scale: u32) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            full_scale: full_scale.max(1),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_value(&self) -> Result<u32> {
        let text = fs::read_to_string(&self.path).map_err(|source| SensorError::Io {
            path: self.path.clone(),
            source,
        })?;
        let trimmed = text.trim();
        trimmed.parse::<u32>().map_err(|_| SensorError::Parse {
            path: self.path.clone(),
            value: trimmed.to_string(),
        })
    }
}

impl AnalogSource for IioAnalog {
    fn sample(&mut self) -> Result<u16> {
        let value = self.read_value()?;
        rescale(value, self.full_scale)
    }
}

/// Map a reading from a `full_scale` converter onto the 10-bit range
fn rescale(value: u32, full_scale: u32) -> Result<u16> {
    if value > full_scale {
        return Err(SensorError::OutOfRange { value, full_scale });
    }
    if full_scale == u32::from(RAW_FULL_SCALE) {
        return Ok(value as u16);
    }
    let scaled = u64::from(value) * u64::from(RAW_FULL_SCALE) / u64::from(full_scale);
    Ok(scaled as u16)
}
