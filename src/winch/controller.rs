// Closed-loop rope length controller
//
// Converts a "rope out" percentage into a target angle and drives the motor
// in coarse speed tiers until the sensed angle settles, a travel limit is
// reached, or the seek times out. The motor is stopped on every exit path.

use std::time::Duration;
use tracing::{debug, info, warn};

use super::clock::Clock;
use super::sensor::{self, AnalogSource, SensorError};
use super::smc::{self, FrameSink, SmcError};
use crate::config::{ANGLE_TOLERANCE_DEG, POLL_INTERVAL, SEEK_TIMEOUT};

/// Speed tiers (signed magnitude sent to the controller)
pub const SPEED_FULL: i16 = 3600;
pub const SPEED_HALF: i16 = 1800;
pub const SPEED_QUARTER: i16 = 900;
pub const SPEED_CREEP: i16 = 500;

#[derive(Debug, thiserror::Error)]
pub enum WinchError {
    #[error("Motor bus error: {0}")]
    Bus(#[from] SmcError),

    #[error("Angle sensor error: {0}")]
    Sensor(#[from] SensorError),

    #[error("Winch is not calibrated")]
    NotCalibrated,

    #[error("Zero angle and max angle are both {angle} degrees")]
    DegenerateCalibration { angle: i32 },
}

pub type Result<T> = std::result::Result<T, WinchError>;

/// Angle bounds of the rope travel, in degrees
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calibration {
    zero_angle: i32,
    max_angle: i32,
}

impl Calibration {
    /// `zero_angle` is fully reeled in (0 %), `max_angle` fully paid out (100 %)
    pub fn new(zero_angle: i32, max_angle: i32) -> Result<Self> {
        if zero_angle == max_angle {
            return Err(WinchError::DegenerateCalibration { angle: zero_angle });
        }
        Ok(Self {
            zero_angle,
            max_angle,
        })
    }

    pub fn zero_angle(&self) -> i32 {
        self.zero_angle
    }

    pub fn max_angle(&self) -> i32 {
        self.max_angle
    }

    /// True when `angle` sits on or beyond either end of travel
    pub fn at_limit(&self, angle: i32) -> bool {
        let lower = self.zero_angle.min(self.max_angle);
        let upper = self.zero_angle.max(self.max_angle);
        angle >= upper || angle <= lower
    }

    /// Angle corresponding to `percent` of the travel
    pub fn target_angle(&self, percent: i32) -> f64 {
        f64::from(self.zero_angle) + f64::from(percent) / 100.0 * self.span()
    }

    /// Position of `angle` as a percentage of the travel, truncated toward zero
    pub fn percent_of(&self, angle: i32) -> i32 {
        let offset = f64::from(angle) - f64::from(self.zero_angle);
        (100.0 * offset / self.span()) as i32
    }

    // Computed in f64 so any pair of i32 bounds is safe
    fn span(&self) -> f64 {
        f64::from(self.max_angle) - f64::from(self.zero_angle)
    }
}

/// Result of the last command passed to [`WinchController::set_speed`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedStatus {
    /// A speed frame was transmitted
    Sent,
    /// Same as the last transmitted speed, nothing sent
    Unchanged,
    /// Refused because the rope is at a travel limit
    AtLimit,
}

/// How a seek ended, with the measured position after stopping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOutcome {
    Converged(i32),
    LimitReached(i32),
    TimedOut(i32),
}

impl SeekOutcome {
    /// Achieved position percentage regardless of how the seek ended
    pub fn percent(&self) -> i32 {
        match *self {
            SeekOutcome::Converged(p) | SeekOutcome::LimitReached(p) | SeekOutcome::TimedOut(p) => p,
        }
    }

    pub fn is_converged(&self) -> bool {
        matches!(self, SeekOutcome::Converged(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum SeekExit {
    Converged,
    LimitReached,
    TimedOut,
}

impl SeekExit {
    fn with_percent(self, percent: i32) -> SeekOutcome {
        match self {
            SeekExit::Converged => SeekOutcome::Converged(percent),
            SeekExit::LimitReached => SeekOutcome::LimitReached(percent),
            SeekExit::TimedOut => SeekOutcome::TimedOut(percent),
        }
    }
}

/// Tuning of the seek loop
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekSettings {
    /// Angular error (degrees) accepted as "arrived"
    pub tolerance_deg: f64,
    /// Give up after this long
    pub timeout: Duration,
    /// Wait between sensor polls
    pub poll_interval: Duration,
}

impl Default for SeekSettings {
    fn default() -> Self {
        Self {
            tolerance_deg: ANGLE_TOLERANCE_DEG,
            timeout: SEEK_TIMEOUT,
            poll_interval: POLL_INTERVAL,
        }
    }
}

/// Pick the signed speed tier for an angular error of `dif` degrees
pub fn speed_tier(dif: f64, sign: i16) -> i16 {
    let magnitude = if dif > 90.0 {
        SPEED_FULL
    } else if dif > 40.0 {
        SPEED_HALF
    } else if dif > 15.0 {
        SPEED_QUARTER
    } else {
        SPEED_CREEP
    };
    sign * magnitude
}

/// Position controller for one winch motor
///
/// Owns its bus handle; wrap the port in [`smc::SharedBus`] when several
/// addressed controllers share one serial line.
pub struct WinchController<B: FrameSink, S: AnalogSource, C: Clock> {
    bus: B,
    sensor: S,
    clock: C,
    address: u8,
    calibration: Option<Calibration>,
    current_speed: i16,
    settings: SeekSettings,
}

impl<B: FrameSink, S: AnalogSource, C: Clock> WinchController<B, S, C> {
    /// Create a controller and take the motor controller out of safe-start
    pub fn new(bus: B, sensor: S, clock: C, address: u8) -> Result<Self> {
        Self::with_settings(bus, sensor, clock, address, SeekSettings::default())
    }

    /// Create with custom seek tuning
    pub fn with_settings(
        bus: B,
        sensor: S,
        clock: C,
        address: u8,
        settings: SeekSettings,
    ) -> Result<Self> {
        let mut controller = Self {
            bus,
            sensor,
            clock,
            address,
            calibration: None,
            current_speed: 0,
            settings,
        };
        controller.exit_safe_start()?;
        Ok(controller)
    }

    fn exit_safe_start(&mut self) -> Result<()> {
        debug!("Exiting safe-start on controller {}", self.address);
        self.bus
            .send_frame(&smc::exit_safe_start_frame(self.address))?;
        self.current_speed = 0;
        Ok(())
    }

    /// Set the angle bounds of the rope travel
    pub fn set_calibration(&mut self, zero_angle: i32, max_angle: i32) -> Result<()> {
        let calibration = Calibration::new(zero_angle, max_angle)?;
        info!(
            "Controller {} calibrated: zero={} max={}",
            self.address, zero_angle, max_angle
        );
        self.calibration = Some(calibration);
        Ok(())
    }

    pub fn calibration(&self) -> Option<Calibration> {
        self.calibration
    }

    /// Sample the sensor and convert to whole degrees
    pub fn read_angle(&mut self) -> Result<i32> {
        let raw = self.sensor.sample()?;
        Ok(sensor::raw_to_angle(raw))
    }

    /// Current rope position as a percentage of the calibrated travel
    pub fn read_position(&mut self) -> Result<i32> {
        let calibration = self.calibration.ok_or(WinchError::NotCalibrated)?;
        let angle = self.read_angle()?;
        Ok(calibration.percent_of(angle))
    }

    /// Re-send the safe-start exit, e.g. after a controller fault was cleared
    pub fn reset(&mut self) -> Result<()> {
        info!("Resetting controller {}", self.address);
        self.exit_safe_start()
    }

    /// Command a signed speed, unless the rope is at a travel limit.
    ///
    /// Repeating the last transmitted speed sends nothing.
    pub fn set_speed(&mut self, speed: i16) -> Result<SpeedStatus> {
        let calibration = self.calibration.ok_or(WinchError::NotCalibrated)?;
        let angle = self.read_angle()?;
        if calibration.at_limit(angle) {
            debug!(
                "Refusing speed {} on controller {}: angle {} at limit",
                speed, self.address, angle
            );
            return Ok(SpeedStatus::AtLimit);
        }
        self.transmit_speed(speed)
    }

    /// Bring the motor to zero speed. Not subject to the limit interlock.
    pub fn stop(&mut self) -> Result<SpeedStatus> {
        self.transmit_speed(0)
    }

    fn transmit_speed(&mut self, speed: i16) -> Result<SpeedStatus> {
        let speed = speed.signum() * smc::clamp_magnitude(speed) as i16;
        if speed == self.current_speed {
            return Ok(SpeedStatus::Unchanged);
        }

        self.bus
            .send_frame(&smc::speed_frame(self.address, speed))?;
        debug!("Controller {} speed {} -> {}", self.address, self.current_speed, speed);
        self.current_speed = speed;
        Ok(SpeedStatus::Sent)
    }

    /// Move the rope to `percent` (clamped to 0..=100) of its travel.
    ///
    /// Blocks for at most the configured timeout plus one poll. The motor is
    /// stopped before returning, including when the loop fails.
    pub fn seek_position(&mut self, percent: i32) -> Result<SeekOutcome> {
        let calibration = self.calibration.ok_or(WinchError::NotCalibrated)?;
        let percent = percent.clamp(0, 100);
        let end_angle = calibration.target_angle(percent);
        info!(
            "Controller {} seeking {}% (angle {:.1})",
            self.address, percent, end_angle
        );

        let exit = self.drive_to(end_angle, &calibration);
        let stopped = self.stop();
        let exit = exit?;
        stopped?;

        let final_angle = self.read_angle()?;
        let outcome = exit.with_percent(calibration.percent_of(final_angle));
        match outcome {
            SeekOutcome::Converged(p) => info!("Controller {} settled at {}%", self.address, p),
            SeekOutcome::LimitReached(p) => {
                warn!("Controller {} stopped at travel limit ({}%)", self.address, p)
            }
            SeekOutcome::TimedOut(p) => warn!(
                "Controller {} timed out after {:?} at {}% (wanted {}%)",
                self.address, self.settings.timeout, p, percent
            ),
        }
        Ok(outcome)
    }

    fn drive_to(&mut self, end_angle: f64, calibration: &Calibration) -> Result<SeekExit> {
        let started = self.clock.now_ms();
        let timeout_ms = self.settings.timeout.as_millis() as u64;

        loop {
            let angle = self.read_angle()?;
            let dif = (end_angle - f64::from(angle)).abs();

            if dif <= self.settings.tolerance_deg {
                return Ok(SeekExit::Converged);
            }
            if calibration.at_limit(angle) {
                return Ok(SeekExit::LimitReached);
            }
            if self.clock.now_ms().saturating_sub(started) > timeout_ms {
                return Ok(SeekExit::TimedOut);
            }

            let sign = if end_angle > f64::from(angle) { 1 } else { -1 };
            let speed = speed_tier(dif, sign);
            debug!("angle={} error={:.1} speed={}", angle, dif, speed);
            self.set_speed(speed)?;

            self.clock.sleep(self.settings.poll_interval);
        }
    }

    /// Last speed actually transmitted
    pub fn current_speed(&self) -> i16 {
        self.current_speed
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn settings(&self) -> SeekSettings {
        self.settings
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<B: FrameSink, S: AnalogSource, C: Clock> Drop for WinchController<B, S, C> {
    fn drop(&mut self) {
        // Leave the motor stopped when the controller goes away
        if let Err(e) = self.stop() {
            warn!("Failed to stop controller {} on drop: {}", self.address, e);
        }
    }
}
