// Rope winch position control
//
// Provides:
// - Compact serial protocol for the motor controller
// - Analog angle sensor conversion and an IIO-backed sample source
// - Closed-loop rope length controller

mod controller;
pub mod clock;
pub mod sensor;
pub mod smc;

pub use clock::{Clock, MonotonicClock};
pub use controller::{
    speed_tier, Calibration, SeekOutcome, SeekSettings, SpeedStatus, WinchController, WinchError,
};
pub use sensor::{AnalogSource, IioAnalog, SensorError};
pub use smc::{FrameSink, SharedBus, SmcBus, SmcError};
