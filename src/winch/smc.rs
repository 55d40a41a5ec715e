// Pololu-style compact serial protocol for the winch motor controller
//
// Frames are fire-and-forget, there is no response to read back:
//   exit safe-start: [0xAA, address, 0x03]
//   forward speed:   [0xAA, address, 0x85, magnitude & 0x1F, magnitude >> 5]
//   reverse speed:   [0xAA, address, 0x86, magnitude & 0x1F, magnitude >> 5]

use parking_lot::Mutex;
use serialport::{self, SerialPort};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default serial configuration for the motor controller
pub const DEFAULT_BAUDRATE: u32 = 9600;
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

/// Start byte of every compact-protocol frame
const START_BYTE: u8 = 0xAA;

/// Largest speed magnitude that still splits into two 7-bit data bytes
pub const MAX_SPEED_MAGNITUDE: u16 = 0x0FFF;

/// Command bytes understood by the controller
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    ExitSafeStart = 0x03,
    MotorForward = 0x85,
    MotorReverse = 0x86,
}

/// Error types for motor controller communication
#[derive(Debug, thiserror::Error)]
pub enum SmcError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SmcError>;

/// Anything that can carry whole protocol frames to the motor controller.
///
/// A frame must reach the wire contiguously; implementations that share a
/// port between writers have to serialize whole frames, not bytes.
pub trait FrameSink {
    fn send_frame(&mut self, frame: &[u8]) -> Result<()>;
}

/// Build the frame that takes the controller out of safe-start mode
pub fn exit_safe_start_frame(address: u8) -> [u8; 3] {
    [START_BYTE, address, Command::ExitSafeStart as u8]
}

/// Build a signed speed frame.
///
/// Direction lives only in the command byte; the magnitude is split into
/// its low 5 bits and the remaining high bits.
pub fn speed_frame(address: u8, speed: i16) -> [u8; 5] {
    let command = if speed < 0 {
        Command::MotorReverse
    } else {
        Command::MotorForward
    };
    let magnitude = clamp_magnitude(speed);

    [
        START_BYTE,
        address,
        command as u8,
        (magnitude & 0x1F) as u8,
        (magnitude >> 5) as u8,
    ]
}

/// Saturate a signed speed to the magnitude the protocol can encode
pub fn clamp_magnitude(speed: i16) -> u16 {
    speed.unsigned_abs().min(MAX_SPEED_MAGNITUDE)
}

/// Serial connection to the motor controller
pub struct SmcBus {
    port: Box<dyn SerialPort>,
}

impl SmcBus {
    /// Open a new connection to the motor controller
    pub fn open(port_name: &str) -> Result<Self> {
        Self::open_with_baudrate(port_name, DEFAULT_BAUDRATE)
    }

    /// Open with custom baudrate
    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;

        Ok(Self { port })
    }
}

impl FrameSink for SmcBus {
    fn send_frame(&mut self, frame: &[u8]) -> Result<()> {
        debug!("Sending frame {:02X?}", frame);
        self.port.write_all(frame)?;
        self.port.flush()?;
        Ok(())
    }
}

/// A bus handle that several controllers (distinct addresses) can hold at once.
///
/// Each frame is written while holding the lock so frames from different
/// controllers never interleave on the wire.
pub struct SharedBus<B> {
    inner: Arc<Mutex<B>>,
}

impl<B> SharedBus<B> {
    pub fn new(bus: B) -> Self {
        Self {
            inner: Arc::new(Mutex::new(bus)),
        }
    }

    /// Run a closure with exclusive access to the underlying bus
    pub fn with<R>(&self, f: impl FnOnce(&mut B) -> R) -> R {
        f(&mut self.inner.lock())
    }
}

impl<B> Clone for SharedBus<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: FrameSink> FrameSink for SharedBus<B> {
    fn send_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.inner.lock().send_frame(frame)
    }
}
