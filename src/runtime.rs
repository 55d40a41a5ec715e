// 20 Hz telemetry loop that also executes winch commands
// Note: a seek blocks the loop for up to the seek timeout; commands that arrive
// meanwhile queue in the subscriber and run on the next tick.

use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::config::{WinchConfig, LOOP_HZ, TOPIC_ANGLE, TOPIC_CMD, TOPIC_HEALTH, TOPIC_SEEK};
use crate::messages::{AngleSample, RuntimeHealth, SeekReport, WinchCommand};
use crate::winch::{
    AnalogSource, Clock, FrameSink, IioAnalog, MonotonicClock, SmcBus, WinchController, WinchError,
};

pub struct Runtime<B: FrameSink, S: AnalogSource, C: Clock> {
    controller: WinchController<B, S, C>,
    health: RuntimeHealth,
}

impl<B: FrameSink, S: AnalogSource, C: Clock> Runtime<B, S, C> {
    pub fn new(controller: WinchController<B, S, C>) -> Self {
        let health = if controller.calibration().is_some() {
            RuntimeHealth::Ok
        } else {
            RuntimeHealth::Uncalibrated
        };
        Self { controller, health }
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    pub fn controller(&self) -> &WinchController<B, S, C> {
        &self.controller
    }

    /// Execute one command; returns a report for seeks that completed
    pub fn on_command(&mut self, cmd: WinchCommand) -> Option<SeekReport> {
        info!("Received command: {:?}", &cmd);
        let touches_bus = !matches!(cmd, WinchCommand::Calibrate { .. });
        let result = match cmd {
            WinchCommand::Seek { percent } => self
                .controller
                .seek_position(percent)
                .map(|outcome| Some(SeekReport::new(percent, outcome))),
            WinchCommand::Calibrate {
                zero_angle,
                max_angle,
            } => self
                .controller
                .set_calibration(zero_angle, max_angle)
                .map(|()| None),
            WinchCommand::Reset => self.controller.reset().map(|()| None),
            WinchCommand::Stop => self.controller.stop().map(|_| None),
        };

        match result {
            Ok(report) => {
                if touches_bus || self.health != RuntimeHealth::BusFault {
                    self.mark_ok();
                }
                report
            }
            Err(e) => {
                self.record_error(&e);
                None
            }
        }
    }

    /// Read the current angle for telemetry
    pub fn sample_angle(&mut self) -> Option<AngleSample> {
        match self.controller.read_angle() {
            Ok(angle) => {
                // A good sample says nothing about the bus
                if self.health != RuntimeHealth::BusFault {
                    self.mark_ok();
                }
                Some(AngleSample {
                    angle,
                    percent: self.controller.calibration().map(|c| c.percent_of(angle)),
                })
            }
            Err(e) => {
                self.record_error(&e);
                None
            }
        }
    }

    fn mark_ok(&mut self) {
        self.health = if self.controller.calibration().is_some() {
            RuntimeHealth::Ok
        } else {
            RuntimeHealth::Uncalibrated
        };
    }

    fn record_error(&mut self, e: &WinchError) {
        let health = match e {
            WinchError::Bus(_) => RuntimeHealth::BusFault,
            WinchError::Sensor(_) => RuntimeHealth::SensorFault,
            WinchError::NotCalibrated => RuntimeHealth::Uncalibrated,
            // Rejected command, hardware is still fine
            WinchError::DegenerateCalibration { .. } => self.health,
        };
        if health != self.health {
            warn!("Health {:?} -> {:?}: {}", self.health, health, e);
        } else {
            warn!("Command failed: {}", e);
        }
        self.health = health;
    }
}

pub type HardwareController = WinchController<SmcBus, IioAnalog, MonotonicClock>;
pub type HardwareRuntime = Runtime<SmcBus, IioAnalog, MonotonicClock>;

/// Open the motor bus and sensor described by `config` and apply its calibration
pub fn open_controller(config: &WinchConfig) -> Result<HardwareController, WinchError> {
    info!("Opening motor bus on {} @ {} baud", config.port, config.baudrate);
    let bus = SmcBus::open_with_baudrate(&config.port, config.baudrate)?;
    let sensor = IioAnalog::with_full_scale(&config.sensor_path, config.sensor_full_scale);
    info!("Angle sensor at {:?}", sensor.path());

    let mut controller = WinchController::with_settings(
        bus,
        sensor,
        MonotonicClock::new(),
        config.address,
        config.seek_settings(),
    )?;
    if let Some(calibration) = config.calibration {
        controller.set_calibration(calibration.zero_angle, calibration.max_angle)?;
    }
    Ok(controller)
}

/// Bring up the winch described by `config`
pub fn open_hardware(config: &WinchConfig) -> Result<HardwareRuntime, WinchError> {
    Ok(Runtime::new(open_controller(config)?))
}

pub async fn run(config: WinchConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut runtime = open_hardware(&config)?;

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let subscriber = session.declare_subscriber(TOPIC_CMD).await?;
    let pub_seek = session.declare_publisher(TOPIC_SEEK).await?;
    let pub_angle = session.declare_publisher(TOPIC_ANGLE).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        "Runtime started: {}Hz loop, controller address {}",
        LOOP_HZ, config.address
    );
    info!("Subscribed to: {}", TOPIC_CMD);
    info!(
        "Publishing to: {}, {}, {}",
        TOPIC_SEEK, TOPIC_ANGLE, TOPIC_HEALTH
    );

    // One listener for the whole run so a Ctrl-C during a seek is not lost
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
        }

        // 1. Run all pending commands in arrival order
        while let Ok(Some(sample)) = subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            let cmd = match serde_json::from_slice::<WinchCommand>(&payload) {
                Ok(cmd) => cmd,
                Err(e) => {
                    warn!("Failed to parse command: {}", e);
                    continue;
                }
            };

            // Seeks poll the sensor synchronously
            let report = tokio::task::block_in_place(|| runtime.on_command(cmd));
            if let Some(report) = report {
                pub_seek.put(serde_json::to_string(&report)?).await?;
            }
        }

        // 2. Angle telemetry
        if let Some(angle) = runtime.sample_angle() {
            pub_angle.put(serde_json::to_string(&angle)?).await?;
        }

        // 3. Publish health
        let health_json = serde_json::to_string(&runtime.health())?;
        pub_health.put(health_json).await?;
    }

    // Dropping the runtime stops the motor
    drop(runtime);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::winch::{sensor, smc, SeekOutcome};
    use crate::messages::SeekResult;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    struct Wire(Rc<RefCell<Vec<Vec<u8>>>>);

    impl FrameSink for Wire {
        fn send_frame(&mut self, frame: &[u8]) -> smc::Result<()> {
            self.0.borrow_mut().push(frame.to_vec());
            Ok(())
        }
    }

    /// Sensor stuck at one raw value, or failing when `None`
    struct Fixed(Rc<Cell<Option<u16>>>);

    impl AnalogSource for Fixed {
        fn sample(&mut self) -> sensor::Result<u16> {
            self.0.get().ok_or(sensor::SensorError::OutOfRange {
                value: 9999,
                full_scale: 1023,
            })
        }
    }

    struct Ticker(Cell<u64>);

    impl Clock for Ticker {
        fn now_ms(&self) -> u64 {
            self.0.get()
        }

        fn sleep(&self, duration: Duration) {
            self.0.set(self.0.get() + duration.as_millis() as u64);
        }
    }

    fn runtime(
        raw: Option<u16>,
    ) -> (
        Runtime<Wire, Fixed, Ticker>,
        Rc<RefCell<Vec<Vec<u8>>>>,
        Rc<Cell<Option<u16>>>,
    ) {
        let frames = Rc::new(RefCell::new(Vec::new()));
        let raw = Rc::new(Cell::new(raw));
        let controller = WinchController::new(
            Wire(frames.clone()),
            Fixed(raw.clone()),
            Ticker(Cell::new(0)),
            13,
        )
        .unwrap();
        (Runtime::new(controller), frames, raw)
    }

    #[test]
    fn test_starts_uncalibrated() {
        let (mut runtime, _, _) = runtime(Some(717));
        assert_eq!(runtime.health(), RuntimeHealth::Uncalibrated);
        assert_eq!(
            runtime.sample_angle(),
            Some(AngleSample {
                angle: 90,
                percent: None
            })
        );
        assert_eq!(runtime.on_command(WinchCommand::Seek { percent: 10 }), None);
        assert_eq!(runtime.health(), RuntimeHealth::Uncalibrated);
    }

    #[test]
    fn test_calibrate_then_seek() {
        let (mut runtime, _, _) = runtime(Some(717));
        runtime.on_command(WinchCommand::Calibrate {
            zero_angle: 0,
            max_angle: 180,
        });
        assert_eq!(runtime.health(), RuntimeHealth::Ok);

        let report = runtime
            .on_command(WinchCommand::Seek { percent: 50 })
            .unwrap();
        assert_eq!(report, SeekReport::new(50, SeekOutcome::Converged(50)));
        assert_eq!(report.outcome, SeekResult::Converged);
    }

    #[test]
    fn test_frozen_sensor_reports_timeout() {
        let (mut runtime, frames, _) = runtime(Some(717));
        runtime.on_command(WinchCommand::Calibrate {
            zero_angle: 0,
            max_angle: 180,
        });

        let report = runtime
            .on_command(WinchCommand::Seek { percent: 10 })
            .unwrap();
        assert_eq!(report.outcome, SeekResult::TimedOut);
        assert_eq!(report.achieved, 50);
        assert_eq!(frames.borrow().last().unwrap(), &vec![0xAA, 13, 0x85, 0, 0]);
    }

    #[test]
    fn test_sensor_fault_and_recovery() {
        let (mut runtime, frames, raw) = runtime(Some(717));
        runtime.on_command(WinchCommand::Calibrate {
            zero_angle: 0,
            max_angle: 180,
        });

        raw.set(None);
        assert_eq!(runtime.sample_angle(), None);
        assert_eq!(runtime.health(), RuntimeHealth::SensorFault);

        raw.set(Some(717));
        runtime.on_command(WinchCommand::Reset);
        assert_eq!(runtime.health(), RuntimeHealth::Ok);
        assert_eq!(frames.borrow().last().unwrap(), &vec![0xAA, 13, 0x03]);
    }

    /// Accepts safe-start frames but fails every speed frame
    struct BrokenWire;

    impl FrameSink for BrokenWire {
        fn send_frame(&mut self, frame: &[u8]) -> smc::Result<()> {
            if frame.len() == 5 {
                return Err(smc::SmcError::Io(std::io::Error::other("line down")));
            }
            Ok(())
        }
    }

    #[test]
    fn test_bus_fault_survives_angle_sample() {
        let controller = WinchController::new(
            BrokenWire,
            Fixed(Rc::new(Cell::new(Some(717)))),
            Ticker(Cell::new(0)),
            13,
        )
        .unwrap();
        let mut runtime = Runtime::new(controller);
        runtime.on_command(WinchCommand::Calibrate {
            zero_angle: 0,
            max_angle: 180,
        });

        assert_eq!(runtime.on_command(WinchCommand::Seek { percent: 10 }), None);
        assert_eq!(runtime.health(), RuntimeHealth::BusFault);

        // Telemetry tick after the failed seek
        assert!(runtime.sample_angle().is_some());
        assert_eq!(runtime.health(), RuntimeHealth::BusFault);

        // Recalibrating does not write to the bus either
        runtime.on_command(WinchCommand::Calibrate {
            zero_angle: 0,
            max_angle: 170,
        });
        assert_eq!(runtime.health(), RuntimeHealth::BusFault);

        // A successful reset frame clears it
        runtime.on_command(WinchCommand::Reset);
        assert_eq!(runtime.health(), RuntimeHealth::Ok);
    }

    #[test]
    fn test_extreme_calibration_does_not_panic() {
        let (mut runtime, _, _) = runtime(Some(717));
        runtime.on_command(WinchCommand::Calibrate {
            zero_angle: i32::MIN,
            max_angle: i32::MAX,
        });
        assert_eq!(
            runtime.sample_angle(),
            Some(AngleSample {
                angle: 90,
                percent: Some(50)
            })
        );
    }

    #[test]
    fn test_open_controller_uses_configured_port() {
        let config = WinchConfig {
            port: "/dev/winch-port-that-does-not-exist".to_string(),
            baudrate: 19200,
            ..WinchConfig::default()
        };
        assert!(matches!(open_controller(&config), Err(WinchError::Bus(_))));
    }

    #[test]
    fn test_bad_calibration_keeps_health() {
        let (mut runtime, _, _) = runtime(Some(717));
        runtime.on_command(WinchCommand::Calibrate {
            zero_angle: 30,
            max_angle: 30,
        });
        assert_eq!(runtime.health(), RuntimeHealth::Uncalibrated);
        assert!(runtime.controller().calibration().is_none());
    }
}
