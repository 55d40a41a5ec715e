// Define message types for the runtime

use serde::{Deserialize, Serialize};

use crate::winch::SeekOutcome;

/// Command from teleop/scripts -> runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WinchCommand {
    /// Pay out (or reel in) to a percentage of the calibrated travel
    Seek { percent: i32 },
    Calibrate { zero_angle: i32, max_angle: i32 },
    Reset,
    Stop,
}

/// How a seek ended, as published on the wire
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeekResult {
    Converged,
    LimitReached,
    TimedOut,
}

/// Published after every seek command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeekReport {
    pub requested: i32,
    pub achieved: i32,
    pub outcome: SeekResult,
}

impl SeekReport {
    pub fn new(requested: i32, outcome: SeekOutcome) -> Self {
        let result = match outcome {
            SeekOutcome::Converged(_) => SeekResult::Converged,
            SeekOutcome::LimitReached(_) => SeekResult::LimitReached,
            SeekOutcome::TimedOut(_) => SeekResult::TimedOut,
        };
        Self {
            requested,
            achieved: outcome.percent(),
            outcome: result,
        }
    }
}

/// Periodic angle telemetry; `percent` is absent until calibrated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AngleSample {
    pub angle: i32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub percent: Option<i32>,
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    Uncalibrated,
    SensorFault,
    BusFault,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_json() {
        let cmd: WinchCommand = serde_json::from_str(r#"{"type":"seek","percent":40}"#).unwrap();
        assert_eq!(cmd, WinchCommand::Seek { percent: 40 });

        let cmd: WinchCommand = serde_json::from_str(r#"{"type":"reset"}"#).unwrap();
        assert_eq!(cmd, WinchCommand::Reset);

        let cmd: WinchCommand =
            serde_json::from_str(r#"{"type":"calibrate","zero_angle":-100,"max_angle":120}"#)
                .unwrap();
        assert_eq!(
            cmd,
            WinchCommand::Calibrate {
                zero_angle: -100,
                max_angle: 120
            }
        );

        assert!(serde_json::from_str::<WinchCommand>(r#"{"type":"spin"}"#).is_err());
    }

    #[test]
    fn test_seek_report_json() {
        let report = SeekReport::new(80, SeekOutcome::TimedOut(61));
        assert_eq!(
            serde_json::to_string(&report).unwrap(),
            r#"{"requested":80,"achieved":61,"outcome":"timed_out"}"#
        );
    }

    #[test]
    fn test_angle_sample_json() {
        let sample = AngleSample {
            angle: -12,
            percent: None,
        };
        assert_eq!(serde_json::to_string(&sample).unwrap(), r#"{"angle":-12}"#);
        assert_eq!(
            serde_json::to_string(&RuntimeHealth::SensorFault).unwrap(),
            r#""sensor_fault""#
        );
    }
}
