// Winch diagnostic: READ-ONLY check of the angle sensor
//
// This tool does NOT write anything to the motor controller - it's completely safe.
// Use this first before running winch_test, and to find the calibration angles:
// reel the rope in by hand and note the angle, then pay it out fully and note again.
//
// Usage: cargo run --example winch_diagnostic -- [sensor_path] [zero_angle max_angle]
// Example: cargo run --example winch_diagnostic -- /sys/bus/iio/devices/iio:device0/in_voltage0_raw -150 160

use std::thread::sleep;
use std::time::Duration;
use winch_runtime::config::SENSOR_PATH;
use winch_runtime::winch::sensor::{raw_to_angle, AnalogSource, IioAnalog};
use winch_runtime::winch::Calibration;

const SAMPLES: usize = 50;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("debug".parse().unwrap()),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let path = args.first().cloned().unwrap_or_else(|| SENSOR_PATH.to_string());
    let calibration = match (args.get(1), args.get(2)) {
        (Some(zero), Some(max)) => Some(Calibration::new(zero.parse()?, max.parse()?)?),
        _ => None,
    };

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║            Winch Sensor Diagnostic (READ-ONLY)               ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  This tool only READS the angle sensor - no motor commands   ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("Sensor: {}", path);
    if let Some(c) = calibration {
        println!("Calibration: zero={} max={}", c.zero_angle(), c.max_angle());
    }
    println!();

    let mut adc = IioAnalog::new(&path);

    println!("Step 1: Reading one sample...");
    match adc.sample() {
        Ok(raw) => println!("  ✓ raw={} angle={}", raw, raw_to_angle(raw)),
        Err(e) => {
            println!("  ✗ Failed to read sensor: {}", e);
            println!();
            println!("Troubleshooting:");
            println!("  - Check the IIO device and channel number");
            println!("  - Verify the ADC driver is loaded (ls /sys/bus/iio/devices)");
            return Err(e.into());
        }
    }
    println!();

    println!("Step 2: Streaming {} samples (move the drum by hand)...", SAMPLES);
    let mut min_angle = i32::MAX;
    let mut max_angle = i32::MIN;
    for _ in 0..SAMPLES {
        let raw = adc.sample()?;
        let angle = raw_to_angle(raw);
        min_angle = min_angle.min(angle);
        max_angle = max_angle.max(angle);

        match calibration {
            Some(c) => println!(
                "  raw={:4} angle={:4} position={:4}%{}",
                raw,
                angle,
                c.percent_of(angle),
                if c.at_limit(angle) { "  [LIMIT]" } else { "" }
            ),
            None => println!("  raw={:4} angle={:4}", raw, angle),
        }
        sleep(Duration::from_millis(100));
    }

    println!();
    println!("Observed angle range: {}..{}", min_angle, max_angle);
    Ok(())
}
