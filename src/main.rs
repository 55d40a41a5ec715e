use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use winch_runtime::config::WinchConfig;

/// Rope winch position controller
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// JSON config file; built-in defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial port of the motor controller
    #[arg(short, long)]
    port: Option<String>,

    /// Device number of the motor controller on the serial line
    #[arg(short, long)]
    address: Option<u8>,

    /// IIO raw file of the angle sensor channel
    #[arg(short, long)]
    sensor: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> Result<WinchConfig, winch_runtime::config::ConfigError> {
        let mut config = match &self.config {
            Some(path) => WinchConfig::load(path)?,
            None => WinchConfig::default(),
        };
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(address) = self.address {
            config.address = address;
        }
        if let Some(sensor) = self.sensor {
            config.sensor_path = sensor;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let config = match Args::parse().into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Config error: {}", e);
            std::process::exit(2);
        }
    };

    if let Err(e) = winch_runtime::runtime::run(config).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
