// Keyboard teleop: W/S pay out / reel in, R/F step size, C stop, X reset, Q quit
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::Duration;
use tracing::info;
use winch_runtime::config::TOPIC_CMD;
use winch_runtime::messages::WinchCommand;

const STEPS: [i32; 3] = [1, 5, 20]; // percent of travel per key press

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_CMD).await?;

    info!("Controls: W=pay out, S=reel in, R/F=step size, C=stop, X=reset, Q=quit");
    info!("Step: {}%", STEPS[0]);

    enable_raw_mode()?;
    let result = run_teleop(&publisher).await;
    disable_raw_mode()?;

    result
}

async fn run_teleop(
    publisher: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut step_idx: usize = 0;
    let mut target: i32 = 50;

    loop {
        if !event::poll(Duration::from_millis(50))? {
            continue;
        }
        let Event::Key(KeyEvent { code, kind, .. }) = event::read()? else {
            continue;
        };
        if kind != KeyEventKind::Press {
            continue;
        }

        let cmd = match code {
            KeyCode::Char('w') => {
                target = (target + STEPS[step_idx]).min(100);
                WinchCommand::Seek { percent: target }
            }
            KeyCode::Char('s') => {
                target = (target - STEPS[step_idx]).max(0);
                WinchCommand::Seek { percent: target }
            }
            KeyCode::Char('c') => WinchCommand::Stop,
            KeyCode::Char('x') => WinchCommand::Reset,

            KeyCode::Char('r') => {
                step_idx = (step_idx + 1).min(STEPS.len() - 1);
                info!("Step: {}%", STEPS[step_idx]);
                continue;
            }
            KeyCode::Char('f') => {
                step_idx = step_idx.saturating_sub(1);
                info!("Step: {}%", STEPS[step_idx]);
                continue;
            }

            KeyCode::Char('q') | KeyCode::Esc => break,
            _ => continue,
        };

        info!("Sending {:?}", cmd);
        publisher.put(serde_json::to_string(&cmd)?).await?;
    }

    Ok(())
}
