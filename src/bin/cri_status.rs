//! CRI Status Client
//!
//! Command-line tool for reading the state of an iRC robot controller
//! through a passive observe session. Supports one-shot queries and
//! continuous watching in text or JSON form.

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use cri_connector::{ConnectorConfig, CriConnector, RobotState, DEFAULT_CRI_PORT};
use tracing::info;

#[derive(Parser)]
#[command(name = "cri-status")]
#[command(about = "Read the state of an iRC robot controller")]
#[command(version)]
struct Args {
    /// Controller host address
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Controller CRI port
    #[arg(long, default_value_t = DEFAULT_CRI_PORT)]
    port: u16,

    /// Path to a connector configuration file (overrides host/port)
    #[arg(short, long)]
    config: Option<String>,

    /// Keep printing state updates until interrupted
    #[arg(long)]
    watch: bool,

    /// Output format: text, json
    #[arg(long, default_value = "text")]
    format: String,

    /// Show verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn connector_config(&self) -> Result<ConnectorConfig> {
        match &self.config {
            Some(path) => ConnectorConfig::load_from_path(path)
                .with_context(|| format!("Failed to load {}", path)),
            None => Ok(ConnectorConfig::new(self.host.clone(), self.port)),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = args.connector_config()?;
    info!("Connecting to {}:{}", config.host, config.port);

    let connector = CriConnector::with_config(config);
    let mut observer = connector.observe().await?;

    print_state(&observer.robot_state(), &args.format)?;

    if args.watch {
        loop {
            tokio::select! {
                state = observer.next_state() => {
                    match state {
                        Some(state) => print_state(&state, &args.format)?,
                        None => {
                            info!("Connection closed by the controller");
                            break;
                        }
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted");
                    break;
                }
            }
        }
    }

    observer.close();
    Ok(())
}

fn print_state(state: &RobotState, format: &str) -> Result<()> {
    match format {
        "json" => println!("{}", serde_json::to_string(state)?),
        _ => println!("[{}] {}", Local::now().format("%H:%M:%S%.3f"), state),
    }
    Ok(())
}
