//! Asynchronous control of an iRC robot
//!
//! Relevant for applications that need to perform other tasks concurrently
//! while controlling the robot, for example monitoring other inputs,
//! controlling other actuators, or coordinating with other systems.

use anyhow::Result;
use cri_connector::{CriConnector, MoveOptions};
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .init();

    // The connector creates passive or active control sessions with proper
    // resource management.
    let connector = CriConnector::new("127.0.0.1", 3921);

    // connect and read the state without taking control
    let observer = connector.observe().await?;
    info!("Current state is: {}", observer.robot_state());
    observer.close();

    // connect and take control
    let mut controller = connector.control().await?;
    controller.set_override(100.0).await?;

    // Perform relative movement
    info!("Moving base relative: +20mm in X, Y, Z...");
    controller
        .move_base_relative(
            [20.0, 20.0, 20.0, 0.0, 0.0, 0.0],
            [0.0, 0.0, 0.0],
            10.0,
            MoveOptions::wait(Duration::from_millis(1000)),
        )
        .await?;

    info!("Moving back: -20mm in X, Y, Z...");
    controller
        .move_base_relative(
            [-20.0, -20.0, -20.0, 0.0, 0.0, 0.0],
            [0.0, 0.0, 0.0],
            10.0,
            MoveOptions::wait(Duration::from_millis(1000)),
        )
        .await?;

    // release control and disconnect
    controller.close().await?;

    info!("Script execution completed successfully.");
    Ok(())
}
