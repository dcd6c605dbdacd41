//! Asynchronous CRI connector for iRC robot controllers
//!
//! This library speaks the CRI ASCII interface of an iRC robot controller
//! over TCP and exposes it through scoped sessions: a passive observe
//! session for state visibility and an exclusive control session for
//! motion commands. Sessions release the underlying connection (and, for
//! control sessions, motion authority) on every exit path.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use cri_connector::{CriConnector, MoveOptions};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connector = CriConnector::new("192.168.3.11", 3921);
//!
//!     // Passive state read
//!     let observer = connector.observe().await?;
//!     println!("{}", observer.robot_state());
//!     observer.close();
//!
//!     // Exclusive control
//!     let mut controller = connector.control().await?;
//!     controller.set_override(50.0).await?;
//!     controller
//!         .move_base_relative(
//!             [10.0, 0.0, 0.0, 0.0, 0.0, 0.0],
//!             [0.0, 0.0, 0.0],
//!             25.0,
//!             MoveOptions::wait(Duration::from_millis(5000)),
//!         )
//!         .await?;
//!     controller.close().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **CriConnector**: session factory for one controller endpoint
//! - **ObserveSession / ControlSession**: scoped sessions with guaranteed
//!   release of connection and control authority
//! - **Session transport**: reader, writer and keepalive tasks over one
//!   TCP connection
//! - **Protocol**: CRI frame encoding, extraction and parsing

pub mod config;
pub mod connector;
pub mod error;
pub mod protocol;
mod session;
pub mod state;

// High-level exports for easy usage
pub use config::{ConnectionConfig, ConnectorConfig, DEFAULT_CRI_PORT};
pub use connector::{ControlSession, CriConnector, MoveOptions, ObserveSession};
pub use error::{CriError, Result};
pub use state::{kinematics_state_name, operation_mode_name, RobotState};

// Protocol exports for advanced usage and test doubles
pub use protocol::{Message, MessageCounter, MessageParser};
