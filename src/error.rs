//! Error types for CRI connector operations

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CriError>;

#[derive(Error, Debug)]
pub enum CriError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("CRI protocol error: {0}")]
    Protocol(String),

    #[error("Invalid parameter: {0}")]
    Parameter(String),

    #[error("Active control not granted: {0}")]
    ControlDenied(String),

    #[error("Command {id} rejected by the controller: {reason}")]
    CommandRejected { id: u32, reason: String },

    #[error("Motion command {id} did not finish within {timeout_ms} ms")]
    MotionTimeout { id: u32, timeout_ms: u64 },

    #[error("Motion command {id} failed: {reason}")]
    MotionFailed { id: u32, reason: String },

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Tokio task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
