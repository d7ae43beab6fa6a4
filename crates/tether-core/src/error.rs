use std::time::Duration;
use thiserror::Error;

/// Core error types for tether operations
#[derive(Error, Debug)]
pub enum TetherError {
    #[error("Failed to spawn process `{command}`: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Bridge failed: {0}")]
    BridgeFailed(String),

    #[error("Operation would block")]
    WouldBlock,

    #[error("Timeout occurred after {0:?}")]
    Timeout(Duration),

    #[error("End of stream")]
    EndOfStream,

    #[error("Platform API error (os error {code}): {message}")]
    PlatformApi { code: i32, message: String },

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Process management error: {0}")]
    ProcessError(String),

    #[error("Attach unavailable: {0}")]
    AttachUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl TetherError {
    /// Build a `SpawnFailed` for the given argument vector
    pub fn spawn_failed(command: &[String], source: std::io::Error) -> Self {
        TetherError::SpawnFailed {
            command: command.join(" "),
            source,
        }
    }

    /// Wrap an unexpected OS failure, keeping the OS-reported code
    pub fn platform(error: std::io::Error) -> Self {
        TetherError::PlatformApi {
            code: error.raw_os_error().unwrap_or(-1),
            message: error.to_string(),
        }
    }

    /// Check if the caller may simply retry the operation
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TetherError::WouldBlock | TetherError::Timeout(_))
    }

    /// Check if this error indicates a permanent failure
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            TetherError::SpawnFailed { .. }
                | TetherError::BridgeFailed(_)
                | TetherError::ConfigurationError(_)
        )
    }
}
