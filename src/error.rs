//! Error types for the congestion gate.

use thiserror::Error;

use crate::congestion::PolicyError;

/// Main error type for congestion gate operations.
#[derive(Error, Debug)]
pub enum CongestionError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A policy update failed validation; state was left unchanged
    #[error("Invalid policy: {0}")]
    Policy(#[from] PolicyError),

    /// The control task is gone and can no longer apply updates
    #[error("Control channel closed")]
    ControlChannelClosed,

    /// An applied generation was not acknowledged within the configured timeout
    #[error("Policy generation {generation} not acknowledged within {timeout_ms}ms")]
    AckTimeout { generation: u64, timeout_ms: u64 },

    /// The control task did not answer in time. The update stays queued and
    /// may still be applied later.
    #[error("Policy update not confirmed within {timeout_ms}ms; it may still be applied")]
    UpdateTimeout { timeout_ms: u64 },

    /// gRPC server errors
    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::transport::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for CongestionError {
    fn from(err: config::ConfigError) -> Self {
        CongestionError::Config(err.to_string())
    }
}

/// Result type alias for congestion gate operations.
pub type Result<T> = std::result::Result<T, CongestionError>;
