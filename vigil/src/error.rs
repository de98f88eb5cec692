// vigil/src/error.rs
//
// Typed error kinds for the surveillance core.
//
// Propagation policy:
//   engine    surfaces Validation / InvalidTimestamp / Integrity, never swallows
//   audit     converts Check into a synthetic High finding, surfaces Cancelled
//   dispatch  swallows Channel per-channel, surfaces Validation
//
// Persisted artifacts never carry stack traces — only these messages.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VigilError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("integrity: {0}")]
    Integrity(String),

    #[error("check {check_id}: {reason}")]
    Check { check_id: String, reason: String },

    #[error("channel {channel}: {reason}")]
    Channel { channel: String, reason: String },

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl VigilError {
    /// Process exit code for the CLI: 0 success, 2 validation, 3 I/O, 4 cancellation.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) | Self::InvalidTimestamp(_) => 2,
            Self::Io(_)    => 3,
            Self::Cancelled => 4,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, VigilError>;
