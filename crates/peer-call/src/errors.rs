//! Peer Call error types.
//!
//! Most failures inside a running session are recoverable and are absorbed
//! by the retry loops; they surface only as log lines, session events and
//! metrics. The variants here are what callers of the supervisor handle can
//! observe directly.

use crate::transport::{CaptureError, TransportError};
use common::error::IdentityError;
use thiserror::Error;

/// Peer Call error type.
#[derive(Debug, Clone, Error)]
pub enum CallError {
    /// Identity or call route could not be resolved.
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    /// Capture device acquisition failed.
    #[error("Capture error: {0}")]
    Capture(String),

    /// The media connection reported an error.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A newer request replaced this one before it completed.
    #[error("Request superseded by a newer one")]
    Superseded,

    /// The session is tearing down and no longer accepts requests.
    #[error("Session is shutting down")]
    ShuttingDown,
}

impl CallError {
    /// Whether the session keeps running after this error.
    ///
    /// Identity errors are fatal at startup. Everything else except a
    /// stopped session is retried or reported without stopping the
    /// supervisor.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, CallError::Identity(_) | CallError::ShuttingDown)
    }

    /// Returns a bounded label string for the error variant (for metrics).
    pub fn kind(&self) -> &'static str {
        match self {
            CallError::Identity(_) => "identity",
            CallError::Capture(_) => "capture",
            CallError::Transport(_) => "transport",
            CallError::Superseded => "superseded",
            CallError::ShuttingDown => "shutting_down",
        }
    }
}

impl From<CaptureError> for CallError {
    fn from(err: CaptureError) -> Self {
        CallError::Capture(err.to_string())
    }
}

impl From<TransportError> for CallError {
    fn from(err: TransportError) -> Self {
        CallError::Transport(err.to_string())
    }
}
