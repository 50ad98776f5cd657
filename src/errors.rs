// SPDX-License-Identifier: GPL-3.0-only

//! Error types for depth capture sessions

use crate::backends::types::BackendError;
use crate::session::SessionState;
use crate::sinks::SinkError;
use std::fmt;

/// Result type alias using SessionError
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors reported by the session lifecycle controller
#[derive(Debug, Clone)]
pub enum SessionError {
    /// No live device is attached
    NoDeviceFound,
    /// The capture file or device could not be opened
    SourceUnavailable(String),
    /// A requested stream is not offered by the source
    UnsupportedStream(String),
    /// An output sink could not be built or started
    SinkOpenFailed(String),
    /// Operation not allowed in the current state
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
    /// Acquisition library failure while starting or stopping
    Backend(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::NoDeviceFound => write!(f, "No depth device found"),
            SessionError::SourceUnavailable(msg) => write!(f, "Source unavailable: {}", msg),
            SessionError::UnsupportedStream(msg) => write!(f, "Unsupported stream: {}", msg),
            SessionError::SinkOpenFailed(msg) => write!(f, "Failed to open output: {}", msg),
            SessionError::InvalidState { operation, state } => {
                write!(f, "Cannot {} while session is {}", operation, state)
            }
            SessionError::Backend(msg) => write!(f, "Backend error: {}", msg),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<BackendError> for SessionError {
    fn from(err: BackendError) -> Self {
        SessionError::Backend(err.to_string())
    }
}

impl From<SinkError> for SessionError {
    fn from(err: SinkError) -> Self {
        match err {
            SinkError::Open(msg) => SessionError::SinkOpenFailed(msg),
            other => SessionError::Backend(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_open_maps_to_sink_open_failed() {
        let err: SessionError = SinkError::Open("no filesink".into()).into();
        assert!(matches!(err, SessionError::SinkOpenFailed(_)));
    }

    #[test]
    fn test_invalid_state_message() {
        let err = SessionError::InvalidState {
            operation: "stop",
            state: SessionState::Idle,
        };
        assert_eq!(err.to_string(), "Cannot stop while session is Idle");
    }
}
