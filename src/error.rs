//! Error types for the typing relay
//!
//! Defines playback errors, connection-level errors, reporter send errors
//! and configuration errors. Uses thiserror for ergonomic error definitions.

use serde::Serialize;
use thiserror::Error;

use crate::session::Action;
use crate::types::{SessionId, SessionState};

/// Playback and control errors
///
/// Returned by the control surface. Validation errors are raised before
/// any session is created or touched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TypingError {
    /// Non-positive, non-finite or missing target speed
    #[error("WPM must be a positive number")]
    InvalidWpm,

    /// Nothing to type
    #[error("Text must not be empty")]
    EmptyText,

    /// No session registered under this id
    #[error("Session not found: {0}")]
    UnknownSession(SessionId),

    /// Explicit id on start is already registered
    #[error("Session already exists: {0}")]
    DuplicateSession(SessionId),

    /// Requested action is not legal from the current state
    #[error("Cannot {action} a {from} session")]
    InvalidStateTransition { from: SessionState, action: Action },

    /// The progress reporter could not deliver an event
    #[error("Transport failure: {0}")]
    TransportFailure(String),
}

/// Stable error kind exposed to API clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidWpm,
    EmptyText,
    UnknownSession,
    DuplicateSession,
    InvalidStateTransition,
    TransportFailure,
    /// Malformed client message (connection-level, not a playback error)
    InvalidMessage,
}

impl TypingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TypingError::InvalidWpm => ErrorKind::InvalidWpm,
            TypingError::EmptyText => ErrorKind::EmptyText,
            TypingError::UnknownSession(_) => ErrorKind::UnknownSession,
            TypingError::DuplicateSession(_) => ErrorKind::DuplicateSession,
            TypingError::InvalidStateTransition { .. } => ErrorKind::InvalidStateTransition,
            TypingError::TransportFailure(_) => ErrorKind::TransportFailure,
        }
    }

    /// HTTP-equivalent status for request/response API layers
    pub fn status_code(&self) -> u16 {
        match self {
            TypingError::InvalidWpm | TypingError::EmptyText => 400,
            TypingError::UnknownSession(_) => 404,
            TypingError::DuplicateSession(_) | TypingError::InvalidStateTransition { .. } => 409,
            TypingError::TransportFailure(_) => 502,
        }
    }
}

/// Connection-level errors
///
/// Fatal for the WebSocket connection they occur on.
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Reporter send errors
///
/// Occurs when the push channel behind a reporter is gone.
#[derive(Debug, Error)]
pub enum ReportError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,
}

impl From<ReportError> for TypingError {
    fn from(err: ReportError) -> Self {
        TypingError::TransportFailure(err.to_string())
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable held an unparseable value
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}
