//! Basic type definitions for the typing relay
//!
//! Provides newtype wrappers for type safety:
//! - `SessionId`: caller-supplied or UUID-based session identifier
//! - `OwnerId`: opaque caller identifier used to route events
//! - `Wpm`: validated positive typing speed
//! - `SessionState`: playback lifecycle state

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TypingError;

/// Session identifier (newtype pattern)
///
/// Callers may pick their own id; otherwise a UUID v4 is generated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a new random session ID
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque owner (user) identifier
///
/// Only used to route progress events and to clean up after a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub String);

impl From<&str> for OwnerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Target typing speed in words per minute
///
/// Always finite and strictly positive once constructed.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Wpm(f64);

impl Wpm {
    /// Validate a raw speed value
    pub fn new(value: f64) -> Result<Self, TypingError> {
        if value.is_finite() && value > 0.0 {
            Ok(Self(value))
        } else {
            Err(TypingError::InvalidWpm)
        }
    }

    pub fn get(self) -> f64 {
        self.0
    }
}

impl fmt::Display for Wpm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Playback lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Running,
    Paused,
    Stopped,
    Completed,
}

impl SessionState {
    /// Stopped and Completed never transition again
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Stopped | SessionState::Completed)
    }

    /// Running or Paused
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Running | SessionState::Paused)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Running => "running",
            SessionState::Paused => "paused",
            SessionState::Stopped => "stopped",
            SessionState::Completed => "completed",
        };
        f.write_str(name)
    }
}
