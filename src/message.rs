//! Message protocol definitions
//!
//! JSON-based bidirectional message protocol using Serde's tagged enums.
//! Client commands are tagged by `action`, server events by `type`.
//! The request/response shapes double as the control-plane contract for
//! request/response API layers.

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, TypingError};
use crate::session::Action;
use crate::types::{OwnerId, SessionId, Wpm};

/// Start request body
///
/// `custom_wpm` overrides the `profile` preset when present.
#[derive(Debug, Clone, Deserialize)]
pub struct StartRequest {
    pub text: String,
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub custom_wpm: Option<f64>,
    #[serde(default)]
    pub user_id: Option<OwnerId>,
    #[serde(default)]
    pub session_id: Option<SessionId>,
}

/// Successful start response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartResponse {
    pub session_id: SessionId,
}

/// Error response body with a stable kind and HTTP-equivalent status
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
    pub status: u16,
}

impl From<&TypingError> for ErrorBody {
    fn from(err: &TypingError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            status: err.status_code(),
        }
    }
}

/// Client → Server message
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start a new playback session
    StartTyping(StartRequest),
    /// Pause a running session
    PauseTyping { session_id: SessionId },
    /// Resume a paused session
    ResumeTyping { session_id: SessionId },
    /// Stop a session for good
    StopTyping { session_id: SessionId },
    /// Change the target speed of an active session
    UpdateSpeed { session_id: SessionId, wpm: f64 },
}

/// One emitted character
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CharEvent {
    pub character: char,
    pub index: usize,
    /// Delay waited before this character, in milliseconds
    pub delay: u64,
    pub total: usize,
}

/// Server → Client message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Connection established
    Connected { message: String },
    /// Session accepted and playback started
    SessionStarted { session_id: SessionId },
    /// A character was typed
    TypeChar {
        session_id: SessionId,
        #[serde(rename = "char")]
        character: char,
        index: usize,
        delay: u64,
        total: usize,
    },
    /// Percent of characters typed
    TypingProgress { session_id: SessionId, progress: f64 },
    /// Every character was typed
    TypingComplete {
        session_id: SessionId,
        total_chars: usize,
    },
    /// Pause acknowledged
    PauseCommand { session_id: SessionId, paused: bool },
    /// Resume acknowledged
    ResumeCommand { session_id: SessionId, resumed: bool },
    /// Stop acknowledged
    StopCommand { session_id: SessionId, stopped: bool },
    /// Speed change acknowledged
    SpeedUpdated { session_id: SessionId, wpm: Wpm },
    /// Error occurred
    Error { code: ErrorKind, message: String },
}

impl ServerMessage {
    pub fn type_char(session_id: SessionId, event: CharEvent) -> Self {
        ServerMessage::TypeChar {
            session_id,
            character: event.character,
            index: event.index,
            delay: event.delay,
            total: event.total,
        }
    }

    /// Acknowledgment for an accepted control action
    pub fn ack(session_id: SessionId, action: Action, wpm: Wpm) -> Option<Self> {
        let msg = match action {
            Action::Pause => ServerMessage::PauseCommand {
                session_id,
                paused: true,
            },
            Action::Resume => ServerMessage::ResumeCommand {
                session_id,
                resumed: true,
            },
            Action::Stop => ServerMessage::StopCommand {
                session_id,
                stopped: true,
            },
            Action::UpdateWpm => ServerMessage::SpeedUpdated { session_id, wpm },
            Action::Start => return None,
        };
        Some(msg)
    }

    /// Error message for a malformed client frame
    pub fn invalid_message(detail: impl std::fmt::Display) -> Self {
        ServerMessage::Error {
            code: ErrorKind::InvalidMessage,
            message: format!("Invalid message format: {}", detail),
        }
    }
}

/// Convert TypingError to ServerMessage for client notification
impl From<TypingError> for ServerMessage {
    fn from(err: TypingError) -> Self {
        ServerMessage::Error {
            code: err.kind(),
            message: err.to_string(),
        }
    }
}
