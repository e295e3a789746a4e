//! Session struct definition
//!
//! One playback of a text at a (mutable) speed. A `Session` is owned by its
//! scheduler task; nothing else mutates it after creation.

use std::fmt;
use std::time::SystemTime;

use crate::error::TypingError;
use crate::types::{OwnerId, SessionId, SessionState, Wpm};

/// Control actions that can be requested on a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Pause,
    Resume,
    Stop,
    UpdateWpm,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Start => "start",
            Action::Pause => "pause",
            Action::Resume => "resume",
            Action::Stop => "stop",
            Action::UpdateWpm => "update speed of",
        };
        f.write_str(name)
    }
}

/// Next state for `action` taken from `from`, or an error if illegal
///
/// `UpdateWpm` keeps the state unchanged.
pub fn next_state(from: SessionState, action: Action) -> Result<SessionState, TypingError> {
    use SessionState::*;

    let to = match (from, action) {
        (Idle, Action::Start) => Running,
        (Running, Action::Pause) => Paused,
        (Paused, Action::Resume) => Running,
        (Running | Paused, Action::Stop) => Stopped,
        (Running | Paused, Action::UpdateWpm) => from,
        _ => return Err(TypingError::InvalidStateTransition { from, action }),
    };
    Ok(to)
}

/// Per-playback state
#[derive(Debug, Clone)]
pub struct Session {
    /// Unique identifier
    pub id: SessionId,
    /// Caller that owns this session
    pub owner_id: OwnerId,
    /// Characters to emit, fixed at creation
    text: Vec<char>,
    /// Index of the next character to emit
    cursor: usize,
    /// Current target speed
    pub wpm: Wpm,
    /// Lifecycle state
    state: SessionState,
    /// Creation time (informational)
    pub created_at: SystemTime,
}

impl Session {
    /// Create an idle session
    ///
    /// Fails with `EmptyText` if there is nothing to type.
    pub fn new(id: SessionId, owner_id: OwnerId, text: &str, wpm: Wpm) -> Result<Self, TypingError> {
        if text.is_empty() {
            return Err(TypingError::EmptyText);
        }
        Ok(Self {
            id,
            owner_id,
            text: text.chars().collect(),
            cursor: 0,
            wpm,
            state: SessionState::Idle,
            created_at: SystemTime::now(),
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Total number of characters
    pub fn total(&self) -> usize {
        self.text.len()
    }

    /// Next character to emit, if any remain
    pub fn current_char(&self) -> Option<char> {
        self.text.get(self.cursor).copied()
    }

    pub fn is_finished(&self) -> bool {
        self.cursor == self.text.len()
    }

    /// Percentage of characters emitted, in `[0, 100]`
    pub fn progress(&self) -> f64 {
        100.0 * self.cursor as f64 / self.text.len() as f64
    }

    /// Apply a control action, validating it against the current state
    pub fn apply(&mut self, action: Action) -> Result<SessionState, TypingError> {
        self.state = next_state(self.state, action)?;
        Ok(self.state)
    }

    /// Move past the current character
    ///
    /// Only legal while running.
    pub fn advance(&mut self) {
        if self.state != SessionState::Running || self.is_finished() {
            return;
        }
        self.cursor += 1;
    }

    /// Running session with every character emitted becomes Completed
    pub fn complete(&mut self) -> bool {
        if self.state == SessionState::Running && self.is_finished() {
            self.state = SessionState::Completed;
            return true;
        }
        false
    }

    /// Force a terminal stop regardless of the current state
    ///
    /// Used when the progress sink fails. Completed sessions stay completed.
    pub fn force_stop(&mut self) {
        if !self.state.is_terminal() {
            self.state = SessionState::Stopped;
        }
    }
}
