//! Progress reporting
//!
//! The scheduler pushes every event through a `ProgressReporter`. The real
//! transport is a WebSocket connection's outbound channel; tests plug in a
//! recording double.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ReportError;
use crate::message::{CharEvent, ServerMessage};
use crate::types::SessionId;

/// Sink for per-character and lifecycle events
///
/// Events for one session arrive in cursor order. An error means the sink
/// is gone; the scheduler stops the session and does not retry.
#[async_trait]
pub trait ProgressReporter: Send + Sync + 'static {
    /// Deliver one message
    async fn send(&self, msg: ServerMessage) -> Result<(), ReportError>;

    async fn emit_char(&self, session_id: &SessionId, event: CharEvent) -> Result<(), ReportError> {
        self.send(ServerMessage::type_char(session_id.clone(), event))
            .await
    }

    async fn emit_progress(&self, session_id: &SessionId, progress: f64) -> Result<(), ReportError> {
        self.send(ServerMessage::TypingProgress {
            session_id: session_id.clone(),
            progress,
        })
        .await
    }

    async fn emit_complete(&self, session_id: &SessionId, total_chars: usize) -> Result<(), ReportError> {
        self.send(ServerMessage::TypingComplete {
            session_id: session_id.clone(),
            total_chars,
        })
        .await
    }
}

/// Reporter backed by a connection's outbound message channel
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    sender: mpsc::Sender<ServerMessage>,
}

impl ChannelReporter {
    pub fn new(sender: mpsc::Sender<ServerMessage>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl ProgressReporter for ChannelReporter {
    async fn send(&self, msg: ServerMessage) -> Result<(), ReportError> {
        self.sender
            .send(msg)
            .await
            .map_err(|_| ReportError::ChannelClosed)
    }
}
