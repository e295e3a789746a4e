//! Typing relay library
//!
//! Replays text as a stream of keystrokes with human-like timing over a
//! WebSocket push channel.
//!
//! # Features
//! - Per-character delays derived from a target WPM with class-based jitter
//! - Live pause, resume, stop and speed changes
//! - Progress and completion events in strict cursor order
//! - Reproducible delay sequences from a seeded RNG
//!
//! # Architecture
//! Each session is driven by its own `PlaybackScheduler` task:
//! - The scheduler owns the session and is its only writer
//! - `TypingService` forwards control requests as messages to it
//! - `SessionRegistry` maps ids to scheduler handles, the only shared state
//! - Events leave through a `ProgressReporter`; the WebSocket handler
//!   provides a channel-backed one per connection
//!
//! # Example
//! ```ignore
//! use tokio::net::TcpListener;
//! use typing_relay::{handle_connection, Config, TypingService};
//!
//! #[tokio::main]
//! async fn main() {
//!     let service = TypingService::new(Config::default());
//!     let listener = TcpListener::bind("127.0.0.1:8080").await.unwrap();
//!
//!     while let Ok((stream, _)) = listener.accept().await {
//!         tokio::spawn(handle_connection(stream, service.clone()));
//!     }
//! }
//! ```

pub mod config;
pub mod delay;
pub mod error;
pub mod handler;
pub mod message;
pub mod registry;
pub mod reporter;
pub mod scheduler;
pub mod service;
pub mod session;
pub mod types;

// Re-export main types for convenience
pub use config::Config;
pub use delay::TypingProfile;
pub use error::{AppError, ConfigError, ErrorKind, ReportError, TypingError};
pub use handler::handle_connection;
pub use message::{ClientMessage, ServerMessage, StartRequest, StartResponse};
pub use registry::SessionRegistry;
pub use reporter::{ChannelReporter, ProgressReporter};
pub use scheduler::{PlaybackScheduler, SessionHandle, SessionStatus};
pub use service::{SessionSummary, TypingService};
pub use session::{Action, Session};
pub use types::{OwnerId, SessionId, SessionState, Wpm};
