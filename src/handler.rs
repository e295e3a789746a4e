//! WebSocket connection handler
//!
//! Handles individual client connections: WebSocket handshake, command
//! parsing, and the outbound event stream. Every session started on a
//! connection reports through that connection and is stopped when it closes.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{AppError, TypingError};
use crate::message::{ClientMessage, ServerMessage};
use crate::reporter::{ChannelReporter, ProgressReporter};
use crate::service::TypingService;
use crate::types::{OwnerId, SessionId};

/// Handle a new TCP connection
///
/// Performs WebSocket handshake, runs the command loop, and stops the
/// connection's sessions on disconnect.
pub async fn handle_connection(stream: TcpStream, service: TypingService) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer_addr);

    // WebSocket handshake
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // Sessions without a user_id are owned by the connection
    let connection_owner = OwnerId(format!("conn-{}", Uuid::new_v4()));
    info!("Connection {} established from {}", connection_owner, peer_addr);

    // Channel for server -> client messages
    let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(service.config().channel_buffer);
    let reporter = ChannelReporter::new(msg_tx);

    let connected_msg = ServerMessage::Connected {
        message: "Connected to typing relay".to_string(),
    };
    let json = serde_json::to_string(&connected_msg)?;
    ws_sender.send(Message::Text(json.into())).await?;

    // Write task (ServerMessage -> WebSocket)
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = msg_rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json.into())).await.is_err() {
                        debug!("WebSocket send failed, ending write task");
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to serialize message: {}", e);
                }
            }
        }
        debug!("Write task ended");

        let _ = ws_sender.close().await;
    });

    let mut started = Vec::new();

    loop {
        tokio::select! {
            msg_result = ws_receiver.next() => {
                match msg_result {
                    Some(Ok(Message::Text(text))) => {
                        let reply = match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => {
                                dispatch(&service, &reporter, &connection_owner, client_msg, &mut started)
                                    .await
                                    .err()
                                    .map(ServerMessage::from)
                            }
                            Err(e) => {
                                warn!("Invalid JSON from {}: {}", connection_owner, e);
                                Some(ServerMessage::invalid_message(e))
                            }
                        };
                        if let Some(reply) = reply {
                            if reporter.send(reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Connection {} closed by client", connection_owner);
                        break;
                    }
                    Some(Ok(_)) => {
                        // Ping/Pong handled by tungstenite, binary ignored
                    }
                    Some(Err(e)) => {
                        error!("WebSocket error for {}: {}", connection_owner, e);
                        break;
                    }
                }
            }
            _ = &mut write_task => {
                debug!("Write task completed for {}", connection_owner);
                break;
            }
        }
    }

    for id in started {
        if service.stop(&id).await.is_ok() {
            debug!(session.id = %id, "Stopped session of closed connection");
        }
    }

    info!("Connection {} disconnected", connection_owner);

    Ok(())
}

/// Apply one client command
///
/// Returns the error to report back to the client, if any. Successful
/// commands are acknowledged by the session's own event stream.
async fn dispatch(
    service: &TypingService,
    reporter: &ChannelReporter,
    connection_owner: &OwnerId,
    msg: ClientMessage,
    started: &mut Vec<SessionId>,
) -> Result<(), TypingError> {
    match msg {
        ClientMessage::StartTyping(mut request) => {
            if request.user_id.is_none() {
                request.user_id = Some(connection_owner.clone());
            }
            let id = service.start(request, reporter.clone())?;
            started.push(id);
            Ok(())
        }
        ClientMessage::PauseTyping { session_id } => service.pause(&session_id).await,
        ClientMessage::ResumeTyping { session_id } => service.resume(&session_id).await,
        ClientMessage::StopTyping { session_id } => service.stop(&session_id).await,
        ClientMessage::UpdateSpeed { session_id, wpm } => service.update_wpm(&session_id, wpm).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::ErrorKind;
    use crate::types::SessionState;
    use std::time::Duration;
    use tokio::net::TcpListener;

    async fn next_json<S>(ws: &mut S) -> serde_json::Value
    where
        S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("Expected a text frame, got {:?}", other),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_start_and_control() {
        let service = TypingService::new(Config::default());
        let (tx, mut rx) = mpsc::channel(64);
        let reporter = ChannelReporter::new(tx);
        let owner = OwnerId::from("conn-test");
        let mut started = Vec::new();

        let start: ClientMessage = serde_json::from_str(
            r#"{"action": "start_typing", "text": "Hello.", "profile": "fast"}"#,
        )
        .unwrap();
        dispatch(&service, &reporter, &owner, start, &mut started).await.unwrap();
        assert_eq!(started.len(), 1);
        let id = started[0].clone();
        assert_eq!(service.registry().get(&id).unwrap().owner_id, owner);

        assert_eq!(
            rx.recv().await,
            Some(ServerMessage::SessionStarted { session_id: id.clone() })
        );

        let pause = ClientMessage::PauseTyping { session_id: id.clone() };
        dispatch(&service, &reporter, &owner, pause, &mut started).await.unwrap();

        let again = ClientMessage::PauseTyping { session_id: id.clone() };
        let err = dispatch(&service, &reporter, &owner, again, &mut started)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidStateTransition);

        let stop = ClientMessage::StopTyping { session_id: id.clone() };
        dispatch(&service, &reporter, &owner, stop, &mut started).await.unwrap();
        service.wait(&id).await.unwrap();

        let mut acks = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            acks.push(msg);
        }
        assert!(acks.contains(&ServerMessage::PauseCommand { session_id: id.clone(), paused: true }));
        assert_eq!(acks.last(), Some(&ServerMessage::StopCommand { session_id: id, stopped: true }));
    }

    #[tokio::test]
    async fn test_dispatch_errors() {
        let service = TypingService::new(Config::default());
        let (tx, _rx) = mpsc::channel(8);
        let reporter = ChannelReporter::new(tx);
        let owner = OwnerId::from("conn-test");
        let mut started = Vec::new();

        let bad_speed: ClientMessage = serde_json::from_str(
            r#"{"action": "start_typing", "text": "Hi", "custom_wpm": -3}"#,
        )
        .unwrap();
        let err = dispatch(&service, &reporter, &owner, bad_speed, &mut started)
            .await
            .unwrap_err();
        assert_eq!(err, TypingError::InvalidWpm);

        let unknown = ClientMessage::ResumeTyping { session_id: SessionId::from("ghost") };
        let err = dispatch(&service, &reporter, &owner, unknown, &mut started)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownSession);
        assert!(started.is_empty());
    }

    #[tokio::test]
    async fn test_connection_lifecycle() {
        let service = TypingService::new(Config::default());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = service.clone();
        let accept = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            handle_connection(stream, server).await
        });

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr))
            .await
            .unwrap();
        assert_eq!(next_json(&mut ws).await["type"], "connected");

        ws.send(Message::Text("not json".into())).await.unwrap();
        let reply = next_json(&mut ws).await;
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["code"], "invalid_message");

        // One word a minute, nothing is typed before the close
        let start = r#"{"action": "start_typing", "text": "Slow and steady.", "custom_wpm": 1.0, "session_id": "s1"}"#;
        ws.send(Message::Text(start.into())).await.unwrap();
        let reply = next_json(&mut ws).await;
        assert_eq!(reply["type"], "session_started");
        assert_eq!(reply["session_id"], "s1");

        ws.close(None).await.unwrap();
        let status = tokio::time::timeout(Duration::from_secs(5), service.wait(&SessionId::from("s1")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.state, SessionState::Stopped);
        assert_eq!(status.cursor, 0);

        accept.await.unwrap().unwrap();
    }
}
