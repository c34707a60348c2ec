//! The `/pty` (or configured `namespace`) WebSocket transport: event-named
//! JSON frames, one room per `session_id`.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use termhub_core::protocol::{decode_bytes, ClientFrame, ServerFrame};
use termhub_core::TermhubError;

use crate::AppState;

/// Per-connection outbound queue capacity. Bounded so a stalled socket write
/// can't grow the queue without limit; a full queue disconnects the slow
/// consumer instead of blocking the room's broadcast or another connection's
/// reply (spec §4.5 Backpressure).
const SEND_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    pub session_id: Option<String>,
}

/// A `session_id` query param naming an absent session is rejected before
/// the WebSocket upgrade completes; a missing param is allowed through
/// (the connection may still issue `create_session`) but joins no room.
pub async fn handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> Response {
    if let Some(id) = &params.session_id {
        if !state.registry.contains(id).await {
            warn!(session_id = %id, "rejecting connect: unknown session_id");
            return (StatusCode::NOT_FOUND, "unknown session_id").into_response();
        }
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state, params.session_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, room_session_id: Option<String>) {
    let conn_id = state.connections.next();
    info!(conn_id, session_id = ?room_session_id, "websocket connected");

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(SEND_QUEUE_CAPACITY);

    let forward_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    let mut room_rx = match &room_session_id {
        Some(id) => match state.registry.get(id).await {
            Some(session) => Some(session.room.join(conn_id)),
            None => None,
        },
        None => None,
    };

    let room_forward_tx = tx.clone();
    let room_forward_task = room_rx.take().map(|mut room_rx| {
        tokio::spawn(async move {
            loop {
                match room_rx.recv().await {
                    Ok(bytes) => {
                        match room_forward_tx.try_send(Message::Text(bytes_to_text(bytes))) {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(_)) => {
                                warn!(conn_id, "disconnecting slow consumer: send queue full");
                                break;
                            }
                            Err(mpsc::error::TrySendError::Closed(_)) => break,
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    });

    loop {
        let msg = match stream.next().await {
            Some(msg) => msg,
            None => break,
        };
        match msg {
            Ok(Message::Text(text)) => {
                if !handle_client_text(&text, &state, &tx).await {
                    warn!(conn_id, "disconnecting slow consumer: send queue full");
                    break;
                }
            }
            Ok(Message::Binary(_)) => {
                debug!(conn_id, "ignoring binary frame; protocol is JSON text only");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => break,
            Err(e) => {
                warn!(conn_id, error = %e, "websocket error");
                break;
            }
        }
    }

    if let Some(id) = &room_session_id {
        if let Some(session) = state.registry.get(id).await {
            session.room.leave(conn_id);
        }
    }
    if let Some(handle) = room_forward_task {
        handle.abort();
    }
    forward_task.abort();
    info!(conn_id, "websocket disconnected");
}

fn bytes_to_text(bytes: Bytes) -> String {
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Returns `false` when the connection's send queue was full and the caller
/// should disconnect this (slow) consumer.
async fn handle_client_text(text: &str, state: &AppState, tx: &mpsc::Sender<Message>) -> bool {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            debug!(error = %e, "dropping malformed client frame");
            return true;
        }
    };

    match frame {
        ClientFrame::CreateSession {
            command,
            args,
            cwd,
            env,
            rows,
            cols,
        } => {
            let params = termhub_core::CreateSessionParams {
                command,
                args,
                cwd,
                env,
                rows: rows.unwrap_or(24),
                cols: cols.unwrap_or(80),
            };
            let reply = match state.registry.create_session(params).await {
                Ok(session_id) => ServerFrame::CreateSessionAck { session_id },
                Err(TermhubError::Capacity { limit }) => ServerFrame::CreateSessionError {
                    error: "session_limit_reached".to_string(),
                    limit,
                },
                Err(e) => ServerFrame::CreateSessionError {
                    error: e.to_string(),
                    limit: state.registry.config().max_sessions,
                },
            };
            send_frame(tx, &reply)
        }
        ClientFrame::PtyInput { session_id, input } => {
            match decode_bytes(&input) {
                Ok(bytes) => {
                    if let Err(e) = state.registry.send_input(&session_id, &bytes).await {
                        debug!(session_id, error = %e, "pty-input dropped");
                    }
                }
                Err(e) => debug!(session_id, error = %e, "pty-input payload was not valid base64"),
            }
            true
        }
        ClientFrame::Resize {
            session_id,
            rows,
            cols,
        } => {
            if let Err(e) = state.registry.resize_session(&session_id, rows, cols).await {
                debug!(session_id, error = %e, "resize dropped");
            }
            true
        }
        ClientFrame::Heartbeat { session_id } => {
            if let Err(e) = state.registry.heartbeat(&session_id).await {
                debug!(session_id, error = %e, "heartbeat dropped");
            }
            true
        }
    }
}

/// Encode and enqueue a server frame; `false` means the send queue was full
/// (the caller disconnects rather than blocking on it).
fn send_frame(tx: &mpsc::Sender<Message>, frame: &ServerFrame) -> bool {
    match serde_json::to_string(frame) {
        Ok(json) => match tx.try_send(Message::Text(json)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => false,
            Err(mpsc::error::TrySendError::Closed(_)) => true,
        },
        Err(e) => {
            warn!(error = %e, "failed to encode server frame");
            true
        }
    }
}

/// Shared per-connection id allocator, re-exported for `AppState`.
pub type ConnectionIdAllocator = termhub_core::room::ConnectionIdAllocator;
