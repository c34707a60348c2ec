//! Loopback control plane: a plain TCP, one-request-per-connection
//! JSON RPC distinct from the `/pty` WebSocket transport, used only by
//! `termhub-cli`'s thin-client subcommands against an already-running
//! `serve` process. Unauthenticated: it binds `127.0.0.1` and is never
//! exposed beyond the host.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use termhub_core::session::CreateSessionParams;
use termhub_core::SessionRegistry;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ControlRequest {
    CreateSession {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        cwd: Option<String>,
        #[serde(default)]
        env: std::collections::HashMap<String, String>,
        #[serde(default = "default_rows")]
        rows: u16,
        #[serde(default = "default_cols")]
        cols: u16,
    },
    ListSessions,
    KillSession {
        session_id: String,
    },
    Shutdown,
}

fn default_rows() -> u16 {
    24
}

fn default_cols() -> u16 {
    80
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionDescriptor {
    pub session_id: String,
    pub command: String,
    pub rows: u16,
    pub cols: u16,
    pub running: bool,
    pub subscriber_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ControlResponse {
    Ok,
    SessionCreated { session_id: String },
    Sessions { sessions: Vec<SessionDescriptor> },
    Error { message: String },
}

/// Accept connections until the listener is dropped (the caller aborts the
/// task on shutdown rather than signalling it cooperatively).
pub async fn serve(listener: TcpListener, registry: Arc<SessionRegistry>) {
    loop {
        let (socket, _) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "control listener accept failed");
                continue;
            }
        };
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(socket, registry).await {
                error!(error = %e, "control connection error");
            }
        });
    }
}

async fn handle_connection(
    mut socket: tokio::net::TcpStream,
    registry: Arc<SessionRegistry>,
) -> anyhow::Result<()> {
    let mut buf = Vec::new();
    socket.read_to_end(&mut buf).await?;
    if buf.is_empty() {
        return Ok(());
    }

    let request: ControlRequest = serde_json::from_slice(&buf)?;
    debug!(?request, "control request received");

    let response = handle_request(request, &registry).await;

    let bytes = serde_json::to_vec(&response)?;
    socket.write_all(&bytes).await?;
    socket.shutdown().await?;
    Ok(())
}

async fn handle_request(request: ControlRequest, registry: &Arc<SessionRegistry>) -> ControlResponse {
    match request {
        ControlRequest::CreateSession {
            command,
            args,
            cwd,
            env,
            rows,
            cols,
        } => {
            let params = CreateSessionParams {
                command,
                args,
                cwd,
                env,
                rows,
                cols,
            };
            match registry.create_session(params).await {
                Ok(session_id) => ControlResponse::SessionCreated { session_id },
                Err(e) => ControlResponse::Error {
                    message: e.to_string(),
                },
            }
        }
        ControlRequest::ListSessions => {
            let sessions = registry
                .iter_sessions()
                .await
                .into_iter()
                .map(|s| SessionDescriptor {
                    session_id: s.session_id,
                    command: s.command,
                    rows: s.rows,
                    cols: s.cols,
                    running: s.running,
                    subscriber_count: s.subscriber_count,
                })
                .collect();
            ControlResponse::Sessions { sessions }
        }
        ControlRequest::KillSession { session_id } => {
            if !registry.contains(&session_id).await {
                return ControlResponse::Error {
                    message: format!("unknown session_id {session_id}"),
                };
            }
            registry.terminate_session(&session_id, None).await;
            ControlResponse::Ok
        }
        ControlRequest::Shutdown => {
            info!("shutdown requested over control plane");
            registry.shutdown_all().await;
            ControlResponse::Ok
        }
    }
}
