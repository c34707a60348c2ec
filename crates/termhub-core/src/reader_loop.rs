//! The per-session reader loop: one cooperative task per
//! session that pumps backend output into the session's room and detects
//! process exit.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::backend::Output;
use crate::protocol::{encode_bytes, ServerFrame};
use crate::registry::SessionRegistry;
use crate::session::Session;

/// Spawn the reader loop for a freshly-inserted session. The caller (the
/// registry, under its insertion lock) is responsible
/// for making sure the session is visible in the registry before or at the
/// same moment this task starts running.
pub fn spawn(registry: Arc<SessionRegistry>, session: Arc<Session>) {
    tokio::spawn(async move {
        run(registry, session).await;
    });
}

async fn run(registry: Arc<SessionRegistry>, session: Arc<Session>) {
    let poll_interval = Duration::from_millis(registry.config().poll_interval_ms);
    let session_id = session.session_id.clone();
    let backend = registry.backend();

    let exit_code = loop {
        if !session.is_running() {
            break backend.exit_code(&session.handle);
        }

        match backend.next_output(&session.handle, poll_interval).await {
            Output::Data(bytes) if !bytes.is_empty() => {
                emit_output(&session, &bytes);
                session.touch();
            }
            Output::Data(_) => {
                // Empty chunk: nothing to emit, fall through to liveness check.
            }
            Output::Eof => {
                debug!(session_id = %session_id, "reader loop observed eof");
                break backend.exit_code(&session.handle);
            }
            Output::Idle => {
                if !backend.is_alive(&session.handle) {
                    debug!(session_id = %session_id, "reader loop observed dead child on idle poll");
                    break backend.exit_code(&session.handle);
                }
            }
        }
    };

    info!(session_id = %session_id, exit_code = ?exit_code, "reader loop exiting");
    if session.mark_stopped() {
        registry.terminate_session(&session_id, exit_code).await;
    }
}

fn emit_output(session: &Session, bytes: &[u8]) {
    let frame = ServerFrame::PtyOutput {
        session_id: session.session_id.clone(),
        output: encode_bytes(bytes),
    };
    match serde_json::to_vec(&frame) {
        Ok(encoded) => {
            session.room.emit(Bytes::from(encoded));
        }
        Err(e) => warn!(session_id = %session.session_id, error = %e, "failed to encode pty-output frame"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::session::CreateSessionParams;
    use std::collections::HashMap;

    #[tokio::test]
    async fn echo_session_emits_output_then_closes() {
        let registry = SessionRegistry::new(ServerConfig::default());
        let id = registry
            .create_session(CreateSessionParams {
                command: "/bin/echo".to_string(),
                args: vec!["hi".to_string()],
                cwd: None,
                env: HashMap::new(),
                rows: 24,
                cols: 80,
            })
            .await
            .unwrap();

        let session = registry.get(&id).await.unwrap();
        let mut rx = session.room.join(1);
        drop(session);

        let mut saw_output = false;
        let mut saw_closed = false;
        for _ in 0..200 {
            match tokio::time::timeout(Duration::from_millis(50), rx.recv()).await {
                Ok(Ok(frame)) => {
                    let text = String::from_utf8_lossy(&frame);
                    if text.contains("pty-output") {
                        saw_output = true;
                    }
                    if text.contains("session_closed") {
                        saw_closed = true;
                        break;
                    }
                }
                _ => {
                    if !registry.contains(&id).await {
                        break;
                    }
                }
            }
        }

        assert!(saw_output, "expected at least one pty-output frame");
        assert!(saw_closed, "expected a session_closed frame");
        assert!(!registry.contains(&id).await);
    }
}
