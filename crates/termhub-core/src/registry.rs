//! The session registry: admission control, lookup, removal,
//! snapshot iteration.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::backend::PtyBackend;
use crate::config::ServerConfig;
use crate::error::{Result, TermhubError};
use crate::id::{generate_session_id, SessionId};
use crate::protocol::ServerFrame;
use crate::reader_loop;
use crate::session::{CreateSessionParams, Session};

const ID_COLLISION_RETRIES: usize = 8;

/// A stable, point-in-time summary of a `Session`, safe to hand out of the
/// registry lock.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub command: String,
    pub args: Vec<String>,
    pub rows: u16,
    pub cols: u16,
    pub child_pid: Option<u32>,
    pub created_at: u64,
    pub last_activity: u64,
    pub running: bool,
    pub subscriber_count: usize,
}

impl From<&Arc<Session>> for SessionSummary {
    fn from(s: &Arc<Session>) -> Self {
        let (rows, cols) = s.dimensions();
        Self {
            session_id: s.session_id.clone(),
            command: s.command.clone(),
            args: s.args.clone(),
            rows,
            cols,
            child_pid: s.child_pid,
            created_at: s.created_at,
            last_activity: s.last_activity(),
            running: s.is_running(),
            subscriber_count: s.room.member_count(),
        }
    }
}

/// Owns every live `Session`, enforcing `max_sessions` and serializing
/// insertion/removal under a single lock.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    backend: PtyBackend,
    config: ServerConfig,
}

impl SessionRegistry {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            backend: PtyBackend::new(),
            config,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Validate capacity, spawn the backend, insert, and start the reader
    /// loop - all before releasing the write lock, so no session is ever
    /// observable without its reader loop active.
    pub async fn create_session(
        self: &Arc<Self>,
        params: CreateSessionParams,
    ) -> Result<SessionId> {
        params.validate(self.config.dimension_max)?;

        let mut guard = self.sessions.write().await;
        if guard.len() >= self.config.max_sessions {
            return Err(TermhubError::Capacity {
                limit: self.config.max_sessions,
            });
        }

        let mut id = generate_session_id();
        let mut attempts = 0;
        while guard.contains_key(&id) {
            attempts += 1;
            if attempts >= ID_COLLISION_RETRIES {
                return Err(TermhubError::Other(
                    "exhausted session id collision retries".to_string(),
                ));
            }
            id = generate_session_id();
        }

        let session = Arc::new(Session::spawn(
            &self.backend,
            id.clone(),
            params,
            self.config.read_chunk_bytes,
        )?);
        guard.insert(id.clone(), session.clone());
        info!(session_id = %id, pid = ?session.child_pid, "session created");

        reader_loop::spawn(self.clone(), session);
        Ok(id)
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn contains(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Stable snapshot for `list_sessions`-style callers.
    pub async fn iter_sessions(&self) -> Vec<SessionSummary> {
        self.sessions
            .read()
            .await
            .values()
            .map(SessionSummary::from)
            .collect()
    }

    /// Stable snapshot of the live `Arc<Session>` handles, for the reaper
    /// (which needs to probe `is_alive` against the backend, not just the
    /// summary's `running` flag).
    pub async fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub fn backend(&self) -> &PtyBackend {
        &self.backend
    }

    /// Look up a session and invoke `backend.write` on its behalf.
    pub async fn send_input(&self, session_id: &str, bytes: &[u8]) -> Result<()> {
        let session = self
            .get(session_id)
            .await
            .ok_or_else(|| TermhubError::UnknownSession(session_id.to_string()))?;
        session.write_input(&self.backend, bytes)
    }

    pub async fn resize_session(&self, session_id: &str, rows: u16, cols: u16) -> Result<()> {
        let session = self
            .get(session_id)
            .await
            .ok_or_else(|| TermhubError::UnknownSession(session_id.to_string()))?;
        session.resize(&self.backend, rows, cols, self.config.dimension_max)
    }

    pub async fn heartbeat(&self, session_id: &str) -> Result<()> {
        let session = self
            .get(session_id)
            .await
            .ok_or_else(|| TermhubError::UnknownSession(session_id.to_string()))?;
        session.touch();
        Ok(())
    }

    /// Terminate a session: idempotent, safe to call from the reader loop,
    /// the reaper, an explicit `terminate_session` RPC, or shutdown.
    ///
    /// Destruction order: stop reader loop
    /// -> terminate child -> close handle -> emit `session_closed` -> remove
    /// from registry. The actual map removal is the single synchronization
    /// point: whichever caller wins the `remove()` race performs the
    /// teardown: every other caller observes `None` and no-ops, which is
    /// what makes this idempotent under concurrent callers (reader loop
    /// racing the reaper, say).
    pub async fn terminate_session(&self, session_id: &str, exit_code: Option<i32>) {
        self.terminate_session_inner(session_id, exit_code).await
    }

    async fn terminate_session_inner(&self, session_id: &str, exit_code: Option<i32>) {
        // Signal the reader loop to stop before anyone observes the session
        // as removed.
        if let Some(session) = self.get(session_id).await {
            session.mark_stopped();
        }

        let removed = {
            let mut guard = self.sessions.write().await;
            guard.remove(session_id)
        };

        let Some(session) = removed else {
            return;
        };

        self.backend.terminate(&session.handle);

        let frame = ServerFrame::SessionClosed {
            session_id: session_id.to_string(),
            exit_code,
        };
        match serde_json::to_vec(&frame) {
            Ok(bytes) => {
                session.room.emit(Bytes::from(bytes));
            }
            Err(e) => warn!(session_id, error = %e, "failed to encode session_closed frame"),
        }

        info!(session_id, exit_code = ?exit_code, "session terminated");
    }

    /// Terminate every session.
    pub async fn shutdown_all(&self) {
        let ids: Vec<SessionId> = self.sessions.read().await.keys().cloned().collect();
        for id in ids {
            self.terminate_session(&id, None).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    fn cat_params() -> CreateSessionParams {
        CreateSessionParams {
            command: "/bin/cat".to_string(),
            args: vec![],
            cwd: None,
            env: StdHashMap::new(),
            rows: 24,
            cols: 80,
        }
    }

    #[tokio::test]
    async fn capacity_is_enforced() {
        let mut config = ServerConfig::default();
        config.max_sessions = 2;
        let registry = SessionRegistry::new(config);

        let a = registry.create_session(cat_params()).await.unwrap();
        let b = registry.create_session(cat_params()).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(registry.len().await, 2);

        let err = registry.create_session(cat_params()).await.unwrap_err();
        assert!(matches!(err, TermhubError::Capacity { limit: 2 }));
        assert_eq!(registry.len().await, 2);

        registry.shutdown_all().await;
    }

    #[tokio::test]
    async fn terminate_session_is_idempotent() {
        let registry = SessionRegistry::new(ServerConfig::default());
        let id = registry.create_session(cat_params()).await.unwrap();
        assert!(registry.contains(&id).await);

        registry.terminate_session(&id, Some(0)).await;
        assert!(!registry.contains(&id).await);

        // Second call on an already-absent id must not panic or error.
        registry.terminate_session(&id, Some(0)).await;
    }

    #[tokio::test]
    async fn resize_rejects_zero_dimensions() {
        let registry = SessionRegistry::new(ServerConfig::default());
        let id = registry.create_session(cat_params()).await.unwrap();

        let err = registry.resize_session(&id, 0, 80).await.unwrap_err();
        assert!(matches!(err, TermhubError::InvalidArgument(_)));

        registry.terminate_session(&id, None).await;
    }

    #[tokio::test]
    async fn unknown_session_is_reported() {
        let registry = SessionRegistry::new(ServerConfig::default());
        let err = registry.send_input("deadbeef", b"hi").await.unwrap_err();
        assert!(matches!(err, TermhubError::UnknownSession(_)));
    }
}
