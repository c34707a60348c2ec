//! The `Session` record: one `session_id` bound to one backend
//! instance plus lifecycle metadata.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};

use crate::backend::{PtyBackend, PtyHandle, SpawnParams};
use crate::error::{Result, TermhubError};
use crate::id::SessionId;
use crate::room::Room;

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Parameters supplied to `Registry::create_session`.
#[derive(Debug, Clone)]
pub struct CreateSessionParams {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: Option<String>,
    pub env: HashMap<String, String>,
    pub rows: u16,
    pub cols: u16,
}

impl CreateSessionParams {
    pub fn validate(&self, dimension_max: u16) -> Result<()> {
        if self.command.trim().is_empty() {
            return Err(TermhubError::InvalidArgument(
                "command must not be empty".to_string(),
            ));
        }
        validate_dimensions(self.rows, self.cols, dimension_max)
    }
}

/// Rows/cols must be positive and within the configured clamp.
pub fn validate_dimensions(rows: u16, cols: u16, dimension_max: u16) -> Result<()> {
    if rows == 0 || cols == 0 {
        return Err(TermhubError::InvalidArgument(
            "rows and cols must be >= 1".to_string(),
        ));
    }
    if rows > dimension_max || cols > dimension_max {
        return Err(TermhubError::InvalidArgument(format!(
            "rows/cols must be <= {dimension_max}"
        )));
    }
    Ok(())
}

pub struct Session {
    pub session_id: SessionId,
    pub command: String,
    pub args: Vec<String>,
    pub cwd: Option<String>,
    pub env: HashMap<String, String>,
    pub child_pid: Option<u32>,
    pub created_at: u64,

    rows: AtomicU16,
    cols: AtomicU16,
    last_activity: AtomicU64,
    running: AtomicBool,

    pub handle: PtyHandle,
    pub room: Room,
}

impl Session {
    pub(crate) fn spawn(
        backend: &PtyBackend,
        session_id: SessionId,
        params: CreateSessionParams,
        read_chunk_bytes: usize,
    ) -> Result<Self> {
        let handle = backend.spawn(SpawnParams {
            command: params.command.clone(),
            args: params.args.clone(),
            cwd: params.cwd.clone(),
            env: params.env.clone(),
            rows: params.rows,
            cols: params.cols,
            read_chunk_bytes,
        })?;
        let child_pid = backend.pid(&handle);
        let created_at = now_secs();

        Ok(Self {
            session_id,
            command: params.command,
            args: params.args,
            cwd: params.cwd,
            env: params.env,
            child_pid,
            created_at,
            rows: AtomicU16::new(params.rows),
            cols: AtomicU16::new(params.cols),
            last_activity: AtomicU64::new(created_at),
            running: AtomicBool::new(true),
            handle,
            room: Room::new(),
        })
    }

    pub fn rows(&self) -> u16 {
        self.rows.load(Ordering::Relaxed)
    }

    pub fn cols(&self) -> u16 {
        self.cols.load(Ordering::Relaxed)
    }

    pub fn dimensions(&self) -> (u16, u16) {
        (self.rows(), self.cols())
    }

    pub fn last_activity(&self) -> u64 {
        self.last_activity.load(Ordering::Relaxed)
    }

    pub fn touch(&self) {
        self.last_activity.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Transition `running` true -> false exactly once. Returns `true` if
    /// this call performed the transition (so the caller - the reader loop
    /// - is the one responsible for scheduling removal).
    pub fn mark_stopped(&self) -> bool {
        self.running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Apply a resize, idempotent when unchanged.
    pub fn resize(&self, backend: &PtyBackend, rows: u16, cols: u16, dimension_max: u16) -> Result<()> {
        validate_dimensions(rows, cols, dimension_max)?;
        if self.rows() == rows && self.cols() == cols {
            return Ok(());
        }
        backend.resize(&self.handle, rows, cols)?;
        self.rows.store(rows, Ordering::Relaxed);
        self.cols.store(cols, Ordering::Relaxed);
        self.touch();
        Ok(())
    }

    pub fn write_input(&self, backend: &PtyBackend, bytes: &[u8]) -> Result<()> {
        let mut remaining = bytes;
        while !remaining.is_empty() {
            let n = backend.write(&self.handle, remaining, &self.session_id)?;
            if n == 0 {
                break;
            }
            remaining = &remaining[n..];
        }
        self.touch();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_dimensions() {
        assert!(validate_dimensions(0, 80, 10_000).is_err());
        assert!(validate_dimensions(24, 0, 10_000).is_err());
    }

    #[test]
    fn rejects_oversize_dimensions() {
        assert!(validate_dimensions(24, 20_000, 10_000).is_err());
    }

    #[test]
    fn accepts_in_range_dimensions() {
        assert!(validate_dimensions(24, 80, 10_000).is_ok());
    }

    #[test]
    fn mark_stopped_transitions_exactly_once() {
        let backend = PtyBackend::new();
        let session = Session::spawn(
            &backend,
            "deadbeef".to_string(),
            CreateSessionParams {
                command: "/bin/cat".to_string(),
                args: vec![],
                cwd: None,
                env: HashMap::new(),
                rows: 24,
                cols: 80,
            },
            20_480,
        )
        .unwrap();

        assert!(session.mark_stopped());
        assert!(!session.mark_stopped());
        backend.terminate(&session.handle);
    }
}
