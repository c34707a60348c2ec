//! Platform-specific PTY ownership.
//!
//! `portable-pty` already does the `{unix, windows}` dispatch internally
//! (forkpty-and-exec on Unix, ConPTY on Windows) behind a single
//! `NativePtySystem`, so rather than hand-rolling a second tagged
//! unix/windows enum on top of it this implementation exposes one concrete
//! `PtyBackend` exposing one cohesive capability set. See DESIGN.md for the
//! recorded rationale.

use std::collections::HashMap;
use std::io::Write as _;
use std::sync::Mutex;

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::error::{Result, TermhubError};

/// Output yielded by [`PtyBackend::next_output`], consolidating separate
/// `poll` and `read` operations into a single await point: a
/// background OS thread blocks on the platform read and forwards chunks (or
/// the terminal EOF condition) over a channel, so "poll, then read if
/// ready" becomes "await the channel with a timeout".
pub enum Output {
    /// Bytes became available within the poll interval.
    Data(Vec<u8>),
    /// No data arrived within the poll interval; caller should check
    /// `is_alive`.
    Idle,
    /// The PTY master reported EOF (child closed its end).
    Eof,
}

/// An opaque handle to one spawned child + its PTY, owned by a `Session`.
pub struct PtyHandle {
    child: Mutex<Box<dyn Child + Send + Sync>>,
    writer: Mutex<Box<dyn std::io::Write + Send>>,
    master: Mutex<Box<dyn MasterPty + Send>>,
    output_rx: AsyncMutex<mpsc::Receiver<std::io::Result<Vec<u8>>>>,
    pid: Option<u32>,
}

/// Parameters accepted by [`PtyBackend::spawn`].
pub struct SpawnParams {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: Option<String>,
    pub env: HashMap<String, String>,
    pub rows: u16,
    pub cols: u16,
    /// Max bytes read per iteration of the background reader thread
    /// (`ServerConfig::read_chunk_bytes`).
    pub read_chunk_bytes: usize,
}

#[derive(Clone, Copy, Default)]
pub struct PtyBackend;

impl PtyBackend {
    pub fn new() -> Self {
        Self
    }

    /// Fork/launch the child with a controlling PTY at the given size.
    pub fn spawn(&self, params: SpawnParams) -> Result<PtyHandle> {
        let pty_system = native_pty_system();
        let size = PtySize {
            rows: params.rows,
            cols: params.cols,
            pixel_width: 0,
            pixel_height: 0,
        };
        let pair = pty_system
            .openpty(size)
            .map_err(|e| TermhubError::Spawn {
                command: params.command.clone(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
            })?;

        let mut cmd = CommandBuilder::new(&params.command);
        cmd.args(&params.args);
        if let Some(cwd) = &params.cwd {
            cmd.cwd(cwd);
        }
        for (k, v) in &params.env {
            cmd.env(k, v);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| TermhubError::Spawn {
                command: params.command.clone(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
            })?;
        // The slave end belongs to the child now; drop our copy so the
        // master observes EOF once the child exits.
        drop(pair.slave);

        let pid = child.process_id();

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| TermhubError::Spawn {
                command: params.command.clone(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
            })?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| TermhubError::Spawn {
                command: params.command.clone(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
            })?;

        let (tx, rx) = mpsc::channel(64);
        let read_chunk_bytes = params.read_chunk_bytes.max(1);
        std::thread::spawn(move || {
            let mut buf = vec![0u8; read_chunk_bytes];
            loop {
                match std::io::Read::read(&mut reader, &mut buf) {
                    Ok(0) => {
                        let _ = tx.blocking_send(Ok(Vec::new()));
                        break;
                    }
                    Ok(n) => {
                        if tx.blocking_send(Ok(buf[..n].to_vec())).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.blocking_send(Err(e));
                        break;
                    }
                }
            }
        });

        Ok(PtyHandle {
            child: Mutex::new(child),
            writer: Mutex::new(writer),
            master: Mutex::new(pair.master),
            output_rx: AsyncMutex::new(rx),
            pid,
        })
    }

    pub fn pid(&self, handle: &PtyHandle) -> Option<u32> {
        handle.pid
    }

    /// Write bytes to the PTY master. Short writes are possible; the caller
    /// must retry any remainder (mirrors `std::io::Write::write`).
    pub fn write(&self, handle: &PtyHandle, bytes: &[u8], session_id: &str) -> Result<usize> {
        let mut writer = handle.writer.lock().unwrap();
        writer.write(bytes).map_err(|e| TermhubError::Io {
            session_id: session_id.to_string(),
            source: e,
        })
    }

    /// Await the next output event within `poll_timeout`, consolidating
    /// one combined `poll` + `read` step.
    pub async fn next_output(
        &self,
        handle: &PtyHandle,
        poll_timeout: std::time::Duration,
    ) -> Output {
        let mut rx = handle.output_rx.lock().await;
        match tokio::time::timeout(poll_timeout, rx.recv()).await {
            Ok(Some(Ok(bytes))) if bytes.is_empty() => Output::Eof,
            Ok(Some(Ok(bytes))) => Output::Data(bytes),
            Ok(Some(Err(_io_err))) => Output::Eof,
            Ok(None) => Output::Eof,
            Err(_elapsed) => Output::Idle,
        }
    }

    /// Set the window size; idempotent when rows/cols are unchanged.
    pub fn resize(&self, handle: &PtyHandle, rows: u16, cols: u16) -> Result<()> {
        let master = handle.master.lock().unwrap();
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| TermhubError::Other(format!("resize failed: {e}")))
    }

    /// Non-blocking liveness check (`waitpid(WNOHANG)` on Unix via
    /// `portable-pty`'s `try_wait`).
    pub fn is_alive(&self, handle: &PtyHandle) -> bool {
        let mut child = handle.child.lock().unwrap();
        matches!(child.try_wait(), Ok(None))
    }

    /// Exit code if the child has already exited and the backend was able
    /// to retrieve it.
    pub fn exit_code(&self, handle: &PtyHandle) -> Option<i32> {
        let mut child = handle.child.lock().unwrap();
        match child.try_wait() {
            Ok(Some(status)) => Some(status.exit_code() as i32),
            _ => None,
        }
    }

    /// Best-effort SIGHUP-then-SIGKILL escalation with a short grace
    /// period. Idempotent.
    pub fn terminate(&self, handle: &PtyHandle) {
        #[cfg(unix)]
        {
            if let Some(pid) = handle.pid {
                let pid = nix::unistd::Pid::from_raw(pid as i32);
                let _ = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGHUP);
            }
        }
        if self.is_alive(handle) {
            std::thread::sleep(std::time::Duration::from_millis(100));
        }
        if self.is_alive(handle) {
            let mut child = handle.child.lock().unwrap();
            let _ = child.kill();
        }
    }
}
