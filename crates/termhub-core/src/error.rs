//! Error types for the terminal server core

use thiserror::Error;

/// Errors surfaced by the session registry, backend and transport layers.
#[derive(Error, Debug)]
pub enum TermhubError {
    /// The registry is at `max_sessions`; not logged as an incident.
    #[error("session limit reached ({limit})")]
    Capacity { limit: usize },

    /// The backend failed to launch the child process.
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// A read or write on a live handle failed unexpectedly.
    #[error("io error on session {session_id}: {source}")]
    Io {
        session_id: String,
        #[source]
        source: std::io::Error,
    },

    /// A transport event referenced a session id absent from the registry.
    #[error("unknown session: {0}")]
    UnknownSession(String),

    /// A malformed payload (negative rows, empty command, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TermhubError>;
