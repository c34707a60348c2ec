//! Session registry, PTY backend and lifecycle tasks for the terminal
//! server. This crate owns everything left of the wire: the
//! `Backend`, `Session`, `SessionRegistry`, the per-session reader loop and
//! the reaper. Transport framing lives in `termhub-server`.

pub mod backend;
pub mod config;
pub mod error;
pub mod id;
pub mod protocol;
pub mod reader_loop;
pub mod reaper;
pub mod registry;
pub mod room;
pub mod session;

pub use config::ServerConfig;
pub use error::{Result, TermhubError};
pub use id::SessionId;
pub use registry::{SessionRegistry, SessionSummary};
pub use session::{CreateSessionParams, Session};
