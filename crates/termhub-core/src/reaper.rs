//! The reaper: a periodic sweep that evicts sessions which are
//! inactive beyond `inactivity_timeout_sec`, already marked `running =
//! false`, or whose child the backend reports as dead despite the reader
//! loop not yet having noticed.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::registry::SessionRegistry;

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Spawn the reaper as a background task; returns a handle the caller can
/// `.abort()` on shutdown.
pub fn spawn(registry: Arc<SessionRegistry>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        run(registry).await;
    })
}

async fn run(registry: Arc<SessionRegistry>) {
    let interval = Duration::from_secs(registry.config().sweep_interval_sec.max(1));
    loop {
        tokio::time::sleep(interval).await;
        sweep_once(&registry).await;
    }
}

/// One sweep, isolated from panics/errors in any single session's eviction
/// so a bad session can't abort the rest of the sweep.
async fn sweep_once(registry: &Arc<SessionRegistry>) {
    let timeout = registry.config().inactivity_timeout_sec;
    let now = now_secs();
    let snapshot = registry.snapshot().await;

    for session in snapshot {
        let idle_for = now.saturating_sub(session.last_activity());
        let inactive = idle_for >= timeout;
        let already_stopped = !session.is_running();
        let dead = !registry.backend().is_alive(&session.handle);

        if inactive || already_stopped || dead {
            let reason = if already_stopped {
                "running_false"
            } else if dead {
                "child_exited"
            } else {
                "inactivity_timeout"
            };
            info!(
                session_id = %session.session_id,
                reason,
                idle_for_secs = idle_for,
                "reaper evicting session"
            );
            let exit_code = registry.backend().exit_code(&session.handle);
            registry
                .terminate_session(&session.session_id, exit_code)
                .await;
        }
    }
}

/// Exposed for tests that want a single sweep without waiting a full
/// `sweep_interval_sec`.
pub async fn sweep_now(registry: &Arc<SessionRegistry>) {
    sweep_once(registry).await;
}
