//! Wire transport for the terminal server: the `/pty` WebSocket namespace,
//! the session-scoped HTML bootstrap page, and the loopback control plane
//! that `termhub-cli`'s thin-client subcommands speak to. Session lifecycle
//! itself (the registry, the reader loop, the reaper) lives in
//! `termhub-core`; this crate only frames it onto the wire.

pub mod control;
pub mod html;
pub mod ws;

use std::sync::Arc;

use axum::extract::Path;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use termhub_core::config::RuntimeState;
use termhub_core::{ServerConfig, SessionRegistry};

use crate::ws::ConnectionIdAllocator;

/// Shared state handed to every axum handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub connections: Arc<ConnectionIdAllocator>,
}

/// Owns the bound listeners and background tasks for one running server
/// process.
pub struct Server {
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
    reaper: Option<tokio::task::JoinHandle<()>>,
    control: Option<tokio::task::JoinHandle<()>>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        let registry = SessionRegistry::new(config.clone());
        Self {
            config,
            registry,
            reaper: None,
            control: None,
        }
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    fn router(&self) -> Router {
        let state = AppState {
            registry: self.registry.clone(),
            connections: Arc::new(ConnectionIdAllocator::default()),
        };
        Router::new()
            .route(&self.config.namespace, get(ws::handler))
            .route("/terminal/:session_id", get(terminal_page))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind the transport and control-plane listeners, record the
    /// `RuntimeState`, start the reaper, and serve until `shutdown` fires or
    /// the process receives Ctrl-C. One task per concern, torn down
    /// together.
    pub async fn serve(mut self, shutdown: impl std::future::Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
        self.reaper = Some(termhub_core::reaper::spawn(self.registry.clone()));

        let control_listener = TcpListener::bind((self.config.bind_host.as_str(), self.config.control_port)).await?;
        let control_port = control_listener.local_addr()?.port();
        let control_registry = self.registry.clone();
        self.control = Some(tokio::spawn(async move {
            control::serve(control_listener, control_registry).await;
        }));

        let listener = TcpListener::bind((self.config.bind_host.as_str(), self.config.bind_port)).await?;
        let bound_addr = listener.local_addr()?;

        RuntimeState {
            bind_host: self.config.bind_host.clone(),
            bind_port: bound_addr.port(),
            control_port,
            pid: std::process::id(),
        }
        .write()?;

        info!(
            addr = %bound_addr,
            control_port,
            namespace = %self.config.namespace,
            "termhub listening"
        );

        let router = self.router();
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        self.shutdown().await;
        Ok(())
    }

    /// Drain every session and stop background tasks: new connections
    /// refused, children terminated, map drained.
    pub async fn shutdown(&mut self) {
        info!("shutting down: terminating all sessions");
        self.registry.shutdown_all().await;
        if let Some(handle) = self.reaper.take() {
            handle.abort();
        }
        if let Some(handle) = self.control.take() {
            handle.abort();
        }
    }
}

async fn terminal_page(Path(session_id): Path<String>, axum::extract::State(state): axum::extract::State<AppState>) -> Html<String> {
    let namespace = state.registry.config().namespace.clone();
    Html(html::bootstrap_page(&session_id, &namespace))
}

/// The session-scoped bootstrap URL: `http://<host>:<port>/terminal/<id>?session_id=<id>`.
/// `host`/`port` are the actually-bound transport address (see `RuntimeState`).
pub fn session_url(host: &str, port: u16, session_id: &str) -> String {
    format!("http://{host}:{port}/terminal/{session_id}?session_id={session_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_url_matches_the_wire_convention() {
        let url = session_url("127.0.0.1", 4100, "deadbeef");
        assert_eq!(url, "http://127.0.0.1:4100/terminal/deadbeef?session_id=deadbeef");
    }
}
