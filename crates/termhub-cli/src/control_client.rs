//! One-shot client for the control plane: connect, write the request, shut
//! down the write half, read the response to EOF. No retry/reconnect logic -
//! a `termhub` subcommand either finds a running server or reports that it
//! didn't.

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use termhub_core::config::RuntimeState;
use termhub_server::control::{ControlRequest, ControlResponse};

pub async fn connected_runtime() -> Result<RuntimeState> {
    RuntimeState::read().context("no running termhub server found; start one with `termhub serve`")
}

pub async fn send(request: ControlRequest) -> Result<ControlResponse> {
    let runtime = connected_runtime().await?;
    send_to(&runtime.bind_host, runtime.control_port, request).await
}

pub async fn send_to(host: &str, port: u16, request: ControlRequest) -> Result<ControlResponse> {
    let mut stream = TcpStream::connect((host, port))
        .await
        .with_context(|| format!("failed to connect to control plane at {host}:{port}"))?;

    let bytes = serde_json::to_vec(&request)?;
    stream.write_all(&bytes).await?;
    stream.shutdown().await?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    let response: ControlResponse = serde_json::from_slice(&buf)?;
    Ok(response)
}
