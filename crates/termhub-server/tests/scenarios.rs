//! End-to-end scenarios driven over the real `/pty` WebSocket transport: an
//! in-process server bound to an ephemeral port, exercised with an actual
//! `tokio-tungstenite` client rather than calling handlers directly.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

use termhub_core::{CreateSessionParams, ServerConfig, SessionRegistry};
use termhub_server::{AppState, Server};

async fn spawn_test_server(config: ServerConfig) -> (std::net::SocketAddr, std::sync::Arc<SessionRegistry>) {
    let server = Server::new(config.clone());
    let registry = server.registry();

    // Bind directly rather than going through `Server::serve` so the test
    // doesn't touch `~/.termhub/runtime.json` and doesn't need a control
    // plane listener at all.
    let state = AppState {
        registry: registry.clone(),
        connections: std::sync::Arc::new(termhub_core::room::ConnectionIdAllocator::default()),
    };
    let router = axum::Router::new()
        .route(&config.namespace, axum::routing::get(termhub_server::ws::handler))
        .with_state(state);

    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (addr, registry)
}

async fn cat_session(registry: &SessionRegistry) -> String {
    registry
        .create_session(CreateSessionParams {
            command: "/bin/cat".to_string(),
            args: vec![],
            cwd: None,
            env: std::collections::HashMap::new(),
            rows: 24,
            cols: 80,
        })
        .await
        .unwrap()
}

async fn next_event(
    ws: &mut tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
) -> Value {
    loop {
        let msg = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn happy_path_echoes_input_back_through_pty_output() {
    let (addr, registry) = spawn_test_server(ServerConfig::default()).await;
    let session_id = cat_session(&registry).await;

    let url = format!("ws://{addr}/pty?session_id={session_id}");
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    let input = termhub_core::protocol::encode_bytes(b"hello\n");
    let frame = serde_json::json!({"event": "pty-input", "session_id": session_id, "input": input});
    ws.send(Message::Text(frame.to_string())).await.unwrap();

    loop {
        let event = next_event(&mut ws).await;
        if event["event"] == "pty-output" {
            let decoded = termhub_core::protocol::decode_bytes(event["output"].as_str().unwrap()).unwrap();
            assert!(String::from_utf8_lossy(&decoded).contains("hello"));
            break;
        }
    }

    registry.terminate_session(&session_id, None).await;
}

#[tokio::test]
async fn two_clients_on_the_same_session_both_see_output() {
    let (addr, registry) = spawn_test_server(ServerConfig::default()).await;
    let session_id = cat_session(&registry).await;

    let url = format!("ws://{addr}/pty?session_id={session_id}");
    let (mut ws_a, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let (mut ws_b, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    let input = termhub_core::protocol::encode_bytes(b"shared\n");
    let frame = serde_json::json!({"event": "pty-input", "session_id": session_id, "input": input});
    ws_a.send(Message::Text(frame.to_string())).await.unwrap();

    for ws in [&mut ws_a, &mut ws_b] {
        loop {
            let event = next_event(ws).await;
            if event["event"] == "pty-output" {
                let decoded =
                    termhub_core::protocol::decode_bytes(event["output"].as_str().unwrap()).unwrap();
                assert!(String::from_utf8_lossy(&decoded).contains("shared"));
                break;
            }
        }
    }

    registry.terminate_session(&session_id, None).await;
}

#[tokio::test]
async fn connecting_to_an_unknown_session_is_rejected() {
    let (addr, _registry) = spawn_test_server(ServerConfig::default()).await;
    let url = format!("ws://{addr}/pty?session_id=deadbeef");

    let result = tokio_tungstenite::connect_async(url).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn resize_is_accepted_and_reflected_in_session_state() {
    let (addr, registry) = spawn_test_server(ServerConfig::default()).await;
    let session_id = cat_session(&registry).await;

    let url = format!("ws://{addr}/pty?session_id={session_id}");
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    let frame = serde_json::json!({"event": "resize", "session_id": session_id, "rows": 40, "cols": 120});
    ws.send(Message::Text(frame.to_string())).await.unwrap();

    // Give the receive loop a moment to apply the resize before checking.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let session = registry.get(&session_id).await.unwrap();
    assert_eq!(session.dimensions(), (40, 120));

    registry.terminate_session(&session_id, None).await;
}

#[tokio::test]
async fn create_session_over_websocket_reports_capacity_error() {
    let mut config = ServerConfig::default();
    config.max_sessions = 2;
    let (addr, registry) = spawn_test_server(config).await;

    // No `session_id` query param: the connection isn't joined to a room,
    // but `create_session` is still meaningful on it.
    let url = format!("ws://{addr}/pty");
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    for _ in 0..2 {
        let frame = serde_json::json!({"event": "create_session", "command": "/bin/cat"});
        ws.send(Message::Text(frame.to_string())).await.unwrap();
        let event = next_event(&mut ws).await;
        assert_eq!(event["event"], "create_session_ack");
    }
    assert_eq!(registry.len().await, 2);

    let frame = serde_json::json!({"event": "create_session", "command": "/bin/cat"});
    ws.send(Message::Text(frame.to_string())).await.unwrap();
    let event = next_event(&mut ws).await;
    assert_eq!(event["event"], "create_session_error");
    assert_eq!(event["error"], "session_limit_reached");
    assert_eq!(event["limit"], 2);

    // The rejected attempt must not have changed registry size.
    assert_eq!(registry.len().await, 2);

    registry.shutdown_all().await;
}

#[tokio::test]
async fn shutdown_drains_every_live_session() {
    let mut config = ServerConfig::default();
    config.max_sessions = 10;
    let mut server = Server::new(config);
    let registry = server.registry();

    let mut ids = Vec::new();
    for _ in 0..5 {
        let id = registry
            .create_session(CreateSessionParams {
                command: "/bin/sleep".to_string(),
                args: vec!["60".to_string()],
                cwd: None,
                env: std::collections::HashMap::new(),
                rows: 24,
                cols: 80,
            })
            .await
            .unwrap();
        ids.push(id);
    }
    assert_eq!(registry.len().await, 5);

    server.shutdown().await;

    assert_eq!(registry.len().await, 0);
    for id in ids {
        assert!(!registry.contains(&id).await);
    }
}

#[tokio::test]
async fn session_closed_is_delivered_when_the_child_exits() {
    let mut config = ServerConfig::default();
    config.poll_interval_ms = 5;
    let (addr, registry) = spawn_test_server(config).await;

    let session_id = registry
        .create_session(CreateSessionParams {
            command: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), "sleep 0.2 && echo bye".to_string()],
            cwd: None,
            env: std::collections::HashMap::new(),
            rows: 24,
            cols: 80,
        })
        .await
        .unwrap();

    // Connect and join the room well before the child exits, so the
    // `session_closed` broadcast isn't emitted to an empty room.
    let url = format!("ws://{addr}/pty?session_id={session_id}");
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    loop {
        let event = next_event(&mut ws).await;
        if event["event"] == "session_closed" {
            assert_eq!(event["session_id"], session_id);
            break;
        }
    }

    assert!(!registry.contains(&session_id).await);
}
