//! Wire protocol frames: event-named, JSON-encoded messages
//! exchanged over the `/pty` namespace. PTY bytes are not generally valid
//! UTF-8 (a chunk boundary can land mid multi-byte sequence, or the child
//! can emit arbitrary binary), so `input`/`output` carry base64 text inside
//! the otherwise-JSON frame rather than assuming the stream is Unicode.

use serde::{Deserialize, Serialize};

use base64::Engine as _;

pub fn encode_bytes(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn decode_bytes(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    base64::engine::general_purpose::STANDARD.decode(text)
}

/// Client -> server frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientFrame {
    CreateSession {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        cwd: Option<String>,
        #[serde(default)]
        env: std::collections::HashMap<String, String>,
        #[serde(default)]
        rows: Option<u16>,
        #[serde(default)]
        cols: Option<u16>,
    },
    #[serde(rename = "pty-input")]
    PtyInput {
        session_id: String,
        input: String,
    },
    Resize {
        session_id: String,
        rows: u16,
        cols: u16,
    },
    Heartbeat {
        session_id: String,
    },
}

/// Server -> client frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerFrame {
    CreateSessionAck {
        session_id: String,
    },
    CreateSessionError {
        error: String,
        limit: usize,
    },
    #[serde(rename = "pty-output")]
    PtyOutput {
        session_id: String,
        output: String,
    },
    SessionClosed {
        session_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pty_input_uses_dashed_event_name_on_wire() {
        let frame = ClientFrame::PtyInput {
            session_id: "deadbeef".to_string(),
            input: encode_bytes(b"ls\n"),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["event"], "pty-input");
        assert_eq!(json["session_id"], "deadbeef");
    }

    #[test]
    fn pty_output_round_trips_binary_safely() {
        let bytes = vec![0xffu8, 0x00, 0xc2, 0x28]; // not valid UTF-8
        let encoded = encode_bytes(&bytes);
        let decoded = decode_bytes(&encoded).unwrap();
        assert_eq!(decoded, bytes);
    }

    #[test]
    fn create_session_defaults_missing_fields() {
        let json = r#"{"event":"create_session","command":"/bin/bash"}"#;
        let frame: ClientFrame = serde_json::from_str(json).unwrap();
        match frame {
            ClientFrame::CreateSession { command, args, rows, cols, .. } => {
                assert_eq!(command, "/bin/bash");
                assert!(args.is_empty());
                assert!(rows.is_none());
                assert!(cols.is_none());
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn session_closed_omits_exit_code_when_absent() {
        let frame = ServerFrame::SessionClosed {
            session_id: "abc".to_string(),
            exit_code: None,
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert!(json.get("exit_code").is_none());
    }
}
