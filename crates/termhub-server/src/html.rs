//! Minimal session-scoped HTML bootstrap. The
//! actual terminal rendering (xterm.js, clipboard, theming) is an external
//! collaborator out of scope here; this page only establishes the
//! WebSocket connection and leaves the DOM hook for that renderer.

pub fn bootstrap_page(session_id: &str, namespace: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>termhub session {session_id}</title></head>
<body>
<div id="terminal" data-session-id="{session_id}"></div>
<script>
  const proto = location.protocol === "https:" ? "wss:" : "ws:";
  const url = `${{proto}}//${{location.host}}{namespace}?session_id={session_id}`;
  // A real client attaches xterm.js here and forwards pty-input/pty-output
  // frames over this socket.
  window.termhubSocket = new WebSocket(url);
</script>
</body>
</html>"#
    )
}
