//! IPC client: connects to the daemon over a Unix domain socket.
//!
//! Used by the CLI for request/reply calls and to hold an `/events` session
//! open. Uses `hyper` for HTTP/1.1 over the Unix socket.

use std::collections::VecDeque;
use std::path::PathBuf;

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::client::conn::http1::SendRequest;
use hyper_util::rt::TokioIo;
use tokio::net::UnixStream;
use tokio::task::JoinHandle;
use tracing::debug;

use super::types::*;
use crate::catalog::TunnelMap;
use crate::hub::StateChanged;

/// Errors from the IPC client.
#[derive(Debug, thiserror::Error)]
pub enum IpcClientError {
    #[error("failed to connect to daemon socket at {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("daemon is not running (socket not found at {0})")]
    NotRunning(PathBuf),

    #[error("request failed: {0}")]
    Request(String),

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("daemon returned error: {0}")]
    DaemonError(String),
}

/// Client for the wgpilot daemon socket.
pub struct IpcClient {
    socket_path: PathBuf,
}

impl IpcClient {
    /// Create a new IPC client targeting the given socket path.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    /// Check if the daemon socket exists (daemon is likely running).
    pub fn daemon_available(&self) -> bool {
        self.socket_path.exists()
    }

    /// Open one HTTP/1.1 connection; the returned task drives it.
    async fn connect(&self) -> Result<(SendRequest<Full<Bytes>>, JoinHandle<()>), IpcClientError> {
        if !self.daemon_available() {
            return Err(IpcClientError::NotRunning(self.socket_path.clone()));
        }

        let stream =
            UnixStream::connect(&self.socket_path)
                .await
                .map_err(|e| IpcClientError::Connect {
                    path: self.socket_path.clone(),
                    source: e,
                })?;

        let (sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| IpcClientError::Request(format!("HTTP handshake failed: {e}")))?;

        let task = tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "IPC connection closed with error");
            }
        });
        Ok((sender, task))
    }

    /// Send one request and return the response, failing on non-2xx.
    async fn send(
        &self,
        sender: &mut SendRequest<Full<Bytes>>,
        method: hyper::Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<hyper::Response<Incoming>, IpcClientError> {
        debug!(%method, path, "IPC request");

        let mut builder = hyper::Request::builder()
            .method(method)
            .uri(path)
            .header("host", "localhost");
        if body.is_some() {
            builder = builder.header("content-type", "application/json");
        }
        let req = builder
            .body(Full::new(body.map(Bytes::from).unwrap_or_default()))
            .map_err(|e| IpcClientError::Request(format!("failed to build request: {e}")))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| IpcClientError::Request(format!("request failed: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp
            .into_body()
            .collect()
            .await
            .map(|collected| collected.to_bytes())
            .unwrap_or_default();
        if let Ok(err) = serde_json::from_slice::<ErrorResponse>(&body) {
            return Err(IpcClientError::DaemonError(err.error));
        }
        Err(IpcClientError::Request(format!(
            "unexpected status: {status}"
        )))
    }

    /// Request/reply call: returns the whole response body.
    async fn request(
        &self,
        method: hyper::Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<Bytes, IpcClientError> {
        let (mut sender, _conn) = self.connect().await?;
        let resp = self.send(&mut sender, method, path, body).await?;

        let bytes = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| IpcClientError::Request(format!("failed to read response body: {e}")))?
            .to_bytes();
        Ok(bytes)
    }

    // ── Typed API methods ──────────────────────────────────────────────

    /// Every known tunnel, keyed by name.
    pub async fn list_tunnels(&self) -> Result<TunnelMap, IpcClientError> {
        let body = self.request(hyper::Method::GET, "/tunnels", None).await?;
        let resp: TunnelsResponse = serde_json::from_slice(&body)
            .map_err(|e| IpcClientError::Parse(format!("tunnels: {e}")))?;
        Ok(resp.tunnels)
    }

    /// Bring a tunnel up or down. Returns the daemon's exit code.
    pub async fn set_tunnel_state(&self, name: &str, enable: bool) -> Result<i32, IpcClientError> {
        let path = state_path(name);
        let body = serde_json::to_vec(&SetStateRequest { enable })
            .map_err(|e| IpcClientError::Parse(format!("failed to serialize request: {e}")))?;

        let body = self.request(hyper::Method::POST, &path, Some(body)).await?;
        let resp: SetStateResponse = serde_json::from_slice(&body)
            .map_err(|e| IpcClientError::Parse(format!("set_state: {e}")))?;
        Ok(resp.exit_code)
    }

    /// The daemon's version string.
    pub async fn version(&self) -> Result<String, IpcClientError> {
        let body = self.request(hyper::Method::GET, "/version", None).await?;
        let resp: VersionResponse = serde_json::from_slice(&body)
            .map_err(|e| IpcClientError::Parse(format!("version: {e}")))?;
        Ok(resp.version)
    }

    /// Open a session. The daemon keeps running while it is held.
    pub async fn subscribe(&self) -> Result<EventSubscription, IpcClientError> {
        let (mut sender, conn) = self.connect().await?;
        let resp = self.send(&mut sender, hyper::Method::GET, "/events", None).await?;
        Ok(EventSubscription {
            body: resp.into_body(),
            parser: SseParser::default(),
            conn,
        })
    }
}

/// A live `/events` stream. Dropping it closes the session.
pub struct EventSubscription {
    body: Incoming,
    parser: SseParser,
    conn: JoinHandle<()>,
}

impl EventSubscription {
    /// Wait for the next notification. `None` once the daemon closed the stream.
    pub async fn next(&mut self) -> Result<Option<StateChanged>, IpcClientError> {
        loop {
            if let Some(event) = self.parser.pop() {
                return Ok(Some(event));
            }
            match self.body.frame().await {
                None => return Ok(None),
                Some(Err(e)) => {
                    return Err(IpcClientError::Request(format!("event stream failed: {e}")));
                }
                Some(Ok(frame)) => {
                    if let Ok(data) = frame.into_data() {
                        self.parser.push(&data);
                    }
                }
            }
        }
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.conn.abort();
    }
}

/// Incremental `text/event-stream` decoder.
///
/// Only the `event:` field matters; comments and `data:` lines are
/// skipped. An event is dispatched at the blank line that ends it.
#[derive(Debug, Default)]
pub struct SseParser {
    buf: Vec<u8>,
    event: Option<String>,
    ready: VecDeque<StateChanged>,
}

impl SseParser {
    /// Feed raw bytes, which may split lines anywhere.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            self.line(line.trim_end_matches(['\n', '\r']));
        }
    }

    /// Next decoded notification, if any.
    pub fn pop(&mut self) -> Option<StateChanged> {
        self.ready.pop_front()
    }

    fn line(&mut self, line: &str) {
        if line.is_empty() {
            if self.event.take().as_deref() == Some(STATE_CHANGED_EVENT) {
                self.ready.push_back(StateChanged);
            }
            return;
        }
        if line.starts_with(':') {
            return;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        if field == "event" {
            self.event = Some(value.strip_prefix(' ').unwrap_or(value).to_string());
        }
    }
}

/// Request path for a tunnel's state endpoint. The name is one percent-encoded segment.
fn state_path(name: &str) -> String {
    format!("/tunnels/{}/state", urlencoding::encode(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_client_creation() {
        let client = IpcClient::new("/tmp/test-wgpilot.sock");
        assert!(!client.daemon_available());
    }

    #[tokio::test]
    async fn test_client_not_running_error() {
        let client = IpcClient::new("/tmp/nonexistent-wgpilot.sock");
        let result = client.version().await;
        assert!(matches!(result, Err(IpcClientError::NotRunning(_))));
    }

    #[test]
    fn test_encode_path_segment() {
        assert_eq!(state_path("home"), "/tunnels/home/state");
        assert_eq!(state_path("a=b+c"), "/tunnels/a%3Db%2Bc/state");
        assert_eq!(state_path("../etc"), "/tunnels/..%2Fetc/state");
        assert_eq!(state_path("with space"), "/tunnels/with%20space/state");
    }

    #[test]
    fn test_sse_parser_dispatches_on_blank_line() {
        let mut parser = SseParser::default();
        parser.push(b"event: state_changed\n");
        assert_eq!(parser.pop(), None);
        parser.push(b"\n");
        assert_eq!(parser.pop(), Some(StateChanged));
        assert_eq!(parser.pop(), None);
    }

    #[test]
    fn test_sse_parser_handles_split_chunks_and_crlf() {
        let mut parser = SseParser::default();
        for chunk in [&b"eve"[..], b"nt: state_ch", b"anged\r\n", b"data: \r\n\r", b"\n"] {
            parser.push(chunk);
        }
        assert_eq!(parser.pop(), Some(StateChanged));
    }

    #[test]
    fn test_sse_parser_ignores_comments_and_other_events() {
        let mut parser = SseParser::default();
        parser.push(b":\n\n");
        parser.push(b"event: something_else\n\n");
        parser.push(b"data: {}\n\n");
        assert_eq!(parser.pop(), None);

        parser.push(b"event:state_changed\n\nevent: state_changed\n\n");
        assert_eq!(parser.pop(), Some(StateChanged));
        assert_eq!(parser.pop(), Some(StateChanged));
    }
}
