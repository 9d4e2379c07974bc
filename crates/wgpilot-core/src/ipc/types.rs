//! Request/response bodies for the daemon IPC.
//!
//! Serialized as JSON over the Unix domain socket. Both the server and
//! [`IpcClient`](super::IpcClient) use these types.

use serde::{Deserialize, Serialize};

use crate::catalog::TunnelMap;

/// SSE event name pushed to every session when tunnel state may have changed.
pub const STATE_CHANGED_EVENT: &str = "state_changed";

/// `GET /tunnels`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelsResponse {
    pub tunnels: TunnelMap,
}

/// `POST /tunnels/{name}/state` request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetStateRequest {
    pub enable: bool,
}

/// `POST /tunnels/{name}/state` reply: the state tool's exit code, or one of
/// the negative controller codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetStateResponse {
    pub exit_code: i32,
}

/// `GET /version`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
}

/// Generic error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
