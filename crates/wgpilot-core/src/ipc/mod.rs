//! Daemon IPC over a Unix domain socket.
//!
//! The daemon exposes an HTTP/JSON API plus a Server-Sent Events stream.
//! The CLI connects as a client to list tunnels, change their state, and
//! hold a session open.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐         Unix socket        ┌──────────────┐
//! │   CLI    │───────────────────────────▶│  IPC Server  │
//! │          │  HTTP/1.1 + JSON, SSE      │  (axum)      │
//! └──────────┘                            └──────┬───────┘
//!                                                │ DaemonEvent
//!                                         ┌──────▼───────┐
//!                                         │  Event loop  │
//!                                         └──────────────┘
//! ```

pub mod client;
pub mod server;
pub mod types;

pub use client::{EventSubscription, IpcClient, IpcClientError};
pub use server::IpcState;
pub use types::*;
