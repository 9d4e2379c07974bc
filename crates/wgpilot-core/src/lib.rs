#![deny(unsafe_code)]

//! wgpilot core daemon runtime.
//!
//! Enumerates tunnel configurations, changes tunnel state through the
//! external state tool, watches the configuration and runtime directories,
//! and pushes "state changed" notifications to connected clients. The daemon
//! exits once idle, but never before a minimum uptime.

/// Compile-time build metadata (version, git hash, profile).
pub mod build_info;
/// Tunnel enumeration from the layered configuration directories.
pub mod catalog;
/// Tunnel name validation and state-tool invocation.
pub mod controller;
/// Event loop, session bookkeeping, and process startup.
pub mod daemon;
/// Session registry and notification fan-out.
pub mod hub;
/// HTTP/JSON and SSE over a Unix socket.
pub mod ipc;
/// Minimum-uptime shutdown state machine.
pub mod lifecycle;
/// Directory watches.
pub mod watcher;

pub use catalog::{Tunnel, TunnelCatalog, TunnelMap};
pub use controller::{TunnelController, is_valid_tunnel_name};
pub use daemon::{Daemon, DaemonError};
pub use ipc::IpcClient;
