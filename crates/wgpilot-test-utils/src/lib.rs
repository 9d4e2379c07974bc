#![deny(unsafe_code)]

//! Shared test utilities for the wgpilot workspace.
//!
//! Provides a throwaway tunnel directory tree and a config builder so that
//! individual crate tests stay concise and consistent.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! wgpilot-test-utils = { workspace = true }
//! ```

pub mod config;
pub mod fixture;

pub use config::TestConfigBuilder;
pub use fixture::TunnelTree;
