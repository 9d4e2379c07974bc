//! Temporary tunnel trees for daemon tests.
//!
//! [`TunnelTree`] lays out the directories the daemon reads (two
//! configuration directories, the runtime marker directory, the installation
//! prefix) under one temp directory and can install a stub state tool that
//! records its invocations.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use wgpilot_config::AppConfig;

use crate::config::TestConfigBuilder;

/// A throwaway filesystem layout mirroring a WireGuard installation.
///
/// ```text
/// <tmp>/etc/wireguard          primary config dir
/// <tmp>/prefix/etc/wireguard   prefix-relative config dir
/// <tmp>/prefix/bin/wg-quick    stub state tool (after install_stub_tool)
/// <tmp>/run/wireguard          runtime markers
/// <tmp>/wgpilot.sock           IPC socket
/// ```
///
/// The temp directory is deleted when this value is dropped, even on panic.
pub struct TunnelTree {
    primary_dir: PathBuf,
    prefix: PathBuf,
    secondary_dir: PathBuf,
    runtime_dir: PathBuf,
    socket_path: PathBuf,
    invocation_log: PathBuf,
    _temp_dir: TempDir,
}

impl TunnelTree {
    /// Create the tree with every directory present.
    pub fn new() -> Self {
        let tree = Self::without_dirs();
        for dir in [&tree.primary_dir, &tree.secondary_dir, &tree.runtime_dir] {
            fs::create_dir_all(dir).expect("failed to create fixture dir");
        }
        tree
    }

    /// Create the tree root only; no configuration or runtime directories.
    pub fn without_dirs() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let root = temp_dir.path();
        let prefix = root.join("prefix");

        Self {
            primary_dir: root.join("etc").join("wireguard"),
            secondary_dir: prefix.join("etc").join("wireguard"),
            prefix,
            runtime_dir: root.join("run").join("wireguard"),
            socket_path: root.join("wgpilot.sock"),
            invocation_log: root.join("tool-invocations.log"),
            _temp_dir: temp_dir,
        }
    }

    pub fn primary_dir(&self) -> &Path {
        &self.primary_dir
    }

    pub fn secondary_dir(&self) -> &Path {
        &self.secondary_dir
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn runtime_dir(&self) -> &Path {
        &self.runtime_dir
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Write `<dir>/<name>.conf`, creating `dir` if needed.
    pub fn write_tunnel(&self, dir: &Path, name: &str, text: &str) -> PathBuf {
        fs::create_dir_all(dir).expect("failed to create config dir");
        let path = dir.join(format!("{name}.conf"));
        fs::write(&path, text).expect("failed to write tunnel config");
        path
    }

    /// Write the runtime marker `<runtime>/<name>.name`.
    pub fn write_marker(&self, name: &str, contents: &str) -> PathBuf {
        fs::create_dir_all(&self.runtime_dir).expect("failed to create runtime dir");
        let path = self.runtime_dir.join(format!("{name}.name"));
        fs::write(&path, contents).expect("failed to write runtime marker");
        path
    }

    /// Install an executable `<prefix>/bin/wg-quick` that appends its
    /// arguments and `WG_CONFIG_SEARCH_PATHS` to an invocation log, then
    /// exits with `exit_code`.
    pub fn install_stub_tool(&self, exit_code: i32) -> PathBuf {
        self.install_slow_stub_tool(exit_code, 0)
    }

    /// Like [`install_stub_tool`](Self::install_stub_tool), but the tool
    /// sleeps `delay_secs` after logging and before exiting.
    pub fn install_slow_stub_tool(&self, exit_code: i32, delay_secs: u32) -> PathBuf {
        let bin = self.prefix.join("bin");
        fs::create_dir_all(&bin).expect("failed to create bin dir");
        let tool = bin.join("wg-quick");
        let script = format!(
            "#!/bin/sh\necho \"$1 $2 $WG_CONFIG_SEARCH_PATHS\" >> '{}'\nsleep {delay_secs}\nexit {exit_code}\n",
            self.invocation_log.display()
        );
        fs::write(&tool, script).expect("failed to write stub tool");
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755))
            .expect("failed to mark stub tool executable");
        tool
    }

    /// Lines recorded by the stub tool, one per invocation.
    pub fn tool_invocations(&self) -> Vec<String> {
        fs::read_to_string(&self.invocation_log)
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// A builder pointing every daemon path into this tree.
    pub fn config_builder(&self) -> TestConfigBuilder {
        TestConfigBuilder::new()
            .socket_path(&self.socket_path)
            .config_dir(&self.primary_dir)
            .runtime_dir(&self.runtime_dir)
            .install_prefix(&self.prefix)
    }

    /// Daemon config for this tree with no minimum uptime.
    pub fn config(&self) -> AppConfig {
        self.config_builder().min_uptime_secs(0).build()
    }
}

impl Default for TunnelTree {
    fn default() -> Self {
        Self::new()
    }
}
