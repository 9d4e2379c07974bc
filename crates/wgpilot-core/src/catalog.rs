//! Tunnel enumeration across the layered configuration directories.
//!
//! Every query rebuilds the catalog from disk. Directories are searched in
//! precedence order and the first directory that provides `<name>.conf`
//! owns the tunnel; later duplicates are logged and dropped. File-level
//! failures never surface to the caller: they degrade to empty values.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use wgpilot_config::ConfigLocator;

/// Suffix of tunnel configuration files.
pub const CONFIG_SUFFIX: &str = ".conf";

/// Suffix of runtime interface markers.
pub const MARKER_SUFFIX: &str = ".name";

/// One tunnel as seen by the client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tunnel {
    /// Live network interface, or empty when the tunnel is down.
    pub interface_name: String,
    /// Raw configuration file contents. Never parsed by the daemon.
    pub config_text: String,
}

impl Tunnel {
    /// Whether the tunnel currently has a network interface.
    pub fn is_active(&self) -> bool {
        !self.interface_name.is_empty()
    }
}

/// Snapshot of all known tunnels keyed by name.
pub type TunnelMap = BTreeMap<String, Tunnel>;

/// Reads tunnel configurations and runtime markers from disk.
#[derive(Debug, Clone)]
pub struct TunnelCatalog {
    config_dirs: Vec<PathBuf>,
    runtime_dir: PathBuf,
}

impl TunnelCatalog {
    /// Create a catalog over `config_dirs` (highest precedence first).
    pub fn new(config_dirs: Vec<PathBuf>, runtime_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dirs,
            runtime_dir: runtime_dir.into(),
        }
    }

    /// Create a catalog over the directories resolved by `locator`.
    pub fn from_locator(locator: &ConfigLocator, runtime_dir: impl Into<PathBuf>) -> Self {
        Self::new(locator.config_dirs().to_vec(), runtime_dir)
    }

    pub fn config_dirs(&self) -> &[PathBuf] {
        &self.config_dirs
    }

    pub fn runtime_dir(&self) -> &Path {
        &self.runtime_dir
    }

    /// Enumerate every tunnel. Always returns a map, possibly empty.
    pub fn list_tunnels(&self) -> TunnelMap {
        let mut tunnels = TunnelMap::new();

        for dir in &self.config_dirs {
            let entries = match fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(e) => {
                    debug!(dir = %dir.display(), error = %e, "Skipping unreadable config directory");
                    continue;
                }
            };

            for entry in entries.flatten() {
                if entry.path().is_dir() {
                    continue;
                }
                let file_name = entry.file_name();
                let Some(name) = tunnel_name(&file_name) else {
                    continue;
                };

                if tunnels.contains_key(name) {
                    debug!(
                        tunnel = name,
                        path = %entry.path().display(),
                        "Ignoring duplicate tunnel from lower-precedence directory"
                    );
                    continue;
                }

                let path = entry.path();
                let config_text = fs::read_to_string(&path).unwrap_or_else(|e| {
                    warn!(path = %path.display(), error = %e, "Failed to read tunnel config");
                    String::new()
                });

                tunnels.insert(
                    name.to_string(),
                    Tunnel {
                        interface_name: self.interface_name(name),
                        config_text,
                    },
                );
            }
        }

        tunnels
    }

    /// Interface recorded in `<runtime>/<name>.name`, or empty if none.
    pub fn interface_name(&self, name: &str) -> String {
        let marker = self.runtime_dir.join(format!("{name}{MARKER_SUFFIX}"));
        fs::read_to_string(marker)
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    }
}

/// Tunnel name for a directory entry, if it is a configuration file.
fn tunnel_name(file_name: &OsStr) -> Option<&str> {
    file_name
        .to_str()?
        .strip_suffix(CONFIG_SUFFIX)
        .filter(|name| !name.is_empty())
}
