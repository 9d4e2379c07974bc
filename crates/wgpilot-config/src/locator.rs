//! Resolution of tunnel configuration directories and the state tool.
//!
//! The search path is built once from the compiled-in defaults and the
//! administrator overrides, and never changes afterwards. Precedence follows
//! list order: the default install directory is searched before the
//! prefix-relative one.

use std::path::{Path, PathBuf};

use super::OverrideConfig;

/// Default highest-precedence configuration directory.
pub const DEFAULT_CONFIG_DIR: &str = "/etc/wireguard";

/// Default installation prefix of the WireGuard tools.
pub const DEFAULT_INSTALL_PREFIX: &str = "/usr/local";

/// Configuration directory relative to the installation prefix.
pub const PREFIX_CONFIG_SUBDIR: &str = "etc/wireguard";

/// File name of the state-change executable under `<prefix>/bin`.
pub const STATE_TOOL_NAME: &str = "wg-quick";

/// Ordered tunnel search directories plus the state-tool location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigLocator {
    install_prefix: PathBuf,
    config_dirs: Vec<PathBuf>,
    state_tool: PathBuf,
}

impl ConfigLocator {
    /// Resolve the search path from the default directory and overrides.
    pub fn new(default_dir: impl Into<PathBuf>, overrides: &OverrideConfig) -> Self {
        let install_prefix =
            PathBuf::from(overrides.install_prefix().unwrap_or(DEFAULT_INSTALL_PREFIX));

        let mut config_dirs = vec![default_dir.into()];
        let prefixed = install_prefix.join(PREFIX_CONFIG_SUBDIR);
        if !config_dirs.contains(&prefixed) {
            config_dirs.push(prefixed);
        }

        let state_tool = overrides
            .state_tool_path()
            .map(PathBuf::from)
            .unwrap_or_else(|| install_prefix.join("bin").join(STATE_TOOL_NAME));

        Self {
            install_prefix,
            config_dirs,
            state_tool,
        }
    }

    /// Build a locator from an explicit directory list, in precedence order.
    pub fn from_parts(
        config_dirs: Vec<PathBuf>,
        install_prefix: impl Into<PathBuf>,
        state_tool: impl Into<PathBuf>,
    ) -> Self {
        Self {
            install_prefix: install_prefix.into(),
            config_dirs,
            state_tool: state_tool.into(),
        }
    }

    /// Configuration directories, highest precedence first.
    pub fn config_dirs(&self) -> &[PathBuf] {
        &self.config_dirs
    }

    /// Resolved installation prefix.
    pub fn install_prefix(&self) -> &Path {
        &self.install_prefix
    }

    /// Path of the state-change executable.
    pub fn state_tool(&self) -> &Path {
        &self.state_tool
    }

    /// The configuration directories joined with `:`, as passed to the
    /// state tool.
    pub fn search_path(&self) -> String {
        self.config_dirs
            .iter()
            .map(|d| d.to_string_lossy())
            .collect::<Vec<_>>()
            .join(":")
    }
}

impl Default for ConfigLocator {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIG_DIR, &OverrideConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let locator = ConfigLocator::default();
        assert_eq!(
            locator.config_dirs(),
            &[
                PathBuf::from("/etc/wireguard"),
                PathBuf::from("/usr/local/etc/wireguard"),
            ]
        );
        assert_eq!(locator.install_prefix(), Path::new("/usr/local"));
        assert_eq!(locator.state_tool(), Path::new("/usr/local/bin/wg-quick"));
    }

    #[test]
    fn test_prefix_override_moves_second_dir_and_tool() {
        let overrides = OverrideConfig {
            install_prefix: Some("/opt/homebrew".to_string()),
            state_tool_path: None,
        };
        let locator = ConfigLocator::new(DEFAULT_CONFIG_DIR, &overrides);
        assert_eq!(locator.config_dirs()[0], PathBuf::from("/etc/wireguard"));
        assert_eq!(
            locator.config_dirs()[1],
            PathBuf::from("/opt/homebrew/etc/wireguard")
        );
        assert_eq!(
            locator.state_tool(),
            Path::new("/opt/homebrew/bin/wg-quick")
        );
    }

    #[test]
    fn test_tool_override_wins_over_prefix() {
        let overrides = OverrideConfig {
            install_prefix: Some("/opt/homebrew".to_string()),
            state_tool_path: Some("/usr/bin/wg-quick".to_string()),
        };
        let locator = ConfigLocator::new(DEFAULT_CONFIG_DIR, &overrides);
        assert_eq!(locator.state_tool(), Path::new("/usr/bin/wg-quick"));
    }

    #[test]
    fn test_root_prefix_does_not_duplicate_default_dir() {
        let overrides = OverrideConfig {
            install_prefix: Some("/".to_string()),
            state_tool_path: None,
        };
        let locator = ConfigLocator::new(DEFAULT_CONFIG_DIR, &overrides);
        assert_eq!(locator.config_dirs(), &[PathBuf::from("/etc/wireguard")]);
    }

    #[test]
    fn test_search_path() {
        let locator = ConfigLocator::from_parts(
            vec![PathBuf::from("/etc/wg"), PathBuf::from("/opt/wg")],
            "/opt",
            "/opt/bin/wg-quick",
        );
        assert_eq!(locator.search_path(), "/etc/wg:/opt/wg");
    }
}
