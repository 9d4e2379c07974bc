//! Configuration builders for tests.
//!
//! Use [`TestConfigBuilder`] to create customised [`AppConfig`] values without
//! repeating boilerplate across crate boundaries.

use std::path::Path;

use wgpilot_config::AppConfig;

/// Fluent builder for [`AppConfig`] in tests.
///
/// # Example
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .config_dir(tree.primary_dir())
///     .runtime_dir(tree.runtime_dir())
///     .min_uptime_secs(0)
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    pub fn socket_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config.daemon.socket_path = path_string(path);
        self
    }

    pub fn config_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.config.daemon.config_dir = path_string(path);
        self
    }

    pub fn runtime_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.config.daemon.runtime_dir = path_string(path);
        self
    }

    pub fn min_uptime_secs(mut self, secs: u64) -> Self {
        self.config.daemon.min_uptime_secs = secs;
        self
    }

    pub fn install_prefix(mut self, path: impl AsRef<Path>) -> Self {
        self.config.overrides.install_prefix = Some(path_string(path));
        self
    }

    pub fn state_tool_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config.overrides.state_tool_path = Some(path_string(path));
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn path_string(path: impl AsRef<Path>) -> String {
    path.as_ref().to_string_lossy().into_owned()
}
