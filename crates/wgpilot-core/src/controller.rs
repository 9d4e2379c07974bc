//! Tunnel state changes via the external privileged tool.
//!
//! The controller validates the caller-supplied tunnel name, then runs
//! `<state_tool> up|down <name>` and relays the tool's exit status. It never
//! interprets or retries a failure.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;

use tracing::{debug, error, info, warn};

use wgpilot_config::ConfigLocator;

/// Returned when the tunnel name fails validation. The tool is not run.
pub const INVALID_TUNNEL_NAME: i32 = -1;

/// Returned when the state tool could not be started.
pub const TOOL_SPAWN_FAILED: i32 = -2;

/// Returned when the state tool exited without a status (killed by a signal).
pub const TOOL_TERMINATED: i32 = -3;

/// Longest accepted tunnel name (the interface name limit).
pub const MAX_TUNNEL_NAME_LEN: usize = 15;

/// Colon-separated configuration search path handed to the tool.
pub const SEARCH_PATH_ENV: &str = "WG_CONFIG_SEARCH_PATHS";

/// Location of the tool itself, for tools that re-exec themselves.
pub const STATE_TOOL_ENV: &str = "WG_QUICK";

/// Resolved installation prefix.
pub const INSTALL_PREFIX_ENV: &str = "WG_INSTALL_PREFIX";

/// Whether `name` is a usable tunnel name.
///
/// Accepts 1 to 15 characters from `[A-Za-z0-9_=+.-]`, excluding `.` and
/// `..`. Such a name can neither contain a path separator nor refer
/// outside the configuration directory.
pub fn is_valid_tunnel_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_TUNNEL_NAME_LEN
        && name != "."
        && name != ".."
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'=' | b'+' | b'.' | b'-'))
}

/// Direction of a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelAction {
    Up,
    Down,
}

impl TunnelAction {
    pub fn from_enable(enable: bool) -> Self {
        if enable { Self::Up } else { Self::Down }
    }

    /// The tool's positional verb.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

impl std::fmt::Display for TunnelAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runs the state tool on behalf of clients.
#[derive(Debug, Clone)]
pub struct TunnelController {
    state_tool: PathBuf,
    install_prefix: PathBuf,
    search_path: String,
}

impl TunnelController {
    pub fn new(locator: &ConfigLocator) -> Self {
        Self {
            state_tool: locator.state_tool().to_path_buf(),
            install_prefix: locator.install_prefix().to_path_buf(),
            search_path: locator.search_path(),
        }
    }

    /// Build the tool invocation for `action` on `name`.
    ///
    /// The environment carries the search path, the tool location, and the
    /// installation prefix; `<prefix>/bin` is put first on `PATH` so the tool
    /// finds its companions.
    pub fn command(&self, action: TunnelAction, name: &str) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.state_tool);
        cmd.arg(action.as_str())
            .arg(name)
            .env(SEARCH_PATH_ENV, &self.search_path)
            .env(STATE_TOOL_ENV, &self.state_tool)
            .env(INSTALL_PREFIX_ENV, &self.install_prefix)
            .env("PATH", self.tool_path_env())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    fn tool_path_env(&self) -> OsString {
        let mut dirs = vec![self.install_prefix.join("bin")];
        if let Some(path) = std::env::var_os("PATH") {
            dirs.extend(std::env::split_paths(&path));
        }
        std::env::join_paths(dirs).unwrap_or_else(|_| self.install_prefix.join("bin").into())
    }

    /// Bring `name` up (`enable`) or down and return the tool's exit code.
    ///
    /// Waits for the tool to finish. Returns [`INVALID_TUNNEL_NAME`] without
    /// running anything when `name` fails validation.
    pub async fn set_tunnel_state(&self, name: &str, enable: bool) -> i32 {
        if !is_valid_tunnel_name(name) {
            debug!(tunnel = name, "Rejected invalid tunnel name");
            return INVALID_TUNNEL_NAME;
        }

        let action = TunnelAction::from_enable(enable);
        info!(tunnel = name, %action, tool = %self.state_tool.display(), "Changing tunnel state");

        let output = match self.command(action, name).output().await {
            Ok(output) => output,
            Err(e) => {
                error!(tool = %self.state_tool.display(), error = %e, "Failed to run state tool");
                return TOOL_SPAWN_FAILED;
            }
        };

        let Some(code) = output.status.code() else {
            warn!(tunnel = name, %action, status = %output.status, "State tool terminated by signal");
            return TOOL_TERMINATED;
        };

        if code == 0 {
            debug!(tunnel = name, %action, "State tool succeeded");
        } else {
            warn!(
                tunnel = name,
                %action,
                code,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "State tool failed"
            );
        }
        code
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wgpilot_test_utils::TunnelTree;

    fn controller_for(tree: &TunnelTree) -> TunnelController {
        TunnelController::new(&tree.config().locator())
    }

    #[test]
    fn test_valid_names() {
        for name in ["home", "wg0", "my-vpn", "a.b", "x_y", "a=b+c", "fifteen-chars-x"] {
            assert!(is_valid_tunnel_name(name), "{name} should be valid");
        }
    }

    #[test]
    fn test_invalid_names() {
        for name in [
            "",
            ".",
            "..",
            "../etc",
            "a/b",
            "/etc",
            "home\\x",
            "with space",
            "sixteen-chars-xx",
            "home\n",
            "tünnel",
        ] {
            assert!(!is_valid_tunnel_name(name), "{name:?} should be invalid");
        }
    }

    #[test]
    fn test_action_from_enable() {
        assert_eq!(TunnelAction::from_enable(true).as_str(), "up");
        assert_eq!(TunnelAction::from_enable(false).to_string(), "down");
    }

    #[tokio::test]
    async fn test_invalid_name_never_runs_tool() {
        let tree = TunnelTree::new();
        tree.install_stub_tool(0);

        let code = controller_for(&tree).set_tunnel_state("../etc", true).await;
        assert_eq!(code, INVALID_TUNNEL_NAME);
        assert!(tree.tool_invocations().is_empty());
    }

    #[tokio::test]
    async fn test_success_passes_arguments_and_search_path() {
        let tree = TunnelTree::new();
        tree.install_stub_tool(0);

        let code = controller_for(&tree).set_tunnel_state("home", true).await;
        assert_eq!(code, 0);

        let expected = format!(
            "up home {}:{}",
            tree.primary_dir().display(),
            tree.secondary_dir().display()
        );
        assert_eq!(tree.tool_invocations(), vec![expected]);
    }

    #[tokio::test]
    async fn test_exit_code_is_relayed_verbatim() {
        let tree = TunnelTree::new();
        tree.install_stub_tool(3);

        let code = controller_for(&tree).set_tunnel_state("home", false).await;
        assert_eq!(code, 3);
        assert!(tree.tool_invocations()[0].starts_with("down home"));
    }

    #[tokio::test]
    async fn test_state_tool_override_is_used() {
        let tree = TunnelTree::new();
        let stub = tree.install_stub_tool(0);
        let relocated = tree.runtime_dir().join("custom-wg-quick");
        std::fs::rename(&stub, &relocated).unwrap();

        let config = tree.config_builder().state_tool_path(&relocated).build();
        let controller = TunnelController::new(&config.locator());
        assert_eq!(controller.set_tunnel_state("home", true).await, 0);
        assert_eq!(controller_for(&tree).set_tunnel_state("home", true).await, TOOL_SPAWN_FAILED);
        assert_eq!(tree.tool_invocations().len(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_missing_tool_reports_spawn_failure() {
        let tree = TunnelTree::new();

        let code = controller_for(&tree).set_tunnel_state("home", true).await;
        assert_eq!(code, TOOL_SPAWN_FAILED);
    }

    #[test]
    fn test_command_environment() {
        let tree = TunnelTree::new();
        let controller = controller_for(&tree);
        let cmd = controller.command(TunnelAction::Up, "home");
        let std_cmd = cmd.as_std();

        let env: Vec<_> = std_cmd.get_envs().collect();
        let lookup = |key: &str| {
            env.iter()
                .find(|(k, _)| *k == key)
                .and_then(|(_, v)| *v)
                .map(|v| v.to_string_lossy().into_owned())
        };

        assert_eq!(
            lookup(INSTALL_PREFIX_ENV),
            Some(tree.prefix().to_string_lossy().into_owned())
        );
        assert!(lookup(STATE_TOOL_ENV).unwrap().ends_with("bin/wg-quick"));
        assert!(
            lookup("PATH")
                .unwrap()
                .starts_with(&*tree.prefix().join("bin").to_string_lossy())
        );
        let args: Vec<_> = std_cmd.get_args().collect();
        assert_eq!(args, vec!["up", "home"]);
    }
}
