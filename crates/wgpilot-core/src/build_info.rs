//! Build-time metadata embedded by the build script.
//!
//! Backs the `getVersion` IPC call and the daemon's startup banner.

/// The git commit hash at build time (short form).
pub const GIT_HASH: &str = env!("WGPILOT_GIT_HASH");

/// The build profile (`debug` or `release`).
pub const BUILD_PROFILE: &str = env!("WGPILOT_BUILD_PROFILE");

/// Returned by [`version_string`] when no package version was embedded.
pub const UNKNOWN_VERSION: &str = "n/a";

/// The crate version from Cargo.toml, if the build provided one.
pub fn version() -> Option<&'static str> {
    option_env!("CARGO_PKG_VERSION").filter(|v| !v.is_empty())
}

/// Version identifier reported to clients.
///
/// Example: `"0.1.0 (abc1234)"`. Never fails; yields `"n/a"` when the
/// package version is unavailable.
pub fn version_string() -> String {
    match version() {
        Some(v) => format!("{v} ({GIT_HASH})"),
        None => UNKNOWN_VERSION.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_string_contains_package_version() {
        let v = version_string();
        assert!(v.starts_with(env!("CARGO_PKG_VERSION")));
        assert!(v.contains(GIT_HASH));
    }

    #[test]
    fn test_git_hash_not_empty() {
        assert!(!GIT_HASH.is_empty());
    }

    #[test]
    fn test_build_profile() {
        assert!(
            matches!(BUILD_PROFILE, "debug" | "release"),
            "unexpected profile {BUILD_PROFILE:?}"
        );
    }
}
