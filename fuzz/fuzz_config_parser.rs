//! Fuzz target for the TOML configuration parser.
//!
//! Run with: cargo +nightly fuzz run fuzz_config_parser
//!
//! Parses arbitrary input as `AppConfig` and, when it validates, resolves
//! the tunnel search directories from it.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(config) = wgpilot_config::AppConfig::parse(s) else {
        return;
    };

    let locator = config.locator();
    let dirs = locator.config_dirs();
    assert!(!dirs.is_empty());
    assert!(dirs.len() <= 2);
    if dirs.len() == 2 {
        assert_ne!(dirs[0], dirs[1]);
    }
});
