//! Fuzz target for tunnel name validation.
//!
//! Run with: cargo +nightly fuzz run fuzz_tunnel_name
//!
//! Any accepted name must stay inside the configuration directory when
//! joined onto it.

#![no_main]

use std::path::{Component, Path};

use libfuzzer_sys::fuzz_target;
use wgpilot_core::controller::{MAX_TUNNEL_NAME_LEN, is_valid_tunnel_name};

fuzz_target!(|name: &str| {
    if !is_valid_tunnel_name(name) {
        return;
    }

    assert!(!name.is_empty() && name.len() <= MAX_TUNNEL_NAME_LEN);
    let joined = Path::new("/etc/wireguard").join(format!("{name}.conf"));
    assert_eq!(joined.parent(), Some(Path::new("/etc/wireguard")));
    assert!(
        Path::new(name)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
    );
});
