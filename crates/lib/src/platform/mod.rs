//! Host detection and well-known directories.

pub mod paths;

use std::env::consts::{ARCH, OS};

/// Key that selects an external tool's known version: `linux`, `darwin` or
/// `windows`. `None` on any other OS.
pub fn tool_platform() -> Option<&'static str> {
  match OS {
    "linux" => Some("linux"),
    "macos" => Some("darwin"),
    "windows" => Some("windows"),
    _ => None,
  }
}

/// `<arch>-<tool platform>`, e.g. `aarch64-darwin`.
pub fn host_triple() -> Option<String> {
  tool_platform().map(|os| format!("{ARCH}-{os}"))
}
