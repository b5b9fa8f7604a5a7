//! cairn-lib: a content-addressed rule executor with a Bash plugin.
//!
//! - `store`: blobs and directory trees keyed by SHA-256
//! - `rules` / `execute`: typed rules, resolved by signature and memoized
//! - `process`: sandboxed, memoized process execution
//! - `tools`: checksum-pinned downloads and binary discovery
//! - `target` / `config`: targets and settings from `cairn.toml`
//! - `bash`: the Bash rules (package, run, repl, lint, fmt, test)
//! - `goals`: user-facing commands over those rules

pub mod bash;
pub mod config;
pub mod consts;
pub mod error;
pub mod execute;
pub mod goals;
pub mod platform;
pub mod process;
pub mod rules;
pub mod store;
pub mod target;
pub mod tools;
pub mod util;

pub use error::Error;
