/// Name used for platform directories.
pub const APP_NAME: &str = "cairn";

/// Workspace configuration file, looked up in the build root.
pub const CONFIG_FILE: &str = "cairn.toml";

/// Directory under the build root where `package` writes artifacts.
pub const DIST_DIR: &str = "dist";

/// Default number of concurrently running processes.
pub const DEFAULT_PARALLELISM: usize = 8;
