//! Workspace configuration (`cairn.toml`).
//!
//! The file is optional; every section has a default. Parsing only checks
//! shape. Resolution into the values rules read from the session
//! (`BashSetup`, tool options, an `ExternalToolSpec` per platform) happens
//! in the accessor methods below.
//!
//! # Example
//!
//! ```toml
//! [bash-setup]
//! executable_search_paths = ["/usr/bin", "<PATH>"]
//!
//! [shfmt]
//! version = "v3.2.4"
//! exe = "shfmt"
//! [[shfmt.known_versions]]
//! platform = "linux"
//! url = "https://github.com/mvdan/sh/releases/download/v3.2.4/shfmt_v3.2.4_linux_amd64"
//! sha256 = "3f5a47f8fec27fae3e06d611559a2063f5d27e4b9501171dde9959b8c60a3538"
//! size = 2998784
//!
//! [[targets]]
//! address = "src/app:app"
//! kind = "bash_binary"
//! sources = ["main.sh"]
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::bash::options::{
  ArchiveFormat, ExternalToolOptions, PackageOptions, ShellcheckOptions, ShfmtOptions, Shunit2Options, TestOptions,
};
use crate::bash::setup::{BashSetup, PATH_PLACEHOLDER};
use crate::consts::{CONFIG_FILE, DEFAULT_PARALLELISM, DIST_DIR};
use crate::store::{self, ContentStore, StoreError};
use crate::target::{ConfigTargetGraph, TargetConfig, TargetError};
use crate::tools::{ExternalToolSpec, ToolError, url_to_filename};
use crate::util::hash::Digest;

/// Pinned shunit2 revision.
pub const SHUNIT2_URL: &str =
  "https://raw.githubusercontent.com/kward/shunit2/b9102bb763cc603b3115ed30a5648bf950548097/shunit2";
pub const SHUNIT2_SHA256: &str = "1f11477b7948150d1ca50cdd41d89be4ed2acd137e26d2e0fe23966d0e272cc5";
pub const SHUNIT2_SIZE: u64 = 40987;

#[derive(Debug, Clone, Error)]
pub enum ConfigError {
  #[error("failed to read {}: {source}", path.display())]
  Read { path: PathBuf, source: Arc<io::Error> },

  #[error("failed to parse {}: {message}", path.display())]
  Parse { path: PathBuf, message: String },

  #[error("invalid configuration: {0}")]
  Invalid(String),

  /// A rule read a session value that was never provided.
  #[error("missing session value: {0}")]
  MissingOption(String),
}

/// Top-level `cairn.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CairnConfig {
  #[serde(default)]
  pub executor: ExecutorSection,
  #[serde(default)]
  pub store: StoreSection,
  #[serde(default, rename = "bash-setup")]
  pub bash_setup: BashSetupSection,
  #[serde(default)]
  pub package: PackageSection,
  #[serde(default)]
  pub test: TestSection,
  #[serde(default)]
  pub shunit2: Shunit2Section,
  #[serde(default)]
  pub shellcheck: ExternalToolSection,
  #[serde(default)]
  pub shfmt: ExternalToolSection,
  #[serde(default)]
  pub targets: Vec<TargetConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutorSection {
  pub parallelism: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
  #[default]
  Disk,
  Memory,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreSection {
  #[serde(default)]
  pub backend: StoreBackend,
  /// Relative paths are resolved against the build root.
  pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BashSetupSection {
  #[serde(default = "default_search_paths")]
  pub executable_search_paths: Vec<String>,
}

impl Default for BashSetupSection {
  fn default() -> Self {
    Self {
      executable_search_paths: default_search_paths(),
    }
  }
}

fn default_search_paths() -> Vec<String> {
  vec![PATH_PLACEHOLDER.to_string()]
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageSection {
  #[serde(default)]
  pub format: ArchiveFormat,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestSection {
  #[serde(default)]
  pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Shunit2Section {
  pub url: String,
  pub sha256: String,
  pub size: u64,
}

impl Default for Shunit2Section {
  fn default() -> Self {
    Self {
      url: SHUNIT2_URL.to_string(),
      sha256: SHUNIT2_SHA256.to_string(),
      size: SHUNIT2_SIZE,
    }
  }
}

/// `[shellcheck]` and `[shfmt]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExternalToolSection {
  #[serde(default)]
  pub skip: bool,
  #[serde(default)]
  pub args: Vec<String>,
  pub config: Option<String>,
  pub version: Option<String>,
  /// Path of the executable inside the download. Required for archives.
  pub exe: Option<String>,
  #[serde(default)]
  pub known_versions: Vec<KnownVersion>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KnownVersion {
  /// Matches the section's `version` when both are set.
  pub version: Option<String>,
  pub platform: String,
  pub url: String,
  pub sha256: String,
  pub size: u64,
}

impl ExternalToolSection {
  /// Resolve the options for `name` on `platform`.
  ///
  /// Tool problems that only matter once the tool is needed (nothing
  /// configured, no entry for this platform) are kept in
  /// [`ExternalToolOptions::tool`]. Malformed entries fail here.
  pub fn resolve(&self, name: &str, platform: Option<&str>) -> Result<ExternalToolOptions, ConfigError> {
    Ok(ExternalToolOptions {
      skip: self.skip,
      args: self.args.clone(),
      config: self.config.clone(),
      tool: self.tool_spec(name, platform)?,
    })
  }

  fn tool_spec(&self, name: &str, platform: Option<&str>) -> Result<Result<ExternalToolSpec, ToolError>, ConfigError> {
    if self.known_versions.is_empty() {
      return Ok(Err(ToolError::NotConfigured { name: name.to_string() }));
    }
    let Some(platform) = platform else {
      return Ok(Err(ToolError::UnsupportedPlatform {
        name: name.to_string(),
        platform: std::env::consts::OS.to_string(),
      }));
    };

    let entry = self.known_versions.iter().find(|known| {
      known.platform == platform
        && match (&self.version, &known.version) {
          (Some(wanted), Some(have)) => wanted == have,
          _ => true,
        }
    });
    let Some(entry) = entry else {
      return Ok(Err(ToolError::UnsupportedPlatform {
        name: name.to_string(),
        platform: platform.to_string(),
      }));
    };

    let expected_digest = Digest::from_hex(&entry.sha256, entry.size)
      .map_err(|e| ConfigError::Invalid(format!("[{name}] known version for {platform}: {e}")))?;
    let is_archive = entry.url.ends_with(".tar.gz") || entry.url.ends_with(".tgz");
    let exe = match &self.exe {
      Some(exe) => exe.clone(),
      None if is_archive => {
        return Err(ConfigError::Invalid(format!(
          "[{name}].exe is required when the download is an archive"
        )));
      }
      None => url_to_filename(&entry.url),
    };

    Ok(Ok(ExternalToolSpec {
      name: name.to_string(),
      version: self
        .version
        .clone()
        .or_else(|| entry.version.clone())
        .unwrap_or_else(|| "unversioned".to_string()),
      platform: platform.to_string(),
      url: entry.url.clone(),
      expected_digest,
      exe,
    }))
  }
}

impl CairnConfig {
  /// Read and parse a config file.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let text = fs::read_to_string(path).map_err(|e| ConfigError::Read {
      path: path.to_path_buf(),
      source: Arc::new(e),
    })?;
    Self::parse(&text, path)
  }

  /// `cairn.toml` in `build_root`, or the defaults if there is none.
  pub fn discover(build_root: &Path) -> Result<Self, ConfigError> {
    let path = build_root.join(CONFIG_FILE);
    if path.is_file() {
      debug!(path = %path.display(), "loading config");
      Self::load(&path)
    } else {
      debug!(build_root = %build_root.display(), "no config file, using defaults");
      Ok(Self::default())
    }
  }

  /// Parse config text. `origin` is only used in errors.
  pub fn parse(text: &str, origin: &Path) -> Result<Self, ConfigError> {
    let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse {
      path: origin.to_path_buf(),
      message: e.to_string(),
    })?;
    if config.executor.parallelism == Some(0) {
      return Err(ConfigError::Invalid("[executor].parallelism must be at least 1".to_string()));
    }
    Ok(config)
  }

  pub fn parallelism(&self) -> usize {
    self.executor.parallelism.unwrap_or(DEFAULT_PARALLELISM)
  }

  /// Store directory for `build_root`; `CAIRN_STORE` wins over the file.
  pub fn store_dir(&self, build_root: &Path) -> PathBuf {
    store::paths::store_dir(build_root, self.store.dir.as_deref())
  }

  /// Open the configured store. Source globs never read the store
  /// directory or the dist directory.
  pub fn open_store(&self, build_root: &Path) -> Result<ContentStore, StoreError> {
    let store_dir = self.store_dir(build_root);
    let store = match self.store.backend {
      StoreBackend::Memory => ContentStore::memory(),
      StoreBackend::Disk => ContentStore::disk(store_dir.clone())?,
    };
    Ok(store.prune_dirs([store_dir, build_root.join(DIST_DIR)]))
  }

  pub fn bash_setup(&self) -> BashSetup {
    BashSetup::from_env(&self.bash_setup.executable_search_paths)
  }

  pub fn shellcheck(&self, platform: Option<&str>) -> Result<ShellcheckOptions, ConfigError> {
    self.shellcheck.resolve("shellcheck", platform).map(ShellcheckOptions)
  }

  pub fn shfmt(&self, platform: Option<&str>) -> Result<ShfmtOptions, ConfigError> {
    self.shfmt.resolve("shfmt", platform).map(ShfmtOptions)
  }

  pub fn shunit2(&self) -> Result<Shunit2Options, ConfigError> {
    let expected_digest = Digest::from_hex(&self.shunit2.sha256, self.shunit2.size)
      .map_err(|e| ConfigError::Invalid(format!("[shunit2].sha256: {e}")))?;
    Ok(Shunit2Options {
      url: self.shunit2.url.clone(),
      expected_digest,
    })
  }

  pub fn package_options(&self) -> PackageOptions {
    PackageOptions {
      format: self.package.format,
    }
  }

  /// Test options; `force` from the command line is or-ed in.
  pub fn test_options(&self, force: bool) -> TestOptions {
    TestOptions {
      force: force || self.test.force,
    }
  }

  pub fn target_graph(&self) -> Result<ConfigTargetGraph, TargetError> {
    ConfigTargetGraph::from_configs(&self.targets)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::target::TargetKind;
  use serial_test::serial;

  const SHA: &str = "3f5a47f8fec27fae3e06d611559a2063f5d27e4b9501171dde9959b8c60a3538";

  fn parse(text: &str) -> Result<CairnConfig, ConfigError> {
    CairnConfig::parse(text, Path::new("cairn.toml"))
  }

  #[test]
  fn empty_file_gives_defaults() {
    let config = parse("").unwrap();
    assert_eq!(config, CairnConfig::default());
    assert_eq!(config.parallelism(), DEFAULT_PARALLELISM);
    assert_eq!(config.bash_setup.executable_search_paths, vec!["<PATH>"]);
    assert_eq!(config.package.format, ArchiveFormat::TarGz);
    assert_eq!(config.shunit2().unwrap().expected_digest.size, SHUNIT2_SIZE);
  }

  #[test]
  fn full_file_parses() {
    let config = parse(&format!(
      r#"
[executor]
parallelism = 2

[store]
backend = "memory"

[bash-setup]
executable_search_paths = ["/usr/bin", "/bin"]

[package]
format = "zip"

[test]
force = true

[shfmt]
args = ["-i", "2"]
version = "v3.2.4"
[[shfmt.known_versions]]
platform = "linux"
url = "https://example.com/shfmt_v3.2.4_linux_amd64"
sha256 = "{SHA}"
size = 2998784

[[targets]]
address = "src/app:app"
kind = "bash_binary"
sources = ["main.sh"]
output_path = "app.zip"
"#
    ))
    .unwrap();

    assert_eq!(config.parallelism(), 2);
    assert_eq!(config.store.backend, StoreBackend::Memory);
    assert_eq!(config.package_options().format, ArchiveFormat::Zip);
    assert!(config.test_options(false).force);
    assert_eq!(config.targets[0].kind, TargetKind::BashBinary);

    let shfmt = config.shfmt(Some("linux")).unwrap();
    assert_eq!(shfmt.args, vec!["-i", "2"]);
    let spec = shfmt.tool.clone().unwrap();
    assert_eq!(spec.version, "v3.2.4");
    assert_eq!(spec.exe, "shfmt_v3.2.4_linux_amd64");
    assert_eq!(spec.expected_digest.size, 2998784);
  }

  #[test]
  fn unknown_keys_are_rejected() {
    let err = parse("[executor]\nthreads = 4\n").unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
  }

  #[test]
  fn zero_parallelism_is_invalid() {
    assert!(matches!(
      parse("[executor]\nparallelism = 0\n"),
      Err(ConfigError::Invalid(_))
    ));
  }

  #[test]
  fn unconfigured_tool_has_a_skip_reason() {
    let config = CairnConfig::default();
    let shellcheck = config.shellcheck(Some("linux")).unwrap();
    assert_eq!(
      shellcheck.tool,
      Err(ToolError::NotConfigured {
        name: "shellcheck".to_string()
      })
    );
    assert!(shellcheck.skip_reason().is_some());
  }

  #[test]
  fn missing_platform_entry_is_unsupported() {
    let config = parse(&format!(
      r#"
[shellcheck]
exe = "shellcheck"
[[shellcheck.known_versions]]
platform = "darwin"
url = "https://example.com/shellcheck"
sha256 = "{SHA}"
size = 10
"#
    ))
    .unwrap();
    let options = config.shellcheck(Some("linux")).unwrap();
    assert!(matches!(options.tool, Err(ToolError::UnsupportedPlatform { .. })));
    assert_eq!(options.skip_reason(), None);
  }

  #[test]
  fn archive_requires_exe() {
    let config = parse(&format!(
      r#"
[shellcheck]
[[shellcheck.known_versions]]
platform = "linux"
url = "https://example.com/shellcheck-v0.7.1.linux.x86_64.tar.gz"
sha256 = "{SHA}"
size = 10
"#
    ))
    .unwrap();
    assert!(matches!(config.shellcheck(Some("linux")), Err(ConfigError::Invalid(_))));
  }

  #[test]
  fn version_selects_the_matching_entry() {
    let config = parse(&format!(
      r#"
[shfmt]
version = "v2"
[[shfmt.known_versions]]
version = "v1"
platform = "linux"
url = "https://example.com/shfmt_v1"
sha256 = "{SHA}"
size = 1
[[shfmt.known_versions]]
version = "v2"
platform = "linux"
url = "https://example.com/shfmt_v2"
sha256 = "{SHA}"
size = 2
"#
    ))
    .unwrap();
    let spec = config.shfmt(Some("linux")).unwrap().tool.clone().unwrap();
    assert_eq!(spec.url, "https://example.com/shfmt_v2");
  }

  #[test]
  fn bad_sha_is_invalid() {
    let err = parse("[shunit2]\nurl = \"https://x\"\nsha256 = \"zz\"\nsize = 1\n")
      .unwrap()
      .shunit2()
      .unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
  }

  #[test]
  fn discover_without_file_uses_defaults() {
    let temp = tempfile::TempDir::new().unwrap();
    assert_eq!(CairnConfig::discover(temp.path()).unwrap(), CairnConfig::default());

    std::fs::write(temp.path().join(CONFIG_FILE), "[test]\nforce = true\n").unwrap();
    assert!(CairnConfig::discover(temp.path()).unwrap().test.force);
  }

  #[test]
  #[serial]
  fn store_dir_honors_env_override() {
    let config = parse("[store]\ndir = \"cache/store\"\n").unwrap();
    temp_env::with_var("CAIRN_STORE", None::<&str>, || {
      assert_eq!(config.store_dir(Path::new("/ws")), PathBuf::from("/ws/cache/store"));
    });
    temp_env::with_var("CAIRN_STORE", Some("/elsewhere"), || {
      assert_eq!(config.store_dir(Path::new("/ws")), PathBuf::from("/elsewhere"));
    });
  }

  #[test]
  #[serial]
  fn opened_store_does_not_glob_its_own_dir_or_dist() {
    use crate::store::GlobMatchErrorBehavior;

    let temp = tempfile::TempDir::new().unwrap();
    let root = temp.path();
    std::fs::create_dir_all(root.join("src")).unwrap();
    std::fs::create_dir_all(root.join("dist/src")).unwrap();
    std::fs::write(root.join("src/a.sh"), "a").unwrap();
    std::fs::write(root.join("dist/src/a.sh"), "packaged").unwrap();

    temp_env::with_var("CAIRN_STORE", None::<&str>, || {
      let config = CairnConfig::default();
      let store = config.open_store(root).unwrap();
      store.put(b"a blob on disk").unwrap();

      let snapshot = store
        .path_globs(root, &["**/*".to_string()], GlobMatchErrorBehavior::Error, "test")
        .unwrap();
      assert_eq!(snapshot.files, vec!["src/a.sh"]);
    });
  }

  #[test]
  #[serial]
  fn bash_setup_expands_process_path() {
    let config = CairnConfig::default();
    temp_env::with_var("PATH", Some("/a:/b"), || {
      assert_eq!(config.bash_setup().search_path(), ["/a", "/b"]);
    });
  }
}
