//! Addresses, target kinds and target definitions.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from parsing addresses and building the target graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetError {
  #[error("unknown target '{address}'{}", .referenced_by.as_ref().map(|r| format!(" (dependency of '{r}')")).unwrap_or_default())]
  UnknownTarget {
    address: String,
    referenced_by: Option<String>,
  },

  #[error("invalid target '{address}': {reason}")]
  InvalidTarget { address: String, reason: String },

  #[error("invalid address '{address}': {reason}")]
  InvalidAddress { address: String, reason: String },
}

impl TargetError {
  pub(crate) fn invalid(address: &Address, reason: impl Into<String>) -> Self {
    TargetError::InvalidTarget {
      address: address.to_string(),
      reason: reason.into(),
    }
  }
}

/// A target address: `<dir>:<name>`.
///
/// `dir` is relative to the build root, `/`-separated, and empty for the
/// root itself. `src/app` alone is shorthand for `src/app:app`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
  pub dir: String,
  pub name: String,
}

impl Address {
  pub fn new(dir: impl Into<String>, name: impl Into<String>) -> Self {
    Self {
      dir: dir.into(),
      name: name.into(),
    }
  }

  /// `dir` joined with `path`, or `path` alone for the root directory.
  pub fn join(&self, path: &str) -> String {
    if self.dir.is_empty() {
      path.to_string()
    } else {
      format!("{}/{path}", self.dir)
    }
  }
}

impl FromStr for Address {
  type Err = TargetError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let invalid = |reason: &str| TargetError::InvalidAddress {
      address: s.to_string(),
      reason: reason.to_string(),
    };

    let spec = s.strip_prefix("//").unwrap_or(s);
    let (dir, name) = match spec.split_once(':') {
      Some((dir, name)) => (dir.trim_end_matches('/'), name.to_string()),
      None => {
        let dir = spec.trim_end_matches('/');
        let name = dir.rsplit('/').next().unwrap_or_default().to_string();
        (dir, name)
      }
    };

    if name.is_empty() {
      return Err(invalid("missing target name"));
    }
    if name.contains(['/', ':']) {
      return Err(invalid("target name may not contain '/' or ':'"));
    }
    if dir.starts_with('/') {
      return Err(invalid("directory must be relative to the build root"));
    }
    if dir.split('/').any(|c| c == ".." || c == ".") {
      return Err(invalid("directory may not contain '.' or '..'"));
    }

    Ok(Self::new(dir, name))
  }
}

impl TryFrom<String> for Address {
  type Error = TargetError;

  fn try_from(s: String) -> Result<Self, Self::Error> {
    s.parse()
  }
}

impl From<Address> for String {
  fn from(address: Address) -> Self {
    address.to_string()
  }
}

impl fmt::Display for Address {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.dir, self.name)
  }
}

/// The three Bash target types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
  /// Bash code that is sourced by other scripts, not run directly.
  BashLibrary,
  /// A single script that may be run or packaged.
  BashBinary,
  /// shunit2 test scripts.
  BashTests,
}

impl TargetKind {
  pub fn alias(&self) -> &'static str {
    match self {
      TargetKind::BashLibrary => "bash_library",
      TargetKind::BashBinary => "bash_binary",
      TargetKind::BashTests => "bash_tests",
    }
  }

  /// Source globs used when a target does not list its own.
  pub fn default_sources(&self) -> &'static [&'static str] {
    match self {
      TargetKind::BashLibrary => &["*.sh"],
      TargetKind::BashBinary => &[],
      TargetKind::BashTests => &["*_test.sh", "test_*.sh"],
    }
  }
}

impl fmt::Display for TargetKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.alias())
  }
}

/// One `[[targets]]` table from `cairn.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
  pub address: String,
  pub kind: TargetKind,
  #[serde(default)]
  pub sources: Option<Vec<String>>,
  #[serde(default)]
  pub dependencies: Vec<String>,
  #[serde(default)]
  pub output_path: Option<String>,
  /// Test timeout in seconds.
  #[serde(default)]
  pub timeout: Option<u64>,
}

/// A validated target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
  pub address: Address,
  pub kind: TargetKind,
  /// Globs relative to the target's directory.
  pub sources: Vec<String>,
  pub dependencies: Vec<Address>,
  pub output_path: Option<String>,
  pub timeout: Option<Duration>,
}

impl Target {
  /// Source globs relative to the build root. Exclusions keep their `!`.
  pub fn source_globs(&self) -> Vec<String> {
    self
      .sources
      .iter()
      .map(|glob| match glob.strip_prefix('!') {
        Some(exclude) => format!("!{}", self.address.join(exclude)),
        None => self.address.join(glob),
      })
      .collect()
  }

  /// Where a package of this target is written, relative to the dist dir.
  ///
  /// Defaults to `<dir with '/' as '.'>/<name>.<extension>`.
  pub fn output_filename(&self, extension: &str) -> String {
    if let Some(path) = &self.output_path {
      return path.clone();
    }
    let file = format!("{}.{extension}", self.address.name);
    if self.address.dir.is_empty() {
      file
    } else {
      format!("{}/{file}", self.address.dir.replace('/', "."))
    }
  }
}

/// Requested targets plus everything they depend on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitiveTargets {
  pub roots: Vec<Target>,
  /// Dependencies in breadth-first order, excluding the roots.
  pub dependencies: Vec<Target>,
}

impl TransitiveTargets {
  pub fn closure(&self) -> impl Iterator<Item = &Target> {
    self.roots.iter().chain(&self.dependencies)
  }

  pub fn closure_addresses(&self) -> Vec<Address> {
    self.closure().map(|t| t.address.clone()).collect()
  }

  pub fn dependency_addresses(&self) -> Vec<Address> {
    self.dependencies.iter().map(|t| t.address.clone()).collect()
  }
}
