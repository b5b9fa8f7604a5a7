//! Types for external tools and binary discovery.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::hash::Digest;

/// A checksum-pinned downloadable tool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalToolSpec {
  pub name: String,
  pub version: String,
  pub platform: String,
  pub url: String,
  pub expected_digest: Digest,
  /// Path of the executable inside the fetched snapshot.
  pub exe: String,
}

impl ExternalToolSpec {
  /// Cache identity: one download per (name, version, platform).
  pub fn cache_key(&self) -> ToolKey {
    ToolKey {
      name: self.name.clone(),
      version: self.version.clone(),
      platform: self.platform.clone(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ToolKey {
  pub name: String,
  pub version: String,
  pub platform: String,
}

impl fmt::Display for ToolKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}@{} ({})", self.name, self.version, self.platform)
  }
}

/// A fetched tool: its snapshot digest and the executable's path in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadedTool {
  pub digest: Digest,
  pub exe: String,
}

/// Validation run against each binary candidate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BinaryPathTest {
  pub args: Vec<String>,
  /// Record a fingerprint of the test's stdout with each accepted binary.
  pub fingerprint_stdout: bool,
}

/// Search for a binary by name along an explicit search path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BinaryPathRequest {
  pub binary_name: String,
  pub search_path: Vec<PathBuf>,
  pub test: Option<BinaryPathTest>,
}

impl BinaryPathRequest {
  pub fn new(binary_name: impl Into<String>, search_path: Vec<PathBuf>) -> Self {
    Self {
      binary_name: binary_name.into(),
      search_path,
      test: None,
    }
  }

  pub fn with_test(mut self, args: Vec<String>) -> Self {
    self.test = Some(BinaryPathTest {
      args,
      fingerprint_stdout: true,
    });
    self
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryPath {
  pub path: PathBuf,
  /// Hex SHA-256 of the validation output, when a test was run.
  pub fingerprint: Option<String>,
}

/// Every acceptable match for a [`BinaryPathRequest`], in search-path order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryPaths {
  pub binary_name: String,
  pub searched: Vec<PathBuf>,
  pub paths: Vec<BinaryPath>,
}

impl BinaryPaths {
  pub fn first_path(&self) -> Option<&BinaryPath> {
    self.paths.first()
  }

  /// The first match, or `ToolNotFound` naming everything searched.
  pub fn first_path_or_raise(&self) -> Result<&BinaryPath, ToolError> {
    self.first_path().ok_or_else(|| ToolError::ToolNotFound {
      name: self.binary_name.clone(),
      searched: self.searched.iter().map(|p| p.display().to_string()).collect(),
    })
  }
}

/// Errors from fetching or locating tools.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
  #[error("checksum mismatch for {name} from {url}: expected {expected}, got {actual}")]
  ChecksumMismatch {
    name: String,
    url: String,
    expected: Digest,
    actual: Digest,
  },

  #[error("download of {url} failed: {message}")]
  Download { url: String, message: String },

  #[error("failed to extract {name}: {message}")]
  Extract { name: String, message: String },

  #[error("cannot find `{name}` on the search path; searched: {}", searched.join(", "))]
  ToolNotFound { name: String, searched: Vec<String> },

  #[error("{name} has no known version for platform {platform}")]
  UnsupportedPlatform { name: String, platform: String },

  #[error("{name} is not configured")]
  NotConfigured { name: String },
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn not_found_lists_searched_paths() {
    let paths = BinaryPaths {
      binary_name: "bash".to_string(),
      searched: vec![PathBuf::from("/opt/bin"), PathBuf::from("/usr/bin")],
      paths: Vec::new(),
    };
    let err = paths.first_path_or_raise().unwrap_err();
    assert_eq!(
      err.to_string(),
      "cannot find `bash` on the search path; searched: /opt/bin, /usr/bin"
    );
  }
}
