//! Resolved option values the Bash rules read from the session.

use std::ops::Deref;

use serde::{Deserialize, Serialize};

use crate::tools::{ExternalToolSpec, ToolError};
use crate::util::hash::Digest;

/// Options shared by the downloaded linters and formatters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalToolOptions {
  pub skip: bool,
  /// Extra arguments passed before the source files.
  pub args: Vec<String>,
  /// Config file glob, relative to the build root. It must match.
  pub config: Option<String>,
  /// The tool to fetch for this platform, or why there is none.
  pub tool: Result<ExternalToolSpec, ToolError>,
}

impl ExternalToolOptions {
  /// A tool with no download configured.
  pub fn unconfigured(name: &str) -> Self {
    Self {
      skip: false,
      args: Vec::new(),
      config: None,
      tool: Err(ToolError::NotConfigured { name: name.to_string() }),
    }
  }

  /// Why this tool will not run, if it will not.
  pub fn skip_reason(&self) -> Option<String> {
    if self.skip {
      return Some("skipped by configuration".to_string());
    }
    match &self.tool {
      Err(e @ ToolError::NotConfigured { .. }) => Some(e.to_string()),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellcheckOptions(pub ExternalToolOptions);

impl Deref for ShellcheckOptions {
  type Target = ExternalToolOptions;

  fn deref(&self) -> &Self::Target {
    &self.0
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShfmtOptions(pub ExternalToolOptions);

impl Deref for ShfmtOptions {
  type Target = ExternalToolOptions;

  fn deref(&self) -> &Self::Target {
    &self.0
  }
}

/// The pinned shunit2 script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shunit2Options {
  pub url: String,
  pub expected_digest: Digest,
}

impl Shunit2Options {
  pub fn tool_spec(&self) -> ExternalToolSpec {
    ExternalToolSpec {
      name: "shunit2".to_string(),
      version: self.expected_digest.fingerprint.to_hex(),
      platform: "any".to_string(),
      url: self.url.clone(),
      expected_digest: self.expected_digest,
      exe: "shunit2".to_string(),
    }
  }
}

/// Archive produced by `package`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArchiveFormat {
  #[default]
  #[serde(rename = "tar.gz")]
  TarGz,
  #[serde(rename = "zip")]
  Zip,
}

impl ArchiveFormat {
  pub fn extension(&self) -> &'static str {
    match self {
      ArchiveFormat::TarGz => "tar.gz",
      ArchiveFormat::Zip => "zip",
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageOptions {
  pub format: ArchiveFormat,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestOptions {
  /// Rerun tests even when an identical run is memoized.
  pub force: bool,
}
