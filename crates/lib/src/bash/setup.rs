//! Search path for Bash processes and locating `bash` itself.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;
use tracing::debug;

use crate::error::Error;
use crate::execute::Context;
use crate::rules::RuleDef;
use crate::tools::{BinaryPathRequest, BinaryPaths};

/// Entry in `executable_search_paths` replaced by the contents of `$PATH`.
pub const PATH_PLACEHOLDER: &str = "<PATH>";

/// The search path used by every process the Bash rules start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BashSetup {
  search_path: Vec<String>,
}

impl BashSetup {
  /// Expand `<PATH>` against `path_var`, keeping first occurrences only.
  pub fn new(entries: &[String], path_var: Option<&str>) -> Self {
    let mut search_path: Vec<String> = Vec::new();
    let mut push = |entry: &str| {
      if !entry.is_empty() && !search_path.iter().any(|e| e == entry) {
        search_path.push(entry.to_string());
      }
    };
    for entry in entries {
      if entry == PATH_PLACEHOLDER {
        path_var.unwrap_or_default().split(':').for_each(&mut push);
      } else {
        push(entry.as_str());
      }
    }
    Self { search_path }
  }

  /// Expand against the `PATH` of the current process.
  pub fn from_env(entries: &[String]) -> Self {
    let path = std::env::var("PATH").ok();
    Self::new(entries, path.as_deref())
  }

  pub fn search_path(&self) -> &[String] {
    &self.search_path
  }

  pub fn search_dirs(&self) -> Vec<PathBuf> {
    self.search_path.iter().map(PathBuf::from).collect()
  }

  /// Environment for Bash processes: `PATH` set to the search path.
  pub fn env(&self) -> BTreeMap<String, String> {
    BTreeMap::from([("PATH".to_string(), self.search_path.join(":"))])
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BashProgramRequest;

/// The `bash` executable found on the search path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BashProgram {
  pub exe: String,
}

pub(crate) fn find_bash_rule() -> RuleDef {
  RuleDef::new("bash.find_bash", |ctx: Context, _: BashProgramRequest| async move {
    let setup = ctx.option::<BashSetup>()?;
    let paths = ctx
      .get::<BinaryPathRequest, BinaryPaths>(BinaryPathRequest::new("bash", setup.search_dirs()))
      .await?;
    let bash = paths.first_path_or_raise()?;
    debug!(path = %bash.path.display(), "found bash");
    Ok::<_, Error>(BashProgram {
      exe: bash.path.display().to_string(),
    })
  })
  .gets::<BinaryPathRequest, BinaryPaths>()
}
