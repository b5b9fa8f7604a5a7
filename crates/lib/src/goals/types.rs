//! Goal requests and their reported outcomes.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::store::ContentStore;
use crate::target::{Address, TargetKind};
use crate::tools::Downloader;

/// A user-facing command over a set of targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Goal {
  Package,
  /// Run one binary in the foreground; `args` go to the script.
  Run { args: Vec<String> },
  Repl,
  Lint,
  Fmt,
  /// Run test targets; `debug` runs them in the foreground instead.
  Test { debug: bool },
}

impl Goal {
  pub fn name(&self) -> &'static str {
    match self {
      Goal::Package => "package",
      Goal::Run { .. } => "run",
      Goal::Repl => "repl",
      Goal::Lint => "lint",
      Goal::Fmt => "fmt",
      Goal::Test { .. } => "test",
    }
  }

  /// Whether a target of `kind` takes part in this goal.
  pub fn applies_to(&self, kind: TargetKind) -> bool {
    match self {
      Goal::Package | Goal::Run { .. } => kind == TargetKind::BashBinary,
      Goal::Test { .. } => kind == TargetKind::BashTests,
      Goal::Repl | Goal::Lint | Goal::Fmt => true,
    }
  }
}

impl fmt::Display for Goal {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RowStatus {
  Ok,
  Failed,
  Skipped,
}

/// One line of a goal's report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GoalRow {
  pub address: String,
  /// Linter or formatter name, when the row is about one.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub tool: Option<String>,
  pub status: RowStatus,
  pub detail: String,
  /// Captured stdout and stderr worth showing, such as failing test output.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub output: Option<String>,
}

impl GoalRow {
  pub fn new(address: impl ToString, status: RowStatus, detail: impl Into<String>) -> Self {
    Self {
      address: address.to_string(),
      tool: None,
      status,
      detail: detail.into(),
      output: None,
    }
  }

  pub fn tool(mut self, tool: impl Into<String>) -> Self {
    self.tool = Some(tool.into());
    self
  }

  /// Attach stdout and stderr, if either is non-empty.
  pub fn output(mut self, stdout: &str, stderr: &str) -> Self {
    let combined = format!("{stdout}{stderr}");
    if !combined.trim().is_empty() {
      self.output = Some(combined);
    }
    self
  }
}

/// Everything a goal reported, plus the process exit code it implies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GoalOutcome {
  pub goal: String,
  pub rows: Vec<GoalRow>,
  pub exit_code: i32,
}

impl GoalOutcome {
  pub fn new(goal: &Goal, rows: Vec<GoalRow>) -> Self {
    let exit_code = if rows.iter().any(|r| r.status == RowStatus::Failed) {
      1
    } else {
      0
    };
    Self {
      goal: goal.name().to_string(),
      rows,
      exit_code,
    }
  }

  pub fn failed(&self) -> usize {
    self.rows.iter().filter(|r| r.status == RowStatus::Failed).count()
  }
}

/// Process-wide services an executor is built on.
#[derive(Debug, Clone)]
pub struct Services {
  pub store: ContentStore,
  pub downloader: Arc<dyn Downloader>,
  /// Where verified tool downloads are kept across runs.
  pub download_dir: Option<PathBuf>,
  /// `--force` for tests.
  pub force_tests: bool,
}

/// Targets a goal was asked about, split by whether the goal applies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Selection {
  pub applicable: Vec<Address>,
  pub skipped: Vec<(Address, TargetKind)>,
}
