//! Types for process execution.

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::hash::Digest;

/// A sandboxed process invocation.
///
/// Everything except `description` is part of the memoization key, so two
/// specs differing only in their description share one execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSpec {
  pub argv: Vec<String>,
  /// Tree materialized as the sandbox contents.
  pub input_digest: Digest,
  /// Merged over the base environment.
  pub env: BTreeMap<String, String>,
  /// Globs, relative to the sandbox root, harvested after exit.
  pub output_files: Vec<String>,
  /// Directories, relative to the sandbox root, harvested whole.
  pub output_directories: Vec<String>,
  pub timeout: Option<Duration>,
  #[serde(skip)]
  pub description: String,
}

impl ProcessSpec {
  pub fn new(argv: Vec<String>, input_digest: Digest) -> Self {
    Self {
      argv,
      input_digest,
      env: BTreeMap::new(),
      output_files: Vec::new(),
      output_directories: Vec::new(),
      timeout: None,
      description: String::new(),
    }
  }

  pub fn env(mut self, env: BTreeMap<String, String>) -> Self {
    self.env.extend(env);
    self
  }

  pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn description(mut self, description: impl Into<String>) -> Self {
    self.description = description.into();
    self
  }

  pub fn output_files(mut self, globs: Vec<String>) -> Self {
    self.output_files = globs;
    self
  }

  pub fn output_directories(mut self, dirs: Vec<String>) -> Self {
    self.output_directories = dirs;
    self
  }

  /// Description if set, else the argv joined by spaces.
  pub fn label(&self) -> String {
    if self.description.is_empty() {
      self.argv.join(" ")
    } else {
      self.description.clone()
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitStatus {
  Exited(i32),
  TimedOut,
}

/// What a finished process left behind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOutcome {
  pub status: ExitStatus,
  pub stdout_digest: Digest,
  pub stderr_digest: Digest,
  /// Tree of the harvested output files.
  pub output_digest: Digest,
  pub elapsed: Duration,
  pub description: String,
}

impl ProcessOutcome {
  /// Exit code, or `-1` if the process timed out.
  pub fn exit_code(&self) -> i32 {
    match self.status {
      ExitStatus::Exited(code) => code,
      ExitStatus::TimedOut => -1,
    }
  }

  pub fn success(&self) -> bool {
    self.status == ExitStatus::Exited(0)
  }
}

/// A process outcome that is known to have exited zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult(pub ProcessOutcome);

/// A process run in the foreground with the user's terminal attached.
#[derive(Debug, Clone)]
pub struct InteractiveProcess {
  pub argv: Vec<String>,
  pub input_digest: Digest,
  pub env: BTreeMap<String, String>,
}

impl InteractiveProcess {
  pub fn new(argv: Vec<String>, input_digest: Digest) -> Self {
    Self {
      argv,
      input_digest,
      env: BTreeMap::new(),
    }
  }

  pub fn env(mut self, env: BTreeMap<String, String>) -> Self {
    self.env.extend(env);
    self
  }
}

/// Errors from process execution.
#[derive(Debug, Clone, Error)]
pub enum ProcessError {
  /// The program could not be started.
  #[error("failed to spawn '{program}': {source}")]
  Spawn {
    program: String,
    #[source]
    source: Arc<io::Error>,
  },

  /// A non-fallible process exited non-zero.
  #[error("process '{description}' exited with code {code}\n{stderr}")]
  NonZeroExit {
    description: String,
    code: i32,
    stderr: String,
  },

  /// A non-fallible process ran past its timeout.
  #[error("process '{description}' timed out after {timeout:?}")]
  TimedOut { description: String, timeout: Duration },

  #[error("process io error ({context}): {source}")]
  Io {
    context: String,
    #[source]
    source: Arc<io::Error>,
  },

  #[error("process spec has an empty argv")]
  EmptyArgv,
}

impl ProcessError {
  pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
    ProcessError::Io {
      context: context.into(),
      source: Arc::new(source),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::EMPTY_DIGEST;
  use crate::util::hash::Hashable;

  #[test]
  fn description_does_not_change_the_key() {
    let a = ProcessSpec::new(vec!["true".into()], EMPTY_DIGEST).description("first");
    let b = ProcessSpec::new(vec!["true".into()], EMPTY_DIGEST).description("second");
    let c = ProcessSpec::new(vec!["false".into()], EMPTY_DIGEST);

    assert_eq!(a.compute_hash().unwrap(), b.compute_hash().unwrap());
    assert_ne!(a.compute_hash().unwrap(), c.compute_hash().unwrap());
  }

  #[test]
  fn timed_out_exit_code_is_negative() {
    let outcome = ProcessOutcome {
      status: ExitStatus::TimedOut,
      stdout_digest: EMPTY_DIGEST,
      stderr_digest: EMPTY_DIGEST,
      output_digest: EMPTY_DIGEST,
      elapsed: Duration::from_millis(100),
      description: String::new(),
    };
    assert_eq!(outcome.exit_code(), -1);
    assert!(!outcome.success());
  }
}
