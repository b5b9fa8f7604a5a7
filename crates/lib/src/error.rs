//! Crate-wide error type.
//!
//! Each component owns its own error enum; [`Error`] aggregates them so a
//! rule body can `?` through store, process and tool failures alike. The
//! type is `Clone` because a memoized failure is handed to every requester
//! waiting on the same rule invocation.

use thiserror::Error;

use crate::config::ConfigError;
use crate::process::ProcessError;
use crate::rules::GraphError;
use crate::store::StoreError;
use crate::target::TargetError;
use crate::tools::ToolError;

#[derive(Debug, Clone, Error)]
pub enum Error {
  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error(transparent)]
  Tool(#[from] ToolError),

  #[error(transparent)]
  Process(#[from] ProcessError),

  #[error(transparent)]
  Target(#[from] TargetError),

  #[error(transparent)]
  Config(#[from] ConfigError),

  /// A rule invocation failed. `source` is what the rule body returned,
  /// possibly itself a `Rule` error from a sub-request.
  #[error("{rule}: {source}")]
  Rule { rule: String, source: Box<Error> },

  /// A rule body panicked.
  #[error("panicked: {0}")]
  Panicked(String),

  #[error("{0}")]
  Custom(String),
}

impl Error {
  pub fn custom(message: impl Into<String>) -> Self {
    Error::Custom(message.into())
  }

  /// Wrap this error with the identity of the rule it escaped from.
  pub fn within(self, rule: impl Into<String>) -> Self {
    Error::Rule {
      rule: rule.into(),
      source: Box::new(self),
    }
  }

  /// The innermost error, with all `Rule` wrappers peeled off.
  pub fn root_cause(&self) -> &Error {
    let mut current = self;
    while let Error::Rule { source, .. } = current {
      current = source;
    }
    current
  }

  /// Rule identities from the outermost to the one that failed.
  pub fn rule_trace(&self) -> Vec<&str> {
    let mut trace = Vec::new();
    let mut current = self;
    while let Error::Rule { rule, source } = current {
      trace.push(rule.as_str());
      current = source;
    }
    trace
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rule_wrapping_keeps_root_cause() {
    let err = Error::custom("boom").within("inner").within("outer");

    assert_eq!(err.to_string(), "outer: inner: boom");
    assert_eq!(err.rule_trace(), vec!["outer", "inner"]);
    assert!(matches!(err.root_cause(), Error::Custom(msg) if msg == "boom"));
  }
}
