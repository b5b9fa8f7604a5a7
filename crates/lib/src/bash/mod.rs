//! The Bash plugin: target kinds, linters, formatters, tests and packaging
//! for shell scripts.
//!
//! Every operation is a rule. [`rule_graph`] assembles them together with
//! the process and tool rules they build on. Linters and formatters are
//! union members, so other plugins can add their own next to shellcheck and
//! shfmt.

pub mod fmt;
pub mod lint;
pub mod options;
pub mod package;
pub mod run;
pub mod setup;
pub mod shfmt;
pub mod sources;

#[cfg(test)]
pub(crate) mod testutil;

use crate::rules::{GraphError, RuleGraph};

/// All rules the Bash goals need, validated.
pub fn rule_graph() -> Result<RuleGraph, GraphError> {
  let mut graph = RuleGraph::new();
  crate::process::register(&mut graph)?;
  crate::tools::register(&mut graph)?;

  graph.register(setup::find_bash_rule())?;
  graph.register(sources::transitive_targets_rule())?;
  graph.register(sources::source_files_rule())?;
  graph.register(package::package_rule())?;
  graph.register(run::run_rule())?;
  graph.register(run::repl_rule())?;
  graph.register(test::setup_rule())?;
  graph.register(test::test_rule())?;
  graph.register(test::debug_rule())?;
  graph.register(shfmt::setup_rule())?;
  graph.register(lint::lint_rule())?;
  graph.register(fmt::fmt_rule())?;

  // Registration order is run order.
  graph.register_union_member(lint::shellcheck_rule())?;
  graph.register_union_member(shfmt::lint_rule())?;
  graph.register_union_member(shfmt::fmt_rule())?;

  graph.validate()?;
  Ok(graph)
}
