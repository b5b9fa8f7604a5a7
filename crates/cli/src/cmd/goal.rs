//! Implementation of the goal commands: package, run, repl, lint, fmt, test.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::debug;

use cairn_lib::goals::{self, Goal, GoalOutcome, RowStatus, Services};
use cairn_lib::target::Address;

use super::Workspace;
use crate::output::{OutputFormat, print_json, print_row, print_summary};

pub struct GoalArgs {
  pub config: Option<PathBuf>,
  pub output: OutputFormat,
  pub verbose: bool,
  pub addresses: Vec<String>,
  /// `--force` for tests.
  pub force: bool,
}

/// Run `goal` and report its rows. Returns the exit code.
pub fn cmd_goal(goal: Goal, args: GoalArgs) -> Result<i32> {
  let start = Instant::now();
  let workspace = Workspace::load(args.config.as_deref())?;
  let addresses = args
    .addresses
    .iter()
    .map(|a| a.parse::<Address>())
    .collect::<Result<Vec<_>, _>>()
    .context("Invalid target address")?;

  let services = Services::from_config(&workspace.root, &workspace.config, args.force)
    .context("Failed to open the content store")?;
  let executor = goals::build_executor(&workspace.root, &workspace.config, services)
    .context("Failed to set up the executor")?;
  debug!(goal = %goal, root = %workspace.root.display(), "starting");

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let outcome = rt
    .block_on(goals::run_goal(&executor, &goal, &addresses))
    .with_context(|| format!("{goal} failed"))?;

  if args.output.is_json() {
    print_json(&outcome)?;
  } else {
    report(&goal, &outcome, args.verbose);
    if args.verbose {
      eprintln!("Finished in {:.2?}", start.elapsed());
    }
  }
  Ok(outcome.exit_code)
}

fn report(goal: &Goal, outcome: &GoalOutcome, verbose: bool) {
  // Interactive goals already showed their output.
  if matches!(goal, Goal::Run { .. } | Goal::Repl) && outcome.exit_code == 0 {
    return;
  }

  for row in &outcome.rows {
    if row.status == RowStatus::Skipped && !verbose {
      continue;
    }
    print_row(row);
  }

  let failed = outcome.failed();
  if failed > 0 {
    print_summary(&format!("{goal}: {failed} failed"), true);
  } else if !outcome.rows.is_empty() {
    print_summary(&format!("{goal}: done"), false);
  }
}
