//! Goals: the commands a user runs over targets.
//!
//! A goal picks the targets it applies to, issues one independent request
//! per target and turns each result into a [`GoalRow`]. A failing target
//! never stops the others; it shows up as a failed row and a non-zero exit
//! code. Errors returned from [`run_goal`] itself are reserved for problems
//! with the invocation, such as an unknown address.

pub mod types;

use std::path::Path;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{error, info, warn};

pub use types::{Goal, GoalOutcome, GoalRow, RowStatus, Services};
use types::Selection;

use crate::bash;
use crate::bash::fmt::{FmtReport, FmtTargets};
use crate::bash::lint::{LintReport, LintTargets};
use crate::bash::package::{BuiltPackage, PackageRequest};
use crate::bash::run::{ReplRequest, ReplTargets, RunRequest, RunTarget};
use crate::bash::test::{TestDebug, TestDebugRequest, TestRequest, TestResult};
use crate::config::{CairnConfig, ConfigError};
use crate::consts::DIST_DIR;
use crate::error::Error;
use crate::execute::{Executor, Session};
use crate::platform::paths::cache_dir;
use crate::platform::tool_platform;
use crate::process::ProcessRunner;
use crate::target::{Address, BuildRoot, SharedTargetGraph, TargetGraph};
use crate::tools::{HttpDownloader, ToolCache};

impl Services {
  /// Services for a real run: the configured store, HTTP downloads and the
  /// user cache directory.
  pub fn from_config(build_root: &Path, config: &CairnConfig, force_tests: bool) -> Result<Self, Error> {
    Ok(Self {
      store: config.open_store(build_root)?,
      downloader: Arc::new(HttpDownloader::new()),
      download_dir: Some(cache_dir().join("downloads")),
      force_tests,
    })
  }
}

/// Resolve the configuration into the values rules read.
pub fn session(build_root: &Path, config: &CairnConfig, services: &Services) -> Result<Session, Error> {
  let platform = tool_platform();
  let targets: SharedTargetGraph = Arc::new(config.target_graph()?);

  let mut tools = ToolCache::new(services.store.clone(), services.downloader.clone());
  if let Some(dir) = &services.download_dir {
    tools = tools.with_download_dir(dir);
  }

  Ok(
    Session::new()
      .with(BuildRoot(build_root.to_path_buf()))
      .with(targets)
      .with(config.bash_setup())
      .with(config.shellcheck(platform)?)
      .with(config.shfmt(platform)?)
      .with(config.shunit2()?)
      .with(config.package_options())
      .with(config.test_options(services.force_tests))
      .with(ProcessRunner::new(services.store.clone(), config.parallelism()))
      .with(tools),
  )
}

/// An executor over the Bash rules for `build_root`.
pub fn build_executor(build_root: &Path, config: &CairnConfig, services: Services) -> Result<Executor, Error> {
  let session = session(build_root, config, &services)?;
  let graph = bash::rule_graph()?;
  info!(
    build_root = %build_root.display(),
    rules = graph.len(),
    targets = config.targets.len(),
    "executor ready"
  );
  Ok(Executor::new(graph, services.store, session)?)
}

/// Run `goal` over `addresses`, or over every target if none are given.
pub async fn run_goal(executor: &Executor, goal: &Goal, addresses: &[Address]) -> Result<GoalOutcome, Error> {
  let graph = option::<SharedTargetGraph>(executor)?;
  let selection = select(graph.as_ref().as_ref(), goal, addresses)?;
  info!(
    goal = %goal,
    targets = selection.applicable.len(),
    skipped = selection.skipped.len(),
    "running goal"
  );

  let targets = &selection.applicable;
  let (mut rows, interactive_code) = match goal {
    Goal::Package => (package(executor, targets).await?, None),
    Goal::Run { args } => run(executor, targets, args).await?,
    Goal::Repl => repl(executor, targets).await?,
    Goal::Lint => (lint(executor, targets).await, None),
    Goal::Fmt => (fmt(executor, targets).await?, None),
    Goal::Test { debug: false } => (test(executor, targets).await, None),
    Goal::Test { debug: true } => test_debug(executor, targets).await?,
  };

  rows.extend(selection.skipped.iter().map(|(address, kind)| {
    GoalRow::new(address, RowStatus::Skipped, format!("{goal} does not apply to {kind} targets"))
  }));

  let mut outcome = GoalOutcome::new(goal, rows);
  if let Some(code) = interactive_code
    && code != 0
  {
    outcome.exit_code = code;
  }
  info!(goal = %goal, failed = outcome.failed(), exit_code = outcome.exit_code, "goal finished");
  Ok(outcome)
}

fn option<T: Send + Sync + 'static>(executor: &Executor) -> Result<Arc<T>, Error> {
  executor
    .session()
    .get::<T>()
    .ok_or_else(|| ConfigError::MissingOption(std::any::type_name::<T>().to_string()).into())
}

fn select(graph: &dyn TargetGraph, goal: &Goal, addresses: &[Address]) -> Result<Selection, Error> {
  let addresses = if addresses.is_empty() {
    graph.addresses()
  } else {
    addresses.to_vec()
  };

  let mut selection = Selection::default();
  for address in addresses {
    let target = graph.target(&address)?;
    if goal.applies_to(target.kind) {
      if !selection.applicable.contains(&address) {
        selection.applicable.push(address);
      }
    } else {
      selection.skipped.push((address, target.kind));
    }
  }
  Ok(selection)
}

fn failed(address: impl ToString, err: &Error) -> GoalRow {
  let address = address.to_string();
  error!(address = %address, error = %err, "request failed");
  GoalRow::new(address, RowStatus::Failed, err.to_string())
}

async fn package(executor: &Executor, addresses: &[Address]) -> Result<Vec<GoalRow>, Error> {
  let dist = option::<BuildRoot>(executor)?.0.join(DIST_DIR);
  let results = join_all(addresses.iter().map(|address| {
    executor.request::<PackageRequest, BuiltPackage>(PackageRequest {
      address: address.clone(),
    })
  }))
  .await;

  let rows = addresses
    .iter()
    .zip(results)
    .map(|(address, result)| {
      let written = result.and_then(|package| {
        executor.store().materialize(&package.digest, &dist)?;
        Ok(package)
      });
      match written {
        Ok(package) => {
          let paths: Vec<String> = package
            .artifacts
            .iter()
            .map(|artifact| format!("{DIST_DIR}/{artifact}"))
            .collect();
          info!(address = %address, artifacts = ?paths, "wrote package");
          GoalRow::new(address, RowStatus::Ok, format!("wrote {}", paths.join(", ")))
        }
        Err(e) => failed(address, &e),
      }
    })
    .collect();
  Ok(rows)
}

async fn run(executor: &Executor, addresses: &[Address], args: &[String]) -> Result<(Vec<GoalRow>, Option<i32>), Error> {
  let [address] = addresses else {
    return Err(Error::custom(format!(
      "run needs exactly one bash_binary target, got {}",
      addresses.len()
    )));
  };
  let runner = option::<ProcessRunner>(executor)?;
  let request = executor
    .request::<RunTarget, RunRequest>(RunTarget {
      address: address.clone(),
    })
    .await?;
  let code = runner.run_interactive(&request.process(args)).await?;
  Ok((vec![exited(address, code)], Some(code)))
}

async fn repl(executor: &Executor, addresses: &[Address]) -> Result<(Vec<GoalRow>, Option<i32>), Error> {
  let runner = option::<ProcessRunner>(executor)?;
  let request = executor
    .request::<ReplTargets, ReplRequest>(ReplTargets {
      addresses: addresses.to_vec(),
    })
    .await?;
  let code = runner.run_interactive(&request.process()).await?;
  let label = addresses.iter().map(ToString::to_string).collect::<Vec<_>>().join(" ");
  Ok((vec![exited(label, code)], Some(code)))
}

fn exited(address: impl ToString, code: i32) -> GoalRow {
  let status = if code == 0 { RowStatus::Ok } else { RowStatus::Failed };
  GoalRow::new(address, status, format!("exited with code {code}"))
}

async fn lint(executor: &Executor, addresses: &[Address]) -> Vec<GoalRow> {
  let results = join_all(addresses.iter().map(|address| {
    executor.request::<LintTargets, LintReport>(LintTargets {
      addresses: vec![address.clone()],
    })
  }))
  .await;

  let mut rows = Vec::new();
  for (address, result) in addresses.iter().zip(results) {
    let report = match result {
      Ok(report) => report,
      Err(e) => {
        rows.push(failed(address, &e));
        continue;
      }
    };
    for linter in &report.linters {
      let row = if let Some(reason) = &linter.skipped {
        GoalRow::new(address, RowStatus::Skipped, reason.clone())
      } else if linter.passed() {
        GoalRow::new(address, RowStatus::Ok, "no issues")
      } else {
        let mut row = GoalRow::new(address, RowStatus::Failed, "issues found");
        for result in &linter.results {
          if result.timed_out {
            row.detail = "timed out".to_string();
          }
          row = row.output(&result.stdout, &result.stderr);
        }
        row
      };
      rows.push(row.tool(linter.linter.clone()));
    }
  }
  rows
}

async fn fmt(executor: &Executor, addresses: &[Address]) -> Result<Vec<GoalRow>, Error> {
  let root = option::<BuildRoot>(executor)?;
  let results = join_all(addresses.iter().map(|address| {
    executor.request::<FmtTargets, FmtReport>(FmtTargets {
      addresses: vec![address.clone()],
    })
  }))
  .await;

  let mut rows = Vec::new();
  for (address, result) in addresses.iter().zip(results) {
    let written = result.and_then(|report| {
      write_back(executor, &report, &root.0)?;
      Ok(report)
    });
    let report = match written {
      Ok(report) => report,
      Err(e) => {
        rows.push(failed(address, &e));
        continue;
      }
    };
    for result in &report.results {
      let row = match &result.skipped {
        Some(reason) => GoalRow::new(address, RowStatus::Skipped, reason.clone()),
        None if result.did_change => GoalRow::new(address, RowStatus::Ok, "made changes"),
        None => GoalRow::new(address, RowStatus::Ok, "no changes"),
      };
      rows.push(row.tool(result.formatter.clone()));
    }
  }
  Ok(rows)
}

/// Write files the formatters changed back into the build root.
fn write_back(executor: &Executor, report: &FmtReport, root: &Path) -> Result<(), Error> {
  if !report.did_change() {
    return Ok(());
  }
  let store = executor.store();
  let diff = store.diff(&report.input.digest, &report.output.digest)?;
  if !diff.removed.is_empty() {
    warn!(files = ?diff.removed, "formatters dropped files; leaving them in place");
  }
  let changed = store.filter(&report.output.digest, |path| {
    diff.changed.iter().chain(&diff.added).any(|p| p == path)
  })?;
  store.materialize(&changed, root)?;
  info!(files = ?diff.changed, "wrote formatted files");
  Ok(())
}

async fn test(executor: &Executor, addresses: &[Address]) -> Vec<GoalRow> {
  let results = join_all(addresses.iter().map(|address| {
    executor.request::<TestRequest, TestResult>(TestRequest {
      address: address.clone(),
    })
  }))
  .await;

  addresses
    .iter()
    .zip(results)
    .map(|(address, result)| match result {
      Ok(result) if result.passed() => GoalRow::new(address, RowStatus::Ok, "passed"),
      Ok(result) => {
        let detail = if result.timed_out {
          "timed out".to_string()
        } else {
          format!("failed with exit code {}", result.exit_code)
        };
        GoalRow::new(address, RowStatus::Failed, detail).output(&result.stdout, &result.stderr)
      }
      Err(e) => failed(address, &e),
    })
    .collect()
}

async fn test_debug(executor: &Executor, addresses: &[Address]) -> Result<(Vec<GoalRow>, Option<i32>), Error> {
  let runner = option::<ProcessRunner>(executor)?;
  let mut rows = Vec::new();
  let mut first_failure = None;
  // One at a time: each run owns the terminal.
  for address in addresses {
    let code = match executor
      .request::<TestDebugRequest, TestDebug>(TestDebugRequest {
        address: address.clone(),
      })
      .await
    {
      Ok(debug) => runner.run_interactive(&debug.0).await,
      Err(e) => Err(e),
    };
    match code {
      Ok(code) => {
        if code != 0 && first_failure.is_none() {
          first_failure = Some(code);
        }
        rows.push(exited(address, code));
      }
      Err(e) => rows.push(failed(address, &e)),
    }
  }
  Ok((rows, first_failure))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::bash::testutil::Workspace;
  use crate::target::{TargetError, TargetKind};
  use tracing_test::traced_test;

  fn statuses(outcome: &GoalOutcome) -> Vec<(&str, RowStatus)> {
    outcome.rows.iter().map(|r| (r.address.as_str(), r.status)).collect()
  }

  fn app() -> Workspace {
    Workspace::new()
      .file("app/main.sh", "source lib/util.sh\n")
      .file("lib/util.sh", "util() { :; }\n")
      .target("lib:lib", TargetKind::BashLibrary, &["*.sh"], &[])
      .target("app:app", TargetKind::BashBinary, &["main.sh"], &["lib:lib"])
  }

  #[tokio::test]
  async fn package_writes_to_dist_and_skips_libraries() {
    let ws = app();
    let outcome = run_goal(&ws.executor(), &Goal::Package, &[]).await.unwrap();

    assert_eq!(
      statuses(&outcome),
      vec![("app:app", RowStatus::Ok), ("lib:lib", RowStatus::Skipped)]
    );
    assert_eq!(outcome.exit_code, 0);
    assert!(ws.root().join("dist/app/app.tar.gz").is_file());
  }

  #[tokio::test]
  #[traced_test]
  async fn one_failing_target_does_not_stop_the_others() {
    let ws = app()
      .file("broken/a.sh", "echo a\n")
      .file("broken/b.sh", "echo b\n")
      .target("broken:broken", TargetKind::BashBinary, &["*.sh"], &[]);
    let addresses = [Address::new("app", "app"), Address::new("broken", "broken")];
    let outcome = run_goal(&ws.executor(), &Goal::Package, &addresses).await.unwrap();

    assert_eq!(
      statuses(&outcome),
      vec![("app:app", RowStatus::Ok), ("broken:broken", RowStatus::Failed)]
    );
    assert_eq!(outcome.exit_code, 1);
    assert!(ws.root().join("dist/app/app.tar.gz").is_file());
    assert!(logs_contain("request failed"));
  }

  #[tokio::test]
  async fn unknown_address_is_an_error() {
    let ws = app();
    let err = run_goal(&ws.executor(), &Goal::Lint, &[Address::new("nope", "nope")])
      .await
      .unwrap_err();
    assert!(matches!(err, Error::Target(TargetError::UnknownTarget { .. })));
  }

  #[tokio::test]
  async fn unconfigured_linters_do_not_fail_lint() {
    let ws = app();
    let outcome = run_goal(&ws.executor(), &Goal::Lint, &[Address::new("lib", "lib")])
      .await
      .unwrap();

    let tools: Vec<_> = outcome.rows.iter().map(|r| r.tool.as_deref()).collect();
    assert_eq!(tools, vec![Some("shellcheck"), Some("shfmt")]);
    assert!(outcome.rows.iter().all(|r| r.status == RowStatus::Skipped));
    assert_eq!(outcome.exit_code, 0);
  }

  #[tokio::test]
  async fn run_needs_exactly_one_binary() {
    let ws = app();
    let err = run_goal(&ws.executor(), &Goal::Run { args: vec![] }, &[Address::new("lib", "lib")])
      .await
      .unwrap_err();
    assert!(err.to_string().contains("exactly one"));
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn test_goal_reports_failures_with_output() {
    use crate::bash::testutil::SHUNIT2_STUB;

    let ws = Workspace::new()
      .with_shunit2(SHUNIT2_STUB)
      .file("good/a_test.sh", "test_ok() { :; }\n")
      .file("bad/b_test.sh", "test_broken() { false; }\n")
      .target("good:tests", TargetKind::BashTests, &["*_test.sh"], &[])
      .target("bad:tests", TargetKind::BashTests, &["*_test.sh"], &[]);
    let outcome = run_goal(&ws.executor(), &Goal::Test { debug: false }, &[])
      .await
      .unwrap();

    assert_eq!(
      statuses(&outcome),
      vec![("bad:tests", RowStatus::Failed), ("good:tests", RowStatus::Ok)]
    );
    assert!(outcome.rows[0].output.as_deref().unwrap().contains("FAILED test_broken"));
    assert_eq!(outcome.exit_code, 1);
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn fmt_writes_changed_files_back() {
    use crate::bash::testutil::FAKE_SHFMT;

    let ws = Workspace::new()
      .with_tool("shfmt", FAKE_SHFMT)
      .file("lib/messy.sh", "f() {\n\ttrue\n}\n")
      .file("lib/clean.sh", "g() {\n  true\n}\n")
      .target("lib:lib", TargetKind::BashLibrary, &["*.sh"], &[]);
    let outcome = run_goal(&ws.executor(), &Goal::Fmt, &[]).await.unwrap();

    assert_eq!(outcome.rows[0].detail, "made changes");
    assert_eq!(
      std::fs::read_to_string(ws.root().join("lib/messy.sh")).unwrap(),
      "f() {\n  true\n}\n"
    );
    assert_eq!(
      std::fs::read_to_string(ws.root().join("lib/clean.sh")).unwrap(),
      "g() {\n  true\n}\n"
    );
  }
}
