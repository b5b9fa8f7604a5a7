//! The `lint` extension point and the shellcheck linter.
//!
//! Linters are union members producing [`LintResults`] from a
//! [`LintRequest`]. Every member runs for every request; a linter that is
//! skipped or not configured reports why instead of failing.

use serde::Serialize;
use tracing::debug;

use super::options::{ExternalToolOptions, ShellcheckOptions};
use super::sources::{SourceFiles, SourceFilesRequest};
use crate::error::Error;
use crate::execute::Context;
use crate::process::{ExitStatus, ProcessOutcome, ProcessSpec};
use crate::rules::RuleDef;
use crate::store::{EMPTY_DIGEST, GlobMatchErrorBehavior};
use crate::target::{Address, BuildRoot, SharedTargetGraph};
use crate::tools::{DownloadedTool, ExternalToolSpec};
use crate::util::hash::Digest;

/// Request handed to every linter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LintRequest {
  pub addresses: Vec<Address>,
}

/// Top-level request: run every linter over these targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LintTargets {
  pub addresses: Vec<Address>,
}

/// Results of every linter, in registration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintReport {
  pub linters: Vec<LintResults>,
}

impl LintReport {
  pub fn passed(&self) -> bool {
    self.linters.iter().all(LintResults::passed)
  }

  pub fn linter(&self, name: &str) -> Option<&LintResults> {
    self.linters.iter().find(|l| l.linter == name)
  }
}

/// One linter process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintResult {
  pub exit_code: i32,
  pub timed_out: bool,
  pub stdout: String,
  pub stderr: String,
}

impl LintResult {
  pub(crate) fn from_outcome(ctx: &Context, outcome: &ProcessOutcome) -> Result<Self, Error> {
    Ok(Self {
      exit_code: outcome.exit_code(),
      timed_out: outcome.status == ExitStatus::TimedOut,
      stdout: read_text(ctx, &outcome.stdout_digest)?,
      stderr: read_text(ctx, &outcome.stderr_digest)?,
    })
  }
}

/// Everything one linter reported for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintResults {
  pub linter: String,
  pub results: Vec<LintResult>,
  /// Set when the linter did not run.
  pub skipped: Option<String>,
}

impl LintResults {
  pub fn skipped(linter: &str, reason: impl Into<String>) -> Self {
    Self {
      linter: linter.to_string(),
      results: Vec::new(),
      skipped: Some(reason.into()),
    }
  }

  pub fn passed(&self) -> bool {
    self.results.iter().all(|r| r.exit_code == 0 && !r.timed_out)
  }
}

pub(crate) fn read_text(ctx: &Context, digest: &Digest) -> Result<String, Error> {
  Ok(String::from_utf8_lossy(&ctx.store().get(digest)?).into_owned())
}

/// Snapshot the tool's config file, which must exist when configured.
pub(crate) fn config_digest(ctx: &Context, tool: &str, options: &ExternalToolOptions) -> Result<Digest, Error> {
  let Some(glob) = &options.config else {
    return Ok(EMPTY_DIGEST);
  };
  let root = ctx.option::<BuildRoot>()?;
  let snapshot = ctx.store().path_globs(
    &root.0,
    std::slice::from_ref(glob),
    GlobMatchErrorBehavior::Error,
    &format!("the option `[{tool}].config`"),
  )?;
  Ok(snapshot.digest)
}

/// argv[0] for a fetched tool: its path inside the sandbox.
pub(crate) fn tool_program(tool: &DownloadedTool) -> String {
  format!("./{}", tool.exe)
}

pub(crate) fn lint_rule() -> RuleDef {
  RuleDef::new("bash.lint", |ctx: Context, request: LintTargets| async move {
    let results = ctx
      .get_union::<LintRequest, LintResults>(LintRequest {
        addresses: request.addresses,
      })
      .await?;
    Ok::<_, Error>(LintReport {
      linters: results.iter().map(|r| r.as_ref().clone()).collect(),
    })
  })
  .gets::<LintRequest, LintResults>()
}

pub(crate) fn shellcheck_rule() -> RuleDef {
  RuleDef::new("bash.shellcheck", |ctx: Context, request: LintRequest| async move {
    let options = ctx.option::<ShellcheckOptions>()?;
    if let Some(reason) = options.skip_reason() {
      debug!(reason = %reason, "shellcheck not run");
      return Ok(LintResults::skipped("shellcheck", reason));
    }
    let spec = options.tool.clone()?;

    // shellcheck follows `source` into direct dependencies, so their files
    // must be in the sandbox too.
    let graph = ctx.option::<SharedTargetGraph>()?;
    let mut addresses = request.addresses.clone();
    for address in &request.addresses {
      for dependency in graph.target(address)?.dependencies {
        if !addresses.contains(&dependency) {
          addresses.push(dependency);
        }
      }
    }

    let (sources, tool) = futures::try_join!(
      ctx.get::<SourceFilesRequest, SourceFiles>(SourceFilesRequest::new(addresses)),
      ctx.get::<ExternalToolSpec, DownloadedTool>(spec),
    )?;
    let config = config_digest(&ctx, "shellcheck", &options)?;
    let input_digest = ctx.store().merge(&[sources.snapshot.digest, tool.digest, config])?;

    let mut argv = vec![tool_program(&tool)];
    argv.extend(options.args.iter().cloned());
    argv.extend(sources.files().iter().cloned());
    let process = ProcessSpec::new(argv, input_digest).description(format!(
      "Run shellcheck on {} file{}.",
      sources.files().len(),
      if sources.files().len() == 1 { "" } else { "s" }
    ));

    let outcome = ctx.get::<ProcessSpec, ProcessOutcome>(process).await?;
    Ok(LintResults {
      linter: "shellcheck".to_string(),
      results: vec![LintResult::from_outcome(&ctx, &outcome)?],
      skipped: None,
    })
  })
  .gets::<SourceFilesRequest, SourceFiles>()
  .gets::<ExternalToolSpec, DownloadedTool>()
  .gets::<ProcessSpec, ProcessOutcome>()
}
