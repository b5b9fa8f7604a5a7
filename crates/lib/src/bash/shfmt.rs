//! shfmt as both a linter (`-d`) and a formatter (`-w`).

use serde::Serialize;

use super::fmt::{FmtRequest, FmtResult};
use super::lint::{LintRequest, LintResult, LintResults, config_digest, read_text, tool_program};
use super::options::ShfmtOptions;
use super::sources::{SourceFiles, SourceFilesRequest};
use crate::error::Error;
use crate::execute::Context;
use crate::process::{ProcessOutcome, ProcessResult, ProcessSpec};
use crate::rules::RuleDef;
use crate::store::Snapshot;
use crate::tools::{DownloadedTool, ExternalToolSpec};
use crate::util::hash::Digest;

const NAME: &str = "shfmt";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShfmtSetupRequest {
  pub snapshot: Snapshot,
  pub check_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShfmtSetup {
  pub process: ProcessSpec,
  pub original_digest: Digest,
}

pub(crate) fn setup_rule() -> RuleDef {
  RuleDef::new("bash.shfmt_setup", |ctx: Context, request: ShfmtSetupRequest| async move {
    let options = ctx.option::<ShfmtOptions>()?;
    let tool = ctx
      .get::<ExternalToolSpec, DownloadedTool>(options.tool.clone()?)
      .await?;
    let config = config_digest(&ctx, NAME, &options)?;
    let input_digest = ctx.store().merge(&[request.snapshot.digest, tool.digest, config])?;

    let files = &request.snapshot.files;
    let mut argv = vec![
      tool_program(&tool),
      if request.check_only { "-d" } else { "-w" }.to_string(),
    ];
    argv.extend(options.args.iter().cloned());
    argv.extend(files.iter().cloned());

    let process = ProcessSpec::new(argv, input_digest)
      .output_files(files.iter().map(|f| glob::Pattern::escape(f)).collect())
      .description(format!(
        "Run shfmt on {} file{}.",
        files.len(),
        if files.len() == 1 { "" } else { "s" }
      ));
    Ok::<_, Error>(ShfmtSetup {
      process,
      original_digest: request.snapshot.digest,
    })
  })
  .gets::<ExternalToolSpec, DownloadedTool>()
}

pub(crate) fn lint_rule() -> RuleDef {
  RuleDef::new("bash.shfmt_lint", |ctx: Context, request: LintRequest| async move {
    let options = ctx.option::<ShfmtOptions>()?;
    if let Some(reason) = options.skip_reason() {
      return Ok(LintResults::skipped(NAME, reason));
    }
    let sources = ctx
      .get::<SourceFilesRequest, SourceFiles>(SourceFilesRequest::new(request.addresses))
      .await?;
    if sources.snapshot.is_empty() {
      return Ok(LintResults::skipped(NAME, "no files"));
    }

    let setup = ctx
      .get::<ShfmtSetupRequest, ShfmtSetup>(ShfmtSetupRequest {
        snapshot: sources.snapshot.clone(),
        check_only: true,
      })
      .await?;
    let outcome = ctx.get::<ProcessSpec, ProcessOutcome>(setup.process.clone()).await?;
    Ok(LintResults {
      linter: NAME.to_string(),
      results: vec![LintResult::from_outcome(&ctx, &outcome)?],
      skipped: None,
    })
  })
  .gets::<SourceFilesRequest, SourceFiles>()
  .gets::<ShfmtSetupRequest, ShfmtSetup>()
  .gets::<ProcessSpec, ProcessOutcome>()
}

pub(crate) fn fmt_rule() -> RuleDef {
  RuleDef::new("bash.shfmt_fmt", |ctx: Context, request: FmtRequest| async move {
    let options = ctx.option::<ShfmtOptions>()?;
    if let Some(reason) = options.skip_reason() {
      return Ok(FmtResult::skip(NAME, &request.snapshot, reason));
    }
    if request.snapshot.is_empty() {
      return Ok(FmtResult::skip(NAME, &request.snapshot, "no files"));
    }

    let setup = ctx
      .get::<ShfmtSetupRequest, ShfmtSetup>(ShfmtSetupRequest {
        snapshot: request.snapshot.clone(),
        check_only: false,
      })
      .await?;
    let result = ctx.get::<ProcessSpec, ProcessResult>(setup.process.clone()).await?;
    let output = result.0.output_digest;
    Ok(FmtResult {
      formatter: NAME.to_string(),
      input: setup.original_digest,
      output,
      did_change: output != setup.original_digest,
      skipped: None,
      stdout: read_text(&ctx, &result.0.stdout_digest)?,
      stderr: read_text(&ctx, &result.0.stderr_digest)?,
    })
  })
  .gets::<ShfmtSetupRequest, ShfmtSetup>()
  .gets::<ProcessSpec, ProcessResult>()
}

#[cfg(all(test, unix))]
mod tests {
  use super::*;
  use crate::bash::fmt::{FmtReport, FmtTargets};
  use crate::bash::lint::{LintReport, LintTargets};
  use crate::bash::testutil::{FAKE_SHFMT, Workspace};
  use crate::target::{Address, TargetKind};

  fn workspace(body: &str) -> Workspace {
    Workspace::new()
      .with_tool(NAME, FAKE_SHFMT)
      .file("lib/util.sh", body)
      .target("lib:lib", TargetKind::BashLibrary, &["*.sh"], &[])
  }

  async fn lint(ws: &Workspace) -> LintResults {
    let report = ws
      .executor()
      .request::<LintTargets, LintReport>(LintTargets {
        addresses: vec![Address::new("lib", "lib")],
      })
      .await
      .unwrap();
    report.linter(NAME).cloned().unwrap()
  }

  #[tokio::test]
  async fn lint_flags_unformatted_files() {
    let results = lint(&workspace("f() {\n\ttrue\n}\n")).await;
    assert!(!results.passed());
    assert_eq!(results.results[0].stdout, "lib/util.sh\n");
  }

  #[tokio::test]
  async fn lint_passes_formatted_files() {
    let results = lint(&workspace("f() {\n  true\n}\n")).await;
    assert!(results.passed());
  }

  #[tokio::test]
  async fn skip_applies_to_lint_and_fmt() {
    let mut ws = workspace("f() {\n\ttrue\n}\n");
    ws.config_mut().shfmt.skip = true;
    assert!(lint(&ws).await.skipped.is_some());

    let report = ws
      .executor()
      .request::<FmtTargets, FmtReport>(FmtTargets {
        addresses: vec![Address::new("lib", "lib")],
      })
      .await
      .unwrap();
    assert!(report.results[0].skipped.is_some());
    assert_eq!(report.output, report.input);
  }

  #[tokio::test]
  async fn fmt_rewrites_files() {
    let ws = workspace("f() {\n\ttrue\n}\n");
    let executor = ws.executor();
    let report = executor
      .request::<FmtTargets, FmtReport>(FmtTargets {
        addresses: vec![Address::new("lib", "lib")],
      })
      .await
      .unwrap();

    let shfmt = &report.results[0];
    assert!(shfmt.did_change);
    assert_eq!(shfmt.input, report.input.digest);
    let contents = executor.store().contents(&shfmt.output).unwrap();
    assert_eq!(contents[0].path, "lib/util.sh");
    assert_eq!(contents[0].content, b"f() {\n  true\n}\n");
  }

  #[tokio::test]
  async fn fmt_collects_files_with_glob_characters() {
    let ws = Workspace::new()
      .with_tool(NAME, FAKE_SHFMT)
      .file("lib/a[1].sh", "f() {\n\ttrue\n}\n")
      .file("lib/a1.sh", "g() {\n  true\n}\n")
      .target("lib:lib", TargetKind::BashLibrary, &["*.sh"], &[]);
    let executor = ws.executor();
    let report = executor
      .request::<FmtTargets, FmtReport>(FmtTargets {
        addresses: vec![Address::new("lib", "lib")],
      })
      .await
      .unwrap();

    let contents = executor.store().contents(&report.results[0].output).unwrap();
    let files: Vec<(&str, &[u8])> = contents
      .iter()
      .map(|f| (f.path.as_str(), f.content.as_slice()))
      .collect();
    assert_eq!(
      files,
      vec![
        ("lib/a1.sh", b"g() {\n  true\n}\n".as_slice()),
        ("lib/a[1].sh", b"f() {\n  true\n}\n".as_slice()),
      ]
    );
  }
}
