//! `run` and `repl`: interactive Bash over a target's sources.
//!
//! These rules only describe the process. The goal runs it in the
//! foreground with the user's terminal attached.

use std::collections::BTreeMap;

use serde::Serialize;

use super::setup::{BashProgram, BashProgramRequest, BashSetup};
use super::sources::{SourceFiles, SourceFilesRequest, TransitiveTargetsRequest};
use crate::execute::Context;
use crate::process::InteractiveProcess;
use crate::rules::RuleDef;
use crate::target::{Address, SharedTargetGraph, TargetError, TargetKind, TransitiveTargets};
use crate::util::hash::Digest;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunTarget {
  pub address: Address,
}

/// Everything needed to run a binary: `[bash, script]` over its closure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
  pub digest: Digest,
  pub args: Vec<String>,
  pub env: BTreeMap<String, String>,
}

impl RunRequest {
  /// The interactive process, with `extra_args` passed to the script.
  pub fn process(&self, extra_args: &[String]) -> InteractiveProcess {
    let mut argv = self.args.clone();
    argv.extend(extra_args.iter().cloned());
    InteractiveProcess::new(argv, self.digest).env(self.env.clone())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplTargets {
  pub addresses: Vec<Address>,
}

/// A bare `bash` over the closure of the requested targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplRequest {
  pub digest: Digest,
  pub args: Vec<String>,
  pub env: BTreeMap<String, String>,
}

impl ReplRequest {
  pub fn process(&self) -> InteractiveProcess {
    InteractiveProcess::new(self.args.clone(), self.digest).env(self.env.clone())
  }
}

pub(crate) fn run_rule() -> RuleDef {
  RuleDef::new("bash.run", |ctx: Context, request: RunTarget| async move {
    let graph = ctx.option::<SharedTargetGraph>()?;
    let setup = ctx.option::<BashSetup>()?;
    let target = graph.target(&request.address)?;
    if target.kind != TargetKind::BashBinary {
      return Err(TargetError::invalid(&request.address, format!("{} cannot be run", target.kind)).into());
    }

    let closure = ctx
      .get::<TransitiveTargetsRequest, TransitiveTargets>(TransitiveTargetsRequest::new([request.address.clone()]))
      .await?;
    let (bash, script, all) = futures::try_join!(
      ctx.get::<BashProgramRequest, BashProgram>(BashProgramRequest),
      ctx.get::<SourceFilesRequest, SourceFiles>(SourceFilesRequest::new([request.address.clone()])),
      ctx.get::<SourceFilesRequest, SourceFiles>(SourceFilesRequest::new(closure.closure_addresses())),
    )?;

    // The sources rule already checked that a binary matches exactly one file.
    let script = script.files().first().cloned().unwrap_or_default();
    Ok(RunRequest {
      digest: all.snapshot.digest,
      args: vec![bash.exe.clone(), script],
      env: setup.env(),
    })
  })
  .gets::<TransitiveTargetsRequest, TransitiveTargets>()
  .gets::<BashProgramRequest, BashProgram>()
  .gets::<SourceFilesRequest, SourceFiles>()
}

pub(crate) fn repl_rule() -> RuleDef {
  RuleDef::new("bash.repl", |ctx: Context, request: ReplTargets| async move {
    let setup = ctx.option::<BashSetup>()?;
    let closure = ctx
      .get::<TransitiveTargetsRequest, TransitiveTargets>(TransitiveTargetsRequest::new(request.addresses.clone()))
      .await?;
    let (bash, sources) = futures::try_join!(
      ctx.get::<BashProgramRequest, BashProgram>(BashProgramRequest),
      ctx.get::<SourceFilesRequest, SourceFiles>(SourceFilesRequest::new(closure.closure_addresses())),
    )?;

    Ok(ReplRequest {
      digest: sources.snapshot.digest,
      args: vec![bash.exe.clone()],
      env: setup.env(),
    })
  })
  .gets::<TransitiveTargetsRequest, TransitiveTargets>()
  .gets::<BashProgramRequest, BashProgram>()
  .gets::<SourceFilesRequest, SourceFiles>()
}
