//! The `fmt` extension point.
//!
//! Formatters are union members turning a [`FmtRequest`] into a
//! [`FmtResult`]. They run one after another in registration order, each
//! one seeing the snapshot the previous formatter produced.

use serde::Serialize;
use tracing::debug;

use super::sources::{SourceFiles, SourceFilesRequest};
use crate::error::Error;
use crate::execute::Context;
use crate::rules::RuleDef;
use crate::store::Snapshot;
use crate::target::Address;
use crate::util::hash::Digest;

/// Request handed to each formatter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FmtRequest {
  pub addresses: Vec<Address>,
  /// Files as left by the previous formatter.
  pub snapshot: Snapshot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FmtResult {
  pub formatter: String,
  pub input: Digest,
  pub output: Digest,
  pub did_change: bool,
  pub skipped: Option<String>,
  pub stdout: String,
  pub stderr: String,
}

impl FmtResult {
  /// A formatter that did not run: output is input.
  pub fn skip(formatter: &str, snapshot: &Snapshot, reason: impl Into<String>) -> Self {
    Self {
      formatter: formatter.to_string(),
      input: snapshot.digest,
      output: snapshot.digest,
      did_change: false,
      skipped: Some(reason.into()),
      stdout: String::new(),
      stderr: String::new(),
    }
  }
}

/// Top-level request: format these targets' sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FmtTargets {
  pub addresses: Vec<Address>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FmtReport {
  pub results: Vec<FmtResult>,
  /// Sources as read from the build root.
  pub input: Snapshot,
  /// Sources after the last formatter.
  pub output: Snapshot,
}

impl FmtReport {
  pub fn did_change(&self) -> bool {
    self.input.digest != self.output.digest
  }
}

pub(crate) fn fmt_rule() -> RuleDef {
  RuleDef::new("bash.fmt", |ctx: Context, request: FmtTargets| async move {
    let sources = ctx
      .get::<SourceFilesRequest, SourceFiles>(SourceFilesRequest::new(request.addresses.clone()))
      .await?;

    let mut current = sources.snapshot.clone();
    let mut results = Vec::new();
    for member in ctx.union_members::<FmtRequest, FmtResult>()? {
      let result = ctx
        .get_member::<FmtRequest, FmtResult>(
          &member,
          FmtRequest {
            addresses: request.addresses.clone(),
            snapshot: current.clone(),
          },
        )
        .await?;
      if result.did_change {
        current = ctx.store().snapshot(&result.output)?;
      }
      debug!(formatter = %result.formatter, changed = result.did_change, "formatter finished");
      results.push(result.as_ref().clone());
    }

    Ok::<_, Error>(FmtReport {
      results,
      input: sources.snapshot.clone(),
      output: current,
    })
  })
  .gets::<SourceFilesRequest, SourceFiles>()
  .gets::<FmtRequest, FmtResult>()
}
