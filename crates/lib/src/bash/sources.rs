//! Reading target sources from the build root.

use serde::Serialize;
use tracing::debug;

use crate::error::Error;
use crate::execute::Context;
use crate::rules::RuleDef;
use crate::store::{GlobMatchErrorBehavior, Snapshot};
use crate::target::{Address, BuildRoot, SharedTargetGraph, TargetError, TargetKind, TransitiveTargets};

/// Transitive closure of some addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitiveTargetsRequest {
  pub addresses: Vec<Address>,
}

impl TransitiveTargetsRequest {
  pub fn new(addresses: impl IntoIterator<Item = Address>) -> Self {
    Self {
      addresses: addresses.into_iter().collect(),
    }
  }
}

/// Sources of the given targets, merged into one snapshot.
///
/// `kinds` filters targets by kind; empty keeps every kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFilesRequest {
  pub addresses: Vec<Address>,
  pub kinds: Vec<TargetKind>,
}

impl SourceFilesRequest {
  pub fn new(addresses: impl IntoIterator<Item = Address>) -> Self {
    Self {
      addresses: addresses.into_iter().collect(),
      kinds: Vec::new(),
    }
  }

  pub fn kinds(mut self, kinds: &[TargetKind]) -> Self {
    self.kinds = kinds.to_vec();
    self
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFiles {
  pub snapshot: Snapshot,
}

impl SourceFiles {
  pub fn files(&self) -> &[String] {
    &self.snapshot.files
  }
}

pub(crate) fn transitive_targets_rule() -> RuleDef {
  RuleDef::new(
    "bash.transitive_targets",
    |ctx: Context, request: TransitiveTargetsRequest| async move {
      let graph = ctx.option::<SharedTargetGraph>()?;
      Ok::<TransitiveTargets, Error>(graph.transitive(&request.addresses)?)
    },
  )
}

pub(crate) fn source_files_rule() -> RuleDef {
  RuleDef::new(
    "bash.source_files",
    |ctx: Context, request: SourceFilesRequest| async move {
      let graph = ctx.option::<SharedTargetGraph>()?;
      let root = ctx.option::<BuildRoot>()?;
      let store = ctx.store();

      let mut digests = Vec::new();
      for address in &request.addresses {
        let target = graph.target(address)?;
        if !request.kinds.is_empty() && !request.kinds.contains(&target.kind) {
          continue;
        }
        let snapshot = store.path_globs(
          &root.0,
          &target.source_globs(),
          GlobMatchErrorBehavior::Warn,
          &format!("sources of {address}"),
        )?;
        if target.kind == TargetKind::BashBinary && snapshot.files.len() != 1 {
          return Err(
            TargetError::invalid(
              address,
              format!("bash_binary sources must match exactly one file, matched {}", snapshot.files.len()),
            )
            .into(),
          );
        }
        digests.push(snapshot.digest);
      }

      let snapshot = store.snapshot(&store.merge(&digests)?)?;
      debug!(targets = request.addresses.len(), files = snapshot.files.len(), "collected sources");
      Ok(SourceFiles { snapshot })
    },
  )
}
