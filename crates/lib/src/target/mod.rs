//! The target graph.
//!
//! Rules see targets only through the [`TargetGraph`] trait. The workspace
//! provides [`ConfigTargetGraph`], built from the `[[targets]]` tables of
//! `cairn.toml` and validated once up front.

pub mod types;

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

pub use types::{Address, Target, TargetConfig, TargetError, TargetKind, TransitiveTargets};

/// Directory that target addresses and source globs are relative to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRoot(pub PathBuf);

/// Source of target definitions.
pub trait TargetGraph: Send + Sync + fmt::Debug {
  fn target(&self, address: &Address) -> Result<Target, TargetError>;

  /// Every known address, sorted.
  fn addresses(&self) -> Vec<Address>;

  /// `roots` and their dependency closure, breadth first.
  ///
  /// Each target appears once; a target that is both a root and a dependency
  /// is reported as a root.
  fn transitive(&self, roots: &[Address]) -> Result<TransitiveTargets, TargetError> {
    let mut seen: HashSet<Address> = HashSet::new();
    let mut result = TransitiveTargets::default();

    for address in roots {
      if seen.insert(address.clone()) {
        result.roots.push(self.target(address)?);
      }
    }

    let mut queue: VecDeque<Address> = result
      .roots
      .iter()
      .flat_map(|t| t.dependencies.iter().cloned())
      .collect();
    while let Some(address) = queue.pop_front() {
      if !seen.insert(address.clone()) {
        continue;
      }
      let target = self.target(&address)?;
      queue.extend(target.dependencies.iter().cloned());
      result.dependencies.push(target);
    }

    Ok(result)
  }
}

/// Shared handle stored in the executor session.
pub type SharedTargetGraph = Arc<dyn TargetGraph>;

/// Targets declared in `cairn.toml`.
#[derive(Debug, Clone, Default)]
pub struct ConfigTargetGraph {
  targets: BTreeMap<Address, Target>,
}

impl ConfigTargetGraph {
  /// Parse and validate target tables.
  ///
  /// Addresses must be unique, every dependency must name a declared
  /// target, and a `bash_binary` must list exactly one source.
  pub fn from_configs(configs: &[TargetConfig]) -> Result<Self, TargetError> {
    let mut targets = BTreeMap::new();
    for config in configs {
      let target = build_target(config)?;
      if targets.contains_key(&target.address) {
        return Err(TargetError::invalid(&target.address, "declared more than once"));
      }
      targets.insert(target.address.clone(), target);
    }

    for target in targets.values() {
      for dependency in &target.dependencies {
        if !targets.contains_key(dependency) {
          return Err(TargetError::UnknownTarget {
            address: dependency.to_string(),
            referenced_by: Some(target.address.to_string()),
          });
        }
      }
    }

    debug!(targets = targets.len(), "target graph loaded");
    Ok(Self { targets })
  }

  pub fn len(&self) -> usize {
    self.targets.len()
  }

  pub fn is_empty(&self) -> bool {
    self.targets.is_empty()
  }
}

impl TargetGraph for ConfigTargetGraph {
  fn target(&self, address: &Address) -> Result<Target, TargetError> {
    self
      .targets
      .get(address)
      .cloned()
      .ok_or_else(|| TargetError::UnknownTarget {
        address: address.to_string(),
        referenced_by: None,
      })
  }

  fn addresses(&self) -> Vec<Address> {
    self.targets.keys().cloned().collect()
  }
}

fn build_target(config: &TargetConfig) -> Result<Target, TargetError> {
  let address: Address = config.address.parse()?;

  let sources = match &config.sources {
    Some(sources) => sources.clone(),
    None => config.kind.default_sources().iter().map(|s| s.to_string()).collect(),
  };
  if config.kind == TargetKind::BashBinary && sources.len() != 1 {
    return Err(TargetError::invalid(
      &address,
      format!("bash_binary needs exactly one source, got {}", sources.len()),
    ));
  }
  if config.output_path.is_some() && config.kind != TargetKind::BashBinary {
    return Err(TargetError::invalid(&address, "output_path is only valid on bash_binary"));
  }
  if config.timeout.is_some() && config.kind != TargetKind::BashTests {
    return Err(TargetError::invalid(&address, "timeout is only valid on bash_tests"));
  }
  if config.timeout == Some(0) {
    return Err(TargetError::invalid(&address, "timeout must be positive"));
  }

  let dependencies = config
    .dependencies
    .iter()
    .map(|d| d.parse())
    .collect::<Result<Vec<Address>, _>>()?;

  Ok(Target {
    address,
    kind: config.kind,
    sources,
    dependencies,
    output_path: config.output_path.clone(),
    timeout: config.timeout.map(Duration::from_secs),
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn config(address: &str, kind: TargetKind, sources: &[&str], dependencies: &[&str]) -> TargetConfig {
    TargetConfig {
      address: address.to_string(),
      kind,
      sources: Some(sources.iter().map(|s| s.to_string()).collect()),
      dependencies: dependencies.iter().map(|s| s.to_string()).collect(),
      output_path: None,
      timeout: None,
    }
  }

  fn graph() -> ConfigTargetGraph {
    ConfigTargetGraph::from_configs(&[
      config("app:app", TargetKind::BashBinary, &["main.sh"], &["lib:lib", "util:util"]),
      config("lib:lib", TargetKind::BashLibrary, &["*.sh"], &["util:util"]),
      config("util:util", TargetKind::BashLibrary, &["*.sh"], &[]),
      config("lib:tests", TargetKind::BashTests, &["*_test.sh"], &["lib:lib"]),
    ])
    .unwrap()
  }

  #[test]
  fn transitive_is_breadth_first_and_deduplicated() {
    let graph = graph();
    let closure = graph.transitive(&[Address::new("app", "app")]).unwrap();

    assert_eq!(closure.roots.len(), 1);
    assert_eq!(
      closure.dependency_addresses(),
      vec![Address::new("lib", "lib"), Address::new("util", "util")]
    );
  }

  #[test]
  fn root_that_is_also_a_dependency_stays_a_root() {
    let graph = graph();
    let closure = graph
      .transitive(&[Address::new("lib", "tests"), Address::new("lib", "lib")])
      .unwrap();

    assert_eq!(
      closure.closure_addresses(),
      vec![
        Address::new("lib", "tests"),
        Address::new("lib", "lib"),
        Address::new("util", "util")
      ]
    );
  }

  #[test]
  fn unknown_dependency_is_rejected() {
    let err = ConfigTargetGraph::from_configs(&[config("app:app", TargetKind::BashBinary, &["main.sh"], &["nope:nope"])])
      .unwrap_err();
    assert_eq!(
      err,
      TargetError::UnknownTarget {
        address: "nope:nope".to_string(),
        referenced_by: Some("app:app".to_string()),
      }
    );
  }

  #[test]
  fn binary_needs_exactly_one_source() {
    let err = ConfigTargetGraph::from_configs(&[config("app:app", TargetKind::BashBinary, &["a.sh", "b.sh"], &[])])
      .unwrap_err();
    assert!(matches!(err, TargetError::InvalidTarget { .. }));

    let mut missing = config("app:app", TargetKind::BashBinary, &[], &[]);
    missing.sources = None;
    assert!(ConfigTargetGraph::from_configs(&[missing]).is_err());
  }

  #[test]
  fn duplicate_address_is_rejected() {
    let err = ConfigTargetGraph::from_configs(&[
      config("lib:lib", TargetKind::BashLibrary, &["*.sh"], &[]),
      config("lib", TargetKind::BashLibrary, &["*.sh"], &[]),
    ])
    .unwrap_err();
    assert!(matches!(err, TargetError::InvalidTarget { .. }));
  }

  #[test]
  fn library_sources_default_when_omitted() {
    let mut lib = config("lib:lib", TargetKind::BashLibrary, &[], &[]);
    lib.sources = None;
    let graph = ConfigTargetGraph::from_configs(&[lib]).unwrap();
    assert_eq!(graph.target(&Address::new("lib", "lib")).unwrap().sources, vec!["*.sh"]);
  }

  #[test]
  fn timeout_only_on_tests() {
    let mut lib = config("lib:lib", TargetKind::BashLibrary, &["*.sh"], &[]);
    lib.timeout = Some(5);
    assert!(ConfigTargetGraph::from_configs(&[lib]).is_err());

    let mut tests = config("lib:tests", TargetKind::BashTests, &["*_test.sh"], &[]);
    tests.timeout = Some(5);
    let graph = ConfigTargetGraph::from_configs(&[tests]).unwrap();
    assert_eq!(
      graph.target(&Address::new("lib", "tests")).unwrap().timeout,
      Some(Duration::from_secs(5))
    );
  }
}
