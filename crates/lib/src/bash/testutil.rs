//! A throwaway build root with targets, files and fake tools.

use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;

use crate::config::{CairnConfig, KnownVersion};
use crate::execute::Executor;
use crate::goals::{self, Services};
use crate::platform::tool_platform;
use crate::rules::RuleDef;
use crate::store::ContentStore;
use crate::target::{TargetConfig, TargetKind};
use crate::tools::StaticDownloader;
use crate::util::hash::hash_bytes;

/// Runs every `test*` function in a subshell and fails if any failed.
pub const SHUNIT2_STUB: &str = r#"#!/usr/bin/env bash
__failures=0
for __test in $(compgen -A function test); do
  if ( "$__test" ); then
    echo "ok $__test"
  else
    echo "FAILED $__test"
    __failures=$((__failures + 1))
  fi
done
echo "failures: $__failures"
[ "$__failures" -eq 0 ]
"#;

/// Replaces a leading tab with two spaces. `-d` lists files that would
/// change, `-w` rewrites them. Builtins only: tools run with no PATH.
pub const FAKE_SHFMT: &str = "#!/bin/sh
mode=$1
shift
status=0
for f in \"$@\"; do
  case $f in -*) continue ;; esac
  out=''
  changed=0
  while IFS= read -r line; do
    case $line in
      '\t'*) line=\"  ${line#\t}\"; changed=1 ;;
    esac
    out=\"$out$line
\"
  done < \"$f\"
  if [ \"$changed\" = 1 ]; then
    if [ \"$mode\" = -w ]; then
      printf '%s' \"$out\" > \"$f\"
    else
      echo \"$f\"
      status=1
    fi
  fi
done
exit $status
";

pub struct Workspace {
  dir: TempDir,
  config: CairnConfig,
  downloads: Vec<(String, Vec<u8>)>,
}

impl Workspace {
  pub fn new() -> Self {
    Self {
      dir: TempDir::new().unwrap(),
      config: CairnConfig::default(),
      downloads: Vec::new(),
    }
  }

  pub fn root(&self) -> &Path {
    self.dir.path()
  }

  pub fn config_mut(&mut self) -> &mut CairnConfig {
    &mut self.config
  }

  pub fn file(self, path: &str, content: &str) -> Self {
    let full = self.dir.path().join(path);
    if let Some(parent) = full.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(full, content).unwrap();
    self
  }

  pub fn target(mut self, address: &str, kind: TargetKind, sources: &[&str], dependencies: &[&str]) -> Self {
    self.config.targets.push(TargetConfig {
      address: address.to_string(),
      kind,
      sources: Some(sources.iter().map(|s| s.to_string()).collect()),
      dependencies: dependencies.iter().map(|s| s.to_string()).collect(),
      output_path: None,
      timeout: None,
    });
    self
  }

  /// Serve `body` as the pinned shunit2 script.
  pub fn with_shunit2(mut self, body: &str) -> Self {
    let url = "https://tools.test/shunit2".to_string();
    let digest = hash_bytes(body.as_bytes());
    self.config.shunit2.url = url.clone();
    self.config.shunit2.sha256 = digest.fingerprint.to_hex();
    self.config.shunit2.size = digest.size;
    self.downloads.push((url, body.as_bytes().to_vec()));
    self
  }

  /// Configure `name` (shellcheck or shfmt) to download `body`.
  pub fn with_tool(mut self, name: &str, body: &str) -> Self {
    let url = format!("https://tools.test/{name}");
    let digest = hash_bytes(body.as_bytes());
    let section = match name {
      "shellcheck" => &mut self.config.shellcheck,
      "shfmt" => &mut self.config.shfmt,
      other => panic!("no config section for {other}"),
    };
    section.exe = Some(name.to_string());
    section.known_versions = vec![KnownVersion {
      version: None,
      platform: tool_platform().unwrap_or("linux").to_string(),
      url: url.clone(),
      sha256: digest.fingerprint.to_hex(),
      size: digest.size,
    }];
    self.downloads.push((url, body.as_bytes().to_vec()));
    self
  }

  pub fn services(&self) -> Services {
    let downloader = self
      .downloads
      .iter()
      .fold(StaticDownloader::new(), |d, (url, bytes)| d.with(url.clone(), bytes.clone()));
    Services {
      store: ContentStore::memory(),
      downloader: Arc::new(downloader),
      download_dir: None,
      force_tests: false,
    }
  }

  pub fn executor(&self) -> Executor {
    goals::build_executor(self.root(), &self.config, self.services()).unwrap()
  }

  /// An executor with extra formatters registered after the built-in ones.
  pub fn executor_with_formatters(&self, formatters: Vec<RuleDef>) -> Executor {
    let mut graph = crate::bash::rule_graph().unwrap();
    for formatter in formatters {
      graph.register_union_member(formatter).unwrap();
    }
    let services = self.services();
    let session = goals::session(self.root(), &self.config, &services).unwrap();
    Executor::new(graph, services.store, session).unwrap()
  }
}
