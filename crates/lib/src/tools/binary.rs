//! Locating binaries on an explicit search path.

use std::collections::HashSet;
use std::env;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use super::types::{BinaryPath, BinaryPathRequest, BinaryPaths};
use crate::util::hash::hash_bytes;

/// Find every executable named `request.binary_name` along the search path.
///
/// When the request carries a test, each candidate is run with the test
/// args and kept only if it exits zero. An empty result is not an error here;
/// callers use [`BinaryPaths::first_path_or_raise`].
pub async fn find_binary(request: &BinaryPathRequest) -> BinaryPaths {
  let searched = request.search_path.clone();
  let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));

  let candidates: Vec<PathBuf> = match env::join_paths(&searched) {
    Ok(joined) => match which::which_in_all(&request.binary_name, Some(joined), &cwd) {
      Ok(found) => found.collect(),
      Err(_) => Vec::new(),
    },
    Err(e) => {
      debug!(error = %e, "search path contains an entry that cannot be joined");
      Vec::new()
    }
  };

  let mut seen = HashSet::new();
  let mut paths = Vec::new();
  for candidate in candidates {
    if !seen.insert(candidate.clone()) {
      continue;
    }
    match &request.test {
      None => paths.push(BinaryPath {
        path: candidate,
        fingerprint: None,
      }),
      Some(test) => {
        let output = Command::new(&candidate)
          .args(&test.args)
          .stdin(Stdio::null())
          .output()
          .await;
        match output {
          Ok(output) if output.status.success() => paths.push(BinaryPath {
            path: candidate,
            fingerprint: test
              .fingerprint_stdout
              .then(|| hash_bytes(&output.stdout).fingerprint.to_hex()),
          }),
          Ok(output) => debug!(path = %candidate.display(), status = ?output.status, "candidate failed its test"),
          Err(e) => debug!(path = %candidate.display(), error = %e, "candidate could not be run"),
        }
      }
    }
  }

  debug!(binary = %request.binary_name, found = paths.len(), "binary search complete");
  BinaryPaths {
    binary_name: request.binary_name.clone(),
    searched,
    paths,
  }
}

#[cfg(all(test, unix))]
mod tests {
  use super::*;
  use crate::tools::types::ToolError;
  use std::fs;
  use std::os::unix::fs::PermissionsExt;
  use tempfile::TempDir;

  fn script(dir: &std::path::Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
  }

  #[tokio::test]
  async fn finds_in_search_path_order() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    let a = script(first.path(), "tool", "exit 0");
    let b = script(second.path(), "tool", "exit 0");

    let request = BinaryPathRequest::new(
      "tool",
      vec![first.path().to_path_buf(), second.path().to_path_buf()],
    );
    let found = find_binary(&request).await;
    let paths: Vec<_> = found.paths.iter().map(|p| p.path.clone()).collect();
    assert_eq!(paths, vec![a, b]);
  }

  #[tokio::test]
  async fn test_args_filter_candidates() {
    let broken = TempDir::new().unwrap();
    let working = TempDir::new().unwrap();
    script(broken.path(), "zip", "exit 1");
    let good = script(working.path(), "zip", "echo 'zip 3.0'");

    let request = BinaryPathRequest::new("zip", vec![broken.path().to_path_buf(), working.path().to_path_buf()])
      .with_test(vec!["-v".to_string()]);
    let found = find_binary(&request).await;

    let first = found.first_path_or_raise().unwrap();
    assert_eq!(first.path, good);
    assert_eq!(
      first.fingerprint.as_deref(),
      Some(hash_bytes(b"zip 3.0\n").fingerprint.to_hex().as_str())
    );
  }

  #[tokio::test]
  async fn missing_binary_reports_searched_paths() {
    let empty = TempDir::new().unwrap();
    let request = BinaryPathRequest::new("no-such-tool", vec![empty.path().to_path_buf()]);
    let found = find_binary(&request).await;

    match found.first_path_or_raise() {
      Err(ToolError::ToolNotFound { name, searched }) => {
        assert_eq!(name, "no-such-tool");
        assert_eq!(searched, vec![empty.path().display().to_string()]);
      }
      other => panic!("expected ToolNotFound, got {other:?}"),
    }
  }
}
