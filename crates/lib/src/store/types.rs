//! Types for the content store.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::hash::{Digest, Fingerprint};

/// Digest of the empty directory tree (`{"files":{}}`).
///
/// Always readable from any store, whether or not it was ever written.
pub const EMPTY_DIGEST: Digest = Digest {
  fingerprint: Fingerprint([
    0xaa, 0xe5, 0xa7, 0x1d, 0xb7, 0xcd, 0x42, 0x38, 0x2e, 0xf7, 0x49, 0xf8, 0x7c, 0xa8, 0x47, 0x68, 0x4d, 0x9d, 0x4a,
    0x51, 0x7c, 0xc8, 0x23, 0x5f, 0x53, 0xea, 0x31, 0xbd, 0x49, 0x2c, 0x35, 0x77,
  ]),
  size: 12,
};

/// Errors raised by the content store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
  /// The digest is unknown to the store.
  #[error("digest not found in store: {0}")]
  NotFound(Digest),

  /// Two trees disagree about the content at one path.
  #[error("path collision at '{path}': {reason}")]
  PathCollision { path: String, reason: String },

  /// A path is absolute, empty, or escapes the tree root.
  #[error("invalid path '{path}': {reason}")]
  InvalidPath { path: String, reason: String },

  /// The blob behind a digest is not a serialized directory tree.
  #[error("digest {0} is not a directory tree")]
  NotATree(Digest),

  /// A glob pattern did not parse.
  #[error("invalid glob '{glob}': {message}")]
  InvalidGlob { glob: String, message: String },

  /// A glob matched nothing and the caller asked for that to be an error.
  #[error("glob '{glob}' from {origin} did not match any files")]
  UnmatchedGlob { glob: String, origin: String },

  /// Filesystem failure while reading or writing store data.
  #[error("store io error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: Arc<io::Error>,
  },

  /// A tree could not be serialized.
  #[error("failed to serialize directory tree: {0}")]
  Serialize(String),
}

impl StoreError {
  pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
    StoreError::Io {
      path: path.into(),
      source: Arc::new(source),
    }
  }
}

/// A single entry in a directory tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNode {
  pub digest: Digest,
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub is_executable: bool,
}

/// A directory tree: normalized relative path to file node.
///
/// Serialized canonically (sorted keys) and stored as a blob; the tree's
/// digest is the digest of that blob.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryTree {
  pub files: BTreeMap<String, FileNode>,
}

/// A materializable view of a directory tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Snapshot {
  pub digest: Digest,
  pub files: Vec<String>,
}

impl Snapshot {
  pub fn empty() -> Self {
    Self {
      digest: EMPTY_DIGEST,
      files: Vec::new(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.files.is_empty()
  }
}

/// File path and bytes used to create or read back a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
  pub path: String,
  pub content: Vec<u8>,
  pub is_executable: bool,
}

impl FileContent {
  pub fn new(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
    Self {
      path: path.into(),
      content: content.into(),
      is_executable: false,
    }
  }

  pub fn executable(mut self) -> Self {
    self.is_executable = true;
    self
  }
}

/// Path-level difference between two trees.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DigestDiff {
  pub added: Vec<String>,
  pub removed: Vec<String>,
  pub changed: Vec<String>,
}

impl DigestDiff {
  pub fn is_empty(&self) -> bool {
    self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
  }
}

/// What to do when a glob matches no files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GlobMatchErrorBehavior {
  #[default]
  Ignore,
  Warn,
  Error,
}

/// Counters exposed for observability and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
  /// Blobs actually written to the backend.
  pub writes: u64,
  /// `put` calls that found the blob already present.
  pub hits: u64,
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::hash::hash_bytes;

  #[test]
  fn empty_digest_matches_serialized_empty_tree() {
    let bytes = serde_json::to_vec(&DirectoryTree::default()).unwrap();
    assert_eq!(hash_bytes(&bytes), EMPTY_DIGEST);
  }

  #[test]
  fn executable_flag_omitted_when_false() {
    let node = FileNode {
      digest: hash_bytes(b"x"),
      is_executable: false,
    };
    let json = serde_json::to_string(&node).unwrap();
    assert!(!json.contains("is_executable"));
  }
}
