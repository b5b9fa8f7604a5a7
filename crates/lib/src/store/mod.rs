//! Content-addressed storage for blobs and directory trees.
//!
//! Every value is keyed by the SHA-256 of its bytes. A directory tree is a
//! sorted map of relative paths to file nodes, serialized to JSON and stored
//! like any other blob; the tree's digest is the digest of that blob.
//!
//! The store is append-only: `put` of bytes that are already present is a
//! no-op, and nothing is ever replaced or deleted.

pub mod backend;
pub mod paths;
pub mod types;

use std::collections::btree_map::Entry;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use glob::{MatchOptions, Pattern};
use tempfile::TempDir;
use tracing::{debug, warn};
use walkdir::WalkDir;

pub use backend::{Backend, DiskBackend, MemoryBackend};
pub use types::*;

use crate::util::hash::{Digest, hash_bytes};

const GLOB_OPTIONS: MatchOptions = MatchOptions {
  case_sensitive: true,
  require_literal_separator: true,
  require_literal_leading_dot: false,
};

#[derive(Debug, Default)]
struct Counters {
  writes: AtomicU64,
  hits: AtomicU64,
}

/// Handle to a content store. Cheap to clone; clones share the backend.
#[derive(Debug, Clone)]
pub struct ContentStore {
  backend: Arc<dyn Backend>,
  counters: Arc<Counters>,
  /// Directories `path_globs` never descends into.
  pruned: Arc<Vec<PathBuf>>,
}

/// A temporary directory holding a materialized tree, removed on drop.
#[derive(Debug)]
pub struct ScratchDir(TempDir);

impl ScratchDir {
  pub fn path(&self) -> &Path {
    self.0.path()
  }
}

impl ContentStore {
  pub fn new(backend: Arc<dyn Backend>) -> Self {
    Self {
      backend,
      counters: Arc::default(),
      pruned: Arc::default(),
    }
  }

  /// Keep `path_globs` out of `dirs` (the store itself, build outputs).
  pub fn prune_dirs(mut self, dirs: impl IntoIterator<Item = PathBuf>) -> Self {
    self.pruned = Arc::new(dirs.into_iter().collect());
    self
  }

  /// A store that lives only as long as the process.
  pub fn memory() -> Self {
    Self::new(Arc::new(MemoryBackend::new()))
  }

  /// A store persisted under `root`.
  pub fn disk(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
    Ok(Self::new(Arc::new(DiskBackend::open(root)?)))
  }

  pub fn stats(&self) -> StoreStats {
    StoreStats {
      writes: self.counters.writes.load(Ordering::Relaxed),
      hits: self.counters.hits.load(Ordering::Relaxed),
    }
  }

  /// Store bytes and return their digest.
  pub fn put(&self, bytes: &[u8]) -> Result<Digest, StoreError> {
    let digest = hash_bytes(bytes);
    if self.backend.store_if_absent(&digest.fingerprint, bytes)? {
      self.counters.writes.fetch_add(1, Ordering::Relaxed);
      debug!(digest = %digest, "stored blob");
    } else {
      self.counters.hits.fetch_add(1, Ordering::Relaxed);
    }
    Ok(digest)
  }

  /// Read the bytes behind a digest.
  ///
  /// A stored blob whose length disagrees with `digest.size` is reported as
  /// missing.
  pub fn get(&self, digest: &Digest) -> Result<Vec<u8>, StoreError> {
    if *digest == EMPTY_DIGEST {
      return serde_json::to_vec(&DirectoryTree::default()).map_err(|e| StoreError::Serialize(e.to_string()));
    }

    match self.backend.load(&digest.fingerprint)? {
      Some(bytes) if bytes.len() as u64 == digest.size => Ok(bytes),
      _ => Err(StoreError::NotFound(*digest)),
    }
  }

  pub fn contains(&self, digest: &Digest) -> Result<bool, StoreError> {
    if *digest == EMPTY_DIGEST {
      return Ok(true);
    }
    self.backend.contains(&digest.fingerprint)
  }

  /// Load the directory tree behind a digest.
  pub fn tree(&self, digest: &Digest) -> Result<DirectoryTree, StoreError> {
    if *digest == EMPTY_DIGEST {
      return Ok(DirectoryTree::default());
    }
    let bytes = self.get(digest)?;
    serde_json::from_slice(&bytes).map_err(|_| StoreError::NotATree(*digest))
  }

  /// Serialize and store a tree after checking it for file/directory clashes.
  pub fn store_tree(&self, tree: &DirectoryTree) -> Result<Digest, StoreError> {
    check_file_dir_clashes(tree)?;
    let bytes = serde_json::to_vec(tree).map_err(|e| StoreError::Serialize(e.to_string()))?;
    self.put(&bytes)
  }

  /// Store every file and the tree that lists them.
  pub fn create_digest(&self, files: &[FileContent]) -> Result<Digest, StoreError> {
    let mut tree = DirectoryTree::default();
    for file in files {
      let path = paths::normalize(&file.path)?;
      let node = FileNode {
        digest: self.put(&file.content)?,
        is_executable: file.is_executable,
      };
      insert_node(&mut tree, path, node)?;
    }
    self.store_tree(&tree)
  }

  /// Read back every file of a tree, in path order.
  pub fn contents(&self, digest: &Digest) -> Result<Vec<FileContent>, StoreError> {
    let tree = self.tree(digest)?;
    tree
      .files
      .into_iter()
      .map(|(path, node)| {
        Ok(FileContent {
          path,
          content: self.get(&node.digest)?,
          is_executable: node.is_executable,
        })
      })
      .collect()
  }

  pub fn snapshot(&self, digest: &Digest) -> Result<Snapshot, StoreError> {
    let tree = self.tree(digest)?;
    Ok(Snapshot {
      digest: *digest,
      files: tree.files.into_keys().collect(),
    })
  }

  /// Union of several trees.
  ///
  /// Identical entries may appear in more than one input. Two inputs that
  /// disagree about a path, or where one has a file at another's directory,
  /// fail with [`StoreError::PathCollision`] regardless of input order.
  pub fn merge(&self, digests: &[Digest]) -> Result<Digest, StoreError> {
    match digests {
      [] => return Ok(EMPTY_DIGEST),
      [single] => {
        self.tree(single)?;
        return Ok(*single);
      }
      _ => {}
    }

    let mut merged = DirectoryTree::default();
    for digest in digests {
      for (path, node) in self.tree(digest)?.files {
        insert_node(&mut merged, path, node)?;
      }
    }
    self.store_tree(&merged)
  }

  /// Keep only the entries whose path satisfies `keep`.
  pub fn filter(&self, digest: &Digest, keep: impl Fn(&str) -> bool) -> Result<Digest, StoreError> {
    let mut tree = self.tree(digest)?;
    tree.files.retain(|path, _| keep(path));
    self.store_tree(&tree)
  }

  /// Path-level difference from `a` to `b`.
  pub fn diff(&self, a: &Digest, b: &Digest) -> Result<DigestDiff, StoreError> {
    let left = self.tree(a)?;
    let right = self.tree(b)?;
    let mut diff = DigestDiff::default();

    for (path, node) in &left.files {
      match right.files.get(path) {
        None => diff.removed.push(path.clone()),
        Some(other) if other != node => diff.changed.push(path.clone()),
        Some(_) => {}
      }
    }
    for path in right.files.keys() {
      if !left.files.contains_key(path) {
        diff.added.push(path.clone());
      }
    }
    Ok(diff)
  }

  /// Ingest every regular file under `dir` whose relative path passes `keep`.
  pub fn capture_dir(&self, dir: &Path, keep: impl Fn(&str) -> bool) -> Result<Digest, StoreError> {
    let mut tree = DirectoryTree::default();
    for (relative, absolute) in walk_files(dir, &[])? {
      if keep(&relative) {
        let node = self.ingest_file(&absolute)?;
        tree.files.insert(relative, node);
      }
    }
    self.store_tree(&tree)
  }

  /// Snapshot the files under `root` matched by `globs`.
  ///
  /// Globs are relative to `root`; a glob prefixed with `!` excludes matches.
  /// `origin` names the requester in warnings and errors.
  pub fn path_globs(
    &self,
    root: &Path,
    globs: &[String],
    on_unmatched: GlobMatchErrorBehavior,
    origin: &str,
  ) -> Result<Snapshot, StoreError> {
    let mut includes = Vec::new();
    let mut excludes = Vec::new();
    for glob in globs {
      match glob.strip_prefix('!') {
        Some(exclude) => excludes.push(compile_glob(exclude)?),
        None => includes.push((glob.as_str(), compile_glob(glob)?)),
      }
    }

    let mut tree = DirectoryTree::default();
    for (glob, pattern) in &includes {
      let base = root.join(literal_prefix(glob));
      let mut matched = false;

      for (relative, absolute) in walk_files(&base, &self.pruned)? {
        let relative = match base.strip_prefix(root) {
          Ok(prefix) if !prefix.as_os_str().is_empty() => format!("{}/{relative}", prefix.to_string_lossy()),
          _ => relative,
        };
        if !pattern.matches_with(&relative, GLOB_OPTIONS) {
          continue;
        }
        matched = true;
        if excludes.iter().any(|e| e.matches_with(&relative, GLOB_OPTIONS)) {
          continue;
        }
        if let Entry::Vacant(slot) = tree.files.entry(relative) {
          slot.insert(self.ingest_file(&absolute)?);
        }
      }

      if !matched {
        match on_unmatched {
          GlobMatchErrorBehavior::Ignore => {}
          GlobMatchErrorBehavior::Warn => warn!(glob = %glob, origin = %origin, "glob did not match any files"),
          GlobMatchErrorBehavior::Error => {
            return Err(StoreError::UnmatchedGlob {
              glob: glob.to_string(),
              origin: origin.to_string(),
            });
          }
        }
      }
    }

    let digest = self.store_tree(&tree)?;
    Ok(Snapshot {
      digest,
      files: tree.files.into_keys().collect(),
    })
  }

  /// Write a tree to `target`, restoring executable bits.
  ///
  /// If `target` did not exist before the call and writing fails, it is
  /// removed again.
  pub fn materialize(&self, digest: &Digest, target: &Path) -> Result<(), StoreError> {
    let created = !target.exists();
    fs::create_dir_all(target).map_err(|e| StoreError::io(target, e))?;

    let result = self.write_tree(digest, target);
    if result.is_err() && created {
      let _ = fs::remove_dir_all(target);
    }
    result
  }

  /// Materialize into a fresh temporary directory.
  pub fn materialize_scratch(&self, digest: &Digest) -> Result<ScratchDir, StoreError> {
    let dir = tempfile::Builder::new()
      .prefix("cairn-")
      .tempdir()
      .map_err(|e| StoreError::io(std::env::temp_dir(), e))?;
    self.write_tree(digest, dir.path())?;
    Ok(ScratchDir(dir))
  }

  fn write_tree(&self, digest: &Digest, target: &Path) -> Result<(), StoreError> {
    let tree = self.tree(digest)?;
    for (path, node) in &tree.files {
      let dest = target.join(path);
      if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
      }
      let bytes = self.get(&node.digest)?;
      fs::write(&dest, bytes).map_err(|e| StoreError::io(&dest, e))?;
      set_executable(&dest, node.is_executable)?;
    }
    debug!(digest = %digest, dir = %target.display(), files = tree.files.len(), "materialized tree");
    Ok(())
  }

  fn ingest_file(&self, path: &Path) -> Result<FileNode, StoreError> {
    let bytes = fs::read(path).map_err(|e| StoreError::io(path, e))?;
    Ok(FileNode {
      digest: self.put(&bytes)?,
      is_executable: is_executable(path)?,
    })
  }
}

fn insert_node(tree: &mut DirectoryTree, path: String, node: FileNode) -> Result<(), StoreError> {
  match tree.files.entry(path) {
    Entry::Vacant(slot) => {
      slot.insert(node);
      Ok(())
    }
    Entry::Occupied(existing) if *existing.get() == node => Ok(()),
    Entry::Occupied(existing) => Err(StoreError::PathCollision {
      path: existing.key().clone(),
      reason: format!("conflicting content {} and {}", existing.get().digest, node.digest),
    }),
  }
}

fn check_file_dir_clashes(tree: &DirectoryTree) -> Result<(), StoreError> {
  for path in tree.files.keys() {
    if let Some(dir) = paths::ancestors(path).find(|dir| tree.files.contains_key(*dir)) {
      return Err(StoreError::PathCollision {
        path: dir.to_string(),
        reason: format!("is a file in one input and a directory containing '{path}' in another"),
      });
    }
  }
  Ok(())
}

fn compile_glob(glob: &str) -> Result<Pattern, StoreError> {
  Pattern::new(glob).map_err(|e| StoreError::InvalidGlob {
    glob: glob.to_string(),
    message: e.msg.to_string(),
  })
}

/// Leading directory components of a glob that contain no wildcard.
fn literal_prefix(glob: &str) -> PathBuf {
  let mut components: Vec<&str> = glob.split('/').collect();
  components.pop();
  components
    .into_iter()
    .take_while(|c| !c.contains(['*', '?', '[']))
    .filter(|c| !c.is_empty() && *c != ".")
    .collect()
}

/// Regular files under `dir` as (relative `/`-path, absolute path), sorted.
/// Entries under `pruned` are not visited.
fn walk_files(dir: &Path, pruned: &[PathBuf]) -> Result<Vec<(String, PathBuf)>, StoreError> {
  if !dir.is_dir() || pruned.iter().any(|p| dir.starts_with(p)) {
    return Ok(Vec::new());
  }

  let mut files = Vec::new();
  let walk = WalkDir::new(dir)
    .sort_by_file_name()
    .into_iter()
    .filter_entry(|entry| !pruned.iter().any(|p| entry.path() == p));
  for entry in walk {
    let entry = entry.map_err(|e| {
      let path = e.path().unwrap_or(dir).to_path_buf();
      StoreError::io(path, e.into())
    })?;
    if !entry.path().is_file() {
      continue;
    }
    let Ok(relative) = entry.path().strip_prefix(dir) else {
      continue;
    };
    let relative = relative
      .components()
      .map(|c| c.as_os_str().to_string_lossy())
      .collect::<Vec<_>>()
      .join("/");
    files.push((relative, entry.into_path()));
  }
  Ok(files)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> Result<bool, StoreError> {
  use std::os::unix::fs::PermissionsExt;
  let meta = fs::metadata(path).map_err(|e| StoreError::io(path, e))?;
  Ok(meta.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> Result<bool, StoreError> {
  Ok(false)
}

#[cfg(unix)]
fn set_executable(path: &Path, executable: bool) -> Result<(), StoreError> {
  use std::os::unix::fs::PermissionsExt;
  let mode = if executable { 0o755 } else { 0o644 };
  fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| StoreError::io(path, e))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path, _executable: bool) -> Result<(), StoreError> {
  Ok(())
}
