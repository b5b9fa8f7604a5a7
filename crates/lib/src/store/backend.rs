//! Storage backends for the content store.
//!
//! A backend is an append-only map from fingerprint to bytes. The content
//! store never asks a backend to replace an existing entry.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::debug;

use super::types::StoreError;
use crate::util::hash::Fingerprint;

pub trait Backend: Send + Sync + fmt::Debug {
  /// Read the bytes for a fingerprint, if present.
  fn load(&self, fingerprint: &Fingerprint) -> Result<Option<Vec<u8>>, StoreError>;

  /// Insert bytes unless the fingerprint is already present.
  ///
  /// Returns `true` when the bytes were written.
  fn store_if_absent(&self, fingerprint: &Fingerprint, bytes: &[u8]) -> Result<bool, StoreError>;

  fn contains(&self, fingerprint: &Fingerprint) -> Result<bool, StoreError>;
}

/// In-process backend, lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryBackend {
  blobs: RwLock<HashMap<Fingerprint, Arc<[u8]>>>,
}

impl MemoryBackend {
  pub fn new() -> Self {
    Self::default()
  }
}

impl Backend for MemoryBackend {
  fn load(&self, fingerprint: &Fingerprint) -> Result<Option<Vec<u8>>, StoreError> {
    let blobs = self.blobs.read().unwrap_or_else(|e| e.into_inner());
    Ok(blobs.get(fingerprint).map(|b| b.to_vec()))
  }

  fn store_if_absent(&self, fingerprint: &Fingerprint, bytes: &[u8]) -> Result<bool, StoreError> {
    let mut blobs = self.blobs.write().unwrap_or_else(|e| e.into_inner());
    if blobs.contains_key(fingerprint) {
      return Ok(false);
    }
    blobs.insert(*fingerprint, Arc::from(bytes));
    Ok(true)
  }

  fn contains(&self, fingerprint: &Fingerprint) -> Result<bool, StoreError> {
    let blobs = self.blobs.read().unwrap_or_else(|e| e.into_inner());
    Ok(blobs.contains_key(fingerprint))
  }
}

/// Local disk backend.
///
/// # Layout
///
/// ```text
/// <root>/
/// ├── objects/
/// │   └── <first 2 hex>/<remaining 62 hex>
/// └── tmp/                # staging for atomic writes
/// ```
#[derive(Debug)]
pub struct DiskBackend {
  root: PathBuf,
}

impl DiskBackend {
  /// Open (creating if needed) a disk backend rooted at `root`.
  pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
    let root = root.into();
    for dir in [root.join("objects"), root.join("tmp")] {
      fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
    }
    Ok(Self { root })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn object_path(&self, fingerprint: &Fingerprint) -> PathBuf {
    let hex = fingerprint.to_hex();
    let (prefix, rest) = hex.split_at(2);
    self.root.join("objects").join(prefix).join(rest)
  }
}

impl Backend for DiskBackend {
  fn load(&self, fingerprint: &Fingerprint) -> Result<Option<Vec<u8>>, StoreError> {
    let path = self.object_path(fingerprint);
    match fs::read(&path) {
      Ok(bytes) => Ok(Some(bytes)),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(StoreError::io(path, e)),
    }
  }

  fn store_if_absent(&self, fingerprint: &Fingerprint, bytes: &[u8]) -> Result<bool, StoreError> {
    let path = self.object_path(fingerprint);
    if path.exists() {
      return Ok(false);
    }

    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }

    // Stage then rename so readers never observe a partial object.
    let staging = self.root.join("tmp");
    let mut file = tempfile::NamedTempFile::new_in(&staging).map_err(|e| StoreError::io(&staging, e))?;
    file.write_all(bytes).map_err(|e| StoreError::io(file.path(), e))?;
    file.flush().map_err(|e| StoreError::io(file.path(), e))?;
    file.persist(&path).map_err(|e| StoreError::io(&path, e.error))?;

    debug!(fingerprint = %fingerprint, size = bytes.len(), "wrote object");
    Ok(true)
  }

  fn contains(&self, fingerprint: &Fingerprint) -> Result<bool, StoreError> {
    Ok(self.object_path(fingerprint).exists())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::hash::hash_bytes;
  use tempfile::TempDir;

  #[test]
  fn memory_backend_store_once() {
    let backend = MemoryBackend::new();
    let fp = hash_bytes(b"abc").fingerprint;

    assert!(backend.store_if_absent(&fp, b"abc").unwrap());
    assert!(!backend.store_if_absent(&fp, b"abc").unwrap());
    assert_eq!(backend.load(&fp).unwrap().unwrap(), b"abc");
  }

  #[test]
  fn disk_backend_layout_and_reload() {
    let temp = TempDir::new().unwrap();
    let fp = hash_bytes(b"on disk").fingerprint;

    {
      let backend = DiskBackend::open(temp.path()).unwrap();
      assert!(backend.store_if_absent(&fp, b"on disk").unwrap());
    }

    let hex = fp.to_hex();
    assert!(temp.path().join("objects").join(&hex[..2]).join(&hex[2..]).exists());

    // A fresh handle over the same root sees the object.
    let backend = DiskBackend::open(temp.path()).unwrap();
    assert!(backend.contains(&fp).unwrap());
    assert!(!backend.store_if_absent(&fp, b"on disk").unwrap());
    assert_eq!(backend.load(&fp).unwrap().unwrap(), b"on disk");
  }

  #[test]
  fn disk_backend_missing_is_none() {
    let temp = TempDir::new().unwrap();
    let backend = DiskBackend::open(temp.path()).unwrap();
    assert!(backend.load(&hash_bytes(b"nope").fingerprint).unwrap().is_none());
  }
}
