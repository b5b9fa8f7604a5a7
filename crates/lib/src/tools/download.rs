//! Fetching tool bytes and turning them into snapshots.

use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use flate2::read::GzDecoder;
use tracing::{debug, info};

use super::types::{ExternalToolSpec, ToolError};
use crate::store::{ContentStore, FileContent};
use crate::util::hash::{Digest, hash_bytes};

/// Source of tool bytes.
#[async_trait]
pub trait Downloader: Send + Sync + fmt::Debug {
  async fn download(&self, url: &str) -> Result<Vec<u8>, ToolError>;
}

/// Downloads over HTTP(S) with reqwest; `file://` URLs are read from disk.
#[derive(Debug, Clone, Default)]
pub struct HttpDownloader {
  client: reqwest::Client,
}

impl HttpDownloader {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl Downloader for HttpDownloader {
  async fn download(&self, url: &str) -> Result<Vec<u8>, ToolError> {
    let failed = |message: String| ToolError::Download {
      url: url.to_string(),
      message,
    };

    if let Some(path) = url.strip_prefix("file://") {
      debug!(path = %path, "reading local tool");
      return tokio::fs::read(path).await.map_err(|e| failed(e.to_string()));
    }

    info!(url = %url, "downloading");
    let response = self.client.get(url).send().await.map_err(|e| failed(e.to_string()))?;
    if !response.status().is_success() {
      return Err(failed(format!("HTTP {}", response.status())));
    }
    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
    info!(url = %url, size = bytes.len(), "download complete");
    Ok(bytes.to_vec())
  }
}

/// Serves fixed bytes per URL and counts requests.
///
/// Useful for air-gapped mirrors and for tests.
#[derive(Debug, Default)]
pub struct StaticDownloader {
  blobs: Mutex<HashMap<String, Vec<u8>>>,
  requests: AtomicUsize,
}

impl StaticDownloader {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(self, url: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
    self
      .blobs
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .insert(url.into(), bytes.into());
    self
  }

  pub fn requests(&self) -> usize {
    self.requests.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Downloader for StaticDownloader {
  async fn download(&self, url: &str) -> Result<Vec<u8>, ToolError> {
    self.requests.fetch_add(1, Ordering::SeqCst);
    let blobs = self.blobs.lock().unwrap_or_else(|e| e.into_inner());
    blobs.get(url).cloned().ok_or_else(|| ToolError::Download {
      url: url.to_string(),
      message: "not found".to_string(),
    })
  }
}

/// Check downloaded bytes against the spec's pinned digest.
pub(crate) fn verify(spec: &ExternalToolSpec, bytes: &[u8]) -> Result<(), ToolError> {
  let actual = hash_bytes(bytes);
  if actual != spec.expected_digest {
    return Err(ToolError::ChecksumMismatch {
      name: spec.name.clone(),
      url: spec.url.clone(),
      expected: spec.expected_digest,
      actual,
    });
  }
  Ok(())
}

/// Store a download as a snapshot.
///
/// `.tar.gz`/`.tgz` archives are unpacked; anything else becomes a single
/// executable named by the spec's `exe` (or by the URL's file name).
pub(crate) fn to_snapshot(store: &ContentStore, spec: &ExternalToolSpec, bytes: &[u8]) -> Result<Digest, crate::Error> {
  let filename = url_to_filename(&spec.url);
  let files = if filename.ends_with(".tar.gz") || filename.ends_with(".tgz") {
    extract_tar_gz(&spec.name, bytes)?
  } else {
    let name = if spec.exe.is_empty() { filename } else { spec.exe.clone() };
    vec![FileContent::new(name, bytes).executable()]
  };
  Ok(store.create_digest(&files)?)
}

fn extract_tar_gz(name: &str, bytes: &[u8]) -> Result<Vec<FileContent>, ToolError> {
  let failed = |message: String| ToolError::Extract {
    name: name.to_string(),
    message,
  };

  let mut archive = tar::Archive::new(GzDecoder::new(bytes));
  let mut files = Vec::new();
  for entry in archive.entries().map_err(|e| failed(e.to_string()))? {
    let mut entry = entry.map_err(|e| failed(e.to_string()))?;
    if !entry.header().entry_type().is_file() {
      continue;
    }
    let path = entry.path().map_err(|e| failed(e.to_string()))?.to_string_lossy().into_owned();
    let mode = entry.header().mode().map_err(|e| failed(e.to_string()))?;
    let mut content = Vec::new();
    entry.read_to_end(&mut content).map_err(|e| failed(e.to_string()))?;

    let file = FileContent::new(path, content);
    files.push(if mode & 0o111 != 0 { file.executable() } else { file });
  }
  Ok(files)
}

/// Convert a URL to a safe file name.
///
/// Takes the last path component and sanitizes it. Falls back to a hash of
/// the URL if no usable name remains.
pub fn url_to_filename(url: &str) -> String {
  if let Some(filename) = url.rsplit('/').next() {
    let filename = filename.split('?').next().unwrap_or(filename);

    let sanitized: String = filename
      .chars()
      .map(|c| {
        if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
          c
        } else {
          '_'
        }
      })
      .collect();

    if !sanitized.is_empty() && sanitized != "." && sanitized != ".." {
      return sanitized;
    }
  }

  format!("download_{}", &hash_bytes(url.as_bytes()).fingerprint.to_hex()[..16])
}
