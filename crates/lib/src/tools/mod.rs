//! External tools: checksum-pinned downloads and binary discovery.
//!
//! [`ToolCache`] fetches each (name, version, platform) at most once per
//! process. Downloads are verified against the pinned digest before anything
//! reaches the store; a mismatch leaves no cache entry behind, so a later
//! fetch tries again.
//!
//! With a download directory configured, verified bytes are also kept on disk
//! as `<dir>/<sha256>` and reused by later processes after re-verification.

pub mod binary;
pub mod download;
pub mod types;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::execute::Context;
use crate::rules::{GraphError, RuleDef, RuleGraph};
use crate::store::ContentStore;

pub use binary::find_binary;
pub use download::{Downloader, HttpDownloader, StaticDownloader, url_to_filename};
pub use types::{
  BinaryPath, BinaryPathRequest, BinaryPathTest, BinaryPaths, DownloadedTool, ExternalToolSpec, ToolError, ToolKey,
};

type Slot = Arc<OnceCell<DownloadedTool>>;

#[derive(Debug, Clone)]
pub struct ToolCache {
  store: ContentStore,
  downloader: Arc<dyn Downloader>,
  download_dir: Option<PathBuf>,
  entries: Arc<Mutex<HashMap<ToolKey, Slot>>>,
}

impl ToolCache {
  pub fn new(store: ContentStore, downloader: Arc<dyn Downloader>) -> Self {
    Self {
      store,
      downloader,
      download_dir: None,
      entries: Arc::default(),
    }
  }

  /// Keep verified downloads under `dir` across processes.
  pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.download_dir = Some(dir.into());
    self
  }

  /// Fetch, verify and snapshot a tool.
  pub async fn fetch(&self, spec: &ExternalToolSpec) -> Result<DownloadedTool, Error> {
    let key = spec.cache_key();
    let slot = {
      let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
      entries.entry(key.clone()).or_default().clone()
    };

    let result = slot.get_or_try_init(|| self.download(spec)).await.cloned();
    if result.is_err() {
      let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
      if let Some(current) = entries.get(&key)
        && Arc::ptr_eq(current, &slot)
        && current.get().is_none()
      {
        entries.remove(&key);
      }
    }
    result
  }

  /// Whether a verified download is cached for `key`.
  pub fn is_cached(&self, key: &ToolKey) -> bool {
    let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
    entries.get(key).is_some_and(|slot| slot.initialized())
  }

  async fn download(&self, spec: &ExternalToolSpec) -> Result<DownloadedTool, Error> {
    let bytes = match self.cached_download(spec).await {
      Some(bytes) => bytes,
      None => {
        info!(tool = %spec.cache_key(), url = %spec.url, "fetching tool");
        let bytes = self.downloader.download(&spec.url).await?;
        download::verify(spec, &bytes)?;
        self.keep_download(spec, &bytes).await;
        bytes
      }
    };

    let digest = download::to_snapshot(&self.store, spec, &bytes)?;
    debug!(tool = %spec.name, digest = %digest, "tool snapshot stored");
    Ok(DownloadedTool {
      digest,
      exe: spec.exe.clone(),
    })
  }

  fn download_path(&self, spec: &ExternalToolSpec) -> Option<PathBuf> {
    let dir = self.download_dir.as_ref()?;
    Some(dir.join(spec.expected_digest.fingerprint.to_hex()))
  }

  /// Previously verified bytes, if present on disk and still matching.
  async fn cached_download(&self, spec: &ExternalToolSpec) -> Option<Vec<u8>> {
    let path = self.download_path(spec)?;
    let bytes = tokio::fs::read(&path).await.ok()?;
    match download::verify(spec, &bytes) {
      Ok(()) => {
        debug!(path = %path.display(), "using cached download");
        Some(bytes)
      }
      Err(_) => {
        debug!(path = %path.display(), "cached download does not match, fetching again");
        None
      }
    }
  }

  async fn keep_download(&self, spec: &ExternalToolSpec, bytes: &[u8]) {
    let Some(path) = self.download_path(spec) else {
      return;
    };
    let write = async {
      if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
      }
      tokio::fs::write(&path, bytes).await
    };
    if let Err(e) = write.await {
      warn!(path = %path.display(), error = %e, "could not keep download");
    }
  }
}

/// Register the tool rules: `ExternalToolSpec -> DownloadedTool` and
/// `BinaryPathRequest -> BinaryPaths`.
pub fn register(graph: &mut RuleGraph) -> Result<(), GraphError> {
  graph.register(RuleDef::new(
    "tools.fetch",
    |ctx: Context, spec: ExternalToolSpec| async move { ctx.option::<ToolCache>()?.fetch(&spec).await },
  ))?;

  graph.register(RuleDef::new(
    "tools.find_binary",
    |_ctx: Context, request: BinaryPathRequest| async move { Ok(find_binary(&request).await) },
  ))?;

  Ok(())
}
