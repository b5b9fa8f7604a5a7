use std::path::{Component, Path, PathBuf};

use super::types::StoreError;

/// Default store location relative to the build root.
pub const DEFAULT_STORE_DIR: &str = ".cairn/store";

/// Resolve the on-disk store directory.
///
/// `CAIRN_STORE` wins over everything. Otherwise a configured directory is
/// resolved against `build_root`, falling back to [`DEFAULT_STORE_DIR`].
pub fn store_dir(build_root: &Path, configured: Option<&Path>) -> PathBuf {
  if let Ok(path) = std::env::var("CAIRN_STORE") {
    return PathBuf::from(path);
  }

  let dir = configured.unwrap_or(Path::new(DEFAULT_STORE_DIR));
  if dir.is_absolute() {
    dir.to_path_buf()
  } else {
    build_root.join(dir)
  }
}

/// Normalize a tree path to relative, `/`-separated form.
///
/// `.` components and duplicate separators are dropped. Absolute paths,
/// `..` components and empty results are rejected.
pub fn normalize(path: &str) -> Result<String, StoreError> {
  let invalid = |reason: &str| StoreError::InvalidPath {
    path: path.to_string(),
    reason: reason.to_string(),
  };

  if path.starts_with('/') {
    return Err(invalid("must be relative"));
  }

  let mut parts = Vec::new();
  for component in Path::new(path).components() {
    match component {
      Component::Normal(part) => {
        let part = part.to_str().ok_or_else(|| invalid("not valid UTF-8"))?;
        parts.push(part);
      }
      Component::CurDir => {}
      Component::ParentDir => return Err(invalid("must not contain '..'")),
      Component::RootDir | Component::Prefix(_) => return Err(invalid("must be relative")),
    }
  }

  if parts.is_empty() {
    return Err(invalid("empty path"));
  }

  Ok(parts.join("/"))
}

/// Every proper ancestor directory of a normalized path, shallowest first.
pub(crate) fn ancestors(path: &str) -> impl Iterator<Item = &str> {
  path.match_indices('/').map(move |(idx, _)| &path[..idx])
}
