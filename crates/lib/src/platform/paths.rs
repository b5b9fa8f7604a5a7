//! Per-user directories.

use std::env;
use std::path::PathBuf;

use crate::consts::APP_NAME;

/// Where downloads and other per-user state live.
///
/// `CAIRN_CACHE_DIR` wins. Otherwise `XDG_CACHE_HOME` (`LOCALAPPDATA` on
/// Windows), falling back to `~/.cache` and then the temp dir.
pub fn cache_dir() -> PathBuf {
  if let Ok(dir) = env::var("CAIRN_CACHE_DIR") {
    return PathBuf::from(dir);
  }
  let (base_var, home_var) = if cfg!(windows) {
    ("LOCALAPPDATA", "USERPROFILE")
  } else {
    ("XDG_CACHE_HOME", "HOME")
  };
  let base = env::var(base_var)
    .map(PathBuf::from)
    .or_else(|_| env::var(home_var).map(|home| PathBuf::from(home).join(".cache")))
    .unwrap_or_else(|_| env::temp_dir());
  base.join(APP_NAME)
}

#[cfg(test)]
#[cfg(not(windows))]
mod tests {
  use super::*;
  use serial_test::serial;

  #[test]
  #[serial]
  fn cairn_cache_dir_takes_precedence() {
    temp_env::with_vars(
      [
        ("CAIRN_CACHE_DIR", Some("/custom/cairn")),
        ("XDG_CACHE_HOME", Some("/custom/cache")),
      ],
      || {
        assert_eq!(cache_dir(), PathBuf::from("/custom/cairn"));
      },
    );
  }

  #[test]
  #[serial]
  fn xdg_fallback_to_home_directories() {
    temp_env::with_vars(
      [
        ("CAIRN_CACHE_DIR", None::<&str>),
        ("XDG_CACHE_HOME", None::<&str>),
        ("HOME", Some("/home/user")),
      ],
      || {
        assert_eq!(cache_dir(), PathBuf::from("/home/user/.cache").join(APP_NAME));
      },
    );
  }
}
