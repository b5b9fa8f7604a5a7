mod goal;
mod info;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use cairn_lib::config::CairnConfig;
use cairn_lib::consts::CONFIG_FILE;

pub use goal::{GoalArgs, cmd_goal};
pub use info::cmd_info;

/// The build root and its configuration.
pub struct Workspace {
  pub root: PathBuf,
  /// The config file, if one exists.
  pub config_path: Option<PathBuf>,
  pub config: CairnConfig,
}

impl Workspace {
  /// Load from an explicit config file, or from `cairn.toml` in the current
  /// directory if there is one.
  pub fn load(config: Option<&Path>) -> Result<Self> {
    match config {
      Some(path) => {
        if !path.is_file() {
          bail!("Config file not found: {}", path.display());
        }
        let path = dunce::canonicalize(path).with_context(|| format!("Failed to resolve {}", path.display()))?;
        let root = path
          .parent()
          .map(Path::to_path_buf)
          .context("Config file has no parent directory")?;
        let config = CairnConfig::load(&path).with_context(|| format!("Failed to load {}", path.display()))?;
        Ok(Self {
          root,
          config_path: Some(path),
          config,
        })
      }
      None => {
        let cwd = std::env::current_dir().context("Failed to read current directory")?;
        let root = dunce::canonicalize(&cwd).unwrap_or(cwd);
        let config = CairnConfig::discover(&root).context("Failed to load configuration")?;
        let path = root.join(CONFIG_FILE);
        Ok(Self {
          config_path: path.is_file().then_some(path),
          root,
          config,
        })
      }
    }
  }
}
