use std::path::Path;

use anyhow::Result;
use serde::Serialize;

use cairn_lib::platform::paths::cache_dir;
use cairn_lib::platform::{host_triple, tool_platform};

use super::Workspace;
use crate::output::{OutputFormat, print_json, print_stat};

#[derive(Serialize)]
struct Info {
  version: &'static str,
  platform: Option<String>,
  tool_platform: Option<&'static str>,
  build_root: String,
  config: Option<String>,
  store: String,
  cache: String,
  parallelism: usize,
  targets: Vec<String>,
}

pub fn cmd_info(config: Option<&Path>, output: OutputFormat) -> Result<()> {
  let workspace = Workspace::load(config)?;
  let info = Info {
    version: env!("CARGO_PKG_VERSION"),
    platform: host_triple(),
    tool_platform: tool_platform(),
    build_root: workspace.root.display().to_string(),
    config: workspace.config_path.as_ref().map(|p| p.display().to_string()),
    store: workspace.config.store_dir(&workspace.root).display().to_string(),
    cache: cache_dir().display().to_string(),
    parallelism: workspace.config.parallelism(),
    targets: workspace.config.targets.iter().map(|t| t.address.clone()).collect(),
  };

  if output.is_json() {
    return print_json(&info);
  }

  println!("cairn v{}", info.version);
  print_stat("Platform", info.platform.as_deref().unwrap_or("unsupported"));
  print_stat("Build root", &info.build_root);
  print_stat("Config", info.config.as_deref().unwrap_or("(none, using defaults)"));
  print_stat("Store", &info.store);
  print_stat("Cache", &info.cache);
  print_stat("Parallelism", &info.parallelism.to_string());
  print_stat("Targets", &info.targets.len().to_string());
  for target in &info.targets {
    println!("    {target}");
  }
  Ok(())
}
