mod cmd;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cairn_lib::goals::Goal;

use crate::cmd::{GoalArgs, cmd_goal, cmd_info};
use crate::output::OutputFormat;

/// cairn - content-addressed builds for Bash projects
#[derive(Parser)]
#[command(name = "cairn")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Path to cairn.toml; its directory is the build root
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Output format
  #[arg(short, long, global = true, value_enum, default_value_t)]
  output: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Package bash_binary targets into dist/
  Package {
    /// Targets to package (default: all)
    addresses: Vec<String>,
  },

  /// Run a bash_binary target in the foreground
  Run {
    address: String,

    /// Arguments passed to the script
    #[arg(last = true)]
    args: Vec<String>,
  },

  /// Open bash over the sources of the given targets
  Repl {
    addresses: Vec<String>,
  },

  /// Run every configured linter
  Lint {
    addresses: Vec<String>,
  },

  /// Run every configured formatter and write the results back
  Fmt {
    addresses: Vec<String>,
  },

  /// Run bash_tests targets with shunit2
  Test {
    addresses: Vec<String>,

    /// Rerun tests even if an identical run is cached
    #[arg(long)]
    force: bool,

    /// Run tests in the foreground, one target at a time
    #[arg(long)]
    debug: bool,
  },

  /// Display platform, configuration and store information
  Info,
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "warn" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let args = |addresses: Vec<String>, force: bool| GoalArgs {
    config: cli.config.clone(),
    output: cli.output,
    verbose: cli.verbose,
    addresses,
    force,
  };

  let code = match cli.command {
    Commands::Package { addresses } => cmd_goal(Goal::Package, args(addresses, false))?,
    Commands::Run { address, args: script_args } => cmd_goal(Goal::Run { args: script_args }, args(vec![address], false))?,
    Commands::Repl { addresses } => cmd_goal(Goal::Repl, args(addresses, false))?,
    Commands::Lint { addresses } => cmd_goal(Goal::Lint, args(addresses, false))?,
    Commands::Fmt { addresses } => cmd_goal(Goal::Fmt, args(addresses, false))?,
    Commands::Test {
      addresses,
      force,
      debug,
    } => cmd_goal(Goal::Test { debug }, args(addresses, force))?,
    Commands::Info => {
      cmd_info(cli.config.as_deref(), cli.output)?;
      0
    }
  };

  if code != 0 {
    std::process::exit(code);
  }
  Ok(())
}
