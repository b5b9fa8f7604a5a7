//! Sandboxed process execution.
//!
//! Each process runs in a fresh scratch directory holding its materialized
//! input digest, with an isolated environment:
//! - all inherited variables are cleared
//! - `PATH` is `/path-not-set` unless the spec provides one
//! - `HOME` is `/homeless-shelter`
//! - `TMPDIR`/`TMP`/`TEMP`/`TEMPDIR` point at a private temp directory
//! - `LANG`/`LC_ALL` are `C` and `SOURCE_DATE_EPOCH` is 315532800 (1980-01-01)
//!
//! The child leads its own process group; on timeout the whole group gets
//! SIGKILL and is reaped before the outcome is returned.

pub mod types;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use glob::{MatchOptions, Pattern};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::execute::Context;
use crate::rules::{GraphError, RuleDef, RuleGraph};
use crate::store::{ContentStore, EMPTY_DIGEST, StoreError};

pub use types::{ExitStatus, InteractiveProcess, ProcessError, ProcessOutcome, ProcessResult, ProcessSpec};

/// Time allowed for output pipes to drain after a timed-out group is killed.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Longest stderr excerpt carried in a `NonZeroExit` error.
const STDERR_EXCERPT: usize = 4096;

/// Runs processes against a content store, at most `parallelism` at a time.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
  store: ContentStore,
  permits: Arc<Semaphore>,
}

impl ProcessRunner {
  pub fn new(store: ContentStore, parallelism: usize) -> Self {
    Self {
      store,
      permits: Arc::new(Semaphore::new(parallelism.max(1))),
    }
  }

  /// Run a process and fail unless it exits zero.
  pub async fn run(&self, spec: &ProcessSpec) -> Result<ProcessOutcome, Error> {
    let outcome = self.run_fallible(spec).await?;
    self.check(spec, outcome)
  }

  /// Run a process and return its outcome whatever the exit status.
  pub async fn run_fallible(&self, spec: &ProcessSpec) -> Result<ProcessOutcome, Error> {
    let program = spec.argv.first().ok_or(ProcessError::EmptyArgv)?;
    let _permit = self
      .permits
      .acquire()
      .await
      .map_err(|e| Error::custom(format!("process semaphore closed: {e}")))?;

    let sandbox = self.store.materialize_scratch(&spec.input_digest)?;
    let tmp = tempfile::Builder::new()
      .prefix("cairn-tmp-")
      .tempdir()
      .map_err(|e| ProcessError::io("creating process temp dir", e))?;
    let cwd = sandbox.path();

    let mut command = Command::new(resolve_program(program, cwd));
    command
      .args(&spec.argv[1..])
      .current_dir(cwd)
      .env_clear()
      .envs(base_env(tmp.path()))
      .envs(&spec.env)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    info!(process = %spec.label(), "running process");
    debug!(argv = ?spec.argv, cwd = %cwd.display(), "spawning process");
    let started = Instant::now();

    let mut child = command.spawn().map_err(|e| ProcessError::Spawn {
      program: program.clone(),
      source: Arc::new(e),
    })?;
    let pid = child.id();
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let waited = match spec.timeout {
      Some(limit) => tokio::time::timeout(limit, child.wait()).await.ok(),
      None => Some(child.wait().await),
    };

    let status = match waited {
      Some(status) => {
        let status = status.map_err(|e| ProcessError::io("waiting for process", e))?;
        ExitStatus::Exited(exit_code(&status))
      }
      None => {
        warn!(process = %spec.label(), timeout = ?spec.timeout, "process timed out, killing its group");
        kill_group(pid);
        let _ = child.start_kill();
        child
          .wait()
          .await
          .map_err(|e| ProcessError::io("reaping timed out process", e))?;
        ExitStatus::TimedOut
      }
    };
    let elapsed = started.elapsed();

    let grace = match status {
      ExitStatus::TimedOut => Some(DRAIN_GRACE),
      ExitStatus::Exited(_) => None,
    };
    let stdout = collect(stdout, grace).await?;
    let stderr = collect(stderr, grace).await?;

    let output_digest = match status {
      ExitStatus::Exited(_) => self.harvest(spec, cwd)?,
      ExitStatus::TimedOut => EMPTY_DIGEST,
    };

    let outcome = ProcessOutcome {
      status,
      stdout_digest: self.store.put(&stdout)?,
      stderr_digest: self.store.put(&stderr)?,
      output_digest,
      elapsed,
      description: spec.label(),
    };
    debug!(process = %spec.label(), status = ?outcome.status, elapsed = ?elapsed, "process finished");
    Ok(outcome)
  }

  /// Run with the terminal attached. Returns the exit code.
  pub async fn run_interactive(&self, process: &InteractiveProcess) -> Result<i32, Error> {
    let program = process.argv.first().ok_or(ProcessError::EmptyArgv)?;

    let scratch = self.store.materialize_scratch(&process.input_digest)?;
    let cwd = scratch.path();

    let mut command = Command::new(resolve_program(program, cwd));
    command
      .args(&process.argv[1..])
      .current_dir(cwd)
      .env_clear()
      .envs(interactive_env())
      .envs(&process.env)
      .stdin(Stdio::inherit())
      .stdout(Stdio::inherit())
      .stderr(Stdio::inherit());

    debug!(argv = ?process.argv, cwd = %cwd.display(), "running interactive process");
    let status = command
      .status()
      .await
      .map_err(|e| ProcessError::Spawn {
        program: program.clone(),
        source: Arc::new(e),
      })?;
    Ok(exit_code(&status))
  }

  fn check(&self, spec: &ProcessSpec, outcome: ProcessOutcome) -> Result<ProcessOutcome, Error> {
    match outcome.status {
      ExitStatus::Exited(0) => Ok(outcome),
      ExitStatus::Exited(code) => {
        let stderr = self.store.get(&outcome.stderr_digest)?;
        let mut stderr = String::from_utf8_lossy(&stderr).into_owned();
        if stderr.len() > STDERR_EXCERPT {
          let mut cut = STDERR_EXCERPT;
          while !stderr.is_char_boundary(cut) {
            cut -= 1;
          }
          stderr.truncate(cut);
        }
        Err(
          ProcessError::NonZeroExit {
            description: spec.label(),
            code,
            stderr,
          }
          .into(),
        )
      }
      ExitStatus::TimedOut => Err(
        ProcessError::TimedOut {
          description: spec.label(),
          timeout: spec.timeout.unwrap_or_default(),
        }
        .into(),
      ),
    }
  }

  /// Capture declared outputs from the sandbox.
  fn harvest(&self, spec: &ProcessSpec, cwd: &Path) -> Result<crate::util::hash::Digest, Error> {
    if spec.output_files.is_empty() && spec.output_directories.is_empty() {
      return Ok(EMPTY_DIGEST);
    }

    let files = spec
      .output_files
      .iter()
      .map(|glob| {
        Pattern::new(glob).map_err(|e| StoreError::InvalidGlob {
          glob: glob.clone(),
          message: e.msg.to_string(),
        })
      })
      .collect::<Result<Vec<_>, _>>()?;
    let dirs: Vec<String> = spec
      .output_directories
      .iter()
      .map(|d| d.trim_end_matches('/').to_string())
      .collect();

    let options = MatchOptions {
      require_literal_separator: true,
      ..MatchOptions::new()
    };
    let digest = self.store.capture_dir(cwd, |path| {
      files.iter().any(|p| p.matches_with(path, options))
        || dirs
          .iter()
          .any(|d| d.is_empty() || d == "." || path.strip_prefix(d.as_str()).is_some_and(|r| r.starts_with('/')))
    })?;
    Ok(digest)
  }
}

/// A relative program with a directory part (`./shfmt`) names a file in
/// the sandbox; a bare name is looked up on `PATH`.
fn resolve_program(program: &str, cwd: &Path) -> PathBuf {
  let path = Path::new(program);
  if path.is_relative() && path.components().count() > 1 {
    cwd.join(path)
  } else {
    path.to_path_buf()
  }
}

fn base_env(tmp: &Path) -> BTreeMap<String, String> {
  let tmp = tmp.to_string_lossy().into_owned();
  let mut env = BTreeMap::from([
    ("PATH".to_string(), "/path-not-set".to_string()),
    ("HOME".to_string(), "/homeless-shelter".to_string()),
    ("LANG".to_string(), "C".to_string()),
    ("LC_ALL".to_string(), "C".to_string()),
    ("SOURCE_DATE_EPOCH".to_string(), "315532800".to_string()),
  ]);
  for key in ["TMPDIR", "TMP", "TEMP", "TEMPDIR"] {
    env.insert(key.to_string(), tmp.clone());
  }
  env
}

/// Variables passed through to interactive processes so terminals behave.
fn interactive_env() -> BTreeMap<String, String> {
  ["HOME", "TERM", "LANG", "LC_ALL", "USER"]
    .into_iter()
    .filter_map(|key| std::env::var(key).ok().map(|v| (key.to_string(), v)))
    .collect()
}

fn drain<R: AsyncRead + Unpin + Send + 'static>(pipe: Option<R>) -> JoinHandle<std::io::Result<Vec<u8>>> {
  tokio::spawn(async move {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
      pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
  })
}

async fn collect(
  handle: JoinHandle<std::io::Result<Vec<u8>>>,
  grace: Option<Duration>,
) -> Result<Vec<u8>, ProcessError> {
  let joined = match grace {
    Some(limit) => match tokio::time::timeout(limit, handle).await {
      Ok(joined) => joined,
      // Something outside the group still holds the pipe; give up on it.
      Err(_) => return Ok(Vec::new()),
    },
    None => handle.await,
  };
  joined
    .map_err(|e| ProcessError::io("reading process output", std::io::Error::other(e)))?
    .map_err(|e| ProcessError::io("reading process output", e))
}

#[cfg(unix)]
fn exit_code(status: &std::process::ExitStatus) -> i32 {
  use std::os::unix::process::ExitStatusExt;
  status.code().or_else(|| status.signal().map(|s| 128 + s)).unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: &std::process::ExitStatus) -> i32 {
  status.code().unwrap_or(-1)
}

#[cfg(unix)]
fn kill_group(pid: Option<u32>) {
  use nix::sys::signal::{Signal, killpg};
  use nix::unistd::Pid;

  if let Some(pid) = pid
    && let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL)
  {
    debug!(pid, error = %e, "killpg failed");
  }
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) {}

/// Register the process rules.
///
/// `ProcessSpec -> ProcessOutcome` runs fallibly; `ProcessSpec -> ProcessResult`
/// fails on a non-zero exit or timeout. Both memoize by spec, so identical
/// specs within one executor run once.
pub fn register(graph: &mut RuleGraph) -> Result<(), GraphError> {
  graph.register(RuleDef::new(
    "process.run_fallible",
    |ctx: Context, spec: ProcessSpec| async move { ctx.option::<ProcessRunner>()?.run_fallible(&spec).await },
  ))?;

  graph.register(
    RuleDef::new("process.run", |ctx: Context, spec: ProcessSpec| async move {
      let outcome = ctx.get::<ProcessSpec, ProcessOutcome>(spec.clone()).await?;
      let runner = ctx.option::<ProcessRunner>()?;
      Ok(ProcessResult(runner.check(&spec, outcome.as_ref().clone())?))
    })
    .gets::<ProcessSpec, ProcessOutcome>(),
  )?;

  Ok(())
}
