//! Test utilities for cairn-lib.
//!
//! Helpers for tests that run shell commands through the process runner.

use std::collections::BTreeMap;

use crate::process::ProcessSpec;
use crate::store::EMPTY_DIGEST;

/// A process spec that runs `script` with `/bin/sh -c` and no inputs.
pub fn sh_spec(script: &str) -> ProcessSpec {
  ProcessSpec::new(vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()], EMPTY_DIGEST)
}

/// A minimal PATH that finds coreutils on common Unix layouts.
pub fn system_path_env() -> BTreeMap<String, String> {
  BTreeMap::from([("PATH".to_string(), "/usr/local/bin:/usr/bin:/bin".to_string())])
}

/// Whether a process is still running (zombies count as gone).
#[cfg(target_os = "linux")]
pub fn process_alive(pid: u32) -> bool {
  match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
    Ok(stat) => {
      // The state field follows the parenthesized command name.
      let state = stat.rsplit_once(')').and_then(|(_, rest)| rest.split_whitespace().next());
      !matches!(state, Some("Z") | Some("X") | None)
    }
    Err(_) => false,
  }
}
