//! Disposal of OS resources accumulated during a pipeline run.
//!
//! Every intermediate stage that spawned a subprocess leaves a
//! [`PendingProcess`] behind; disposal waits for all of them at the end of
//! the run, terminating them first when the task failed, and aggregates
//! every non-zero exit into one error so a single failing stage does not
//! hide the others.

use std::io::{BufRead, BufReader};
use std::process::{Child, ChildStderr};
use std::thread::{self, JoinHandle};

use crate::error::{DisposalFailure, Error, Result};

/// Background reader draining a process's stderr.
///
/// Runs on its own thread so a subprocess writing to a full stderr pipe can
/// never deadlock the main data-flow pipe.
pub struct StderrCapture {
    handle: JoinHandle<String>,
}

impl StderrCapture {
    /// Start draining `stderr` line by line.
    pub fn spawn(action: &str, stderr: ChildStderr) -> Self {
        let name = format!("backhaul-stderr-{action}");
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || {
                let mut captured = String::new();
                for line in BufReader::new(stderr).lines() {
                    match line {
                        Ok(line) => {
                            captured.push_str(&line);
                            captured.push('\n');
                        }
                        Err(_) => break,
                    }
                }
                captured
            })
            // Thread spawn only fails under resource exhaustion; fall back
            // to an empty capture rather than losing the whole run.
            .ok();
        match handle {
            Some(handle) => Self { handle },
            None => Self {
                handle: thread::spawn(String::new),
            },
        }
    }

    /// Wait for EOF and return everything captured.
    pub fn join(self) -> String {
        self.handle.join().unwrap_or_default()
    }
}

/// A spawned subprocess awaiting disposal at the end of a run.
pub struct PendingProcess {
    /// Name of the action that spawned the process, for attribution.
    pub action: String,
    pub child: Child,
    pub stderr: Option<StderrCapture>,
}

/// Wait for every pending process, terminating first when the task raised.
///
/// Non-zero exits are recorded with the process's captured stderr and
/// disposal continues with the remaining resources; the collected failures
/// are reported together.  Byte streams need no entry here: their closure
/// is handled by ownership (consumed by the next stage or dropped during
/// unwind), and close failures are not surfaced.
pub fn dispose(pending: Vec<PendingProcess>, task_raised: bool) -> Result<()> {
    let mut failures = Vec::new();

    for mut resource in pending {
        tracing::debug!("waiting for {} to dispose", resource.action);
        if task_raised {
            terminate(&resource.child);
        }
        let captured = resource.stderr.take().map(StderrCapture::join).unwrap_or_default();
        match resource.child.wait() {
            Ok(status) if !status.success() => {
                tracing::warn!(
                    "process of action {} exited with {status}",
                    resource.action
                );
                failures.push(DisposalFailure {
                    action: resource.action,
                    message: captured,
                });
            }
            Ok(_) => {}
            Err(e) => failures.push(DisposalFailure {
                action: resource.action,
                message: format!("wait failed: {e}"),
            }),
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(Error::Disposal { failures })
    }
}

/// Best-effort SIGTERM; the subsequent `wait` reaps the process either way.
fn terminate(child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let pid = Pid::from_raw(child.id() as i32);
    if let Err(e) = kill(pid, Signal::SIGTERM) {
        tracing::debug!("SIGTERM to {pid} failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::process::{Command, Stdio};

    fn spawn_sh(action: &str, script: &str) -> PendingProcess {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let stderr = child.stderr.take().map(|s| StderrCapture::spawn(action, s));
        PendingProcess {
            action: action.to_string(),
            child,
            stderr,
        }
    }

    #[test]
    fn successful_processes_dispose_cleanly() {
        let pending = vec![spawn_sh("a", "exit 0"), spawn_sh("b", "true")];
        dispose(pending, false).unwrap();
    }

    #[test]
    fn every_failing_process_is_reported() {
        let pending = vec![
            spawn_sh("first", "echo first-error >&2; exit 1"),
            spawn_sh("ok", "exit 0"),
            spawn_sh("second", "echo second-error >&2; exit 3"),
        ];
        let err = dispose(pending, false).unwrap_err();
        assert_matches!(&err, Error::Disposal { failures } if failures.len() == 2);
        let text = err.to_string();
        assert!(text.contains("first-error"), "got: {text}");
        assert!(text.contains("second-error"), "got: {text}");
    }

    #[test]
    fn raised_task_terminates_lingering_processes() {
        // Would sleep for a minute if not terminated.
        let pending = vec![spawn_sh("sleeper", "sleep 60")];
        let err = dispose(pending, true).unwrap_err();
        // SIGTERM produces a non-success status with empty stderr.
        assert_matches!(err, Error::Disposal { failures } if failures.len() == 1);
    }
}
