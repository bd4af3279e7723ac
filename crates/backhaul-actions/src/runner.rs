//! The execution driver: runs a task's stage chain forward or in reverse.
//!
//! Each stage's output is normalized into the next stage's input; spawned
//! processes are tracked and disposed when the run ends, whatever the
//! outcome.  A run failure is always reported with the original cause;
//! disposal failures are supplementary unless they are the only failure.

use std::path::PathBuf;

use crate::action::{Action, ActionInput, ActionOutput};
use crate::chain::{self, Stage};
use crate::dispose::{self, PendingProcess, StderrCapture};
use crate::error::{Error, Result};
use crate::registry::ActionRegistry;
use crate::stream::ByteStream;

#[derive(Clone, Copy)]
enum Direction {
    Forward,
    Inverse,
}

/// Drives task chains against one registry.
///
/// Holds no state between runs; pending resources belong to a single
/// `run` call stack, so multiple runners (or one runner from multiple
/// threads) may execute tasks concurrently against a shared registry.
pub struct TaskRunner<'a> {
    registry: &'a ActionRegistry,
}

impl<'a> TaskRunner<'a> {
    pub fn new(registry: &'a ActionRegistry) -> Self {
        Self { registry }
    }

    /// Run a task's stages in order.
    ///
    /// Returns the artifact path produced by the terminal stage, or
    /// `None` for an empty task (a no-op, not an error).
    pub fn run(&self, task: &str, stages: &[Stage]) -> Result<Option<PathBuf>> {
        if stages.is_empty() {
            tracing::warn!("task {task} has no actions");
            return Ok(None);
        }

        tracing::info!("starting run of task {task}");
        chain::verify_chain(self.registry, stages)?;

        let exec_order: Vec<&Stage> = stages.iter().collect();
        let mut pending = Vec::new();
        let result = self
            .run_stages(&exec_order, Direction::Forward, &mut pending)
            .and_then(|(output, last)| match output {
                ActionOutput::Path(path) => Ok(path),
                other => {
                    tracing::error!(
                        "final action {last} returned {} instead of its output path",
                        other.kind()
                    );
                    Err(Error::MissingResultPath { action: last })
                }
            });

        self.finish(task, result.map(Some), pending)
    }

    /// Run a task's inverses in reverse order, for restores.
    ///
    /// Every stage must have an inverse registered; this is checked before
    /// anything executes.  The terminal stage of the reversed order is not
    /// required to return a path.
    pub fn run_inverse(&self, task: &str, stages: &[Stage]) -> Result<()> {
        if stages.is_empty() {
            tracing::warn!("task {task} has no actions");
            return Ok(());
        }

        tracing::info!("starting inverse run of task {task}");
        chain::verify_chain(self.registry, stages)?;
        chain::verify_inverses(self.registry, stages)?;

        let exec_order: Vec<&Stage> = stages.iter().rev().collect();
        let mut pending = Vec::new();
        let result = self
            .run_stages(&exec_order, Direction::Inverse, &mut pending)
            .map(|(output, last)| {
                match output {
                    ActionOutput::Done | ActionOutput::Path(_) => {}
                    ActionOutput::Process(mut child) => {
                        // Nothing will read this process's stdout; close it
                        // and make sure the process still gets waited.
                        drop(child.stdout.take());
                        let stderr = child
                            .stderr
                            .take()
                            .map(|s| StderrCapture::spawn(&last, s));
                        pending.push(PendingProcess {
                            action: last.clone(),
                            child,
                            stderr,
                        });
                    }
                    other => {
                        tracing::debug!(
                            "discarding {} output of final inverse {last}",
                            other.kind()
                        );
                    }
                }
            });

        self.finish(task, result, pending).map(|_| ())
    }

    /// Execute all but the last stage, chaining outputs to inputs, then
    /// invoke the last stage and return its raw output.
    fn run_stages(
        &self,
        stages: &[&Stage],
        direction: Direction,
        pending: &mut Vec<PendingProcess>,
    ) -> Result<(ActionOutput, String)> {
        let (last, init) = stages
            .split_last()
            .ok_or_else(|| Error::incompatible("cannot run an empty stage list"))?;

        let mut prev = ActionInput::None;
        for stage in init {
            let action = self.action_for(direction, &stage.action)?;
            tracing::info!("running {} {}", direction.noun(), stage.action);
            let output = action.run(
                std::mem::replace(&mut prev, ActionInput::None),
                &stage.params,
            )?;
            prev = normalize_output(output, &stage.action, pending)?;
        }

        let action = self.action_for(direction, &last.action)?;
        tracing::info!(
            "running final {} {} and waiting for the whole pipeline to end",
            direction.noun(),
            last.action
        );
        let output = action.run(prev, &last.params)?;
        Ok((output, last.action.clone()))
    }

    fn action_for(
        &self,
        direction: Direction,
        name: &str,
    ) -> Result<std::sync::Arc<dyn Action>> {
        match direction {
            Direction::Forward => self.registry.forward(name),
            Direction::Inverse => self
                .registry
                .inverse(name)?
                .ok_or_else(|| Error::MissingInverse {
                    name: name.to_string(),
                }),
        }
    }

    /// Dispose pending resources and combine the outcomes: a task error
    /// always takes priority over disposal failures.
    fn finish<T>(&self, task: &str, result: Result<T>, pending: Vec<PendingProcess>) -> Result<T> {
        let disposal = dispose::dispose(pending, result.is_err());
        tracing::info!("end running task {task}");
        match (result, disposal) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(disposal_err)) => {
                tracing::error!("task {task} failed during cleanup");
                Err(disposal_err)
            }
            (Err(task_err), Ok(())) => {
                tracing::error!("task {task} failed: {task_err}");
                Err(task_err)
            }
            (Err(task_err), Err(disposal_err)) => {
                tracing::error!("task {task} failed: {task_err}");
                tracing::error!("cleanup after failed task {task} also failed: {disposal_err}");
                Err(task_err)
            }
        }
    }
}

impl Direction {
    fn noun(&self) -> &'static str {
        match self {
            Direction::Forward => "action",
            Direction::Inverse => "inverse",
        }
    }
}

/// Turn a stage's output into the next stage's input, registering spawned
/// processes for disposal.  Entry sequences carry no OS handle of their
/// own and are passed through untracked.
fn normalize_output(
    output: ActionOutput,
    action: &str,
    pending: &mut Vec<PendingProcess>,
) -> Result<ActionInput> {
    match output {
        ActionOutput::Process(mut child) => {
            let stdout = child.stdout.take().ok_or(Error::UnsupportedOutput {
                action: action.to_string(),
                kind: "process without piped stdout",
            })?;
            let stderr = child.stderr.take().map(|s| StderrCapture::spawn(action, s));
            tracing::debug!("{action} returned a process");
            pending.push(PendingProcess {
                action: action.to_string(),
                child,
                stderr,
            });
            Ok(ActionInput::Stream(ByteStream::Child(stdout)))
        }
        ActionOutput::Stream(stream) => {
            tracing::debug!("{action} returned a {} stream", stream.kind());
            Ok(ActionInput::Stream(stream))
        }
        ActionOutput::Entries(entries) => {
            tracing::debug!("{action} returned a directory sequence");
            Ok(ActionInput::Entries(entries))
        }
        other => Err(Error::UnsupportedOutput {
            action: action.to_string(),
            kind: other.kind(),
        }),
    }
}
