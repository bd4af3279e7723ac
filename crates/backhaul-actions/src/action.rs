//! The [`Action`] trait and the tagged input/output unions that connect
//! pipeline stages.
//!
//! An action receives the previous stage's output as its input together
//! with a parameter bag, and returns one of the shapes the driver knows
//! how to chain: a spawned process, an fd-backed byte stream, a lazy
//! directory-entry sequence, or (for terminal actions) a result path.

use std::fmt;
use std::path::PathBuf;
use std::process::Child;

use crate::entry::EntryStream;
use crate::error::{Error, Result};
use crate::params::Params;
use crate::stream::ByteStream;

/// Input handed to an action: the normalized output of the previous stage.
pub enum ActionInput {
    /// No previous stage (first stage of a chain).
    None,
    /// Byte stream from the previous stage.
    Stream(ByteStream),
    /// Lazy directory-entry sequence from the previous stage.
    Entries(EntryStream),
}

impl ActionInput {
    /// Take the input as a byte stream, failing otherwise.
    pub fn into_stream(self) -> Result<ByteStream> {
        match self {
            ActionInput::Stream(s) => Ok(s),
            other => Err(Error::incompatible(format!(
                "expected a stream input, got {}",
                other.kind()
            ))),
        }
    }

    /// Take the input as a byte stream if one is present.
    pub fn into_stream_opt(self) -> Result<Option<ByteStream>> {
        match self {
            ActionInput::None => Ok(None),
            ActionInput::Stream(s) => Ok(Some(s)),
            other => Err(Error::incompatible(format!(
                "expected a stream input or none, got {}",
                other.kind()
            ))),
        }
    }

    /// Take the input as an entry sequence, failing otherwise.
    pub fn into_entries(self) -> Result<EntryStream> {
        match self {
            ActionInput::Entries(e) => Ok(e),
            other => Err(Error::incompatible(format!(
                "expected a directory input, got {}",
                other.kind()
            ))),
        }
    }

    /// Short tag used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            ActionInput::None => "none",
            ActionInput::Stream(_) => "stream",
            ActionInput::Entries(_) => "directory",
        }
    }
}

/// Output returned by an action.
pub enum ActionOutput {
    /// A spawned subprocess; its stdout feeds the next stage.
    Process(Child),
    /// An fd-backed byte stream.
    Stream(ByteStream),
    /// A lazy directory-entry sequence.
    Entries(EntryStream),
    /// Terminal result: the filesystem path of the produced artifact.
    Path(PathBuf),
    /// Terminal result without an artifact path (inverse runs).
    Done,
}

impl ActionOutput {
    /// Short tag used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            ActionOutput::Process(_) => "process",
            ActionOutput::Stream(_) => "stream",
            ActionOutput::Entries(_) => "directory",
            ActionOutput::Path(_) => "path",
            ActionOutput::Done => "none",
        }
    }
}

impl fmt::Debug for ActionOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ActionOutput").field(&self.kind()).finish()
    }
}

/// One pipeline stage implementation.
///
/// Plain functions and closures with the matching signature implement this
/// automatically, so builtins are written as free functions.
pub trait Action: Send + Sync {
    fn run(&self, input: ActionInput, params: &Params) -> Result<ActionOutput>;
}

impl fmt::Debug for dyn Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Action")
    }
}

impl<F> Action for F
where
    F: Fn(ActionInput, &Params) -> Result<ActionOutput> + Send + Sync,
{
    fn run(&self, input: ActionInput, params: &Params) -> Result<ActionOutput> {
        self(input, params)
    }
}
