//! Reversible action pipeline engine.
//!
//! A backup task is a chain of named actions.  Each stage consumes the
//! previous stage's output, either a byte stream or a stream of
//! directory entries, and the final stage writes the result inside the
//! backup directory.  Actions may carry an inverse, and a chain whose
//! stages all have inverses can be replayed backwards to restore the
//! original data.
//!
//! The pieces:
//!
//! - [`ActionRegistry`] maps action names to implementations and their
//!   declared input/output capabilities.
//! - [`verify_chain`] rejects chains whose adjacent stages cannot be
//!   connected, before anything runs.
//! - [`TaskRunner`] executes a chain forwards or backwards, keeps the
//!   spawned stage processes on a ledger and reaps them when the chain
//!   finishes, successfully or not.
//! - [`builtin`] holds the stock actions: files, directories, tar,
//!   compressors, gpg and database dumps.

pub mod action;
pub mod builtin;
pub mod chain;
pub mod dispose;
pub mod entry;
pub mod error;
pub mod params;
pub mod registry;
pub mod runner;
pub mod stream;

pub use action::{Action, ActionInput, ActionOutput};
pub use builtin::register_builtin_actions;
pub use chain::{verify_chain, verify_inverses, Stage};
pub use dispose::{dispose, PendingProcess, StderrCapture};
pub use entry::{DirEntry, EntryKind, EntryStat, EntryStream};
pub use error::{DisposalFailure, Error, Result};
pub use params::Params;
pub use registry::{ActionRegistry, InputKind, OutputKind, Registration};
pub use runner::TaskRunner;
pub use stream::ByteStream;
