//! The action registry: a catalogue of named, capability-tagged actions.
//!
//! The registry is an explicit object (no process-wide global) so tests
//! and concurrent runners get isolation for free.  It is written during a
//! startup registration phase and only read afterwards.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::action::Action;
use crate::error::{Error, Result};

static ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?i)[a-z_][a-z0-9_-]+$").expect("valid identifier pattern"));

/// Input shape an action expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Stream,
    Directory,
}

impl InputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputKind::Stream => "stream",
            InputKind::Directory => "directory",
        }
    }
}

impl FromStr for InputKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "stream" => Ok(InputKind::Stream),
            "directory" => Ok(InputKind::Directory),
            other => Err(Error::InvalidCapability {
                value: other.to_string(),
            }),
        }
    }
}

/// Output shape an action produces.  Actions without one are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Stream,
    StreamFile,
    StreamProcess,
    StreamPipe,
    Directory,
}

impl OutputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputKind::Stream => "stream",
            OutputKind::StreamFile => "stream:file",
            OutputKind::StreamProcess => "stream:process",
            OutputKind::StreamPipe => "stream:pipe",
            OutputKind::Directory => "directory",
        }
    }

    /// Whether this output satisfies a "stream" input.
    pub fn is_stream(&self) -> bool {
        !matches!(self, OutputKind::Directory)
    }
}

impl FromStr for OutputKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "stream" => Ok(OutputKind::Stream),
            "stream:file" => Ok(OutputKind::StreamFile),
            "stream:process" => Ok(OutputKind::StreamProcess),
            "stream:pipe" => Ok(OutputKind::StreamPipe),
            "directory" => Ok(OutputKind::Directory),
            other => Err(Error::InvalidCapability {
                value: other.to_string(),
            }),
        }
    }
}

/// A registration request for one action.
pub struct Registration {
    name: String,
    forward: Arc<dyn Action>,
    inverse: Option<Arc<dyn Action>>,
    input: Option<InputKind>,
    output: Option<OutputKind>,
}

impl Registration {
    pub fn new(name: impl Into<String>, forward: impl Action + 'static) -> Self {
        Self {
            name: name.into(),
            forward: Arc::new(forward),
            inverse: None,
            input: None,
            output: None,
        }
    }

    pub fn inverse(mut self, inverse: impl Action + 'static) -> Self {
        self.inverse = Some(Arc::new(inverse));
        self
    }

    pub fn input(mut self, input: InputKind) -> Self {
        self.input = Some(input);
        self
    }

    pub fn output(mut self, output: OutputKind) -> Self {
        self.output = Some(output);
        self
    }
}

struct RegisteredAction {
    forward: Arc<dyn Action>,
    inverse: Option<Arc<dyn Action>>,
    input: Option<InputKind>,
    output: Option<OutputKind>,
}

/// Catalogue of registered actions, queried on every pipeline run.
#[derive(Default)]
pub struct ActionRegistry {
    actions: HashMap<String, RegisteredAction>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action under its name.
    ///
    /// Fails when the name is taken or does not match the identifier
    /// pattern `[a-z_][a-z0-9_-]+` (case-insensitive).
    pub fn register(&mut self, registration: Registration) -> Result<()> {
        let Registration {
            name,
            forward,
            inverse,
            input,
            output,
        } = registration;

        if self.actions.contains_key(&name) {
            return Err(Error::DuplicateAction { name });
        }
        if !ID_PATTERN.is_match(&name) {
            return Err(Error::InvalidIdentifier { name });
        }

        tracing::debug!("registering action {name}");
        self.actions.insert(
            name,
            RegisteredAction {
                forward,
                inverse,
                input,
                output,
            },
        );
        Ok(())
    }

    /// Attach an inverse to an already registered action.
    ///
    /// Supports defining restore logic in a different module than the
    /// forward registration.  Fails when the action is unknown or already
    /// has an inverse.
    pub fn register_inverse(
        &mut self,
        name: &str,
        inverse: impl Action + 'static,
    ) -> Result<()> {
        let entry = self
            .actions
            .get_mut(name)
            .ok_or_else(|| Error::unknown_action(name))?;
        if entry.inverse.is_some() {
            return Err(Error::InverseAlreadyRegistered {
                name: name.to_string(),
            });
        }
        entry.inverse = Some(Arc::new(inverse));
        Ok(())
    }

    /// Look up the forward action.
    pub fn forward(&self, name: &str) -> Result<Arc<dyn Action>> {
        self.entry(name).map(|e| Arc::clone(&e.forward))
    }

    /// Look up the inverse action; `Ok(None)` when none was registered.
    pub fn inverse(&self, name: &str) -> Result<Option<Arc<dyn Action>>> {
        self.entry(name).map(|e| e.inverse.as_ref().map(Arc::clone))
    }

    /// Declared input capability.
    pub fn input_kind(&self, name: &str) -> Result<Option<InputKind>> {
        self.entry(name).map(|e| e.input)
    }

    /// Declared output capability.
    pub fn output_kind(&self, name: &str) -> Result<Option<OutputKind>> {
        self.entry(name).map(|e| e.output)
    }

    /// Whether the action produces no output (valid only as last stage).
    pub fn is_terminal(&self, name: &str) -> Result<bool> {
        self.entry(name).map(|e| e.output.is_none())
    }

    /// Check whether `a`'s output can feed `b`'s input.
    ///
    /// Returns an explanatory message on incompatibility, `None` when the
    /// pair is compatible.
    pub fn check_adjacent(&self, a: &str, b: &str) -> Result<Option<String>> {
        let first = self.entry(a)?;
        let second = self.entry(b)?;

        let message = match first.output {
            None => Some(format!("{a} cannot be connected to {b}: {a} has no output")),
            Some(output) if output.is_stream() => match second.input {
                Some(InputKind::Stream) => None,
                _ => Some(format!(
                    "{a} cannot be connected to {b}: {b} expected input is not a stream"
                )),
            },
            Some(_) => match second.input {
                Some(InputKind::Directory) => None,
                _ => Some(format!(
                    "{a} cannot be connected to {b}: {b} expected input is not a directory"
                )),
            },
        };
        Ok(message)
    }

    /// Number of registered actions.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Registered action names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Describe one action for listings: (input, output, has inverse).
    pub fn describe(&self, name: &str) -> Result<(Option<InputKind>, Option<OutputKind>, bool)> {
        self.entry(name)
            .map(|e| (e.input, e.output, e.inverse.is_some()))
    }

    /// Remove every registration.  Testing/teardown hook.
    pub fn clear(&mut self) {
        self.actions.clear();
    }

    fn entry(&self, name: &str) -> Result<&RegisteredAction> {
        self.actions
            .get(name)
            .ok_or_else(|| Error::unknown_action(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionInput, ActionOutput};
    use crate::params::Params;
    use assert_matches::assert_matches;

    fn noop(_: ActionInput, _: &Params) -> crate::error::Result<ActionOutput> {
        Ok(ActionOutput::Done)
    }

    #[test]
    fn register_and_lookup_roundtrip() {
        let mut registry = ActionRegistry::new();
        registry
            .register(Registration::new("from-file", noop).output(OutputKind::StreamFile))
            .unwrap();

        assert!(registry.forward("from-file").is_ok());
        assert_matches!(registry.inverse("from-file"), Ok(None));
        assert!(!registry.is_terminal("from-file").unwrap());
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut registry = ActionRegistry::new();
        registry.register(Registration::new("tar", noop)).unwrap();
        assert_matches!(
            registry.register(Registration::new("tar", noop)),
            Err(Error::DuplicateAction { name }) if name == "tar"
        );
    }

    #[test]
    fn invalid_identifiers_are_rejected() {
        let mut registry = ActionRegistry::new();
        for bad in ["x", "0start", "has space", "ab!", ""] {
            assert_matches!(
                registry.register(Registration::new(bad, noop)),
                Err(Error::InvalidIdentifier { .. }),
                "identifier {bad:?} should be invalid"
            );
        }
        // Two characters, underscore lead and uppercase are all fine.
        for good in ["ab", "_x", "Tar-GZ", "a_b-c2"] {
            registry.register(Registration::new(good, noop)).unwrap();
        }
    }

    #[test]
    fn inverse_registration_roundtrip() {
        let mut registry = ActionRegistry::new();
        registry.register(Registration::new("tar", noop)).unwrap();

        registry.register_inverse("tar", noop).unwrap();
        assert_matches!(registry.inverse("tar"), Ok(Some(_)));

        assert_matches!(
            registry.register_inverse("tar", noop),
            Err(Error::InverseAlreadyRegistered { name }) if name == "tar"
        );
        assert_matches!(
            registry.register_inverse("untar", noop),
            Err(Error::UnknownAction { .. })
        );
    }

    #[test]
    fn unknown_lookups_fail() {
        let registry = ActionRegistry::new();
        assert_matches!(registry.forward("nope"), Err(Error::UnknownAction { .. }));
        assert_matches!(registry.inverse("nope"), Err(Error::UnknownAction { .. }));
        assert_matches!(registry.is_terminal("nope"), Err(Error::UnknownAction { .. }));
        assert_matches!(
            registry.check_adjacent("nope", "nada"),
            Err(Error::UnknownAction { .. })
        );
    }

    #[test]
    fn adjacency_matrix() {
        let mut registry = ActionRegistry::new();
        registry
            .register(Registration::new("src-stream", noop).output(OutputKind::Stream))
            .unwrap();
        registry
            .register(Registration::new("src-proc", noop).output(OutputKind::StreamProcess))
            .unwrap();
        registry
            .register(Registration::new("src-dir", noop).output(OutputKind::Directory))
            .unwrap();
        registry
            .register(Registration::new("sink-stream", noop).input(InputKind::Stream))
            .unwrap();
        registry
            .register(Registration::new("sink-dir", noop).input(InputKind::Directory))
            .unwrap();

        // stream-prefixed outputs satisfy a stream input
        assert_eq!(registry.check_adjacent("src-stream", "sink-stream").unwrap(), None);
        assert_eq!(registry.check_adjacent("src-proc", "sink-stream").unwrap(), None);
        // directory output satisfies a directory input
        assert_eq!(registry.check_adjacent("src-dir", "sink-dir").unwrap(), None);
        // cross pairs are incompatible with an explanatory message
        let msg = registry.check_adjacent("src-dir", "sink-stream").unwrap().unwrap();
        assert!(msg.contains("not a stream"), "got: {msg}");
        let msg = registry.check_adjacent("src-stream", "sink-dir").unwrap().unwrap();
        assert!(msg.contains("not a directory"), "got: {msg}");
        // a terminal action cannot feed anything
        let msg = registry.check_adjacent("sink-stream", "sink-dir").unwrap().unwrap();
        assert!(msg.contains("has no output"), "got: {msg}");
    }

    #[test]
    fn capability_strings_parse() {
        assert_eq!("stream".parse::<InputKind>().unwrap(), InputKind::Stream);
        assert_eq!(
            "stream:pipe".parse::<OutputKind>().unwrap(),
            OutputKind::StreamPipe
        );
        assert_matches!(
            "streams".parse::<OutputKind>(),
            Err(Error::InvalidCapability { value }) if value == "streams"
        );
        assert_matches!("none".parse::<InputKind>(), Err(Error::InvalidCapability { .. }));
    }

    #[test]
    fn clear_empties_the_registry() {
        let mut registry = ActionRegistry::new();
        registry.register(Registration::new("tar", noop)).unwrap();
        assert_eq!(registry.len(), 1);
        registry.clear();
        assert!(registry.is_empty());
    }
}
