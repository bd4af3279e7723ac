//! Error types for backhaul-actions.

use std::path::PathBuf;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// One resource that failed to clean up at the end of a pipeline run.
#[derive(Debug, Clone)]
pub struct DisposalFailure {
    /// Name of the action that produced the resource.
    pub action: String,
    /// Captured stderr (or wait error) of the failing process.
    pub message: String,
}

fn format_failures(failures: &[DisposalFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}:\n{}", f.action, f.message))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Errors that can occur while registering, validating or running action
/// pipelines.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An action with this name is already registered.
    #[error("action {name} already exists")]
    DuplicateAction { name: String },

    /// The action name does not match the identifier pattern.
    #[error("{name} is not a valid action identifier")]
    InvalidIdentifier { name: String },

    /// An input/output capability string is not one of the recognized values.
    #[error("invalid capability {value}")]
    InvalidCapability { value: String },

    /// No action is registered under this name.
    #[error("unknown action {name}")]
    UnknownAction { name: String },

    /// An inverse is already registered for this action.
    #[error("action {name} already has an inverse registered")]
    InverseAlreadyRegistered { name: String },

    /// Two adjacent stages have incompatible shapes.
    #[error("{message}")]
    Incompatible { message: String },

    /// The last stage of a chain still produces output.
    #[error("the final action {name} has output and should not have")]
    NonTerminalFinalAction { name: String },

    /// A stage has no inverse registered but an inverse run was requested.
    #[error("the action {name} has no inverse")]
    MissingInverse { name: String },

    /// A non-terminal stage returned a shape the driver cannot chain.
    #[error("unsupported output {kind} from action {action}")]
    UnsupportedOutput { action: String, kind: &'static str },

    /// The terminal stage did not return the path of its artifact.
    #[error("action {action} did not return the path of its output")]
    MissingResultPath { action: String },

    /// A filesystem object is neither a file, a directory nor a symlink.
    #[error("unsupported entry type at {}", path.display())]
    UnsupportedEntryType { path: PathBuf },

    /// A required external tool is not available.
    #[error("tool not found: {tool}")]
    ToolNotFound { tool: String },

    /// A required parameter is missing from the bag.
    #[error("missing parameter {key}")]
    MissingParam { key: String },

    /// A parameter has the wrong shape or an invalid value.
    #[error("invalid parameter {key}: {message}")]
    InvalidParam { key: String, message: String },

    /// One or more pipeline resources failed to clean up.
    #[error("cleanup failed for {} pipeline stage(s):\n\n{}", .failures.len(), format_failures(.failures))]
    Disposal { failures: Vec<DisposalFailure> },

    /// An I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an unknown action error.
    pub fn unknown_action(name: impl Into<String>) -> Self {
        Self::UnknownAction { name: name.into() }
    }

    /// Create an incompatibility error.
    pub fn incompatible(message: impl Into<String>) -> Self {
        Self::Incompatible {
            message: message.into(),
        }
    }

    /// Create a missing parameter error.
    pub fn missing_param(key: impl Into<String>) -> Self {
        Self::MissingParam { key: key.into() }
    }

    /// Create an invalid parameter error.
    pub fn invalid_param(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParam {
            key: key.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disposal_display_lists_every_failure() {
        let err = Error::Disposal {
            failures: vec![
                DisposalFailure {
                    action: "compress-xz".into(),
                    message: "xz: out of memory".into(),
                },
                DisposalFailure {
                    action: "encrypt-gpg".into(),
                    message: "gpg: bad passphrase".into(),
                },
            ],
        };
        let text = err.to_string();
        assert!(text.contains("compress-xz"));
        assert!(text.contains("xz: out of memory"));
        assert!(text.contains("encrypt-gpg"));
        assert!(text.contains("gpg: bad passphrase"));
    }

    #[test]
    fn incompatible_uses_message_verbatim() {
        let err = Error::incompatible("a cannot be connected to b");
        assert_eq!(err.to_string(), "a cannot be connected to b");
    }
}
