//! Structural validation of a task's stage chain, run before anything
//! executes so an invalid chain has zero side effects.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::params::Params;
use crate::registry::ActionRegistry;

/// One (action identifier, parameter bag) pair of a task definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub action: String,
    pub params: Params,
}

impl Stage {
    pub fn new(action: impl Into<String>, params: Params) -> Self {
        Self {
            action: action.into(),
            params,
        }
    }
}

/// Verify that every adjacent pair of stages is compatible and that the
/// final stage is terminal.
///
/// An empty chain passes trivially.  The first incompatibility aborts
/// validation with its explanatory message.
pub fn verify_chain(registry: &ActionRegistry, stages: &[Stage]) -> Result<()> {
    let Some(first) = stages.first() else {
        return Ok(());
    };

    let mut prev = first.action.as_str();
    for stage in &stages[1..] {
        if let Some(message) = registry.check_adjacent(prev, &stage.action)? {
            tracing::warn!("{message}");
            return Err(Error::Incompatible { message });
        }
        prev = &stage.action;
    }

    if !registry.is_terminal(prev)? {
        return Err(Error::NonTerminalFinalAction {
            name: prev.to_string(),
        });
    }
    Ok(())
}

/// Verify that every stage has a registered inverse, failing fast with the
/// first one that lacks it.
pub fn verify_inverses(registry: &ActionRegistry, stages: &[Stage]) -> Result<()> {
    for stage in stages {
        if registry.inverse(&stage.action)?.is_none() {
            return Err(Error::MissingInverse {
                name: stage.action.clone(),
            });
        }
    }
    Ok(())
}
