//! The builtin action set.

use crate::error::Result;
use crate::registry::ActionRegistry;

pub mod archive;
pub mod attrs;
pub mod command;
pub mod compress;
pub mod database;
pub mod directory;
pub mod encrypt;
pub mod file;

/// Registers every builtin action into `registry`.
pub fn register_builtin_actions(registry: &mut ActionRegistry) -> Result<()> {
    command::register(registry)?;
    compress::register(registry)?;
    encrypt::register(registry)?;
    database::register(registry)?;
    file::register(registry)?;
    directory::register(registry)?;
    archive::register(registry)?;
    Ok(())
}
