//! Single-file sources and sinks.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::action::{ActionInput, ActionOutput};
use crate::builtin::attrs::{self, Preserve};
use crate::entry::{read_xattrs, EntryStat};
use crate::error::{Error, Result};
use crate::params::Params;
use crate::registry::{ActionRegistry, InputKind, OutputKind, Registration};
use crate::stream::ByteStream;

/// Resolves the destination under the backup directory. The path must
/// be relative and its parent must exist unless `mkdir_parents` asks
/// for it to be created.
pub(crate) fn destination(params: &Params) -> Result<PathBuf> {
    let rel = match params.opt_path("path")? {
        Some(path) => path,
        None => params
            .opt_path("to")?
            .ok_or_else(|| Error::missing_param("to"))?,
    };
    if rel.is_absolute() {
        return Err(Error::invalid_param(
            "to",
            "must be relative to the backup directory",
        ));
    }
    let full = params.backup_path()?.join(&rel);
    let parent = full.parent().map(Path::to_path_buf).unwrap_or_default();
    if params.bool_or("mkdir_parents", false)? {
        fs::create_dir_all(&parent)?;
    } else if !parent.is_dir() {
        return Err(Error::invalid_param(
            "to",
            format!("parent directory {} does not exist", parent.display()),
        ));
    }
    Ok(full)
}

/// Whether the source still has the mtime recorded in the previous
/// backup of the same file.
pub(crate) fn unchanged_since(stat: &EntryStat, prev: &Path) -> bool {
    match fs::metadata(prev) {
        Ok(meta) => EntryStat::from_metadata(&meta).mtime_ns() == stat.mtime_ns(),
        Err(_) => false,
    }
}

fn write_stream(mut stream: impl io::Read, path: &Path) -> Result<()> {
    let mut file = File::create(path)?;
    io::copy(&mut stream, &mut file)?;
    Ok(())
}

fn action_from_file(_input: ActionInput, params: &Params) -> Result<ActionOutput> {
    let file = File::open(params.path("path")?)?;
    Ok(ActionOutput::Stream(ByteStream::File(file)))
}

/// Restore: write the stream back where the file was read from.
fn inverse_from_file(input: ActionInput, params: &Params) -> Result<ActionOutput> {
    let path = params.path("path")?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    write_stream(input.into_stream()?, &path)?;
    Ok(ActionOutput::Done)
}

fn action_to_file(input: ActionInput, params: &Params) -> Result<ActionOutput> {
    let full = destination(params)?;
    write_stream(input.into_stream()?, &full)?;
    Ok(ActionOutput::Path(full))
}

/// Restore: the written file becomes the stream for the reversed chain.
fn inverse_to_file(_input: ActionInput, params: &Params) -> Result<ActionOutput> {
    let file = File::open(destination(params)?)?;
    Ok(ActionOutput::Stream(ByteStream::File(file)))
}

fn action_copy_file(_input: ActionInput, params: &Params) -> Result<ActionOutput> {
    let from = params.path("from")?;
    let rel = params.path("to")?;
    let dest = destination(params)?;
    let stat = EntryStat::from_metadata(&fs::metadata(&from)?);
    let try_reflink = params.bool_or("reflink", false)?;

    let mut cloned = false;
    if !params.bool_or("force_copy", false)? {
        if let Some(prev_root) = params.prev_backup_path()? {
            let prev = prev_root.join(&rel);
            if unchanged_since(&stat, &prev) {
                match attrs::clone_file(&prev, &dest, try_reflink) {
                    Ok(()) => cloned = true,
                    Err(err) => {
                        debug!(path = %rel.display(), %err, "clone from previous backup failed, copying");
                    }
                }
            }
        }
    }
    if !cloned {
        write_stream(File::open(&from)?, &dest)?;
    }

    attrs::preserve_stats(
        &dest,
        &stat,
        read_xattrs(&from).as_ref(),
        Preserve::from_params(params)?,
        false,
    )?;
    Ok(ActionOutput::Path(dest))
}

/// Restore: copy the backed up file over the original location.
fn inverse_copy_file(_input: ActionInput, params: &Params) -> Result<ActionOutput> {
    let from = params.path("from")?;
    if let Some(parent) = from.parent() {
        fs::create_dir_all(parent)?;
    }
    write_stream(File::open(destination(params)?)?, &from)?;
    Ok(ActionOutput::Done)
}

fn action_clone_file(_input: ActionInput, params: &Params) -> Result<ActionOutput> {
    let from = params.path("from")?;
    let dest = destination(params)?;
    attrs::clone_file(&from, &dest, params.bool_or("reflink", true)?)?;
    attrs::preserve_stats(
        &dest,
        &EntryStat::from_metadata(&fs::metadata(&from)?),
        read_xattrs(&from).as_ref(),
        Preserve::from_params(params)?,
        false,
    )?;
    Ok(ActionOutput::Path(dest))
}

pub fn register(registry: &mut ActionRegistry) -> Result<()> {
    registry.register(
        Registration::new("from-file", action_from_file)
            .inverse(inverse_from_file)
            .output(OutputKind::StreamFile),
    )?;
    registry.register(
        Registration::new("to-file", action_to_file)
            .inverse(inverse_to_file)
            .input(InputKind::Stream),
    )?;
    registry.register(
        Registration::new("copy-file", action_copy_file).inverse(inverse_copy_file),
    )?;
    registry.register(Registration::new("clone-file", action_clone_file))
}
