//! Directory sources and sinks working over entry streams.

use std::fs::{self, File};
use std::io;
use std::path::PathBuf;

use tracing::debug;
use walkdir::WalkDir;

use crate::action::{ActionInput, ActionOutput};
use crate::builtin::attrs::{self, Preserve};
use crate::builtin::file::unchanged_since;
use crate::entry::{DirEntry, EntryKind, EntryStream};
use crate::error::{Error, Result};
use crate::params::Params;
use crate::registry::{ActionRegistry, InputKind, OutputKind, Registration};

/// Lazily walks `root`, yielding entries relative to it. Entry types
/// the backup cannot represent (sockets, fifos, devices) are skipped.
fn walk(root: PathBuf, follow_symlinks: bool) -> EntryStream {
    let iter = WalkDir::new(root.clone())
        .min_depth(1)
        .follow_links(follow_symlinks)
        .into_iter()
        .filter_map(move |item| match item {
            Err(err) => Some(Err(Error::Io(err.into()))),
            Ok(dirent) => match DirEntry::from_path(dirent.path(), Some(&root)) {
                Ok(entry) => Some(Ok(entry)),
                Err(Error::UnsupportedEntryType { path }) => {
                    debug!(path = %path.display(), "skipping unsupported entry");
                    None
                }
                Err(err) => Some(Err(err)),
            },
        });
    Box::new(iter)
}

/// Writes entries under a destination root, optionally cloning
/// unchanged files from the previous backup instead of copying.
struct DirWriter {
    base: PathBuf,
    preserve: Preserve,
    prev: Option<PathBuf>,
    try_reflink: bool,
    force_copy: bool,
}

impl DirWriter {
    fn new(base: PathBuf, params: &Params) -> Result<DirWriter> {
        Ok(DirWriter {
            base,
            preserve: Preserve::from_params(params)?,
            prev: None,
            try_reflink: params.bool_or("reflink", false)?,
            force_copy: params.bool_or("force_copy", false)?,
        })
    }

    fn incremental_from(mut self, prev: Option<PathBuf>) -> DirWriter {
        self.prev = prev;
        self
    }

    fn write_all(&self, entries: EntryStream) -> Result<()> {
        for entry in entries {
            self.write(entry?)?;
        }
        Ok(())
    }

    fn write(&self, entry: DirEntry) -> Result<()> {
        let dest = self.base.join(&entry.path);
        let is_symlink = matches!(entry.kind, EntryKind::Symlink { .. });
        match entry.kind {
            EntryKind::Directory => match fs::create_dir(&dest) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
                Err(err) => return Err(err.into()),
            },
            EntryKind::Symlink { target } => {
                if dest.symlink_metadata().is_ok() {
                    fs::remove_file(&dest)?;
                }
                std::os::unix::fs::symlink(target, &dest)?;
            }
            EntryKind::File { mut content } => {
                let mut cloned = false;
                if !self.force_copy {
                    if let Some(prev_root) = &self.prev {
                        let prev = prev_root.join(&entry.path);
                        if unchanged_since(&entry.stat, &prev) {
                            match attrs::clone_file(&prev, &dest, self.try_reflink) {
                                Ok(()) => cloned = true,
                                Err(err) => {
                                    debug!(path = %entry.path.display(), %err, "clone failed, copying");
                                }
                            }
                        }
                    }
                }
                if !cloned {
                    let mut file = File::create(&dest)?;
                    io::copy(&mut content, &mut file)?;
                }
            }
        }
        attrs::preserve_stats(&dest, &entry.stat, entry.xattrs.as_ref(), self.preserve, is_symlink)
    }
}

fn action_from_directory(_input: ActionInput, params: &Params) -> Result<ActionOutput> {
    let root = fs::canonicalize(params.path("path")?)?;
    if !root.is_dir() {
        return Err(Error::invalid_param("path", "must be a directory"));
    }
    let follow = params.bool_or("resolve_symlinks", false)?;
    Ok(ActionOutput::Entries(walk(root, follow)))
}

/// Restore: recreate the tree where it was read from.
fn inverse_from_directory(input: ActionInput, params: &Params) -> Result<ActionOutput> {
    let root = params.path("path")?;
    fs::create_dir_all(&root)?;
    DirWriter::new(root, params)?.write_all(input.into_entries()?)?;
    Ok(ActionOutput::Done)
}

fn dir_destination(params: &Params) -> Result<(PathBuf, PathBuf)> {
    let rel = params.path("path")?;
    if rel.is_absolute() {
        return Err(Error::invalid_param(
            "path",
            "must be relative to the backup directory",
        ));
    }
    Ok((params.backup_path()?.join(&rel), rel))
}

fn action_to_directory(input: ActionInput, params: &Params) -> Result<ActionOutput> {
    let (parent, rel) = dir_destination(params)?;
    if params.bool_or("parents", false)? {
        fs::create_dir_all(&parent)?;
    } else {
        match fs::create_dir(&parent) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
            Err(err) => return Err(err.into()),
        }
    }
    let prev = params.prev_backup_path()?.map(|p| p.join(&rel));
    DirWriter::new(parent.clone(), params)?
        .incremental_from(prev)
        .write_all(input.into_entries()?)?;
    Ok(ActionOutput::Path(parent))
}

/// Restore: the written tree becomes the entry stream for the reversed
/// chain.
fn inverse_to_directory(_input: ActionInput, params: &Params) -> Result<ActionOutput> {
    let (parent, _) = dir_destination(params)?;
    let follow = params.bool_or("resolve_symlinks", false)?;
    Ok(ActionOutput::Entries(walk(parent, follow)))
}

fn action_copy_directory(_input: ActionInput, params: &Params) -> Result<ActionOutput> {
    let from = fs::canonicalize(params.path("from")?)?;
    let follow = params.bool_or("resolve_symlinks", false)?;

    let rel = params.path("to")?;
    if rel.is_absolute() {
        return Err(Error::invalid_param(
            "to",
            "must be relative to the backup directory",
        ));
    }
    let parent = params.backup_path()?.join(&rel);
    fs::create_dir_all(&parent)?;
    let prev = params.prev_backup_path()?.map(|p| p.join(&rel));
    DirWriter::new(parent.clone(), params)?
        .incremental_from(prev)
        .write_all(walk(from, follow))?;
    Ok(ActionOutput::Path(parent))
}

/// Restore: copy the backed up tree over the original location.
fn inverse_copy_directory(_input: ActionInput, params: &Params) -> Result<ActionOutput> {
    let from = params.path("from")?;
    let parent = params.backup_path()?.join(params.path("to")?);
    let follow = params.bool_or("resolve_symlinks", false)?;
    fs::create_dir_all(&from)?;
    DirWriter::new(from, params)?.write_all(walk(parent, follow))?;
    Ok(ActionOutput::Done)
}

pub fn register(registry: &mut ActionRegistry) -> Result<()> {
    registry.register(
        Registration::new("from-directory", action_from_directory)
            .inverse(inverse_from_directory)
            .output(OutputKind::Directory),
    )?;
    registry.register(
        Registration::new("to-directory", action_to_directory)
            .inverse(inverse_to_directory)
            .input(InputKind::Directory),
    )?;
    registry.register(
        Registration::new("copy-directory", action_copy_directory).inverse(inverse_copy_directory),
    )
}
