//! Packing entry streams into tar archives and unpacking them back.

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;

use tar::{Builder, EntryType, Header};
use tracing::debug;

use crate::action::{ActionInput, ActionOutput};
use crate::entry::{DirEntry, EntryKind, EntryStat};
use crate::error::{Error, Result};
use crate::params::Params;
use crate::registry::{ActionRegistry, InputKind, OutputKind, Registration};
use crate::stream::spawn_pipe_writer;

fn entry_header(stat: &EntryStat, entry_type: EntryType, size: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mode(stat.permissions());
    header.set_uid(stat.uid as u64);
    header.set_gid(stat.gid as u64);
    header.set_mtime(stat.mtime.max(0) as u64);
    header.set_size(size);
    header
}

fn append_entry(builder: &mut Builder<impl Write>, mut entry: DirEntry) -> Result<()> {
    match entry.kind {
        EntryKind::File { ref mut content } => {
            let mut header = entry_header(&entry.stat, EntryType::Regular, entry.stat.size);
            builder.append_data(&mut header, &entry.path, content)?;
        }
        EntryKind::Directory => {
            let mut header = entry_header(&entry.stat, EntryType::Directory, 0);
            builder.append_data(&mut header, &entry.path, io::empty())?;
        }
        EntryKind::Symlink { ref target } => {
            let mut header = entry_header(&entry.stat, EntryType::Symlink, 0);
            builder.append_link(&mut header, &entry.path, target)?;
        }
    }
    Ok(())
}

fn action_tar(input: ActionInput, _params: &Params) -> Result<ActionOutput> {
    let entries = input.into_entries()?;
    let stream = spawn_pipe_writer("tar", move |writer| {
        let mut builder = Builder::new(writer);
        for entry in entries {
            append_entry(&mut builder, entry?)?;
        }
        builder.into_inner()?.flush()?;
        Ok(())
    })?;
    Ok(ActionOutput::Stream(stream))
}

fn stat_from_header(header: &Header, type_bits: u32) -> Result<EntryStat> {
    let mtime = header.mtime()? as i64;
    Ok(EntryStat {
        mode: header.mode()? | type_bits,
        uid: header.uid()? as u32,
        gid: header.gid()? as u32,
        size: header.size()?,
        atime: mtime,
        atime_nsec: 0,
        mtime,
        mtime_nsec: 0,
        ctime: mtime,
        ctime_nsec: 0,
    })
}

/// Unpacks one archive member. File content goes through a pipe whose
/// reader lands in the emitted entry; the caller must drain it before
/// asking for the next entry.
fn unpack_member(
    member: &mut tar::Entry<impl Read>,
    sender: &mpsc::SyncSender<Result<DirEntry>>,
) -> Result<()> {
    let path: PathBuf = member.path()?.into_owned();
    match member.header().entry_type() {
        EntryType::Regular | EntryType::Continuous | EntryType::GNUSparse => {
            let stat = stat_from_header(member.header(), libc::S_IFREG)?;
            let (reader, mut writer) = os_pipe::pipe()?;
            let entry = DirEntry {
                path,
                stat,
                xattrs: None,
                kind: EntryKind::File {
                    content: Box::new(reader),
                },
            };
            if sender.send(Ok(entry)).is_err() {
                return Ok(());
            }
            io::copy(member, &mut writer)?;
        }
        EntryType::Directory => {
            let stat = stat_from_header(member.header(), libc::S_IFDIR)?;
            let entry = DirEntry {
                path,
                stat,
                xattrs: None,
                kind: EntryKind::Directory,
            };
            let _ = sender.send(Ok(entry));
        }
        EntryType::Symlink => {
            let stat = stat_from_header(member.header(), libc::S_IFLNK)?;
            let target = member
                .link_name()?
                .ok_or_else(|| Error::invalid_param("archive", "symlink member without target"))?
                .into_owned();
            let entry = DirEntry {
                path,
                stat,
                xattrs: None,
                kind: EntryKind::Symlink { target },
            };
            let _ = sender.send(Ok(entry));
        }
        other => {
            debug!(?other, path = %path.display(), "skipping unsupported archive member");
        }
    }
    Ok(())
}

/// Restore: read the archive lazily, one member at a time. The
/// rendezvous channel keeps the reader thread in lockstep with the
/// consumer.
fn inverse_tar(input: ActionInput, _params: &Params) -> Result<ActionOutput> {
    let stream = input.into_stream()?;
    let (sender, receiver) = mpsc::sync_channel::<Result<DirEntry>>(0);
    thread::Builder::new()
        .name("backhaul-untar".into())
        .spawn(move || {
            let mut archive = tar::Archive::new(stream);
            let members = match archive.entries() {
                Ok(members) => members,
                Err(err) => {
                    let _ = sender.send(Err(err.into()));
                    return;
                }
            };
            for member in members {
                let result = member
                    .map_err(Error::from)
                    .and_then(|mut member| unpack_member(&mut member, &sender));
                if let Err(err) = result {
                    let _ = sender.send(Err(err));
                    return;
                }
            }
        })?;
    Ok(ActionOutput::Entries(Box::new(receiver.into_iter())))
}

pub fn register(registry: &mut ActionRegistry) -> Result<()> {
    registry.register(
        Registration::new("tar", action_tar)
            .inverse(inverse_tar)
            .input(InputKind::Directory)
            .output(OutputKind::StreamPipe),
    )
}
