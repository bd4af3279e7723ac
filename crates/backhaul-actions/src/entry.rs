//! The directory-entry model flowing between "directory"-shaped stages.
//!
//! A [`DirEntry`] describes one filesystem object (file, directory or
//! symlink) with POSIX metadata and, for files, an open content reader.
//! Entries are produced lazily while traversing a tree or decoding an
//! archive, and consumed exactly once; a consumer must drain or drop a
//! file's content before asking for the next entry when the producer
//! shares one underlying handle.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Lazy, finite, non-restartable sequence of entries.
pub type EntryStream = Box<dyn Iterator<Item = Result<DirEntry>> + Send>;

/// Open reader over one file entry's bytes.
pub type EntryContent = Box<dyn Read + Send>;

/// Extended attributes of an entry, when readable.
pub type Xattrs = BTreeMap<String, Vec<u8>>;

/// POSIX stat-like metadata carried by every entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryStat {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub atime: i64,
    pub atime_nsec: i64,
    pub mtime: i64,
    pub mtime_nsec: i64,
    pub ctime: i64,
    pub ctime_nsec: i64,
}

impl EntryStat {
    /// Capture metadata from an `lstat` result.
    pub fn from_metadata(meta: &std::fs::Metadata) -> Self {
        Self {
            mode: meta.mode(),
            uid: meta.uid(),
            gid: meta.gid(),
            size: meta.size(),
            atime: meta.atime(),
            atime_nsec: meta.atime_nsec(),
            mtime: meta.mtime(),
            mtime_nsec: meta.mtime_nsec(),
            ctime: meta.ctime(),
            ctime_nsec: meta.ctime_nsec(),
        }
    }

    /// Permission bits only (no file type bits).
    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }

    /// Modification time in nanoseconds since the epoch.
    pub fn mtime_ns(&self) -> i128 {
        i128::from(self.mtime) * 1_000_000_000 + i128::from(self.mtime_nsec)
    }
}

/// The tagged payload of an entry.
pub enum EntryKind {
    /// Regular file with an open content reader.
    File { content: EntryContent },
    /// Directory, no payload.
    Directory,
    /// Symbolic link and its target.
    Symlink { target: PathBuf },
}

impl EntryKind {
    /// Short tag used in logs and the manifest.
    pub fn label(&self) -> &'static str {
        match self {
            EntryKind::File { .. } => "file",
            EntryKind::Directory => "dir",
            EntryKind::Symlink { .. } => "symlink",
        }
    }
}

impl std::fmt::Debug for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryKind::File { .. } => f.write_str("File"),
            EntryKind::Directory => f.write_str("Directory"),
            EntryKind::Symlink { target } => f.debug_struct("Symlink").field("target", target).finish(),
        }
    }
}

/// One filesystem object flowing through a directory-shaped pipeline stage.
#[derive(Debug)]
pub struct DirEntry {
    /// Path relative to the traversal root, slash-separated.
    pub path: PathBuf,
    pub stat: EntryStat,
    pub xattrs: Option<Xattrs>,
    pub kind: EntryKind,
}

impl DirEntry {
    /// Classify a real filesystem path into an entry.
    ///
    /// The entry path is made relative to `root` when given.  Files get a
    /// read-only content stream; symlink targets are read eagerly.  Any
    /// other object type (socket, fifo, device) is rejected.
    pub fn from_path(path: &Path, root: Option<&Path>) -> Result<Self> {
        let meta = path.symlink_metadata()?;
        let stat = EntryStat::from_metadata(&meta);
        let rel = match root {
            Some(root) => path.strip_prefix(root).unwrap_or(path).to_path_buf(),
            None => path.to_path_buf(),
        };
        let xattrs = read_xattrs(path);

        let file_type = meta.file_type();
        let kind = if file_type.is_dir() {
            EntryKind::Directory
        } else if file_type.is_symlink() {
            EntryKind::Symlink {
                target: std::fs::read_link(path)?,
            }
        } else if file_type.is_file() {
            EntryKind::File {
                content: Box::new(File::open(path)?),
            }
        } else {
            return Err(Error::UnsupportedEntryType {
                path: path.to_path_buf(),
            });
        };

        Ok(Self {
            path: rel,
            stat,
            xattrs,
            kind,
        })
    }
}

/// Read all extended attributes of a path, without following symlinks.
///
/// Returns `None` when attributes cannot be listed (unsupported filesystem,
/// permissions).
pub fn read_xattrs(path: &Path) -> Option<Xattrs> {
    let names = xattr::list(path).ok()?;
    let mut map = Xattrs::new();
    for name in names {
        if let Ok(Some(value)) = xattr::get(path, &name) {
            map.insert(name.to_string_lossy().into_owned(), value);
        }
    }
    Some(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;

    #[test]
    fn classifies_file_with_content() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("notes.txt");
        std::fs::File::create(&file)
            .unwrap()
            .write_all(b"payload")
            .unwrap();

        let entry = DirEntry::from_path(&file, Some(dir.path())).unwrap();
        assert_eq!(entry.path, PathBuf::from("notes.txt"));
        assert_eq!(entry.stat.size, 7);
        let mut content = match entry.kind {
            EntryKind::File { content } => content,
            other => panic!("expected file, got {other:?}"),
        };
        let mut buf = Vec::new();
        content.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"payload");
    }

    #[test]
    fn classifies_directory_and_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink("sub", &link).unwrap();

        let entry = DirEntry::from_path(&sub, Some(dir.path())).unwrap();
        assert_matches!(entry.kind, EntryKind::Directory);

        let entry = DirEntry::from_path(&link, Some(dir.path())).unwrap();
        assert_matches!(entry.kind, EntryKind::Symlink { target } if target == PathBuf::from("sub"));
    }

    #[test]
    fn rejects_special_files() {
        let dir = tempfile::tempdir().unwrap();
        let fifo = dir.path().join("queue");
        nix::unistd::mkfifo(&fifo, nix::sys::stat::Mode::from_bits_truncate(0o644)).unwrap();

        assert_matches!(
            DirEntry::from_path(&fifo, None),
            Err(Error::UnsupportedEntryType { .. })
        );
    }
}
