//! Restoring POSIX metadata on written files and cloning unchanged ones.

use std::fs::{self, File};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use filetime::FileTime;
use tracing::debug;

use crate::entry::{EntryStat, Xattrs};
use crate::error::{Error, Result};
use crate::params::Params;

/// Which pieces of metadata to restore after writing an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preserve {
    pub chmod: bool,
    pub chown: bool,
    pub utime: bool,
    pub xattrs: bool,
}

impl Preserve {
    pub const NONE: Preserve = Preserve {
        chmod: false,
        chown: false,
        utime: false,
        xattrs: false,
    };

    pub const ALL: Preserve = Preserve {
        chmod: true,
        chown: true,
        utime: true,
        xattrs: true,
    };

    /// Timestamps only. Restoring ownership needs privileges most runs
    /// do not have, so it is opt-in.
    pub const DEFAULT: Preserve = Preserve {
        chmod: false,
        chown: false,
        utime: true,
        xattrs: false,
    };

    /// Reads the `preserve_stats` parameter: `true`/`false` or a string
    /// naming any of `chmod`, `chown`, `utime` and `xattrs`.
    pub fn from_params(params: &Params) -> Result<Preserve> {
        match params.get("preserve_stats") {
            None | Some(serde_json::Value::Null) => Ok(Preserve::DEFAULT),
            Some(serde_json::Value::Bool(true)) => Ok(Preserve::ALL),
            Some(serde_json::Value::Bool(false)) => Ok(Preserve::NONE),
            Some(serde_json::Value::String(mode)) => Ok(Preserve {
                chmod: mode.contains("chmod"),
                chown: mode.contains("chown"),
                utime: mode.contains("utime"),
                xattrs: mode.contains("xattr"),
            }),
            Some(_) => Err(Error::invalid_param(
                "preserve_stats",
                "must be a boolean or a string of flags",
            )),
        }
    }
}

/// Applies the requested metadata from `stat` onto `path`.
///
/// `is_symlink` skips the operations that would follow the link and
/// touch its target instead.
pub fn preserve_stats(
    path: &Path,
    stat: &EntryStat,
    xattrs: Option<&Xattrs>,
    preserve: Preserve,
    is_symlink: bool,
) -> Result<()> {
    if preserve.chmod && !is_symlink {
        fs::set_permissions(path, fs::Permissions::from_mode(stat.permissions()))?;
    }
    if preserve.chown {
        std::os::unix::fs::lchown(path, Some(stat.uid), Some(stat.gid))?;
    }
    if preserve.utime {
        let atime = FileTime::from_unix_time(stat.atime, stat.atime_nsec as u32);
        let mtime = FileTime::from_unix_time(stat.mtime, stat.mtime_nsec as u32);
        filetime::set_symlink_file_times(path, atime, mtime)?;
    }
    if preserve.xattrs && !is_symlink {
        if let Some(attrs) = xattrs {
            for (name, value) in attrs {
                xattr::set(path, name, value)?;
            }
        }
    }
    Ok(())
}

/// Clones `from` to `to` without copying the data. With `try_reflink`
/// a CoW clone is attempted first and a hard link is the fallback.
pub fn clone_file(from: &Path, to: &Path, try_reflink: bool) -> Result<()> {
    if to.symlink_metadata().is_ok() {
        fs::remove_file(to)?;
    }
    if try_reflink {
        match reflink(from, to) {
            Ok(()) => return Ok(()),
            Err(err) => {
                debug!(from = %from.display(), to = %to.display(), %err, "reflink failed, hard linking");
            }
        }
    }
    fs::hard_link(from, to)?;
    Ok(())
}

#[cfg(target_os = "linux")]
fn reflink(from: &Path, to: &Path) -> std::io::Result<()> {
    use std::os::fd::AsRawFd;

    let src = File::open(from)?;
    let dst = File::create(to)?;
    // FICLONE shares extents on CoW filesystems (btrfs, xfs).
    let rc = unsafe { libc::ioctl(dst.as_raw_fd(), libc::FICLONE, src.as_raw_fd()) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        drop(dst);
        let _ = fs::remove_file(to);
        return Err(err);
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn reflink(_from: &Path, _to: &Path) -> std::io::Result<()> {
    Err(std::io::Error::other("reflink not supported"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::DirEntry;
    use serde_json::json;

    fn bag(value: serde_json::Value) -> Params {
        Params::from_value(value)
    }

    #[test]
    fn preserve_defaults_to_timestamps_only() {
        let preserve = Preserve::from_params(&bag(json!({}))).unwrap();
        assert_eq!(preserve, Preserve::DEFAULT);
    }

    #[test]
    fn preserve_parses_flag_strings() {
        let preserve =
            Preserve::from_params(&bag(json!({"preserve_stats": "chmod,utime"}))).unwrap();
        assert!(preserve.chmod);
        assert!(preserve.utime);
        assert!(!preserve.chown);
        assert!(!preserve.xattrs);

        assert_eq!(
            Preserve::from_params(&bag(json!({"preserve_stats": true}))).unwrap(),
            Preserve::ALL,
        );
        assert_eq!(
            Preserve::from_params(&bag(json!({"preserve_stats": false}))).unwrap(),
            Preserve::NONE,
        );
    }

    #[test]
    fn preserve_rejects_other_shapes() {
        assert!(Preserve::from_params(&bag(json!({"preserve_stats": 3}))).is_err());
    }

    #[test]
    fn restores_permissions_and_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::write(&src, b"data").unwrap();
        fs::set_permissions(&src, fs::Permissions::from_mode(0o640)).unwrap();
        let entry = DirEntry::from_path(&src, None).unwrap();

        let dst = dir.path().join("dst");
        fs::write(&dst, b"data").unwrap();
        preserve_stats(&dst, &entry.stat, None, Preserve { chmod: true, ..Preserve::DEFAULT }, false)
            .unwrap();

        let meta = fs::metadata(&dst).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o640);
        let restored = EntryStat::from_metadata(&meta);
        assert_eq!(restored.mtime_ns(), entry.stat.mtime_ns());
    }

    #[test]
    fn clone_file_produces_identical_content() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::write(&src, b"cloned bytes").unwrap();
        let dst = dir.path().join("dst");
        clone_file(&src, &dst, true).unwrap();
        assert_eq!(fs::read(&dst).unwrap(), b"cloned bytes");
        assert_eq!(fs::read(&src).unwrap(), b"cloned bytes");
    }
}
