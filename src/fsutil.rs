//! Atomic file replacement (temp file → fsync → rename → chmod).
//!
//! The temp file is created in the target's directory so the final rename
//! never crosses a filesystem. Readers see either the old or the new file,
//! never a partial write.

use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tracing::debug;

/// Owner and group ids of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ownership {
    pub uid: u32,
    pub gid: u32,
}

/// Replace `path` with `contents`, then force `mode` on the result.
///
/// When `owner` is given, the replacement file is chowned before the rename
/// so that it never appears under a different owner.
pub fn write_atomic(
    path: &Path,
    contents: &[u8],
    mode: u32,
    owner: Option<Ownership>,
) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = tempfile::Builder::new()
        .prefix(".sudokey-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(contents)?;
    tmp.flush()?;

    set_mode(tmp.path(), mode)?;
    if let Some(owner) = owner {
        set_owner(tmp.path(), owner)?;
    }
    tmp.as_file().sync_all()?;

    tmp.persist(path).map_err(|e| e.error)?;

    // The rename carried the temp file's mode; apply it again in case a
    // umask or ACL on the directory interfered.
    set_mode(path, mode)?;
    sync_dir(dir);

    Ok(())
}

/// Current owner of a file.
pub fn ownership(path: &Path) -> io::Result<Option<Ownership>> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let meta = fs::metadata(path)?;
        Ok(Some(Ownership {
            uid: meta.uid(),
            gid: meta.gid(),
        }))
    }

    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(None)
    }
}

/// Permission bits of a file (lower 12 bits of the mode).
pub fn mode_of(path: &Path) -> io::Result<u32> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        Ok(fs::metadata(path)?.permissions().mode() & 0o7777)
    }

    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(0)
    }
}

pub fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
    }

    #[cfg(not(unix))]
    {
        let _ = (path, mode);
        Ok(())
    }
}

pub fn set_owner(path: &Path, owner: Ownership) -> io::Result<()> {
    #[cfg(unix)]
    {
        // chown(2) to the current owner needs no privilege; skip it anyway
        if ownership(path)? == Some(owner) {
            return Ok(());
        }
        std::os::unix::fs::chown(path, Some(owner.uid), Some(owner.gid))
    }

    #[cfg(not(unix))]
    {
        let _ = (path, owner);
        Ok(())
    }
}

/// Best-effort fsync of a directory so the rename itself is durable.
fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    {
        if let Err(e) = fs::File::open(dir).and_then(|d| d.sync_all()) {
            debug!("fsync of {} failed: {}", dir.display(), e);
        }
    }

    #[cfg(not(unix))]
    {
        let _ = dir;
    }
}
