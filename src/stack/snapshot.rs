//! Timestamped, permission-preserving snapshots of a stack file.
//!
//! A snapshot is written next to its source as
//! `<name>.bak.<YYYYMMDD_HHMMSS>` and is never modified or deleted
//! afterwards. Two snapshots taken in the same second share a name and the
//! second one replaces the first; [`snapshot_unique`] appends `.1`, `.2`,
//! ... instead.

use chrono::{DateTime, Local};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{Error, Result};
use crate::fsutil;

/// Infix between the source file name and the timestamp.
pub const SNAPSHOT_INFIX: &str = ".bak.";

/// Second-resolution timestamp used as the snapshot key.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Proof that the file at [`Snapshot::source`] was backed up.
///
/// [`patch`](super::patch) only accepts a `Snapshot`, so a stack file cannot
/// be rewritten without one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    source: PathBuf,
    path: PathBuf,
    taken_at: DateTime<Local>,
    mode: u32,
}

impl Snapshot {
    /// The file that was backed up.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Where the copy lives.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn taken_at(&self) -> DateTime<Local> {
        self.taken_at
    }

    /// Permission bits copied from the source.
    pub fn mode(&self) -> u32 {
        self.mode
    }
}

/// Snapshot `path` now. Same-second calls overwrite each other.
pub fn snapshot(path: &Path) -> Result<Snapshot> {
    snapshot_at(path, Local::now())
}

/// Snapshot `path` now, never replacing an earlier snapshot.
pub fn snapshot_unique(path: &Path) -> Result<Snapshot> {
    snapshot_unique_at(path, Local::now())
}

pub fn snapshot_at(path: &Path, at: DateTime<Local>) -> Result<Snapshot> {
    take(path, snapshot_path(path, at), at)
}

pub fn snapshot_unique_at(path: &Path, at: DateTime<Local>) -> Result<Snapshot> {
    let base = snapshot_path(path, at);
    let mut candidate = base.clone();
    let mut n = 1u32;
    while candidate.exists() {
        let mut name = base.clone().into_os_string();
        name.push(format!(".{}", n));
        candidate = PathBuf::from(name);
        n += 1;
    }
    take(path, candidate, at)
}

/// Name of the snapshot of `path` taken at `at`.
pub fn snapshot_path(path: &Path, at: DateTime<Local>) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(SNAPSHOT_INFIX);
    name.push(at.format(TIMESTAMP_FORMAT).to_string());
    PathBuf::from(name)
}

/// All snapshots of `path`, oldest first.
pub fn list_snapshots(path: &Path) -> Result<Vec<PathBuf>> {
    let Some(file_name) = path.file_name() else {
        return Ok(Vec::new());
    };
    let prefix = format!("{}{}", file_name.to_string_lossy(), SNAPSHOT_INFIX);
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(Error::Snapshot {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let mut snapshots: Vec<((String, u64), PathBuf)> = entries
        .filter_map(|entry| {
            let entry = entry.ok()?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let key = order_key(name.strip_prefix(&prefix)?);
            Some((key, entry.path()))
        })
        .collect();

    snapshots.sort();
    Ok(snapshots.into_iter().map(|(_, path)| path).collect())
}

/// `20260314_092653.10` -> ("20260314_092653", 10); no suffix sorts first.
fn order_key(stamp: &str) -> (String, u64) {
    match stamp.split_once('.') {
        Some((base, n)) => (base.to_string(), n.parse().unwrap_or(u64::MAX)),
        None => (stamp.to_string(), 0),
    }
}

fn take(source: &Path, dest: PathBuf, at: DateTime<Local>) -> Result<Snapshot> {
    if !source.exists() {
        return Err(Error::NotFound {
            path: source.to_path_buf(),
        });
    }

    let snapshot_err = |source_err: io::Error| Error::Snapshot {
        path: source.to_path_buf(),
        source: source_err,
    };

    let mode = fsutil::mode_of(source).map_err(snapshot_err)?;

    // Unlink first: copying onto an existing name opens it with O_TRUNC,
    // which would clobber the original if the name were a hard link to it.
    match fs::remove_file(&dest) {
        Ok(()) => info!("Replacing same-second snapshot {}", dest.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(snapshot_err(e)),
    }

    fs::copy(source, &dest).map_err(snapshot_err)?;
    fsutil::set_mode(&dest, mode).map_err(snapshot_err)?;
    fs::File::open(&dest)
        .and_then(|f| f.sync_all())
        .map_err(snapshot_err)?;

    info!("Snapshot of {} saved to {}", source.display(), dest.display());

    Ok(Snapshot {
        source: source.to_path_buf(),
        path: dest,
        taken_at: at,
        mode,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap()
    }

    #[test]
    fn snapshot_name_uses_second_resolution_timestamp() {
        let path = Path::new("/etc/pam.d/sudo");
        assert_eq!(
            snapshot_path(path, fixed_time()),
            PathBuf::from("/etc/pam.d/sudo.bak.20260314_092653")
        );
    }

    #[test]
    fn snapshot_is_byte_identical_and_independent() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sudo");
        let original = "#%PAM-1.0\nauth required pam_env.so\n@include common-auth\n";
        fs::write(&path, original).unwrap();

        let snap = snapshot_at(&path, fixed_time()).unwrap();
        assert_eq!(snap.source(), path.as_path());
        assert_eq!(fs::read_to_string(snap.path()).unwrap(), original);

        // Mutating the original must not reach the snapshot
        fs::write(&path, "changed\n").unwrap();
        assert_eq!(fs::read_to_string(snap.path()).unwrap(), original);
    }

    #[cfg(unix)]
    #[test]
    fn snapshot_preserves_permission_bits() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sudo");
        fs::write(&path, "auth required pam_env.so\n").unwrap();
        fsutil::set_mode(&path, 0o604).unwrap();

        let snap = snapshot_at(&path, fixed_time()).unwrap();
        assert_eq!(snap.mode(), 0o604);
        assert_eq!(fsutil::mode_of(snap.path()).unwrap(), 0o604);
    }

    #[test]
    fn missing_source_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let err = snapshot(&tmp.path().join("absent")).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn unremovable_snapshot_name_is_snapshot_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sudo");
        fs::write(&path, "auth required pam_env.so\n").unwrap();

        // A non-empty directory squatting on the snapshot name cannot be unlinked
        let squatter = snapshot_path(&path, fixed_time());
        fs::create_dir(&squatter).unwrap();
        fs::write(squatter.join("keep"), "x").unwrap();

        let err = snapshot_at(&path, fixed_time()).unwrap_err();

        assert_eq!(err.code(), crate::error::error_codes::SNAPSHOT_FAILED);
        assert!(err.to_string().contains("sudo"));
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "auth required pam_env.so\n"
        );
    }

    #[test]
    fn same_second_snapshots_share_a_name() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sudo");

        fs::write(&path, "first\n").unwrap();
        let a = snapshot_at(&path, fixed_time()).unwrap();
        fs::write(&path, "second\n").unwrap();
        let b = snapshot_at(&path, fixed_time()).unwrap();

        // Known collision: the later snapshot replaces the earlier one
        assert_eq!(a.path(), b.path());
        assert_eq!(fs::read_to_string(b.path()).unwrap(), "second\n");
        assert_eq!(list_snapshots(&path).unwrap().len(), 1);
    }

    #[test]
    fn unique_snapshots_add_disambiguator() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sudo");

        fs::write(&path, "first\n").unwrap();
        let a = snapshot_unique_at(&path, fixed_time()).unwrap();
        fs::write(&path, "second\n").unwrap();
        let b = snapshot_unique_at(&path, fixed_time()).unwrap();
        fs::write(&path, "third\n").unwrap();
        let c = snapshot_unique_at(&path, fixed_time()).unwrap();

        assert_ne!(a.path(), b.path());
        assert!(b.path().to_string_lossy().ends_with("20260314_092653.1"));
        assert!(c.path().to_string_lossy().ends_with("20260314_092653.2"));
        assert_eq!(fs::read_to_string(a.path()).unwrap(), "first\n");
        assert_eq!(fs::read_to_string(b.path()).unwrap(), "second\n");

        let listed = list_snapshots(&path).unwrap();
        assert_eq!(listed, vec![a.path().to_path_buf(), b.path().to_path_buf(), c.path().to_path_buf()]);
    }

    #[test]
    fn many_same_second_snapshots_list_in_creation_order() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sudo");

        let mut taken = Vec::new();
        for i in 0..12 {
            fs::write(&path, format!("rev {}\n", i)).unwrap();
            taken.push(snapshot_unique_at(&path, fixed_time()).unwrap().path().to_path_buf());
        }
        let later = Local.with_ymd_and_hms(2026, 3, 14, 9, 26, 54).unwrap();
        taken.push(snapshot_unique_at(&path, later).unwrap().path().to_path_buf());

        let listed = list_snapshots(&path).unwrap();
        assert_eq!(listed, taken);
        assert!(listed[11].to_string_lossy().ends_with("20260314_092653.11"));
        assert!(listed.last().unwrap().to_string_lossy().ends_with("20260314_092654"));
    }

    #[test]
    fn list_ignores_other_files() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sudo");
        fs::write(&path, "x\n").unwrap();
        fs::write(tmp.path().join("sudo-i"), "x\n").unwrap();
        fs::write(tmp.path().join("su.bak.20260101_000000"), "x\n").unwrap();

        let earlier = Local.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        snapshot_at(&path, fixed_time()).unwrap();
        snapshot_at(&path, earlier).unwrap();

        let listed = list_snapshots(&path).unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].to_string_lossy().ends_with("20250101_000000"));
        assert!(listed[1].to_string_lossy().ends_with("20260314_092653"));
    }
}
