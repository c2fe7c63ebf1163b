//! Cross-process mutation lock using advisory file locking (fs2 flock).
//!
//! Serializes `enroll` and `patch` runs so two invocations never interleave
//! their read-modify-write cycles on the stack file or the mapping store.
//! Processes that do not take the lock (an editor, another tool) are not
//! stopped by it.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{Error, Result};

/// Advisory lock guarding every stack and mapping store mutation.
///
/// The lock file lives in the runtime directory, never next to the stack
/// file, so it cannot be mistaken for a PAM service file.
#[derive(Debug, Clone)]
pub struct MutationLock {
    path: PathBuf,
}

/// RAII guard that releases the lock on drop.
#[derive(Debug)]
pub struct MutationLockGuard {
    file: File,
}

impl Drop for MutationLockGuard {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

impl MutationLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Lock at the resolved default location.
    pub fn from_paths(paths: &crate::paths::Paths) -> Self {
        Self::new(paths.mutation_lock())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Blocking acquire: waits until the lock is available.
    pub fn acquire(&self) -> Result<MutationLockGuard> {
        let file = self.open()?;
        file.lock_exclusive().map_err(|e| self.error(e))?;
        Ok(MutationLockGuard { file })
    }

    /// Non-blocking try-acquire: returns `None` if another process holds it.
    pub fn try_acquire(&self) -> Result<Option<MutationLockGuard>> {
        let file = self.open()?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(MutationLockGuard { file })),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            #[cfg(unix)]
            Err(ref e) if e.raw_os_error() == Some(libc::EWOULDBLOCK) => Ok(None),
            Err(e) => Err(self.error(e)),
        }
    }

    /// Take the lock, waiting (and saying so) if another run holds it.
    pub fn acquire_or_wait(&self) -> Result<MutationLockGuard> {
        if let Some(guard) = self.try_acquire()? {
            return Ok(guard);
        }
        info!(
            "Another sudokey run holds {}; waiting for it to finish",
            self.path.display()
        );
        self.acquire()
    }

    /// Open the lock file without following symlinks or truncating.
    ///
    /// The containing directory must belong to the current user, so a
    /// directory planted in a shared location (`/tmp`) is refused.
    fn open(&self) -> Result<File> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.error(e))?;
            check_dir_owner(parent).map_err(|e| self.error(e))?;
        }

        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true).truncate(false);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.custom_flags(libc::O_NOFOLLOW).mode(0o600);
        }
        options.open(&self.path).map_err(|e| self.error(e))
    }

    fn error(&self, source: io::Error) -> Error {
        Error::Locked {
            path: self.path.clone(),
            source,
        }
    }
}

/// Refuse a lock directory that is a symlink or owned by someone else.
fn check_dir_owner(dir: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;

        let meta = fs::symlink_metadata(dir)?;
        if !meta.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{} is not a directory", dir.display()),
            ));
        }
        let euid = nix::unistd::geteuid().as_raw();
        if meta.uid() != euid {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!(
                    "{} is owned by uid {}, not {}",
                    dir.display(),
                    meta.uid(),
                    euid
                ),
            ));
        }
    }

    #[cfg(not(unix))]
    {
        let _ = dir;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};

    #[test]
    fn acquire_and_release() {
        let tmp = tempfile::tempdir().unwrap();
        let lock = MutationLock::new(tmp.path().join("sudokey.lock"));

        let guard = lock.acquire().unwrap();
        drop(guard);

        let _again = lock.acquire().unwrap();
    }

    #[test]
    fn creates_missing_runtime_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let lock = MutationLock::new(tmp.path().join("run").join("sudokey.lock"));

        let _guard = lock.acquire().unwrap();
        assert!(lock.path().exists());
    }

    #[test]
    fn try_acquire_returns_none_when_held() {
        let tmp = tempfile::tempdir().unwrap();
        let lock_path = tmp.path().join("sudokey.lock");

        let file = File::create(&lock_path).unwrap();
        file.lock_exclusive().unwrap();

        let lock = MutationLock::new(&lock_path);
        assert!(lock.try_acquire().unwrap().is_none());

        file.unlock().unwrap();
        drop(file);

        assert!(lock.try_acquire().unwrap().is_some());
    }

    #[cfg(unix)]
    #[test]
    fn planted_symlink_is_not_followed() {
        let tmp = tempfile::tempdir().unwrap();
        let victim = tmp.path().join("shadow");
        fs::write(&victim, "root:*:19000:0:99999:7:::\n").unwrap();

        let run_dir = tmp.path().join("sudokey-0");
        fs::create_dir(&run_dir).unwrap();
        let lock_path = run_dir.join("sudokey.lock");
        std::os::unix::fs::symlink(&victim, &lock_path).unwrap();

        let err = MutationLock::new(&lock_path).acquire_or_wait().unwrap_err();

        assert!(matches!(err, Error::Locked { .. }));
        assert_eq!(
            fs::read_to_string(&victim).unwrap(),
            "root:*:19000:0:99999:7:::\n"
        );
    }

    #[cfg(unix)]
    #[test]
    fn existing_lock_file_is_not_truncated() {
        let tmp = tempfile::tempdir().unwrap();
        let lock_path = tmp.path().join("sudokey.lock");
        fs::write(&lock_path, "held").unwrap();

        let _guard = MutationLock::new(&lock_path).acquire().unwrap();

        assert_eq!(fs::read_to_string(&lock_path).unwrap(), "held");
    }

    #[cfg(unix)]
    #[test]
    fn foreign_lock_dir_is_refused() {
        use std::os::unix::fs::MetadataExt;

        let tmp = tempfile::tempdir().unwrap();
        let run_dir = tmp.path().join("shared");
        fs::create_dir(&run_dir).unwrap();

        // Only root can hand the directory to another user
        if !nix::unistd::geteuid().is_root() {
            return;
        }
        std::os::unix::fs::chown(&run_dir, Some(65534), Some(65534)).unwrap();
        assert_eq!(fs::metadata(&run_dir).unwrap().uid(), 65534);

        let lock = MutationLock::new(run_dir.join("sudokey.lock"));
        let err = lock.acquire().unwrap_err();

        assert!(matches!(err, Error::Locked { .. }));
        assert!(!lock.path().exists());
    }

    #[test]
    fn concurrent_threads_serialize() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sudokey.lock");
        let inside = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let overlaps = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let barrier = Arc::new(Barrier::new(3));

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let p = path.clone();
                let inside = inside.clone();
                let overlaps = overlaps.clone();
                let b = barrier.clone();
                std::thread::spawn(move || {
                    let lock = MutationLock::new(p);
                    b.wait();
                    let _guard = lock.acquire_or_wait().unwrap();
                    if inside.fetch_add(1, std::sync::atomic::Ordering::SeqCst) != 0 {
                        overlaps.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    }
                    std::thread::sleep(std::time::Duration::from_millis(10));
                    inside.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(overlaps.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
