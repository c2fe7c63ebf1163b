//! XDG Base Directory compliant path resolution.
//!
//! Every directory is resolved through a three-level fallback:
//! 1. sudokey-specific env var (SUDOKEY_CONFIG_DIR, SUDOKEY_STATE_DIR)
//! 2. XDG env var (XDG_CONFIG_HOME, etc.) via `etcetera`
//! 3. Platform default (~/.config, etc.)
//!
//! All paths are absolute. Relative paths from env vars are ignored per the XDG Base Directory rules.
//! The files being configured (`/etc/pam.d/sudo`, the mapping store) are not
//! resolved here; they come from the config file.

use anyhow::{Context, Result};
#[cfg(unix)]
use libc::getuid;
use std::path::{Path, PathBuf};

/// Resolved directory paths for the tool's own files.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Config directory: config.toml lives here
    pub config_dir: PathBuf,

    /// State directory: audit log
    pub state_dir: PathBuf,

    /// Runtime directory: mutation lock.
    /// None if no suitable runtime directory is available.
    pub runtime_dir: Option<PathBuf>,
}

impl Paths {
    /// Resolve all paths using real environment variables.
    pub fn resolve() -> Result<Self> {
        Self::resolve_with_env(|key| std::env::var(key))
    }

    /// Resolve paths with a custom env var lookup (for testing).
    pub fn resolve_with_env<F>(env_fn: F) -> Result<Self>
    where
        F: Fn(&str) -> std::result::Result<String, std::env::VarError>,
    {
        use etcetera::BaseStrategy;

        let strategy = etcetera::choose_base_strategy()
            .map_err(|e| anyhow::anyhow!("Failed to determine base directories: {}", e))?;

        let config_dir = env_or(&env_fn, "SUDOKEY_CONFIG_DIR", || {
            strategy.config_dir().join("sudokey")
        });

        let state_dir = env_or(&env_fn, "SUDOKEY_STATE_DIR", || {
            let base_state = strategy.state_dir().unwrap_or_else(|| strategy.data_dir());
            base_state.join("sudokey")
        });

        let runtime_dir = resolve_runtime_dir(&env_fn, running_as_root());

        Ok(Self {
            config_dir,
            state_dir,
            runtime_dir,
        })
    }

    /// Config file: config_dir/config.toml
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    /// Audit log: state_dir/sudokey.audit.jsonl
    pub fn audit_log(&self) -> PathBuf {
        self.state_dir.join(crate::audit::AUDIT_FILENAME)
    }

    /// Mutation lock (in runtime_dir, falls back to state_dir)
    pub fn mutation_lock(&self) -> PathBuf {
        self.runtime_dir
            .as_ref()
            .unwrap_or(&self.state_dir)
            .join("sudokey.lock")
    }

    /// Create all directories with appropriate permissions.
    pub fn ensure_dirs(&self) -> Result<()> {
        create_dir_with_mode(&self.config_dir)?;
        create_dir_with_mode(&self.state_dir)?;

        if let Some(ref runtime) = self.runtime_dir {
            create_dir_with_mode(runtime)?;
        }

        Ok(())
    }
}

/// Resolve an env var with fallback. Ignores empty and relative paths per the XDG Base Directory rules.
fn env_or<F>(env_fn: &F, var: &str, default: impl FnOnce() -> PathBuf) -> PathBuf
where
    F: Fn(&str) -> std::result::Result<String, std::env::VarError>,
{
    env_fn(var)
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .filter(|p| p.is_absolute())
        .unwrap_or_else(default)
}

/// Root-owned runtime directory used when running as root.
pub const ROOT_RUNTIME_DIR: &str = "/run/sudokey";

fn running_as_root() -> bool {
    #[cfg(unix)]
    {
        nix::unistd::geteuid().is_root()
    }

    #[cfg(not(unix))]
    {
        false
    }
}

/// Runtime dir for the mutation lock.
///
/// Root never uses `XDG_RUNTIME_DIR` or `$TMPDIR`: under sudo those may point
/// at a directory another user controls.
fn resolve_runtime_dir<F>(env_fn: &F, as_root: bool) -> Option<PathBuf>
where
    F: Fn(&str) -> std::result::Result<String, std::env::VarError>,
{
    if as_root {
        return Some(PathBuf::from(ROOT_RUNTIME_DIR));
    }

    if let Ok(dir) = env_fn("XDG_RUNTIME_DIR")
        && !dir.is_empty()
    {
        let path = PathBuf::from(&dir);
        if path.is_absolute() {
            return Some(path.join("sudokey"));
        }
    }

    // Fallback: $TMPDIR/sudokey-$UID on Unix
    #[cfg(unix)]
    {
        let uid = unsafe { getuid() };
        let tmpdir = env_fn("TMPDIR").unwrap_or_else(|_| "/tmp".to_string());
        Some(PathBuf::from(tmpdir).join(format!("sudokey-{}", uid)))
    }

    #[cfg(not(unix))]
    {
        None
    }
}

/// Create a directory with mode 0700 per the XDG Base Directory rules.
fn create_dir_with_mode(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("Failed to create directory: {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
            .with_context(|| format!("Failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}
