//! Error types for the sudokey engine.
//!
//! Each variant carries a stable error code (SCREAMING_SNAKE_CASE) that is
//! accessible via [`Error::code()`]. Every variant names the file or identity
//! it pertains to. Variants raised after a snapshot was taken also carry the
//! snapshot path so the operator always has a named rollback target.

use std::io;
use std::path::{Path, PathBuf};

/// Stable error codes for programmatic error handling.
pub mod error_codes {
    /// An expected input file does not exist.
    pub const NOT_FOUND: &str = "NOT_FOUND";

    /// Malformed credential record or policy value.
    pub const VALIDATION_FAILED: &str = "VALIDATION_FAILED";

    /// The pre-mutation snapshot could not be created.
    pub const SNAPSHOT_FAILED: &str = "SNAPSHOT_FAILED";

    /// A post-composition check failed; nothing was written.
    pub const INVARIANT_VIOLATED: &str = "INVARIANT_VIOLATED";

    /// The stack file already holds more than one owned line.
    pub const DUPLICATE_OWNED_LINES: &str = "DUPLICATE_OWNED_LINES";

    /// I/O failure while rewriting the mapping store.
    pub const MERGE_FAILED: &str = "MERGE_FAILED";

    /// I/O failure while rewriting the stack file.
    pub const PATCH_FAILED: &str = "PATCH_FAILED";

    /// The mutation lock could not be taken.
    pub const LOCK_FAILED: &str = "LOCK_FAILED";

    /// Configuration could not be loaded or saved.
    pub const CONFIG_INVALID: &str = "CONFIG_INVALID";
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("[{}] {} does not exist", error_codes::NOT_FOUND, .path.display())]
    NotFound { path: PathBuf },

    #[error("[{}] invalid {what}: {reason}", error_codes::VALIDATION_FAILED)]
    Validation { what: String, reason: String },

    #[error("[{}] cannot snapshot {}: {source}", error_codes::SNAPSHOT_FAILED, .path.display())]
    Snapshot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(
        "[{}] refusing to write {}: {reason}{}",
        error_codes::INVARIANT_VIOLATED,
        .path.display(),
        rollback_hint(.snapshot, .path)
    )]
    Invariant {
        path: PathBuf,
        reason: String,
        snapshot: Option<PathBuf>,
    },

    #[error(
        "[{}] {} holds {} pam_u2f lines (lines {}); remove the extras by hand{}",
        error_codes::DUPLICATE_OWNED_LINES,
        .path.display(),
        .lines.len(),
        join_line_numbers(.lines),
        rollback_hint(.snapshot, .path)
    )]
    DuplicateOwnedLines {
        path: PathBuf,
        /// 1-based line numbers of every owned line.
        lines: Vec<usize>,
        snapshot: Option<PathBuf>,
    },

    #[error(
        "[{}] cannot update mapping store {} for '{identity}': {source}",
        error_codes::MERGE_FAILED,
        .path.display()
    )]
    Merge {
        path: PathBuf,
        identity: String,
        #[source]
        source: io::Error,
    },

    #[error(
        "[{}] cannot patch {}: {source}{}",
        error_codes::PATCH_FAILED,
        .path.display(),
        rollback_hint(.snapshot, .path)
    )]
    Patch {
        path: PathBuf,
        snapshot: Option<PathBuf>,
        #[source]
        source: io::Error,
    },

    #[error("[{}] cannot lock {}: {source}", error_codes::LOCK_FAILED, .path.display())]
    Locked {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("[{}] {}: {reason}", error_codes::CONFIG_INVALID, .path.display())]
    Config { path: PathBuf, reason: String },
}

impl Error {
    /// Returns the stable error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => error_codes::NOT_FOUND,
            Error::Validation { .. } => error_codes::VALIDATION_FAILED,
            Error::Snapshot { .. } => error_codes::SNAPSHOT_FAILED,
            Error::Invariant { .. } => error_codes::INVARIANT_VIOLATED,
            Error::DuplicateOwnedLines { .. } => error_codes::DUPLICATE_OWNED_LINES,
            Error::Merge { .. } => error_codes::MERGE_FAILED,
            Error::Patch { .. } => error_codes::PATCH_FAILED,
            Error::Locked { .. } => error_codes::LOCK_FAILED,
            Error::Config { .. } => error_codes::CONFIG_INVALID,
        }
    }

    pub(crate) fn validation(what: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Validation {
            what: what.into(),
            reason: reason.into(),
        }
    }

    /// The snapshot this error points the operator at, if one was taken.
    pub fn snapshot(&self) -> Option<&Path> {
        match self {
            Error::Invariant { snapshot, .. }
            | Error::DuplicateOwnedLines { snapshot, .. }
            | Error::Patch { snapshot, .. } => snapshot.as_deref(),
            _ => None,
        }
    }

    /// Attach the snapshot taken before the failed write.
    ///
    /// Variants that are raised before any snapshot exists are returned as-is.
    pub fn with_snapshot(mut self, taken: &Path) -> Self {
        match &mut self {
            Error::Invariant { snapshot, .. }
            | Error::DuplicateOwnedLines { snapshot, .. }
            | Error::Patch { snapshot, .. } => *snapshot = Some(taken.to_path_buf()),
            _ => {}
        }
        self
    }
}

fn rollback_hint(snapshot: &Option<PathBuf>, path: &Path) -> String {
    match snapshot {
        Some(snap) => format!(
            " (restore with: cp {} {})",
            snap.display(),
            path.display()
        ),
        None => String::new(),
    }
}

fn join_line_numbers(lines: &[usize]) -> String {
    lines
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
