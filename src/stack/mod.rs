//! Safe mutation of the sudo PAM stack file.
//!
//! ```text
//! classify.rs   tag each line: owned / include / auth / other
//! snapshot.rs   <file>.bak.<YYYYMMDD_HHMMSS> before every mutation
//! patcher.rs    plan (pure) + patch (temp file, fsync, rename, chmod)
//! ```
//!
//! A stack file can only be patched through a [`Snapshot`] of it, so there
//! is no way to call [`patch`] without a rollback point on disk.

mod classify;
mod patcher;
mod snapshot;

pub use classify::{
    ClassifiedLine, INCLUDE_MARKER, LineKind, OwnedLineState, classify, classify_line,
    is_auth_delegation, owned_state,
};
pub use patcher::{
    Anchor, PatchAction, PatchPlan, STACK_FILE_MODE, insertion_point, patch, plan, read_stack,
};
pub use snapshot::{
    SNAPSHOT_INFIX, Snapshot, TIMESTAMP_FORMAT, list_snapshots, snapshot, snapshot_at,
    snapshot_path, snapshot_unique, snapshot_unique_at,
};

/// Default sudo stack file.
pub const DEFAULT_STACK_FILE: &str = "/etc/pam.d/sudo";
