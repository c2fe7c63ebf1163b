//! Find-or-insert of the owned line, then atomic rewrite of the stack file.
//!
//! [`plan`] is pure: it takes the current content and the new line and
//! returns the full output plus a description of what changed. [`patch`]
//! reads the file, runs the plan, and writes the result atomically.

use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, info, warn};

use super::classify::{
    ClassifiedLine, LineKind, OwnedLineState, classify, is_auth_delegation, owned_state,
};
use super::snapshot::Snapshot;
use crate::error::{Error, Result};
use crate::fsutil;
use crate::policy::OwnedLine;

/// Mode forced on the stack file after every write.
pub const STACK_FILE_MODE: u32 = 0o640;

/// Which rule placed a newly inserted line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    /// Directly before `@include common-auth`.
    BeforeInclude,
    /// Directly after the first auth-phase line.
    AfterFirstAuth,
    /// Appended; the file had no auth-phase lines.
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchAction {
    /// The owned line already matched; nothing to write.
    Unchanged { index: usize },
    Replaced { index: usize },
    Inserted { index: usize, anchor: Anchor },
}

impl PatchAction {
    /// 0-based index of the owned line in the output.
    pub fn index(&self) -> usize {
        match *self {
            PatchAction::Unchanged { index }
            | PatchAction::Replaced { index }
            | PatchAction::Inserted { index, .. } => index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchPlan {
    pub lines: Vec<String>,
    pub action: PatchAction,
}

impl PatchPlan {
    /// Output file content, newline-terminated.
    pub fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }
}

/// Compute the patched content for `current`.
///
/// `path` is only used to label errors.
pub fn plan(path: &Path, current: &str, new_line: &OwnedLine) -> Result<PatchPlan> {
    let classified = classify(current);

    let (lines, action) = match owned_state(&classified) {
        OwnedLineState::Duplicated(indices) => {
            return Err(Error::DuplicateOwnedLines {
                path: path.to_path_buf(),
                lines: indices.iter().map(|i| i + 1).collect(),
                snapshot: None,
            });
        }
        OwnedLineState::FoundAt(index) => {
            let existing = classified[index].text;
            let (body, eol) = split_eol(existing);
            let action = if body == new_line.as_str() {
                PatchAction::Unchanged { index }
            } else {
                PatchAction::Replaced { index }
            };
            let lines = classified
                .iter()
                .enumerate()
                .map(|(i, l)| {
                    if i == index {
                        format!("{}{}", new_line, eol)
                    } else {
                        l.text.to_string()
                    }
                })
                .collect();
            (lines, action)
        }
        OwnedLineState::NotFound => {
            let (index, anchor) = insertion_point(&classified);
            if anchor == Anchor::AfterFirstAuth
                && let Some(prev) = index.checked_sub(1).and_then(|i| classified.get(i))
                && is_auth_delegation(prev.text)
            {
                warn!(
                    "{} line {} delegates auth ({}); the pam_u2f line goes after it",
                    path.display(),
                    index,
                    prev.text.trim()
                );
            }
            // Match the file's line ending so CRLF files stay CRLF
            let eol = classified
                .first()
                .map(|l| split_eol(l.text).1)
                .unwrap_or("");
            let mut lines: Vec<String> = classified.iter().map(|l| l.text.to_string()).collect();
            lines.insert(index, format!("{}{}", new_line, eol));
            (lines, PatchAction::Inserted { index, anchor })
        }
    };

    let plan = PatchPlan { lines, action };
    check_invariants(path, &plan)?;
    Ok(plan)
}

fn split_eol(text: &str) -> (&str, &str) {
    match text.strip_suffix('\r') {
        Some(body) => (body, "\r"),
        None => (text, ""),
    }
}

/// Where a missing owned line goes, as an index into the current lines.
pub fn insertion_point(lines: &[ClassifiedLine<'_>]) -> (usize, Anchor) {
    if let Some(i) = lines.iter().position(|l| l.kind == LineKind::Include) {
        return (i, Anchor::BeforeInclude);
    }
    if let Some(i) = lines.iter().position(|l| l.kind == LineKind::Auth) {
        return (i + 1, Anchor::AfterFirstAuth);
    }
    (lines.len(), Anchor::End)
}

fn check_invariants(path: &Path, plan: &PatchPlan) -> Result<()> {
    let invariant = |reason: &str| Error::Invariant {
        path: path.to_path_buf(),
        reason: reason.to_string(),
        snapshot: None,
    };

    if plan.lines.iter().all(|l| l.trim().is_empty()) {
        return Err(invariant("composed stack is empty"));
    }

    let rendered = plan.render();
    let classified = classify(&rendered);
    match owned_state(&classified) {
        OwnedLineState::FoundAt(i) if i == plan.action.index() => Ok(()),
        OwnedLineState::NotFound => Err(invariant(
            "composed stack has no pam_u2f line; the new line does not reference the module",
        )),
        _ => Err(invariant("composed stack does not hold exactly one pam_u2f line")),
    }
}

/// Rewrite the snapshotted stack file so it carries `new_line`.
///
/// Errors are returned with the snapshot attached as the rollback target.
/// An `Unchanged` plan skips the write but still enforces the file mode.
pub fn patch(snapshot: &Snapshot, new_line: &OwnedLine) -> Result<PatchAction> {
    let path = snapshot.source();
    patch_file(path, new_line).map_err(|e| e.with_snapshot(snapshot.path()))
}

fn patch_file(path: &Path, new_line: &OwnedLine) -> Result<PatchAction> {
    let patch_err = |source: io::Error| Error::Patch {
        path: path.to_path_buf(),
        snapshot: None,
        source,
    };

    let current = read_stack(path)?;
    let plan = plan(path, &current, new_line)?;

    match plan.action {
        PatchAction::Unchanged { index } => {
            debug!(
                "{} line {} already up to date",
                path.display(),
                index + 1
            );
            fsutil::set_mode(path, STACK_FILE_MODE).map_err(patch_err)?;
        }
        action => {
            let owner = fsutil::ownership(path).map_err(patch_err)?;
            fsutil::write_atomic(path, plan.render().as_bytes(), STACK_FILE_MODE, owner)
                .map_err(patch_err)?;
            match action {
                PatchAction::Inserted { index, anchor } => info!(
                    "Inserted pam_u2f line into {} at line {} ({:?})",
                    path.display(),
                    index + 1,
                    anchor
                ),
                _ => info!(
                    "Replaced pam_u2f line {} in {}",
                    action.index() + 1,
                    path.display()
                ),
            }
        }
    }

    Ok(plan.action)
}

/// Read a stack file, mapping a missing file to [`Error::NotFound`].
pub fn read_stack(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            Error::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            Error::Patch {
                path: path.to_path_buf(),
                snapshot: None,
                source,
            }
        }
    })
}
