//! Line classification for PAM stack files.
//!
//! First pass of the patcher: every line is tagged as owned, include,
//! auth-phase or other. Insertion and replacement decisions are then made
//! from the tagged list alone.

use crate::policy::MODULE_TOKEN;

/// First two fields of the line that pulls in the shared auth sub-stack.
pub const INCLUDE_MARKER: [&str; 2] = ["@include", "common-auth"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// References `pam_u2f.so`; this tool manages it.
    Owned,
    /// `@include common-auth`
    Include,
    /// Any other `auth` (or `-auth`) line.
    Auth,
    /// Comments, blank lines, and the account/password/session phases.
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifiedLine<'a> {
    pub text: &'a str,
    pub kind: LineKind,
}

/// Where the owned line currently sits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnedLineState {
    NotFound,
    /// 0-based index of the single owned line.
    FoundAt(usize),
    /// 0-based indices of every owned line; the file needs manual repair.
    Duplicated(Vec<usize>),
}

pub fn classify_line(line: &str) -> LineKind {
    let trimmed = line.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return LineKind::Other;
    }

    let fields: Vec<&str> = trimmed.split_whitespace().collect();

    if fields.iter().any(|f| is_module_reference(f)) {
        return LineKind::Owned;
    }
    if fields.len() >= 2 && fields[..2] == INCLUDE_MARKER {
        return LineKind::Include;
    }
    match fields.first() {
        Some(&"auth") | Some(&"-auth") => LineKind::Auth,
        _ => LineKind::Other,
    }
}

/// `auth include <stack>` / `auth substack <stack>`: the auth phase is handed
/// to another file (RHEL-style `system-auth`).
pub fn is_auth_delegation(line: &str) -> bool {
    let mut fields = line.split_whitespace();
    matches!(
        (fields.next(), fields.next()),
        (Some("auth" | "-auth"), Some("include" | "substack"))
    )
}

/// Matches the bare module name or an absolute module path ending in it.
fn is_module_reference(field: &str) -> bool {
    field == MODULE_TOKEN
        || field
            .strip_suffix(MODULE_TOKEN)
            .is_some_and(|prefix| prefix.ends_with('/'))
}

/// Split on `\n` only, so a CRLF file keeps its `\r` on every line.
pub fn classify(content: &str) -> Vec<ClassifiedLine<'_>> {
    if content.is_empty() {
        return Vec::new();
    }
    content
        .strip_suffix('\n')
        .unwrap_or(content)
        .split('\n')
        .map(|text| ClassifiedLine {
            text,
            kind: classify_line(text),
        })
        .collect()
}

pub fn owned_state(lines: &[ClassifiedLine<'_>]) -> OwnedLineState {
    let owned: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, l)| l.kind == LineKind::Owned)
        .map(|(i, _)| i)
        .collect();

    match owned.as_slice() {
        [] => OwnedLineState::NotFound,
        [index] => OwnedLineState::FoundAt(*index),
        _ => OwnedLineState::Duplicated(owned),
    }
}
