//! Per-user credential mapping store (`identity:payload`, one per line).
//!
//! pam_u2f reads this file through the `authfile=` option of the owned
//! line. A merge keeps at most one record per identity: the previous record
//! is dropped and the new one appended, every other line is kept verbatim.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

use crate::error::{Error, Result};
use crate::fsutil::{self, Ownership};

/// Owner read/write, group read, nothing for others.
pub const MAPPING_STORE_MODE: u32 = 0o640;

/// One validated `identity:payload` record.
///
/// The payload is opaque (key handles and public keys produced by the
/// registration tool) and is never interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    identity: String,
    payload: String,
}

impl CredentialRecord {
    /// Validate the `identity:non-empty-payload` shape.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let invalid = |reason: &str| Error::validation("credential record", reason);

        if trimmed.lines().count() > 1 {
            return Err(invalid("expected a single line"));
        }
        let (identity, payload) = trimmed
            .split_once(':')
            .ok_or_else(|| invalid("missing ':' between identity and payload"))?;

        if identity.is_empty() {
            return Err(invalid("identity is empty"));
        }
        if identity.chars().any(char::is_whitespace) {
            return Err(invalid("identity contains whitespace"));
        }
        if payload.trim().is_empty() {
            return Err(invalid("payload is empty"));
        }

        Ok(Self {
            identity: identity.to_string(),
            payload: payload.to_string(),
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }
}

impl FromStr for CredentialRecord {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.identity, self.payload)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// No earlier record existed for the identity.
    Added,
    /// Earlier records were dropped (more than one only if the store was
    /// already inconsistent).
    Replaced { previous: usize },
}

/// Identity part of a store line, if it has one.
fn line_identity(line: &str) -> Option<&str> {
    line.split_once(':').map(|(identity, _)| identity)
}

/// Store lines, or nothing if the store does not exist yet.
pub fn read_store(path: &Path) -> Result<Vec<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(source) => Err(Error::Merge {
            path: path.to_path_buf(),
            identity: String::new(),
            source,
        }),
    }
}

/// Identities that currently have a record, in file order.
pub fn identities(path: &Path) -> Result<Vec<String>> {
    Ok(read_store(path)?
        .iter()
        .filter_map(|l| line_identity(l))
        .map(str::to_string)
        .collect())
}

/// Make `record` the only record for `identity` in the store at `path`.
///
/// The store is rewritten atomically and its mode forced to
/// [`MAPPING_STORE_MODE`], also when it already existed with other bits.
pub fn merge(path: &Path, identity: &str, record: &CredentialRecord) -> Result<MergeOutcome> {
    if record.identity() != identity {
        return Err(Error::validation(
            "credential record",
            format!(
                "record is for '{}' but '{}' is being enrolled",
                record.identity(),
                identity
            ),
        ));
    }

    let merge_err = |source: io::Error| Error::Merge {
        path: path.to_path_buf(),
        identity: identity.to_string(),
        source,
    };

    let existing = read_store(path).map_err(|e| match e {
        Error::Merge { source, .. } => merge_err(source),
        other => other,
    })?;

    let (dropped, mut kept): (Vec<String>, Vec<String>) = existing
        .into_iter()
        .partition(|l| line_identity(l) == Some(identity));
    kept.push(record.to_string());

    let mut content = kept.join("\n");
    content.push('\n');

    let owner = store_owner(path).map_err(merge_err)?;
    fsutil::write_atomic(path, content.as_bytes(), MAPPING_STORE_MODE, owner)
        .map_err(merge_err)?;

    let outcome = if dropped.is_empty() {
        MergeOutcome::Added
    } else {
        MergeOutcome::Replaced {
            previous: dropped.len(),
        }
    };
    info!(
        "Stored credential for '{}' in {} ({:?})",
        identity,
        path.display(),
        outcome
    );
    Ok(outcome)
}

/// root:root when running as root, otherwise whoever owns the store now.
fn store_owner(path: &Path) -> io::Result<Option<Ownership>> {
    #[cfg(unix)]
    {
        if nix::unistd::geteuid().is_root() {
            return Ok(Some(Ownership { uid: 0, gid: 0 }));
        }
    }

    match fsutil::ownership(path) {
        Ok(owner) => Ok(owner),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
