//! Append-only, hash-chained log of every mutation sudokey performs.
//!
//! Stored at `<state_dir>/sudokey.audit.jsonl`. Each entry carries the
//! SHA-256 of the previous line, so an edited or truncated history shows up
//! as a broken chain.
//!
//! | Field | Description |
//! |-------|-------------|
//! | `ts` | RFC 3339 timestamp |
//! | `action` | `record_merged`, `snapshot_taken`, `stack_patched`, ... |
//! | `target` | File the action touched |
//! | `content_sha256` | SHA-256 of the file content after the action (empty if N/A) |
//! | `prev_entry_sha256` | SHA-256 of the previous JSONL line |
//! | `detail` | Identity, snapshot path, or error text |
//!
//! The first entry links to 64 zeros.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const AUDIT_FILENAME: &str = "sudokey.audit.jsonl";

const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub ts: String,
    pub action: AuditAction,
    pub target: String,
    pub content_sha256: String,
    pub prev_entry_sha256: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// A credential record was written to the mapping store.
    RecordMerged,
    /// The stack file was copied aside before a mutation.
    SnapshotTaken,
    /// The owned line was inserted or replaced.
    StackPatched,
    /// The owned line already matched; only the mode was enforced.
    StackUnchanged,
    /// A run stopped on an error after validation.
    MutationAborted,
    /// Previous audit entry corrupted, new chain segment started.
    ChainRecovery,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::RecordMerged => "record_merged",
            AuditAction::SnapshotTaken => "snapshot_taken",
            AuditAction::StackPatched => "stack_patched",
            AuditAction::StackUnchanged => "stack_unchanged",
            AuditAction::MutationAborted => "mutation_aborted",
            AuditAction::ChainRecovery => "chain_recovery",
        }
    }
}

/// Append an entry, hashing the last line of the existing log into it.
///
/// A last line that is not valid JSON gets a `ChainRecovery` entry first.
pub fn append_audit_entry(
    state_dir: &Path,
    action: AuditAction,
    target: &Path,
    content_sha256: &str,
    detail: Option<&str>,
) -> Result<()> {
    let path = audit_file_path(state_dir);
    fs::create_dir_all(state_dir)
        .with_context(|| format!("Failed to create {}", state_dir.display()))?;

    let prev_hash = match fs::read_to_string(&path) {
        Ok(content) => match content.lines().last() {
            Some(last_line) if !last_line.is_empty() => {
                if serde_json::from_str::<AuditEntry>(last_line).is_ok() {
                    sha256_hex(last_line.as_bytes())
                } else {
                    let recovery = AuditEntry {
                        ts: chrono::Utc::now().to_rfc3339(),
                        action: AuditAction::ChainRecovery,
                        target: path.display().to_string(),
                        content_sha256: String::new(),
                        prev_entry_sha256: sha256_hex(last_line.as_bytes()),
                        detail: Some(format!(
                            "Previous entry corrupted ({} bytes), new chain segment",
                            last_line.len()
                        )),
                    };
                    let recovery_json = serde_json::to_string(&recovery)
                        .context("Failed to serialize recovery entry")?;
                    append_line(&path, &recovery_json)?;
                    sha256_hex(recovery_json.as_bytes())
                }
            }
            _ => GENESIS_HASH.to_string(),
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => GENESIS_HASH.to_string(),
        Err(e) => return Err(e).context("Failed to read audit log"),
    };

    let entry = AuditEntry {
        ts: chrono::Utc::now().to_rfc3339(),
        action,
        target: target.display().to_string(),
        content_sha256: content_sha256.to_string(),
        prev_entry_sha256: prev_hash,
        detail: detail.map(|d| d.to_string()),
    };

    let json = serde_json::to_string(&entry).context("Failed to serialize audit entry")?;
    append_line(&path, &json)
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .context("Failed to open audit log")?;
    writeln!(file, "{}", line).context("Failed to write audit entry")?;
    Ok(())
}

/// All parseable entries; corrupted lines are skipped.
pub fn read_audit_log(state_dir: &Path) -> Result<Vec<AuditEntry>> {
    let path = audit_file_path(state_dir);
    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(&path).context("Failed to read audit log")?;
    Ok(content
        .lines()
        .filter(|l| !l.is_empty())
        .filter_map(|l| serde_json::from_str::<AuditEntry>(l).ok())
        .collect())
}

/// Indices of lines whose chain link is broken or which do not parse.
///
/// An empty result means the chain is intact.
pub fn verify_audit_chain(state_dir: &Path) -> Result<Vec<usize>> {
    let path = audit_file_path(state_dir);
    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(&path).context("Failed to read audit log")?;
    let lines: Vec<&str> = content.lines().filter(|l| !l.is_empty()).collect();

    let mut broken = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let Ok(entry) = serde_json::from_str::<AuditEntry>(line) else {
            broken.push(i);
            continue;
        };
        let expected = if i == 0 {
            GENESIS_HASH.to_string()
        } else {
            sha256_hex(lines[i - 1].as_bytes())
        };
        if entry.prev_entry_sha256 != expected {
            broken.push(i);
        }
    }

    Ok(broken)
}

pub fn audit_file_path(state_dir: &Path) -> PathBuf {
    state_dir.join(AUDIT_FILENAME)
}

/// Hex-encoded SHA-256.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}
