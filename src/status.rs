//! Read-only view of what is currently configured.

use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::fsutil;
use crate::mapping;
use crate::policy::{PolicyConfig, synthesize};
use crate::stack::{self, OwnedLineState, classify, owned_state};

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub stack_path: PathBuf,
    /// 1-based line numbers of every pam_u2f line in the stack.
    pub owned_lines: Vec<usize>,
    /// The pam_u2f line, when there is exactly one.
    pub current_line: Option<String>,
    pub expected_line: String,
    pub stack_mode: Option<u32>,
    pub mapping_store: PathBuf,
    pub identities: Vec<String>,
    pub latest_snapshot: Option<PathBuf>,
    pub snapshot_count: usize,
}

impl StatusReport {
    pub fn is_current(&self) -> bool {
        self.current_line.as_deref() == Some(self.expected_line.as_str())
    }

    pub fn has_duplicates(&self) -> bool {
        self.owned_lines.len() > 1
    }

    pub fn is_enrolled(&self, identity: &str) -> bool {
        self.identities.iter().any(|id| id == identity)
    }
}

/// Inspect the stack file and mapping store against `policy`.
pub fn gather(stack_path: &Path, policy: &PolicyConfig) -> Result<StatusReport> {
    let content = stack::read_stack(stack_path)?;
    let classified = classify(&content);

    let (owned_lines, current_line) = match owned_state(&classified) {
        OwnedLineState::NotFound => (Vec::new(), None),
        OwnedLineState::FoundAt(i) => {
            let text = classified[i].text;
            (vec![i + 1], Some(text.strip_suffix('\r').unwrap_or(text).to_string()))
        }
        OwnedLineState::Duplicated(indices) => (indices.iter().map(|i| i + 1).collect(), None),
    };

    let snapshots = stack::list_snapshots(stack_path)?;

    Ok(StatusReport {
        stack_path: stack_path.to_path_buf(),
        owned_lines,
        current_line,
        expected_line: synthesize(policy).as_str().to_string(),
        stack_mode: fsutil::mode_of(stack_path).ok(),
        mapping_store: policy.mapping_store().to_path_buf(),
        identities: mapping::identities(policy.mapping_store())?,
        snapshot_count: snapshots.len(),
        latest_snapshot: snapshots.last().cloned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyMode;
    use std::fs;

    fn policy(store: &Path, mode: PolicyMode) -> PolicyConfig {
        PolicyConfig::new(mode, false, store, "pam://h").unwrap()
    }

    #[test]
    fn reports_unconfigured_stack() {
        let tmp = tempfile::tempdir().unwrap();
        let stack_path = tmp.path().join("sudo");
        fs::write(&stack_path, "@include common-auth\n").unwrap();

        let report = gather(&stack_path, &policy(&tmp.path().join("map"), PolicyMode::Passwordless))
            .unwrap();

        assert!(report.owned_lines.is_empty());
        assert!(!report.is_current());
        assert!(report.identities.is_empty());
        assert!(report.latest_snapshot.is_none());
    }

    #[test]
    fn reports_configured_stack_and_policy_drift() {
        let tmp = tempfile::tempdir().unwrap();
        let store = tmp.path().join("map");
        fs::write(&store, "alice:AAA\n").unwrap();
        let passwordless = policy(&store, PolicyMode::Passwordless);

        let stack_path = tmp.path().join("sudo");
        let line = synthesize(&passwordless);
        fs::write(&stack_path, format!("{}\n@include common-auth\n", line)).unwrap();
        stack::snapshot_unique(&stack_path).unwrap();

        let report = gather(&stack_path, &passwordless).unwrap();
        assert_eq!(report.owned_lines, vec![1]);
        assert!(report.is_current());
        assert!(report.is_enrolled("alice"));
        assert_eq!(report.snapshot_count, 1);

        let drifted = gather(&stack_path, &policy(&store, PolicyMode::TwoFactor)).unwrap();
        assert!(!drifted.is_current());
    }

    #[test]
    fn crlf_stack_reports_current_line() {
        let tmp = tempfile::tempdir().unwrap();
        let store = tmp.path().join("map");
        let passwordless = policy(&store, PolicyMode::Passwordless);
        let stack_path = tmp.path().join("sudo");
        fs::write(
            &stack_path,
            format!("{}\r\n@include common-auth\r\n", synthesize(&passwordless)),
        )
        .unwrap();

        let report = gather(&stack_path, &passwordless).unwrap();
        assert!(report.is_current());
    }

    #[test]
    fn reports_duplicates() {
        let tmp = tempfile::tempdir().unwrap();
        let stack_path = tmp.path().join("sudo");
        fs::write(&stack_path, "auth sufficient pam_u2f.so\n\nauth required pam_u2f.so\n").unwrap();

        let report = gather(&stack_path, &policy(&tmp.path().join("map"), PolicyMode::TwoFactor))
            .unwrap();

        assert!(report.has_duplicates());
        assert_eq!(report.owned_lines, vec![1, 3]);
        assert!(report.current_line.is_none());
    }
}
