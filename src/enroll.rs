//! The full enrollment sequence: merge credential, snapshot, patch.
//!
//! The credential must be on disk before the stack references it, so the
//! merge always runs first. The snapshot is taken right before the patch.
//! Every step is idempotent, which makes re-running after a partial failure
//! the recovery path.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::audit::{self, AuditAction};
use crate::concurrency::MutationLock;
use crate::error::{Error, Result};
use crate::mapping::{self, CredentialRecord, MergeOutcome};
use crate::policy::{OwnedLine, PolicyConfig, synthesize};
use crate::stack::{self, PatchAction, PatchPlan, Snapshot};

/// A credential to store for one identity.
#[derive(Debug, Clone)]
pub struct NewCredential {
    pub identity: String,
    pub record: CredentialRecord,
}

impl NewCredential {
    /// Parse `raw` and check it belongs to `identity`.
    pub fn new(identity: impl Into<String>, raw: &str) -> Result<Self> {
        let identity = identity.into();
        let record = CredentialRecord::parse(raw)?;
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
        Ok(Self { identity, record })
    }
}

/// Everything one run needs, resolved up front.
#[derive(Debug, Clone)]
pub struct Enrollment {
    pub stack_path: PathBuf,
    pub policy: PolicyConfig,
    /// `None` re-applies the policy without touching the mapping store.
    pub credential: Option<NewCredential>,
    /// State directory for the audit log; `None` disables auditing.
    pub audit_dir: Option<PathBuf>,
    pub lock: Option<MutationLock>,
}

#[derive(Debug, Clone)]
pub struct EnrollOutcome {
    pub merged: Option<MergeOutcome>,
    pub snapshot: Snapshot,
    pub action: PatchAction,
    pub line: OwnedLine,
}

/// What a run would do, computed without writing anything.
#[derive(Debug, Clone)]
pub struct Preview {
    pub line: OwnedLine,
    pub plan: PatchPlan,
    /// Records the credential would displace.
    pub replaced_records: usize,
}

/// Compute the outcome of [`run`] without touching any file.
pub fn preview(enrollment: &Enrollment) -> Result<Preview> {
    let line = synthesize(&enrollment.policy);
    let current = stack::read_stack(&enrollment.stack_path)?;
    let plan = stack::plan(&enrollment.stack_path, &current, &line)?;

    let replaced_records = match &enrollment.credential {
        Some(credential) => mapping::identities(enrollment.policy.mapping_store())?
            .iter()
            .filter(|id| **id == credential.identity)
            .count(),
        None => 0,
    };

    Ok(Preview {
        line,
        plan,
        replaced_records,
    })
}

/// Run the sequence under the mutation lock.
pub fn run(enrollment: &Enrollment) -> Result<EnrollOutcome> {
    let _guard = match &enrollment.lock {
        Some(lock) => Some(lock.acquire_or_wait()?),
        None => None,
    };

    let result = run_unlocked(enrollment);
    if let Err(e) = &result {
        warn!("Enrollment aborted: {}", e);
        record(
            enrollment,
            AuditAction::MutationAborted,
            &enrollment.stack_path,
            String::new(),
            Some(&format!("{}: {}", e.code(), e)),
        );
    }
    result
}

fn run_unlocked(enrollment: &Enrollment) -> Result<EnrollOutcome> {
    let stack_path = &enrollment.stack_path;
    let line = synthesize(&enrollment.policy);

    // Refuse a stack we cannot patch before the credential is written
    let current = stack::read_stack(stack_path)?;
    stack::plan(stack_path, &current, &line)?;

    let merged = match &enrollment.credential {
        Some(credential) => {
            let store = enrollment.policy.mapping_store();
            let outcome = mapping::merge(store, &credential.identity, &credential.record)?;
            record(
                enrollment,
                AuditAction::RecordMerged,
                store,
                file_sha256(store),
                Some(&credential.identity),
            );
            Some(outcome)
        }
        None => None,
    };

    let snapshot = stack::snapshot_unique(stack_path)?;
    record(
        enrollment,
        AuditAction::SnapshotTaken,
        stack_path,
        file_sha256(snapshot.path()),
        Some(&snapshot.path().display().to_string()),
    );

    let action = stack::patch(&snapshot, &line)?;
    let audit_action = match action {
        PatchAction::Unchanged { .. } => AuditAction::StackUnchanged,
        _ => AuditAction::StackPatched,
    };
    record(
        enrollment,
        audit_action,
        stack_path,
        file_sha256(stack_path),
        Some(line.as_str()),
    );

    info!(
        "{} now carries the pam_u2f line at line {} (snapshot: {})",
        stack_path.display(),
        action.index() + 1,
        snapshot.path().display()
    );

    Ok(EnrollOutcome {
        merged,
        snapshot,
        action,
        line,
    })
}

/// Audit failures never undo or fail a completed step.
fn record(
    enrollment: &Enrollment,
    action: AuditAction,
    target: &Path,
    content_sha256: String,
    detail: Option<&str>,
) {
    let Some(dir) = &enrollment.audit_dir else {
        return;
    };
    if let Err(e) = audit::append_audit_entry(dir, action, target, &content_sha256, detail) {
        warn!("Failed to write audit entry {}: {}", action.as_str(), e);
    }
}

fn file_sha256(path: &Path) -> String {
    fs::read(path)
        .map(|bytes| audit::sha256_hex(&bytes))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyMode;
    use crate::stack::{OwnedLineState, classify, owned_state};

    const STACK: &str = "#%PAM-1.0\n@include common-auth\n@include common-account\n";

    struct Fixture {
        _tmp: tempfile::TempDir,
        stack: PathBuf,
        store: PathBuf,
        state: PathBuf,
        run_dir: PathBuf,
    }

    fn fixture(stack_content: &str) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let stack = tmp.path().join("sudo");
        fs::write(&stack, stack_content).unwrap();
        Fixture {
            stack,
            store: tmp.path().join("u2f_mappings"),
            state: tmp.path().join("state"),
            run_dir: tmp.path().join("run"),
            _tmp: tmp,
        }
    }

    fn enrollment(fx: &Fixture, mode: PolicyMode, credential: Option<&str>) -> Enrollment {
        Enrollment {
            stack_path: fx.stack.clone(),
            policy: PolicyConfig::new(mode, true, &fx.store, "pam://host1").unwrap(),
            credential: credential.map(|raw| NewCredential::new("alice", raw).unwrap()),
            audit_dir: Some(fx.state.clone()),
            lock: Some(MutationLock::new(fx.run_dir.join("sudokey.lock"))),
        }
    }

    fn actions(fx: &Fixture) -> Vec<AuditAction> {
        audit::read_audit_log(&fx.state)
            .unwrap()
            .into_iter()
            .map(|e| e.action)
            .collect()
    }

    #[test]
    fn full_sequence_merges_snapshots_and_patches() {
        let fx = fixture(STACK);
        fs::write(&fx.store, "bob:BBB\n").unwrap();

        let outcome = run(&enrollment(&fx, PolicyMode::Passwordless, Some("alice:AAA"))).unwrap();

        assert_eq!(outcome.merged, Some(MergeOutcome::Added));
        assert!(matches!(outcome.action, PatchAction::Inserted { index: 1, .. }));
        assert_eq!(fs::read_to_string(outcome.snapshot.path()).unwrap(), STACK);

        let patched = fs::read_to_string(&fx.stack).unwrap();
        assert_eq!(patched.lines().nth(1), Some(outcome.line.as_str()));
        assert!(outcome.line.as_str().contains(fx.store.to_str().unwrap()));

        let mut store = mapping::read_store(&fx.store).unwrap();
        store.sort();
        assert_eq!(store, vec!["alice:AAA", "bob:BBB"]);

        assert_eq!(
            actions(&fx),
            vec![
                AuditAction::RecordMerged,
                AuditAction::SnapshotTaken,
                AuditAction::StackPatched
            ]
        );
        assert!(audit::verify_audit_chain(&fx.state).unwrap().is_empty());
    }

    #[test]
    fn rerun_is_idempotent() {
        let fx = fixture(STACK);
        let e = enrollment(&fx, PolicyMode::Passwordless, Some("alice:AAA"));

        run(&e).unwrap();
        let stack_after_first = fs::read_to_string(&fx.stack).unwrap();
        let second = run(&e).unwrap();

        assert_eq!(second.merged, Some(MergeOutcome::Replaced { previous: 1 }));
        assert!(matches!(second.action, PatchAction::Unchanged { .. }));
        assert_eq!(fs::read_to_string(&fx.stack).unwrap(), stack_after_first);
        assert_eq!(mapping::read_store(&fx.store).unwrap(), vec!["alice:AAA"]);
        assert_eq!(actions(&fx).last(), Some(&AuditAction::StackUnchanged));
    }

    #[test]
    fn policy_change_without_credential_replaces_line() {
        let fx = fixture(STACK);
        run(&enrollment(&fx, PolicyMode::Passwordless, Some("alice:AAA"))).unwrap();

        let outcome = run(&enrollment(&fx, PolicyMode::TwoFactor, None)).unwrap();

        assert_eq!(outcome.merged, None);
        assert_eq!(outcome.action, PatchAction::Replaced { index: 1 });
        let patched = fs::read_to_string(&fx.stack).unwrap();
        assert!(patched.contains("auth  required  pam_u2f.so"));
        assert_eq!(
            owned_state(&classify(&patched)),
            OwnedLineState::FoundAt(1)
        );
    }

    #[test]
    fn missing_stack_writes_nothing() {
        let fx = fixture(STACK);
        fs::remove_file(&fx.stack).unwrap();

        let err = run(&enrollment(&fx, PolicyMode::Passwordless, Some("alice:AAA"))).unwrap_err();

        assert!(matches!(err, Error::NotFound { .. }));
        assert!(!fx.store.exists());
        assert_eq!(actions(&fx), vec![AuditAction::MutationAborted]);
    }

    #[test]
    fn duplicate_owned_lines_abort_before_merge() {
        let content = "auth sufficient pam_u2f.so\nauth required pam_u2f.so\n";
        let fx = fixture(content);

        let err = run(&enrollment(&fx, PolicyMode::Passwordless, Some("alice:AAA"))).unwrap_err();

        assert_eq!(err.code(), crate::error::error_codes::DUPLICATE_OWNED_LINES);
        assert!(!fx.store.exists());
        assert!(stack::list_snapshots(&fx.stack).unwrap().is_empty());
        assert_eq!(fs::read_to_string(&fx.stack).unwrap(), content);
    }

    #[test]
    fn snapshot_failure_aborts_before_patch() {
        // Long enough that `<name>.bak.<timestamp>` exceeds NAME_MAX
        let tmp = tempfile::tempdir().unwrap();
        let stack_path = tmp.path().join("s".repeat(240));
        fs::write(&stack_path, STACK).unwrap();
        let fx = Fixture {
            stack: stack_path,
            store: tmp.path().join("u2f_mappings"),
            state: tmp.path().join("state"),
            run_dir: tmp.path().join("run"),
            _tmp: tmp,
        };

        let err = run(&enrollment(&fx, PolicyMode::Passwordless, Some("alice:AAA"))).unwrap_err();

        assert_eq!(err.code(), crate::error::error_codes::SNAPSHOT_FAILED);
        assert_eq!(fs::read_to_string(&fx.stack).unwrap(), STACK);
        assert_eq!(
            actions(&fx),
            vec![AuditAction::RecordMerged, AuditAction::MutationAborted]
        );
    }

    #[test]
    fn mismatched_credential_is_rejected() {
        let err = NewCredential::new("alice", "mallory:EVIL").unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        assert!(NewCredential::new("alice", "no-colon").is_err());
    }

    #[test]
    fn preview_writes_nothing() {
        let fx = fixture(STACK);
        fs::write(&fx.store, "alice:OLD\n").unwrap();
        let e = enrollment(&fx, PolicyMode::TwoFactor, Some("alice:NEW"));

        let preview = preview(&e).unwrap();

        assert_eq!(preview.replaced_records, 1);
        assert!(matches!(preview.plan.action, PatchAction::Inserted { .. }));
        assert_eq!(fs::read_to_string(&fx.stack).unwrap(), STACK);
        assert_eq!(fs::read_to_string(&fx.store).unwrap(), "alice:OLD\n");
        assert!(stack::list_snapshots(&fx.stack).unwrap().is_empty());
        assert!(!fx.state.exists());
    }

    #[test]
    fn audit_can_be_disabled() {
        let fx = fixture(STACK);
        let mut e = enrollment(&fx, PolicyMode::Passwordless, None);
        e.audit_dir = None;
        e.lock = None;

        run(&e).unwrap();

        assert!(!fx.state.exists());
    }
}
