//! CLI subcommand: `sudokey enroll`
//!
//! Stores the user's credential, snapshots the stack, and writes the
//! pam_u2f line. Safe to re-run: a repeated enrollment replaces the same
//! record and leaves an up-to-date stack alone.

use anyhow::Result;
use clap::Args;

use super::{PolicyArgs, Session, read_record};
use crate::enroll::{self, EnrollOutcome, Enrollment, NewCredential, Preview};
use crate::mapping::MergeOutcome;
use crate::stack::{Anchor, PatchAction};

#[derive(Args)]
pub struct EnrollArgs {
    /// User whose credential is being registered
    #[arg(short, long)]
    pub user: String,

    /// Registration line (`user:credential`); read from stdin if omitted
    #[arg(short, long)]
    pub record: Option<String>,

    /// Show what would change without writing anything
    #[arg(long)]
    pub dry_run: bool,

    #[command(flatten)]
    pub policy: PolicyArgs,
}

pub fn run(args: EnrollArgs, session: &Session) -> Result<()> {
    let raw = read_record(args.record, &args.user)?;
    let enrollment = Enrollment {
        stack_path: session.stack_path(&args.policy),
        policy: session.policy(&args.policy)?,
        credential: Some(NewCredential::new(args.user, &raw)?),
        audit_dir: session.audit_dir(),
        lock: Some(session.lock()),
    };

    execute(&enrollment, args.dry_run)
}

/// Run or preview an enrollment and report it on stdout.
pub(super) fn execute(enrollment: &Enrollment, dry_run: bool) -> Result<()> {
    if dry_run {
        let preview = enroll::preview(enrollment)?;
        print_preview(enrollment, &preview);
        return Ok(());
    }

    let outcome = enroll::run(enrollment)?;
    print_outcome(enrollment, &outcome);
    Ok(())
}

fn print_preview(enrollment: &Enrollment, preview: &Preview) {
    println!("Dry run, nothing written.");
    println!();
    if let Some(credential) = &enrollment.credential {
        let verb = if preview.replaced_records > 0 {
            "replace"
        } else {
            "add"
        };
        println!(
            "Mapping:  would {} the record for '{}' in {}",
            verb,
            credential.identity,
            enrollment.policy.mapping_store().display()
        );
    }
    println!(
        "Stack:    {} ({})",
        enrollment.stack_path.display(),
        describe(&preview.plan.action)
    );
    println!("Line:     {}", preview.line);
    println!();
    for (i, line) in preview.plan.lines.iter().enumerate() {
        let marker = if i == preview.plan.action.index() {
            ">"
        } else {
            " "
        };
        println!("{} {:3}  {}", marker, i + 1, line.trim_end_matches('\r'));
    }
}

fn print_outcome(enrollment: &Enrollment, outcome: &EnrollOutcome) {
    if let (Some(credential), Some(merged)) = (&enrollment.credential, outcome.merged) {
        let verb = match merged {
            MergeOutcome::Added => "Added",
            MergeOutcome::Replaced { .. } => "Replaced",
        };
        println!(
            "{} credential for '{}' in {}",
            verb,
            credential.identity,
            enrollment.policy.mapping_store().display()
        );
    }
    println!(
        "Stack {}: {}",
        enrollment.stack_path.display(),
        describe(&outcome.action)
    );
    println!("Snapshot: {}", outcome.snapshot.path().display());
    println!(
        "Rollback: cp {} {}",
        outcome.snapshot.path().display(),
        enrollment.stack_path.display()
    );
    println!();
    println!("Keep a root shell open and test with `sudo -k && sudo true` before logging out.");
}

fn describe(action: &PatchAction) -> String {
    match *action {
        PatchAction::Unchanged { index } => format!("already up to date at line {}", index + 1),
        PatchAction::Replaced { index } => format!("replace line {}", index + 1),
        PatchAction::Inserted { index, anchor } => {
            let rule = match anchor {
                Anchor::BeforeInclude => "before @include common-auth",
                Anchor::AfterFirstAuth => "after the first auth line",
                Anchor::End => "at the end",
            };
            format!("insert at line {}, {}", index + 1, rule)
        }
    }
}
